use crate::allocators::DimAllocator;
use crate::assembly::{FemProvider, SimplexAssembler};
use crate::config::{CouplingSettings, NewtonSettings, Relaxation};
use crate::error::{DivergenceReason, MeshMismatchError, MeshSide, OuterDivergenceError, SolveError};
use crate::mesh::procedural::DEFAULT_INTERFACE_TAG;
use crate::mesh::{Mesh, RegionTag};
use crate::monitor::{ContinueDecision, ConvergenceMonitor, ConvergenceRecord, Criteria, Metrics, StreamId};
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::solver::{BoundaryData, FieldState, SubdomainSolver};
use crate::weak_form::{DomainMapping, WeakFormSpec};
use itertools::izip;
use log::{info, warn};
use nalgebra::DefaultAllocator;
use std::sync::Arc;
use std::time::Instant;

/// Stage of the outer coupling iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CouplingPhase {
    SolvingInterior,
    Exchanging,
    SolvingExterior,
    Converged,
    Failed,
}

/// Interface relaxation factor, updated from successive interface residuals.
#[derive(Debug, Clone)]
struct RelaxationState {
    relaxation: Relaxation,
    omega: f64,
    previous: Option<Vec<f64>>,
}

impl RelaxationState {
    fn new(relaxation: Relaxation) -> Self {
        let omega = match relaxation {
            Relaxation::Fixed { omega } => omega,
            Relaxation::Aitken { initial, .. } => initial,
        };
        Self {
            relaxation,
            omega,
            previous: None,
        }
    }

    /// Relaxation factor for the update with the given interface residual $r = \tilde g - g$.
    ///
    /// Aitken's rule sets $\omega_k = -\omega_{k-1} r_{k-1}^T (r_k - r_{k-1}) / |r_k - r_{k-1}|^2$.
    fn next(&mut self, residual: &[f64]) -> f64 {
        if let Relaxation::Aitken { min, max, .. } = self.relaxation {
            if let Some(previous) = &self.previous {
                let (numerator, denominator) = izip!(residual, previous).fold((0.0, 0.0), |(num, den), (r, r_prev)| {
                    let diff = r - r_prev;
                    (num + r_prev * diff, den + diff * diff)
                });
                if denominator > 0.0 {
                    let omega = -self.omega * numerator / denominator;
                    if omega.is_finite() {
                        self.omega = omega.max(min).min(max);
                    }
                }
            }
            self.previous = Some(residual.to_vec());
        }
        self.omega
    }
}

/// Converged solution of a coupled interior/exterior problem.
#[derive(Debug, Clone)]
pub struct GlobalSolution<D>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub interior: FieldState,
    pub exterior: FieldState,
    pub interior_mesh: Arc<Mesh<D>>,
    pub exterior_mesh: Arc<Mesh<D>>,
    pub exterior_mapping: DomainMapping,
    pub interior_interface: Vec<usize>,
    pub exterior_interface: Vec<usize>,
    pub interior_record: ConvergenceRecord,
    pub exterior_record: ConvergenceRecord,
    pub interface_record: ConvergenceRecord,
    /// Max-norm of the final interface mismatch.
    pub interface_mismatch: f64,
    pub outer_iterations: usize,
    /// Residual norm of the interior field measured with the residual form, if one was given.
    pub residual_norm: Option<f64>,
}

impl<D> GlobalSolution<D>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub fn interior_trace(&self) -> Vec<f64> {
        self.interior_interface
            .iter()
            .map(|&node| self.interior.values[node])
            .collect()
    }

    pub fn exterior_trace(&self) -> Vec<f64> {
        self.exterior_interface
            .iter()
            .map(|&node| self.exterior.values[node])
            .collect()
    }

    pub fn records(&self) -> [&ConvergenceRecord; 3] {
        [&self.interior_record, &self.exterior_record, &self.interface_record]
    }
}

/// Couples an interior and an exterior sub-domain through their shared interface.
///
/// Every outer iteration solves the interior with the current interface trace as Dirichlet data,
/// passes the resulting interface flux to the exterior as a natural condition, and relaxes the
/// trace towards the exterior trace. At convergence the two sub-domain fields solve the
/// discrete problem on the union of both meshes.
#[derive(Debug)]
pub struct DomainCouplingSolver<D, P = SimplexAssembler>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    interior: SubdomainSolver<D, P>,
    exterior: SubdomainSolver<D, P>,
    residual_form: Option<WeakFormSpec<D>>,
    newton: NewtonSettings,
    settings: CouplingSettings,
    trace: Vec<f64>,
    monitor: ConvergenceMonitor,
    phase: CouplingPhase,
}

fn missing_interface(mesh: MeshSide) -> MeshMismatchError {
    MeshMismatchError::MissingRegion {
        mesh,
        tag: RegionTag::Facet(DEFAULT_INTERFACE_TAG),
    }
}

impl<D, P> DomainCouplingSolver<D, P>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
    P: FemProvider<D>,
{
    /// Sets up the coupling of two sub-domain solvers with declared interfaces.
    ///
    /// The interface nodes of both meshes must coincide bitwise in interface order, as established
    /// by [`BoundaryMatcher`](crate::matching::BoundaryMatcher). The interface trace starts at
    /// `initial_trace` on every node.
    pub fn new(
        interior: SubdomainSolver<D, P>,
        exterior: SubdomainSolver<D, P>,
        initial_trace: f64,
        newton: NewtonSettings,
        settings: CouplingSettings,
    ) -> Result<Self, MeshMismatchError> {
        if interior.interface_tag().is_none() {
            return Err(missing_interface(MeshSide::Reference));
        }
        if exterior.interface_tag().is_none() {
            return Err(missing_interface(MeshSide::Target));
        }

        let interior_nodes = interior.interface_nodes();
        let exterior_nodes = exterior.interface_nodes();
        if interior_nodes.len() != exterior_nodes.len() {
            return Err(MeshMismatchError::NodeCountMismatch {
                reference: interior_nodes.len(),
                target: exterior_nodes.len(),
            });
        }
        let interior_vertices = interior.form().mesh().vertices();
        let exterior_vertices = exterior.form().mesh().vertices();
        for (i, (&a, &b)) in interior_nodes.iter().zip(exterior_nodes).enumerate() {
            let p = &interior_vertices[a];
            let q = &exterior_vertices[b];
            let identical = izip!(p.iter(), q.iter()).all(|(x, y)| x.to_bits() == y.to_bits());
            if !identical {
                return Err(MeshMismatchError::NodeTooFar {
                    node: i,
                    distance: (p - q).norm(),
                    tolerance: 0.0,
                });
            }
        }

        let trace = vec![initial_trace; interior_nodes.len()];
        Ok(Self {
            interior,
            exterior,
            residual_form: None,
            newton,
            settings,
            trace,
            monitor: ConvergenceMonitor::new(),
            phase: CouplingPhase::SolvingInterior,
        })
    }

    /// Form used to measure the residual of the converged interior field.
    pub fn with_residual_form(mut self, form: WeakFormSpec<D>) -> Self {
        self.residual_form = Some(form);
        self
    }

    pub fn phase(&self) -> CouplingPhase {
        self.phase
    }

    pub fn monitor(&self) -> &ConvergenceMonitor {
        &self.monitor
    }

    pub fn interior(&self) -> &SubdomainSolver<D, P> {
        &self.interior
    }

    pub fn exterior(&self) -> &SubdomainSolver<D, P> {
        &self.exterior
    }

    /// Current interface trace imposed on the interior.
    pub fn trace(&self) -> &[f64] {
        &self.trace
    }

    pub fn settings(&self) -> &CouplingSettings {
        &self.settings
    }

    fn fail(&mut self, err: impl Into<SolveError>) -> SolveError {
        self.phase = CouplingPhase::Failed;
        err.into()
    }

    fn outer_divergence(&mut self, reason: DivergenceReason, iterations: usize, last_mismatch: f64) -> SolveError {
        warn!(
            "Interface coupling failed after {} outer iterations: {}",
            iterations, reason
        );
        let err = OuterDivergenceError {
            reason,
            iterations,
            last_mismatch,
            history: self.monitor.record(StreamId::Interface),
        };
        self.fail(err)
    }

    /// Iterates until the interface traces of both sub-domains agree to within `interface_tol`
    /// in the max-norm, with at most `max_outer` outer iterations.
    ///
    /// Both sub-domain solves of the final outer iteration must have converged. The time limit of
    /// the coupling settings is checked between outer iterations only.
    pub fn solve(&mut self, max_outer: usize, interface_tol: f64) -> Result<GlobalSolution<D>, SolveError> {
        let start = Instant::now();
        let time_limit = self.settings.time_limit();
        let criteria = Criteria {
            abs_tol: interface_tol,
            rel_tol: 0.0,
            max_iterations: max_outer,
            min_iterations: 1,
            divergence_factor: f64::INFINITY,
        };
        self.monitor.begin(StreamId::Interface, criteria);
        let mut relaxation = RelaxationState::new(self.settings.relaxation);
        let mut last_mismatch = f64::NAN;

        let mut outer = 0;
        loop {
            if outer > 0 {
                if let Some(limit) = time_limit {
                    if start.elapsed() > limit {
                        return Err(self.outer_divergence(DivergenceReason::TimeLimit, outer, last_mismatch));
                    }
                }
            }
            outer += 1;

            self.phase = CouplingPhase::SolvingInterior;
            let dirichlet = BoundaryData::Dirichlet(self.trace.clone());
            if let Err(err) = self
                .interior
                .solve(&dirichlet, &self.newton, &mut self.monitor)
            {
                return Err(self.fail(err));
            }

            self.phase = CouplingPhase::Exchanging;
            let flux = BoundaryData::Flux(self.interior.interface_flux());

            self.phase = CouplingPhase::SolvingExterior;
            if let Err(err) = self
                .exterior
                .solve(&flux, &self.newton, &mut self.monitor)
            {
                return Err(self.fail(err));
            }

            self.phase = CouplingPhase::Exchanging;
            let exterior_trace = self.exterior.interface_trace();
            let update: Vec<f64> = izip!(&exterior_trace, &self.trace)
                .map(|(g_ext, g)| g_ext - g)
                .collect();
            let mismatch = update.iter().fold(0.0, |max, r| f64::max(max, r.abs()));
            let trace_norm = self.trace.iter().fold(0.0, |max, g| f64::max(max, g.abs()));
            last_mismatch = mismatch;

            let metrics = Metrics {
                relative_increment: Some(if trace_norm > 0.0 { mismatch / trace_norm } else { mismatch }),
                ..Metrics::default()
            };
            match self
                .monitor
                .observe(StreamId::Interface, outer, mismatch, metrics)
            {
                ContinueDecision::Continue => {
                    let omega = relaxation.next(&update);
                    info!(
                        "Outer iteration {}: interface mismatch {:e}, relaxation {:.3}",
                        outer, mismatch, omega
                    );
                    for (g, r) in izip!(&mut self.trace, &update) {
                        *g += omega * r;
                    }
                }
                ContinueDecision::Converged => {
                    info!("Interface coupling converged in {} outer iterations, mismatch {:e}", outer, mismatch);
                    self.phase = CouplingPhase::Converged;
                    return Ok(self.solution(outer, mismatch));
                }
                ContinueDecision::Abort(reason) => {
                    return Err(self.outer_divergence(reason, outer, mismatch));
                }
            }
        }
    }

    fn solution(&mut self, outer_iterations: usize, interface_mismatch: f64) -> GlobalSolution<D> {
        let residual_norm = self
            .residual_form
            .as_ref()
            .map(|form| self.interior.residual_norm_with(form));
        GlobalSolution {
            interior: self.interior.state().clone(),
            exterior: self.exterior.state().clone(),
            interior_mesh: Arc::clone(self.interior.form().mesh()),
            exterior_mesh: Arc::clone(self.exterior.form().mesh()),
            exterior_mapping: self.exterior.form().mapping(),
            interior_interface: self.interior.interface_nodes().to_vec(),
            exterior_interface: self.exterior.interface_nodes().to_vec(),
            interior_record: self.monitor.record(StreamId::Interior),
            exterior_record: self.monitor.record(StreamId::Exterior),
            interface_record: self.monitor.record(StreamId::Interface),
            interface_mismatch,
            outer_iterations,
            residual_norm,
        }
    }
}
