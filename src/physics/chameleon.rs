//! Assembly of the coupled chameleon problem from an interior and an exterior mesh.
use crate::allocators::DimAllocator;
use crate::assembly::SimplexAssembler;
use crate::config::SolverConfig;
use crate::error::{FormError, SolveError};
use crate::matching::{BoundaryMatcher, InterfaceOrientation};
use crate::mesh::procedural::{DEFAULT_INFINITY_TAG, DEFAULT_INTERFACE_TAG};
use crate::mesh::{Mesh, RegionTag};
use crate::monitor::StreamId;
use crate::physics::PhysicalParameters;
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::solver::{equilibrium_guess, DomainCouplingSolver, GlobalSolution, SubdomainSolver};
use crate::weak_form::{Density, DomainMapping, FormRole, WeakFormBuilder, WeakFormSpec};
use log::info;
use nalgebra::{DVector, DefaultAllocator};
use std::sync::Arc;

/// The chameleon field around a set of bodies, split at the truncation radius.
///
/// The interior mesh covers the ball of radius $R_c$ with the bodies. The exterior mesh covers the
/// same ball in Kelvin-inverted coordinates, with the point at infinity at its origin tagged as a
/// vertex region. Both meshes share the interface facet region on their boundary.
#[derive(Debug, Clone)]
pub struct ChameleonProblem<D>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    params: PhysicalParameters,
    interior_mesh: Mesh<D>,
    exterior_mesh: Mesh<D>,
    interface_tag: u32,
    infinity_tag: u32,
    orientation: InterfaceOrientation,
    element_order: Option<usize>,
}

impl<D> ChameleonProblem<D>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub fn new(params: PhysicalParameters, interior_mesh: Mesh<D>, exterior_mesh: Mesh<D>) -> Self {
        Self {
            params,
            interior_mesh,
            exterior_mesh,
            interface_tag: DEFAULT_INTERFACE_TAG,
            infinity_tag: DEFAULT_INFINITY_TAG,
            orientation: InterfaceOrientation::Same,
            element_order: None,
        }
    }

    pub fn with_interface_tag(mut self, tag: u32) -> Self {
        self.interface_tag = tag;
        self
    }

    pub fn with_infinity_tag(mut self, tag: u32) -> Self {
        self.infinity_tag = tag;
        self
    }

    pub fn with_orientation(mut self, orientation: InterfaceOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Solves with elements of the given order.
    ///
    /// Linear meshes are turned into quadratic ones before matching when order two is requested.
    /// By default the order of the meshes is used.
    pub fn with_element_order(mut self, order: usize) -> Self {
        self.element_order = Some(order);
        self
    }

    pub fn params(&self) -> &PhysicalParameters {
        &self.params
    }

    fn builder(&self, name: &str, mesh: Arc<Mesh<D>>) -> WeakFormBuilder<D> {
        let builder = WeakFormSpec::builder(name, mesh);
        match self.element_order {
            Some(order) => builder.element_order(order),
            None => builder,
        }
    }

    fn elevated(&self, mesh: &Mesh<D>) -> Mesh<D> {
        match self.element_order {
            Some(2) => mesh.to_quadratic(),
            _ => mesh.clone(),
        }
    }

    /// Governing form of the interior, with the densities of the physical parameters.
    pub fn interior_form(&self, mesh: Arc<Mesh<D>>) -> Result<WeakFormSpec<D>, FormError> {
        self.builder("interior", mesh).build(&self.params)
    }

    /// Form measuring the residual of an interior field, without any constraints.
    pub fn residual_form(&self, mesh: Arc<Mesh<D>>) -> Result<WeakFormSpec<D>, FormError> {
        self.builder("interior residual", mesh)
            .role(FormRole::Residual)
            .build(&self.params)
    }

    /// Governing form of the inverted exterior, filled with vacuum and pinned to the
    /// background value at infinity.
    pub fn exterior_form(&self, mesh: Arc<Mesh<D>>) -> Result<WeakFormSpec<D>, FormError> {
        self.builder("exterior", mesh)
            .mapping(DomainMapping::Inverted {
                radius: self.params.truncation_radius,
            })
            .density(Density::Uniform(self.params.rho_vac))
            .essential_bc(RegionTag::Vertex(self.infinity_tag), self.params.phi_inf())
            .build(&self.params)
    }

    /// Matches the exterior interface onto the interior one and sets up the coupled solver.
    ///
    /// The interior starts from the local equilibrium of every node, the exterior from the
    /// background value.
    pub fn coupling_solver(self, config: &SolverConfig) -> Result<DomainCouplingSolver<D>, SolveError> {
        let interface = RegionTag::Facet(self.interface_tag);
        let interior_mesh = self.elevated(&self.interior_mesh);
        let mut exterior_mesh = self.elevated(&self.exterior_mesh);
        let interface_match = BoundaryMatcher::new(config.matching_tolerance)
            .with_orientation(self.orientation)
            .match_interfaces(&interior_mesh, &mut exterior_mesh, interface, interface)?;
        info!(
            "Matched {} interface nodes with max drift {:e}",
            interface_match.correspondence.len(),
            interface_match.max_drift
        );

        let interior_mesh = Arc::new(interior_mesh);
        let exterior_mesh = Arc::new(exterior_mesh);
        let interior_form = self.interior_form(Arc::clone(&interior_mesh))?;
        let residual_form = self.residual_form(interior_mesh)?;
        let exterior_form = self.exterior_form(exterior_mesh)?;

        let phi_inf = self.params.phi_inf();
        let interior_guess = equilibrium_guess(&interior_form);
        let exterior_guess = DVector::repeat(exterior_form.mesh().num_vertices(), phi_inf);

        let interior = SubdomainSolver::new(StreamId::Interior, interior_form, SimplexAssembler::new(), interior_guess)
            .with_interface(self.interface_tag)?;
        let exterior = SubdomainSolver::new(StreamId::Exterior, exterior_form, SimplexAssembler::new(), exterior_guess)
            .with_interface(self.interface_tag)?;

        let solver = DomainCouplingSolver::new(interior, exterior, phi_inf, config.newton, config.coupling)?
            .with_residual_form(residual_form);
        Ok(solver)
    }

    /// Sets up and runs the coupled solve with the outer iteration limits of the configuration.
    pub fn solve(self, config: &SolverConfig) -> Result<GlobalSolution<D>, SolveError> {
        let mut solver = self.coupling_solver(config)?;
        solver.solve(
            config.coupling.max_outer_iterations,
            config.coupling.interface_tolerance,
        )
    }
}
