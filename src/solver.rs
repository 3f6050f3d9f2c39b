//! Newton solvers for single sub-domains and the interface coupling of two sub-domains.
use crate::allocators::DimAllocator;
use crate::assembly::{BoundaryConditions, FemProvider, SimplexAssembler};
use crate::config::NewtonSettings;
use crate::error::{FormError, SolveError, UnknownRegionError};
use crate::mesh::RegionTag;
use crate::monitor::{ConvergenceMonitor, StreamId};
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::weak_form::WeakFormSpec;
use log::debug;
use nalgebra::{DVector, DefaultAllocator};
use std::collections::BTreeSet;

mod coupling;
pub mod line_search;
mod newton;

pub use coupling::*;
pub use newton::newton_solve;

use line_search::{FractionToBoundary, LineSearch, NoLineSearch};
use newton::free_residual_norm;

/// Nodal values of a sub-domain field together with the number of Newton steps taken so far.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    pub values: DVector<f64>,
    pub iteration: usize,
}

impl FieldState {
    pub fn new(values: DVector<f64>) -> Self {
        Self { values, iteration: 0 }
    }
}

/// Data imposed on the coupling interface for one solve, given in interface node order.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryData {
    None,
    /// Prescribed interface values.
    Dirichlet(Vec<f64>),
    /// Nodal loads added to the residual of the interface nodes.
    Flux(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Interface {
    tag: u32,
    nodes: Vec<usize>,
}

/// Solves the nonlinear problem of a single sub-domain and owns its field.
#[derive(Debug)]
pub struct SubdomainSolver<D, P = SimplexAssembler>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    stream: StreamId,
    form: WeakFormSpec<D>,
    provider: P,
    state: FieldState,
    interface: Option<Interface>,
}

impl<D, P> SubdomainSolver<D, P>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
    P: FemProvider<D>,
{
    /// # Panics
    ///
    /// Panics if the initial guess does not have one value per mesh vertex.
    pub fn new(stream: StreamId, form: WeakFormSpec<D>, provider: P, initial_guess: DVector<f64>) -> Self {
        assert_eq!(
            initial_guess.len(),
            form.mesh().num_vertices(),
            "initial guess must have one value per mesh vertex"
        );
        Self {
            stream,
            form,
            provider,
            state: FieldState::new(initial_guess),
            interface: None,
        }
    }

    /// Declares the facet region through which this sub-domain is coupled to another one.
    pub fn with_interface(mut self, tag: u32) -> Result<Self, FormError> {
        let region_tag = RegionTag::Facet(tag);
        let region = self.form.mesh().facet_region(tag).ok_or_else(|| {
            FormError::from(UnknownRegionError {
                form: self.form.name().to_string(),
                tag: region_tag,
            })
        })?;
        self.interface = Some(Interface {
            tag,
            nodes: region.nodes().to_vec(),
        });
        Ok(self)
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn form(&self) -> &WeakFormSpec<D> {
        &self.form
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn interface_tag(&self) -> Option<u32> {
        self.interface.as_ref().map(|interface| interface.tag)
    }

    /// Nodes of the coupling interface, in interface order. Empty if no interface was declared.
    pub fn interface_nodes(&self) -> &[usize] {
        self.interface
            .as_ref()
            .map(|interface| interface.nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Replaces the field, resetting the iteration counter.
    pub fn reset(&mut self, values: DVector<f64>) {
        assert_eq!(values.len(), self.state.values.len());
        self.state = FieldState::new(values);
    }

    /// Boundary conditions combining the essential conditions of the form with interface data.
    ///
    /// # Panics
    ///
    /// Panics if interface data does not have one value per interface node.
    pub fn boundary_conditions(&self, boundary: &BoundaryData) -> BoundaryConditions {
        let mut bcs = BoundaryConditions {
            essential: self.form.essential_dofs(),
            natural: Default::default(),
        };
        let nodes = self.interface_nodes();
        match boundary {
            BoundaryData::None => {}
            BoundaryData::Dirichlet(values) => {
                assert_eq!(values.len(), nodes.len(), "interface trace has wrong length");
                bcs.essential
                    .extend(nodes.iter().copied().zip(values.iter().copied()));
            }
            BoundaryData::Flux(values) => {
                assert_eq!(values.len(), nodes.len(), "interface flux has wrong length");
                bcs.natural
                    .extend(nodes.iter().copied().zip(values.iter().copied()));
            }
        }
        bcs
    }

    /// Runs Newton's method with the given interface data.
    ///
    /// Returns the number of Newton steps taken. On failure the field is restored to its value
    /// before the call.
    pub fn solve(
        &mut self,
        boundary: &BoundaryData,
        settings: &NewtonSettings,
        monitor: &mut ConvergenceMonitor,
    ) -> Result<usize, SolveError> {
        let bcs = self.boundary_conditions(boundary);
        let fraction_to_boundary = FractionToBoundary {
            fraction: settings.positivity_fraction,
            min_step: settings.min_step,
        };
        let line_search: &dyn LineSearch = if self.form.nonlinear_term().requires_positive_field() {
            &fraction_to_boundary
        } else {
            &NoLineSearch
        };

        let snapshot = self.state.clone();
        let result = newton_solve(
            &mut self.provider,
            &self.form,
            &bcs,
            &mut self.state,
            self.stream,
            settings,
            line_search,
            monitor,
        );
        match &result {
            Ok(iterations) => debug!("{} solve converged in {} Newton iterations", self.stream, iterations),
            Err(err) => {
                debug!("{} solve failed, restoring field: {}", self.stream, err);
                self.state = snapshot;
            }
        }
        result
    }

    /// Field values on the interface nodes, in interface order.
    pub fn interface_trace(&self) -> Vec<f64> {
        self.interface_nodes()
            .iter()
            .map(|&node| self.state.values[node])
            .collect()
    }

    /// Residual of the interface nodes without any constraints or loads.
    ///
    /// For a field solved with a Dirichlet trace, this is the nodal flux through the interface
    /// that balances the interior equations.
    pub fn interface_flux(&mut self) -> Vec<f64> {
        let residual = self
            .provider
            .residual(&self.form, &self.state.values, &BoundaryConditions::default());
        self.interface_nodes()
            .iter()
            .map(|&node| residual[node])
            .collect()
    }

    /// Norm of the residual of another form on the same mesh, evaluated at the current field.
    ///
    /// Degrees of freedom constrained by either form and the interface nodes are excluded.
    ///
    /// # Panics
    ///
    /// Panics if the form is defined on a mesh with a different number of vertices.
    pub fn residual_norm_with(&mut self, residual_form: &WeakFormSpec<D>) -> f64 {
        assert_eq!(residual_form.mesh().num_vertices(), self.state.values.len());
        let mut bcs = BoundaryConditions::default();
        let excluded: BTreeSet<usize> = self
            .form
            .essential_dofs()
            .into_keys()
            .chain(residual_form.essential_dofs().into_keys())
            .chain(self.interface_nodes().iter().copied())
            .collect();
        bcs.essential = excluded.into_iter().map(|dof| (dof, 0.0)).collect();
        let residual = self
            .provider
            .residual(residual_form, &self.state.values, &BoundaryConditions::default());
        free_residual_norm(&residual, &bcs)
    }

    pub fn energy(&mut self) -> f64 {
        self.provider.energy(&self.form, &self.state.values)
    }

    pub fn into_state(self) -> FieldState {
        self.state
    }
}

/// Initial guess sitting at the local minimum of the effective potential at every node.
///
/// The nodal density is the ratio of the density load and the lumped mass of each node. Nodes where
/// no equilibrium exists start at one. Essential boundary values of the form are applied.
pub fn equilibrium_guess<D>(form: &WeakFormSpec<D>) -> DVector<f64>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let mut assembler = SimplexAssembler::new();
    let mass = assembler.lumped_mass(form);
    let load = assembler.load(form);
    let term = form.nonlinear_term();
    let mut guess = DVector::from_fn(mass.len(), |i, _| {
        Some(mass[i])
            .filter(|&m| m > 0.0)
            .and_then(|m| term.equilibrium(load[i] / m))
            .filter(|u| u.is_finite())
            .unwrap_or(1.0)
    });
    for (dof, value) in form.essential_dofs() {
        guess[dof] = value;
    }
    guess
}
