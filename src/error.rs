//! Error taxonomy for matching, weak form construction and solving.
//!
//! Every error that leaves a solving component carries enough context to reproduce the failure:
//! the stream it came from, the iteration count, the last residual and the convergence history
//! accumulated so far.
use crate::mesh::RegionTag;
use crate::monitor::{ConvergenceRecord, StreamId};
use nalgebra_sparse::factorization::CholeskyError;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// The interface geometries of two meshes are incompatible.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshMismatchError {
    /// The interface region is missing from one of the meshes, or is not a facet region.
    MissingRegion { mesh: MeshSide, tag: RegionTag },
    /// The interface regions contain a different number of nodes.
    NodeCountMismatch { reference: usize, target: usize },
    /// The nearest target node of a reference interface node lies outside the tolerance.
    NodeTooFar { node: usize, distance: f64, tolerance: f64 },
    /// Two reference nodes were matched to the same target node.
    AmbiguousCorrespondence { target_node: usize },
    /// A reference interface facet has no counterpart in the target interface,
    /// or its counterpart bounds the target domain from the wrong side.
    FacetTopology { facet: usize, reason: FacetTopologyIssue },
}

/// Which of the two meshes involved in interface matching an error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeshSide {
    Reference,
    Target,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FacetTopologyIssue {
    /// The mapped facet is not a facet of the target interface.
    Missing,
    /// The mapped facet has no adjacent cell in the target mesh.
    NoAdjacentCell,
    /// The adjacent cells lie on inconsistent sides of the interface.
    Orientation,
}

impl Display for MeshMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshMismatchError::MissingRegion { mesh, tag } => {
                write!(f, "{:?} mesh has no facet region {}", mesh, tag)
            }
            MeshMismatchError::NodeCountMismatch { reference, target } => write!(
                f,
                "interface node count mismatch: reference has {} nodes, target has {}",
                reference, target
            ),
            MeshMismatchError::NodeTooFar {
                node,
                distance,
                tolerance,
            } => write!(
                f,
                "reference interface node {} has no target node within tolerance {:e} (nearest at {:e})",
                node, tolerance, distance
            ),
            MeshMismatchError::AmbiguousCorrespondence { target_node } => write!(
                f,
                "target interface node {} is the nearest node of more than one reference node",
                target_node
            ),
            MeshMismatchError::FacetTopology { facet, reason } => {
                write!(f, "reference interface facet {} does not map onto the target: ", facet)?;
                match reason {
                    FacetTopologyIssue::Missing => write!(f, "no such target facet"),
                    FacetTopologyIssue::NoAdjacentCell => write!(f, "target facet has no adjacent cell"),
                    FacetTopologyIssue::Orientation => write!(f, "inconsistent orientation"),
                }
            }
        }
    }
}

impl Error for MeshMismatchError {}

/// A weak form references a region tag absent from its mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRegionError {
    pub form: String,
    pub tag: RegionTag,
}

impl Display for UnknownRegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "weak form '{}' references unknown region {}", self.form, self.tag)
    }
}

impl Error for UnknownRegionError {}

/// Errors raised while building a [`WeakFormSpec`](crate::weak_form::WeakFormSpec).
#[derive(Debug, Clone, PartialEq)]
pub enum FormError {
    UnknownRegion(UnknownRegionError),
    /// A region of the wrong kind was used, e.g. a facet region as a density region.
    InvalidRegionKind { form: String, tag: RegionTag, expected: &'static str },
    /// The coordinate system is not defined for the dimension of the mesh.
    IncompatibleCoordinates { form: String, coordinates: &'static str, dim: usize },
    UnsupportedElementOrder { form: String, order: usize },
    /// The requested element order differs from the order of the mesh cells.
    ElementOrderMismatch { form: String, order: usize, mesh_order: usize },
    /// A per-region density map leaves cells without a density.
    UncoveredCells { form: String, count: usize },
    InvalidParameter { name: &'static str, value: f64 },
    /// A cell of the mesh has zero volume.
    DegenerateCell { form: String, cell: usize },
}

impl Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormError::UnknownRegion(err) => write!(f, "{}", err),
            FormError::InvalidRegionKind { form, tag, expected } => {
                write!(f, "weak form '{}': region {} is not a {} region", form, tag, expected)
            }
            FormError::IncompatibleCoordinates { form, coordinates, dim } => write!(
                f,
                "weak form '{}': {} coordinates are not defined for meshes of dimension {}",
                form, coordinates, dim
            ),
            FormError::UnsupportedElementOrder { form, order } => {
                write!(f, "weak form '{}': element order {} is not supported", form, order)
            }
            FormError::ElementOrderMismatch { form, order, mesh_order } => write!(
                f,
                "weak form '{}': element order {} does not match the mesh of order {}",
                form, order, mesh_order
            ),
            FormError::UncoveredCells { form, count } => {
                write!(f, "weak form '{}': {} cells have no density assigned", form, count)
            }
            FormError::InvalidParameter { name, value } => {
                write!(f, "invalid value {} for parameter '{}'", value, name)
            }
            FormError::DegenerateCell { form, cell } => {
                write!(f, "weak form '{}': cell {} is degenerate", form, cell)
            }
        }
    }
}

impl Error for FormError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FormError::UnknownRegion(err) => Some(err),
            _ => None,
        }
    }
}

impl From<UnknownRegionError> for FormError {
    fn from(err: UnknownRegionError) -> Self {
        FormError::UnknownRegion(err)
    }
}

/// The delegated linear solve failed.
#[derive(Debug)]
pub enum LinearSolveError {
    /// The system matrix is not symmetric positive definite.
    Factorization(CholeskyError),
    /// The solution contains NaN or infinite entries.
    NonFinite,
    /// Matrix and right-hand side have incompatible sizes.
    DimensionMismatch { rows: usize, rhs: usize },
}

impl Display for LinearSolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolveError::Factorization(err) => write!(f, "Cholesky factorization failed: {}", err),
            LinearSolveError::NonFinite => write!(f, "linear solve produced non-finite values"),
            LinearSolveError::DimensionMismatch { rows, rhs } => {
                write!(f, "system has {} rows but right-hand side has {} entries", rows, rhs)
            }
        }
    }
}

impl Error for LinearSolveError {}

impl From<CholeskyError> for LinearSolveError {
    fn from(err: CholeskyError) -> Self {
        LinearSolveError::Factorization(err)
    }
}

/// Why a nonlinear iteration was abandoned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DivergenceReason {
    /// The maximum number of iterations was reached without meeting the tolerances.
    IterationCap,
    /// The residual grew beyond the configured divergence factor of its initial value.
    ResidualGrowth,
    /// The residual or field became NaN or infinite.
    NonFinite,
    /// The line search could not keep the field admissible.
    LineSearch,
    /// The configured wall-clock budget was exhausted between iterations.
    TimeLimit,
}

impl Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DivergenceReason::IterationCap => "maximum number of iterations reached",
            DivergenceReason::ResidualGrowth => "residual growth exceeded divergence threshold",
            DivergenceReason::NonFinite => "non-finite residual",
            DivergenceReason::LineSearch => "line search failed to keep the field positive",
            DivergenceReason::TimeLimit => "time limit exceeded",
        };
        write!(f, "{}", s)
    }
}

/// A sub-domain Newton iteration failed to converge.
#[derive(Debug, Clone)]
pub struct NonlinearDivergenceError {
    pub stream: StreamId,
    pub reason: DivergenceReason,
    pub iterations: usize,
    pub last_residual: f64,
    pub history: ConvergenceRecord,
}

impl Display for NonlinearDivergenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} solve diverged after {} iterations ({}), last residual {:e}",
            self.stream, self.iterations, self.reason, self.last_residual
        )
    }
}

impl Error for NonlinearDivergenceError {}

/// The outer interface coupling loop failed to converge.
#[derive(Debug, Clone)]
pub struct OuterDivergenceError {
    pub reason: DivergenceReason,
    pub iterations: usize,
    pub last_mismatch: f64,
    pub history: ConvergenceRecord,
}

impl Display for OuterDivergenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "interface coupling failed after {} outer iterations ({}), last mismatch {:e}",
            self.iterations, self.reason, self.last_mismatch
        )
    }
}

impl Error for OuterDivergenceError {}

/// Any failure surfaced by [`DomainCouplingSolver::solve`](crate::solver::DomainCouplingSolver::solve).
#[derive(Debug)]
pub enum SolveError {
    MeshMismatch(MeshMismatchError),
    Form(FormError),
    LinearSolve { stream: StreamId, iteration: usize, source: LinearSolveError },
    NonlinearDivergence(NonlinearDivergenceError),
    OuterDivergence(OuterDivergenceError),
}

impl Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::MeshMismatch(err) => write!(f, "mesh mismatch: {}", err),
            SolveError::Form(err) => write!(f, "invalid weak form: {}", err),
            SolveError::LinearSolve {
                stream,
                iteration,
                source,
            } => write!(
                f,
                "linear solve failed in {} stream at Newton iteration {}: {}",
                stream, iteration, source
            ),
            SolveError::NonlinearDivergence(err) => write!(f, "{}", err),
            SolveError::OuterDivergence(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolveError::MeshMismatch(err) => Some(err),
            SolveError::Form(err) => Some(err),
            SolveError::LinearSolve { source, .. } => Some(source),
            SolveError::NonlinearDivergence(err) => Some(err),
            SolveError::OuterDivergence(err) => Some(err),
        }
    }
}

impl From<MeshMismatchError> for SolveError {
    fn from(err: MeshMismatchError) -> Self {
        SolveError::MeshMismatch(err)
    }
}

impl From<FormError> for SolveError {
    fn from(err: FormError) -> Self {
        SolveError::Form(err)
    }
}

impl From<NonlinearDivergenceError> for SolveError {
    fn from(err: NonlinearDivergenceError) -> Self {
        SolveError::NonlinearDivergence(err)
    }
}

impl From<OuterDivergenceError> for SolveError {
    fn from(err: OuterDivergenceError) -> Self {
        SolveError::OuterDivergence(err)
    }
}
