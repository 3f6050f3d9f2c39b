//! Assembly of the discrete nonlinear system and the linear solves of Newton steps.
//!
//! The discrete residual of a [`WeakFormSpec`] at nodal values $u$ is
//! <div>$$
//!   R(u) = \alpha K u + b - M f(u) + q,
//! $$</div>
//! where $K$ is the weighted stiffness matrix, $b$ the weighted density load, $M$ the lumped
//! (diagonal) weighted mass, $f$ the nonlinear term evaluated at the nodes and $q$ an optional
//! nodal load from natural boundary data. Evaluating the nonlinear term at the nodes keeps the
//! Jacobian $\alpha K - M f'(u)$ symmetric positive definite whenever $f' \leq 0$.
//!
//! Linear elements lump the mass by row sums. Row sums of quadratic simplices vanish or turn
//! negative at the vertices, so quadratic elements scale the diagonal of the consistent mass to
//! the element mass instead, which keeps every nodal mass positive. The density load is lumped
//! the same way as the mass.
use crate::allocators::DimAllocator;
use crate::element::SimplexElement;
use crate::error::LinearSolveError;
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::weak_form::{CoordinateSystem, DomainMapping, WeakFormSpec};
use itertools::izip;
use log::{debug, warn};
use nalgebra::{DVector, DefaultAllocator, OVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Boundary data imposed on a single evaluation of a weak form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryConditions {
    /// Prescribed nodal values.
    pub essential: BTreeMap<usize, f64>,
    /// Nodal loads added to the residual.
    pub natural: BTreeMap<usize, f64>,
}

impl BoundaryConditions {
    pub fn is_constrained(&self, dof: usize) -> bool {
        self.essential.contains_key(&dof)
    }
}

/// A linearized system $A \delta = r$ for a Newton increment.
///
/// Rows and columns of constrained degrees of freedom are eliminated, with a scaled identity on
/// the diagonal and the remaining lifting in the right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    pub matrix: CscMatrix<f64>,
    pub rhs: DVector<f64>,
}

/// Finite element assembly and linear solve collaborator.
pub trait FemProvider<D>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    /// Assembles the Newton system at `field`, whose solution is the increment that moves
    /// constrained degrees of freedom onto their prescribed values.
    fn assemble(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>, bcs: &BoundaryConditions) -> LinearSystem;

    fn solve_linear(&mut self, system: &LinearSystem) -> Result<DVector<f64>, LinearSolveError>;

    /// The full nodal residual at `field`, including natural loads.
    fn residual(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>, bcs: &BoundaryConditions) -> DVector<f64>;

    /// The discrete energy whose gradient is the residual without natural loads.
    fn energy(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>) -> f64;
}

/// Everything the field-independent operators of a weak form depend on.
#[derive(Debug, Clone)]
struct OperatorKey {
    // Holding the mesh keeps its address from being reused while the operators are cached
    mesh: Arc<dyn Any>,
    coordinates: CoordinateSystem,
    mapping: DomainMapping,
    cell_densities: Vec<f64>,
}

impl OperatorKey {
    fn new<D>(form: &WeakFormSpec<D>) -> Self
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let mesh: Arc<dyn Any> = form.mesh().clone();
        Self {
            mesh,
            coordinates: form.coordinates(),
            mapping: form.mapping(),
            cell_densities: form.cell_densities().to_vec(),
        }
    }

    fn matches<D>(&self, form: &WeakFormSpec<D>) -> bool
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let cached_mesh = Arc::as_ptr(&self.mesh) as *const ();
        let form_mesh = Arc::as_ptr(form.mesh()) as *const ();
        cached_mesh == form_mesh
            && self.coordinates == form.coordinates()
            && self.mapping == form.mapping()
            && self.cell_densities == form.cell_densities()
    }
}

/// Field-independent discrete operators of a weak form.
#[derive(Debug, Clone)]
struct DiscreteOperators {
    key: OperatorKey,
    stiffness: CscMatrix<f64>,
    stiffness_diagonal: DVector<f64>,
    lumped_mass: DVector<f64>,
    load: DVector<f64>,
}

impl DiscreteOperators {
    fn matches<D>(&self, form: &WeakFormSpec<D>) -> bool
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        self.key.matches(form)
    }

    fn assemble<D>(form: &WeakFormSpec<D>) -> Self
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let mesh = form.mesh();
        let n = mesh.num_vertices();
        let (weights, points) = D::canonical_simplex_quadrature();

        let mut coo = CooMatrix::new(n, n);
        let mut lumped_mass = DVector::zeros(n);
        let mut load = DVector::zeros(n);
        let nodes_per_cell = mesh.nodes_per_cell();
        let mut basis = vec![0.0; nodes_per_cell];
        let mut gradients = vec![OVector::<f64, D>::zeros(); nodes_per_cell];
        let mut element_stiffness = vec![0.0; nodes_per_cell * nodes_per_cell];
        let mut row_sums = vec![0.0; nodes_per_cell];
        let mut diagonal = vec![0.0; nodes_per_cell];
        let mut element_nodes = Vec::with_capacity(nodes_per_cell);

        for (cell_index, cell) in mesh.cells().enumerate() {
            element_nodes.clear();
            element_nodes.extend(cell.iter().map(|&v| mesh.vertices()[v].clone()));
            let Some(element) = SimplexElement::from_vertices(&element_nodes) else {
                warn!("Skipping degenerate cell {} of form '{}'", cell_index, form.name());
                continue;
            };
            let rho = form.cell_density(cell_index);

            element_stiffness.fill(0.0);
            row_sums.fill(0.0);
            diagonal.fill(0.0);
            let mut element_mass = 0.0;
            for (w, xi) in izip!(&weights, &points) {
                let x = element.map_reference_coords(xi);
                let dx = *w * element.jacobian_det_abs();
                let stiffness_weight = form.stiffness_weight(&x) * dx;
                let mass_weight = form.mass_weight(&x) * dx;
                element.populate_basis(&mut basis, xi);
                element.populate_basis_gradients(&mut gradients, xi);

                element_mass += mass_weight;
                for (a, (&phi, grad_a)) in basis.iter().zip(&gradients).enumerate() {
                    row_sums[a] += mass_weight * phi;
                    diagonal[a] += mass_weight * phi * phi;
                    for (b, grad_b) in gradients.iter().enumerate() {
                        element_stiffness[a * nodes_per_cell + b] += stiffness_weight * grad_a.dot(grad_b);
                    }
                }
            }

            let diagonal_sum: f64 = diagonal.iter().sum();
            for (a, &node) in cell.iter().enumerate() {
                let mass = if element.order() == 1 {
                    row_sums[a]
                } else if diagonal_sum > 0.0 {
                    diagonal[a] * element_mass / diagonal_sum
                } else {
                    0.0
                };
                lumped_mass[node] += mass;
                load[node] += rho * mass;
                for (b, &node_b) in cell.iter().enumerate() {
                    coo.push(node, node_b, element_stiffness[a * nodes_per_cell + b]);
                }
            }
        }

        let stiffness = CscMatrix::from(&coo);
        let mut stiffness_diagonal = DVector::zeros(n);
        for (i, j, &v) in stiffness.triplet_iter() {
            if i == j {
                stiffness_diagonal[i] += v;
            }
        }
        debug!(
            "Assembled operators for form '{}': {} dofs, {} stiffness entries",
            form.name(),
            n,
            stiffness.nnz()
        );

        Self {
            key: OperatorKey::new(form),
            stiffness,
            stiffness_diagonal,
            lumped_mass,
            load,
        }
    }
}

/// Assembler for simplex elements, solving Newton systems with a sparse Cholesky factorization.
///
/// Field-independent operators are assembled on first use and cached for subsequent calls with a
/// form on the same mesh with the same coordinates, mapping and cell densities.
#[derive(Debug, Clone, Default)]
pub struct SimplexAssembler {
    operators: Option<DiscreteOperators>,
}

impl SimplexAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn operators<D>(&mut self, form: &WeakFormSpec<D>) -> &DiscreteOperators
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let stale = self
            .operators
            .as_ref()
            .map(|ops| !ops.matches(form))
            .unwrap_or(true);
        if stale {
            self.operators = Some(DiscreteOperators::assemble(form));
        }
        self.operators
            .get_or_insert_with(|| DiscreteOperators::assemble(form))
    }

    /// Lumped weighted mass of each node of the form's mesh.
    pub fn lumped_mass<D>(&mut self, form: &WeakFormSpec<D>) -> DVector<f64>
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        self.operators(form).lumped_mass.clone()
    }

    /// Density load of each node of the form's mesh.
    pub fn load<D>(&mut self, form: &WeakFormSpec<D>) -> DVector<f64>
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        self.operators(form).load.clone()
    }

    /// Solves a Newton system assembled by this assembler.
    pub fn solve_linear(&self, system: &LinearSystem) -> Result<DVector<f64>, LinearSolveError> {
        CholeskySolver.solve(system)
    }
}

impl<D> FemProvider<D> for SimplexAssembler
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
{
    fn assemble(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>, bcs: &BoundaryConditions) -> LinearSystem {
        let residual = self.residual(form, field, bcs);
        let alpha = form.alpha();
        let term = form.nonlinear_term();
        let ops = self.operators(form);
        let n = ops.lumped_mass.len();
        assert_eq!(field.len(), n, "field length must match the number of mesh vertices");

        let reaction = DVector::from_fn(n, |i, _| -ops.lumped_mass[i] * term.derivative(field[i]));

        // Prescribed increments of constrained dofs
        let mut lifting = vec![None; n];
        for (&dof, &value) in &bcs.essential {
            lifting[dof] = Some(value - field[dof]);
        }

        let free_diagonal: Vec<f64> = (0..n)
            .filter(|&i| lifting[i].is_none())
            .map(|i| (alpha * ops.stiffness_diagonal[i] + reaction[i]).abs())
            .collect();
        let scale = if free_diagonal.is_empty() {
            1.0
        } else {
            let mean = free_diagonal.iter().sum::<f64>() / free_diagonal.len() as f64;
            if mean > 0.0 && mean.is_finite() {
                mean
            } else {
                1.0
            }
        };

        let mut rhs = -residual;
        let mut coo = CooMatrix::new(n, n);
        for (i, j, &v) in ops.stiffness.triplet_iter() {
            match (lifting[i], lifting[j]) {
                (None, None) => coo.push(i, j, alpha * v),
                (None, Some(delta_j)) => rhs[i] -= alpha * v * delta_j,
                _ => {}
            }
        }
        for i in 0..n {
            match lifting[i] {
                Some(delta) => {
                    coo.push(i, i, scale);
                    rhs[i] = scale * delta;
                }
                None => {
                    if reaction[i] != 0.0 {
                        coo.push(i, i, reaction[i]);
                    }
                }
            }
        }

        LinearSystem {
            matrix: CscMatrix::from(&coo),
            rhs,
        }
    }

    fn solve_linear(&mut self, system: &LinearSystem) -> Result<DVector<f64>, LinearSolveError> {
        SimplexAssembler::solve_linear(self, system)
    }

    fn residual(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>, bcs: &BoundaryConditions) -> DVector<f64> {
        let alpha = form.alpha();
        let term = form.nonlinear_term();
        let ops = self.operators(form);
        let mut residual = (&ops.stiffness * field) * alpha;
        for i in 0..residual.len() {
            residual[i] += ops.load[i] - ops.lumped_mass[i] * term.value(field[i]);
        }
        for (&dof, &q) in &bcs.natural {
            residual[dof] += q;
        }
        residual
    }

    fn energy(&mut self, form: &WeakFormSpec<D>, field: &DVector<f64>) -> f64 {
        let alpha = form.alpha();
        let term = form.nonlinear_term();
        let ops = self.operators(form);
        let dirichlet = 0.5 * alpha * field.dot(&(&ops.stiffness * field));
        let potential: f64 = izip!(field.iter(), ops.load.iter(), ops.lumped_mass.iter())
            .map(|(&u, &b, &m)| b * u + m * term.potential(u))
            .sum();
        dirichlet + potential
    }
}

/// Direct solver for symmetric positive definite systems.
#[derive(Debug, Copy, Clone, Default)]
pub struct CholeskySolver;

impl CholeskySolver {
    pub fn solve(&self, system: &LinearSystem) -> Result<DVector<f64>, LinearSolveError> {
        if system.matrix.nrows() != system.rhs.len() {
            return Err(LinearSolveError::DimensionMismatch {
                rows: system.matrix.nrows(),
                rhs: system.rhs.len(),
            });
        }
        let cholesky = CscCholesky::factor(&system.matrix)?;
        let solution = cholesky.solve(&system.rhs);
        if solution.iter().all(|x| x.is_finite()) {
            Ok(DVector::from_column_slice(solution.as_slice()))
        } else {
            Err(LinearSolveError::NonFinite)
        }
    }
}
