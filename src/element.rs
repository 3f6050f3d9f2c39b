//! Geometry and basis functions of linear and quadratic simplex elements.
use crate::allocators::DimAllocator;
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OMatrix, OPoint, OVector};

/// Pairs of local vertices spanned by the edge nodes of a quadratic simplex, in node order.
///
/// Edge nodes follow the vertices of a cell. The ordering is the one used by Gmsh.
pub fn simplex_edges(dim: usize) -> &'static [(usize, usize)] {
    match dim {
        0 => &[],
        1 => &[(0, 1)],
        2 => &[(0, 1), (1, 2), (0, 2)],
        _ => &[(0, 1), (1, 2), (0, 2), (0, 3), (2, 3), (1, 3)],
    }
}

/// Number of nodes of a simplex of the given dimension and polynomial order.
///
/// Returns `None` for unsupported orders.
pub fn simplex_node_count(dim: usize, order: usize) -> Option<usize> {
    match order {
        1 => Some(dim + 1),
        2 => Some(dim + 1 + simplex_edges(dim).len()),
        _ => None,
    }
}

/// A linear (P1) or quadratic (P2) simplex element in physical space.
///
/// The reference map is $x(\xi) = x_0 + J \xi$, where the columns of $J$ are the edge
/// vectors $x_k - x_0$. Edge nodes of quadratic elements are assumed to sit at the midpoints
/// of their edges, so the geometry is affine for both orders.
///
/// Linear basis functions are the barycentric coordinates $\lambda_i$. Quadratic basis functions
/// are $\lambda_i (2 \lambda_i - 1)$ for vertices and $4 \lambda_i \lambda_j$ for edges.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexElement<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    origin: OPoint<f64, D>,
    jacobian: OMatrix<f64, D, D>,
    jacobian_det: f64,
    barycentric_gradients: Vec<OVector<f64, D>>,
    order: usize,
}

impl<D> SimplexElement<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    /// Construct the element from the nodes of a cell.
    ///
    /// The order is inferred from the number of nodes. Returns `None` if the element is degenerate.
    ///
    /// # Panics
    ///
    /// Panics if the number of nodes matches neither a linear nor a quadratic simplex.
    pub fn from_vertices(nodes: &[OPoint<f64, D>]) -> Option<Self> {
        let order = (1..=2)
            .find(|&order| simplex_node_count(D::dim(), order) == Some(nodes.len()))
            .unwrap_or_else(|| panic!("{} nodes do not form a simplex of dimension {}", nodes.len(), D::dim()));

        let origin = nodes[0].clone();
        let jacobian = OMatrix::<f64, D, D>::from_fn(|i, j| nodes[j + 1][i] - origin[i]);
        let jacobian_det = jacobian.determinant();
        if jacobian_det == 0.0 || !jacobian_det.is_finite() {
            return None;
        }
        let j_inv_t = jacobian.clone().try_inverse()?.transpose();

        let mut barycentric_gradients = Vec::with_capacity(D::dim() + 1);
        let mut first = OVector::<f64, D>::zeros();
        for k in 0..D::dim() {
            first -= j_inv_t.column(k);
        }
        barycentric_gradients.push(first);
        for k in 0..D::dim() {
            barycentric_gradients.push(j_inv_t.column(k).into_owned());
        }

        Some(Self {
            origin,
            jacobian,
            jacobian_det,
            barycentric_gradients,
            order,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_nodes(&self) -> usize {
        D::dim() + 1 + if self.order == 2 { simplex_edges(D::dim()).len() } else { 0 }
    }

    pub fn map_reference_coords(&self, xi: &OPoint<f64, D>) -> OPoint<f64, D> {
        &self.origin + &self.jacobian * &xi.coords
    }

    fn barycentric(xi: &OPoint<f64, D>, vertex: usize) -> f64 {
        if vertex == 0 {
            1.0 - xi.coords.sum()
        } else {
            xi[vertex - 1]
        }
    }

    /// Values of the basis functions at the given reference coordinates.
    pub fn populate_basis(&self, basis: &mut [f64], xi: &OPoint<f64, D>) {
        assert_eq!(basis.len(), self.num_nodes());
        let d = D::dim();
        for (i, value) in basis.iter_mut().take(d + 1).enumerate() {
            *value = Self::barycentric(xi, i);
        }
        if self.order == 2 {
            // Edge functions first, while the vertex entries still hold barycentric coordinates
            for (e, &(i, j)) in simplex_edges(d).iter().enumerate() {
                basis[d + 1 + e] = 4.0 * basis[i] * basis[j];
            }
            for value in basis.iter_mut().take(d + 1) {
                *value *= 2.0 * *value - 1.0;
            }
        }
    }

    /// Physical gradients of the basis functions at the given reference coordinates.
    pub fn populate_basis_gradients(&self, gradients: &mut [OVector<f64, D>], xi: &OPoint<f64, D>) {
        assert_eq!(gradients.len(), self.num_nodes());
        let d = D::dim();
        let g = &self.barycentric_gradients;
        if self.order == 1 {
            gradients.clone_from_slice(g);
            return;
        }

        let lambda = |i| Self::barycentric(xi, i);
        for i in 0..=d {
            gradients[i] = &g[i] * (4.0 * lambda(i) - 1.0);
        }
        for (e, &(i, j)) in simplex_edges(d).iter().enumerate() {
            gradients[d + 1 + e] = &g[i] * (4.0 * lambda(j)) + &g[j] * (4.0 * lambda(i));
        }
    }

    /// Constant physical gradients of the barycentric coordinates.
    pub fn barycentric_gradients(&self) -> &[OVector<f64, D>] {
        &self.barycentric_gradients
    }

    pub fn jacobian_det_abs(&self) -> f64 {
        self.jacobian_det.abs()
    }
}
