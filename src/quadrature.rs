//! Quadrature rules on reference simplices.
//!
//! The reference simplex in dimension `D` is the convex hull of the origin and the unit
//! vectors. Weights of every rule sum to its volume `1 / D!`.
use crate::allocators::DimAllocator;
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OPoint, Point1, Point2, Point3, U1, U2, U3};

pub type QuadraturePair<D> = (Vec<f64>, Vec<OPoint<f64, D>>);

/// A canonical quadrature for integrating weighted element terms.
///
/// The rule is exact for polynomials of degree 5 on segments, degree 4 on triangles and degree 2
/// on tetrahedra. Coordinate weights of the form $r$ or $r^2$ multiplied by linear basis
/// functions, or by products of quadratic basis gradients, are therefore integrated exactly on
/// segments and triangles.
pub trait CanonicalSimplexQuadrature: SmallDim
where
    DefaultAllocator: DimAllocator<f64, Self>,
{
    fn canonical_simplex_quadrature() -> QuadraturePair<Self>;

    /// Volume of the reference simplex.
    fn reference_volume() -> f64 {
        let factorial: usize = (1..=Self::dim()).product();
        1.0 / factorial as f64
    }
}

impl CanonicalSimplexQuadrature for U1 {
    fn canonical_simplex_quadrature() -> QuadraturePair<U1> {
        // Three-point Gauss-Legendre on [0, 1]
        let a = 0.5 * (1.0 - (3.0f64 / 5.0).sqrt());
        let weights = vec![5.0 / 18.0, 8.0 / 18.0, 5.0 / 18.0];
        let points = vec![Point1::new(a), Point1::new(0.5), Point1::new(1.0 - a)];
        (weights, points)
    }
}

impl CanonicalSimplexQuadrature for U2 {
    fn canonical_simplex_quadrature() -> QuadraturePair<U2> {
        // Six-point rule of Strang and Fix, degree 4
        let a = 0.445948490915965;
        let b = 0.091576213509771;
        let wa = 0.223381589678011 / 2.0;
        let wb = 0.109951743655322 / 2.0;
        let weights = vec![wa, wa, wa, wb, wb, wb];
        let points = vec![
            Point2::new(a, a),
            Point2::new(1.0 - 2.0 * a, a),
            Point2::new(a, 1.0 - 2.0 * a),
            Point2::new(b, b),
            Point2::new(1.0 - 2.0 * b, b),
            Point2::new(b, 1.0 - 2.0 * b),
        ];
        (weights, points)
    }
}

impl CanonicalSimplexQuadrature for U3 {
    fn canonical_simplex_quadrature() -> QuadraturePair<U3> {
        let a = 0.5854101966249685;
        let b = 0.1381966011250105;
        let w = 1.0 / 24.0;
        let weights = vec![w; 4];
        let points = vec![
            Point3::new(b, b, b),
            Point3::new(a, b, b),
            Point3::new(b, a, b),
            Point3::new(b, b, a),
        ];
        (weights, points)
    }
}
