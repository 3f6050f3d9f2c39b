use chameleon_fem::element::{simplex_edges, simplex_node_count, SimplexElement};
use chameleon_fem::nalgebra::{Point1, Point2, Point3, Vector1, Vector2, U2};
use matrixcompare::assert_scalar_eq;
use util::assert_panics;

fn tri6() -> SimplexElement<U2> {
    let corners = [Point2::new(0.5, -1.0), Point2::new(2.0, 0.0), Point2::new(0.0, 1.5)];
    let mut nodes = corners.to_vec();
    for &(i, j) in simplex_edges(2) {
        nodes.push(Point2::from((corners[i].coords + corners[j].coords) / 2.0));
    }
    SimplexElement::from_vertices(&nodes).unwrap()
}

/// Reference coordinates of the nodes of a quadratic triangle.
fn tri6_reference_nodes() -> Vec<Point2<f64>> {
    vec![
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(0.0, 1.0),
        Point2::new(0.5, 0.0),
        Point2::new(0.5, 0.5),
        Point2::new(0.0, 0.5),
    ]
}

#[test]
fn simplex_node_counts() {
    assert_eq!(simplex_node_count(1, 1), Some(2));
    assert_eq!(simplex_node_count(1, 2), Some(3));
    assert_eq!(simplex_node_count(2, 2), Some(6));
    assert_eq!(simplex_node_count(3, 2), Some(10));
    assert_eq!(simplex_node_count(2, 3), None);
}

#[test]
fn quadratic_triangle_basis_is_nodal() {
    let element = tri6();
    assert_eq!(element.order(), 2);
    assert_eq!(element.num_nodes(), 6);

    let mut basis = vec![0.0; 6];
    for (a, xi) in tri6_reference_nodes().iter().enumerate() {
        element.populate_basis(&mut basis, xi);
        for (b, &value) in basis.iter().enumerate() {
            let expected = if a == b { 1.0 } else { 0.0 };
            assert_scalar_eq!(value, expected, comp = abs, tol = 1e-14);
        }
    }

    element.populate_basis(&mut basis, &Point2::new(0.2, 0.3));
    assert_scalar_eq!(basis.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn quadratic_triangle_gradients_match_finite_differences() {
    let element = tri6();
    let xi = Point2::new(0.2, 0.3);
    let mut gradients = vec![Vector2::zeros(); 6];
    element.populate_basis_gradients(&mut gradients, &xi);

    // Partition of unity
    let sum: Vector2<f64> = gradients.iter().sum();
    assert!(sum.norm() < 1e-12);

    // Reference derivatives mapped to physical space through the inverse Jacobian
    let h = 1e-6;
    let mut plus = vec![0.0; 6];
    let mut minus = vec![0.0; 6];
    let x = element.map_reference_coords(&xi);
    for k in 0..2 {
        let mut offset = Vector2::zeros();
        offset[k] = h;
        element.populate_basis(&mut plus, &(xi + offset));
        element.populate_basis(&mut minus, &(xi - offset));
        let dx = element.map_reference_coords(&(xi + offset)) - x;
        for a in 0..6 {
            let derivative = (plus[a] - minus[a]) / (2.0 * h);
            assert_scalar_eq!(gradients[a].dot(&dx) / h, derivative, comp = abs, tol = 1e-6);
        }
    }
}

#[test]
fn linear_element_gradients_are_barycentric() {
    let element = SimplexElement::from_vertices(&[Point1::new(1.0), Point1::new(3.0)]).unwrap();
    assert_eq!(element.order(), 1);
    let mut gradients = vec![Vector1::zeros(); 2];
    element.populate_basis_gradients(&mut gradients, &Point1::new(0.25));
    assert_eq!(gradients, element.barycentric_gradients());
    assert_scalar_eq!(gradients[1][0], 0.5, comp = abs, tol = 1e-15);
}

#[test]
fn quadratic_segment_basis() {
    let nodes = [Point1::new(0.0), Point1::new(2.0), Point1::new(1.0)];
    let element = SimplexElement::from_vertices(&nodes).unwrap();
    let mut basis = vec![0.0; 3];
    element.populate_basis(&mut basis, &Point1::new(0.25));
    assert_scalar_eq!(basis[0], 0.375, comp = abs, tol = 1e-15);
    assert_scalar_eq!(basis[1], -0.125, comp = abs, tol = 1e-15);
    assert_scalar_eq!(basis[2], 0.75, comp = abs, tol = 1e-15);
}

#[test]
fn quadratic_tetrahedron_has_ten_nodes() {
    let corners = [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
    ];
    let mut nodes = corners.to_vec();
    for &(i, j) in simplex_edges(3) {
        nodes.push(Point3::from((corners[i].coords + corners[j].coords) / 2.0));
    }
    let element = SimplexElement::from_vertices(&nodes).unwrap();
    assert_eq!(element.num_nodes(), 10);

    // Edge node 8 sits between vertices 2 and 3
    let mut basis = vec![0.0; 10];
    element.populate_basis(&mut basis, &Point3::new(0.0, 0.5, 0.5));
    assert_scalar_eq!(basis[8], 1.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(basis.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn element_rejects_wrong_node_count() {
    let nodes = vec![Point2::new(0.0, 0.0); 4];
    assert_panics!(SimplexElement::from_vertices(&nodes));
    let degenerate = vec![Point2::new(0.0, 0.0); 3];
    assert!(SimplexElement::from_vertices(&degenerate).is_none());
}
