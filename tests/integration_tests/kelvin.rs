use chameleon_fem::assembly::SimplexAssembler;
use chameleon_fem::config::{NewtonSettings, ResidualMeasure};
use chameleon_fem::mesh::procedural::{create_radial_interval_mesh, Geometry, Sizing};
use chameleon_fem::mesh::RegionTag;
use chameleon_fem::monitor::{ConvergenceMonitor, StreamId};
use chameleon_fem::nalgebra::DVector;
use chameleon_fem::physics::PhysicalParameters;
use chameleon_fem::solver::{BoundaryData, SubdomainSolver};
use chameleon_fem::weak_form::{CoordinateSystem, Density, DomainMapping, NonlinearTerm, WeakFormSpec};
use std::sync::Arc;
use util::assert_approx_matrix_eq;

/// The harmonic field $R_c / r$ outside a sphere is linear in the inverted radius $\xi = R_c^2 / r$,
/// so the inverted exterior reproduces it exactly at the nodes.
#[test]
fn inverted_exterior_reproduces_point_source_field() {
    inverted_exterior_reproduces_point_source_field_of_order(1);
}

#[test]
fn quadratic_inverted_exterior_reproduces_point_source_field() {
    inverted_exterior_reproduces_point_source_field_of_order(2);
}

fn inverted_exterior_reproduces_point_source_field_of_order(order: usize) {
    let truncation_radius = 3.0;
    let geometry = Geometry::exterior(CoordinateSystem::Spherical, truncation_radius);
    let mut mesh = create_radial_interval_mesh(&geometry, &Sizing::default()).unwrap();
    if order == 2 {
        mesh = mesh.to_quadratic();
    }
    let params = PhysicalParameters::new(1.0, 1, 0.1)
        .with_coordinates(CoordinateSystem::Spherical)
        .with_truncation_radius(truncation_radius);
    let form = WeakFormSpec::builder("exterior", Arc::new(mesh))
        .mapping(DomainMapping::Inverted {
            radius: truncation_radius,
        })
        .density(Density::Uniform(0.0))
        .nonlinear_term(NonlinearTerm::Linear { coefficient: 0.0 })
        .essential_bc(RegionTag::Facet(200), 1.0)
        .essential_bc(RegionTag::Vertex(0), 0.0)
        .build(&params)
        .unwrap();

    let num_vertices = form.mesh().num_vertices();
    let expected = DVector::from_iterator(
        num_vertices,
        form.mesh().vertices().iter().map(|v| v.x / truncation_radius),
    );
    let mut solver = SubdomainSolver::new(StreamId::Exterior, form, SimplexAssembler::new(), DVector::zeros(num_vertices));
    let settings = NewtonSettings::default().with_measure(ResidualMeasure::Nonlinear);
    let mut monitor = ConvergenceMonitor::new();
    solver
        .solve(&BoundaryData::None, &settings, &mut monitor)
        .unwrap();

    assert_approx_matrix_eq!(&solver.state().values, &expected, abstol = 1e-12);

    // In physical coordinates this is the field of a point source
    let mapping = solver.form().mapping();
    for (vertex, &value) in solver.form().mesh().vertices().iter().zip(solver.state().values.iter()) {
        if let Some(x) = mapping.physical_point(vertex) {
            let r = x.x;
            assert!((value - truncation_radius / r).abs() <= 1e-12 * (1.0 + value.abs()));
        }
    }
}
