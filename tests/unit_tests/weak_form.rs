use chameleon_fem::error::{FormError, UnknownRegionError};
use chameleon_fem::mesh::procedural::Sizing;
use chameleon_fem::mesh::RegionTag;
use chameleon_fem::nalgebra::{Point1, Point2};
use chameleon_fem::physics::PhysicalParameters;
use chameleon_fem::weak_form::{CoordinateSystem, Density, DomainMapping, FormRole, NonlinearTerm, WeakFormSpec};
use insta::assert_snapshot;
use matrixcompare::assert_scalar_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{disk_meshes, interval_mesh, radial_meshes, single_sphere_params};

#[test]
fn weak_form_defaults_from_parameters() {
    let (interior, _) = radial_meshes(4.0, &Sizing::uniform(0.25, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 4.0);
    let mesh = Arc::new(interior);
    let form = WeakFormSpec::builder("interior", Arc::clone(&mesh))
        .build(&params)
        .unwrap();

    assert_eq!(form.name(), "interior");
    assert_eq!(form.field_name(), "phi");
    assert_eq!(form.role(), FormRole::Governing);
    assert_eq!(form.coordinates(), CoordinateSystem::Spherical);
    assert_eq!(form.mapping(), DomainMapping::Bounded);
    assert_eq!(form.element_order(), 1);
    assert_eq!(form.alpha(), 10.0);
    assert_eq!(form.nonlinear_term(), NonlinearTerm::Chameleon { npot: 1 });
    assert!(form.essential_dofs().is_empty());

    for &cell in mesh.cell_region(301).unwrap() {
        assert_eq!(form.cell_density(cell), 10.0);
    }
    for &cell in mesh.cell_region(300).unwrap() {
        assert_eq!(form.cell_density(cell), 0.1);
    }
}

#[test]
fn weak_form_rejects_unknown_density_region() {
    let mesh = Arc::new(interval_mesh(1.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 0.1).with_density(RegionTag::Subdomain(301), 10.0);
    let err = WeakFormSpec::builder("interior", mesh)
        .build(&params)
        .unwrap_err();
    assert_eq!(
        err,
        FormError::UnknownRegion(UnknownRegionError {
            form: "interior".to_string(),
            tag: RegionTag::Subdomain(301),
        })
    );
}

#[test]
fn weak_form_rejects_unknown_essential_region() {
    let mesh = Arc::new(interval_mesh(1.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 0.1);
    let err = WeakFormSpec::builder("exterior", mesh)
        .essential_bc(RegionTag::Facet(200), 1.0)
        .build(&params)
        .unwrap_err();
    assert_snapshot!(err.to_string(), @"weak form 'exterior' references unknown region (facet, 200)");
}

#[test]
fn weak_form_rejects_density_on_non_subdomain_region() {
    let mesh = Arc::new(interval_mesh(1.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 0.1).with_density(RegionTag::Vertex(1), 10.0);
    let err = WeakFormSpec::builder("interior", mesh)
        .build(&params)
        .unwrap_err();
    assert!(matches!(err, FormError::InvalidRegionKind { tag: RegionTag::Vertex(1), .. }));
}

#[test]
fn weak_form_rejects_uncovered_cells() {
    let (interior, _) = radial_meshes(4.0, &Sizing::uniform(0.25, 2));
    let num_vacuum_cells = interior.cell_region(300).unwrap().len();
    let params = PhysicalParameters::new(1.0, 1, 0.1)
        .with_coordinates(CoordinateSystem::Spherical)
        .with_density(RegionTag::Subdomain(301), 10.0);
    let err = WeakFormSpec::builder("interior", Arc::new(interior))
        .build(&params)
        .unwrap_err();
    assert_eq!(
        err,
        FormError::UncoveredCells {
            form: "interior".to_string(),
            count: num_vacuum_cells,
        }
    );
}

#[test]
fn weak_form_rejects_invalid_configurations() {
    let mesh = Arc::new(interval_mesh(1.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 0.1);

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .coordinates(CoordinateSystem::Cylindrical)
        .build(&params);
    assert!(matches!(result, Err(FormError::IncompatibleCoordinates { dim: 1, .. })));

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .element_order(3)
        .build(&params);
    assert!(matches!(result, Err(FormError::UnsupportedElementOrder { order: 3, .. })));

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .element_order(2)
        .build(&params);
    assert!(matches!(
        result,
        Err(FormError::ElementOrderMismatch {
            order: 2,
            mesh_order: 1,
            ..
        })
    ));

    let quadratic = Arc::new(mesh.to_quadratic());
    let form = WeakFormSpec::builder("form", Arc::clone(&quadratic))
        .build(&params)
        .unwrap();
    assert_eq!(form.element_order(), 2);
    let result = WeakFormSpec::builder("form", quadratic)
        .element_order(1)
        .build(&params);
    assert!(matches!(result, Err(FormError::ElementOrderMismatch { order: 1, mesh_order: 2, .. })));

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .mapping(DomainMapping::Inverted { radius: 0.0 })
        .build(&params);
    assert!(matches!(result, Err(FormError::InvalidParameter { .. })));

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .density(Density::Uniform(-1.0))
        .build(&params);
    assert!(matches!(result, Err(FormError::InvalidParameter { name: "density", .. })));

    let result = WeakFormSpec::builder("form", Arc::clone(&mesh))
        .essential_bc(RegionTag::Vertex(1), f64::NAN)
        .build(&params);
    assert!(matches!(result, Err(FormError::InvalidParameter { .. })));

    let invalid_params = PhysicalParameters::new(0.0, 1, 0.1);
    let result = WeakFormSpec::builder("form", Arc::clone(&mesh)).build(&invalid_params);
    assert!(matches!(result, Err(FormError::InvalidParameter { name: "alpha", .. })));

    let invalid_params = PhysicalParameters::new(1.0, 0, 0.1);
    let result = WeakFormSpec::builder("form", mesh).build(&invalid_params);
    assert!(matches!(result, Err(FormError::InvalidParameter { name: "npot", .. })));
}

#[test]
fn weak_form_rejects_degenerate_cells() {
    let vertices = vec![Point1::new(0.0), Point1::new(1.0), Point1::new(1.0)];
    let mesh = chameleon_fem::mesh::Mesh::from_vertices_and_cells(vertices, vec![0, 1, 1, 2]);
    let params = PhysicalParameters::new(1.0, 1, 0.1);
    let result = WeakFormSpec::builder("form", Arc::new(mesh)).build(&params);
    assert!(matches!(result, Err(FormError::DegenerateCell { cell: 1, .. })));
}

#[test]
fn weak_form_essential_dofs_cover_region_nodes() {
    let (_, exterior) = disk_meshes(3.0, &Sizing::uniform(0.3, 12));
    let params = PhysicalParameters::new(1.0, 1, 0.1).with_coordinates(CoordinateSystem::Cylindrical);
    let form = WeakFormSpec::builder("exterior", Arc::new(exterior))
        .essential_bc(RegionTag::Vertex(0), 2.0)
        .essential_bc(RegionTag::Facet(200), 3.0)
        .build(&params)
        .unwrap();
    let dofs = form.essential_dofs();
    assert_eq!(dofs.len(), 13);
    assert_eq!(dofs[&0], 2.0);
    assert!(dofs.iter().filter(|(&dof, _)| dof != 0).all(|(_, &value)| value == 3.0));
}

#[test]
fn inverted_weights_follow_kelvin_scaling() {
    let mesh = Arc::new(interval_mesh(2.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 0.1).with_coordinates(CoordinateSystem::Spherical);
    let radius = 2.0;
    let form = WeakFormSpec::builder("exterior", mesh)
        .mapping(DomainMapping::Inverted { radius })
        .build(&params)
        .unwrap();

    for xi in [0.1, 0.5, 1.0, 2.0] {
        let x = Point1::new(xi);
        // r^2 dr d/dr with r = R^2 / xi becomes R^2 d xi d/d xi
        assert_scalar_eq!(form.stiffness_weight(&x), radius * radius, comp = float, ulp = 50);
        assert_scalar_eq!(form.mass_weight(&x), radius.powi(6) / xi.powi(4), comp = float, ulp = 50);
    }

    let image = DomainMapping::Inverted { radius }
        .physical_point(&Point1::new(0.5))
        .unwrap();
    assert_scalar_eq!(image.x, 8.0, comp = abs, tol = 1e-14);
    assert_eq!(DomainMapping::Inverted { radius }.physical_point(&Point1::new(0.0)), None);
}

#[test]
fn cylindrical_weights_use_radial_coordinate() {
    let (interior, _) = disk_meshes(1.0, &Sizing::uniform(0.3, 8));
    let params = PhysicalParameters::new(1.0, 1, 0.1).with_coordinates(CoordinateSystem::Cylindrical);
    let form = WeakFormSpec::builder("interior", Arc::new(interior))
        .build(&params)
        .unwrap();
    let x = Point2::new(0.25, -0.5);
    assert_eq!(form.stiffness_weight(&x), 0.25);
    assert_eq!(form.mass_weight(&x), 0.25);
}

#[test]
fn nonlinear_term_equilibrium() {
    let chameleon = NonlinearTerm::Chameleon { npot: 1 };
    assert_scalar_eq!(chameleon.equilibrium(4.0).unwrap(), 0.5, comp = abs, tol = 1e-14);
    assert_eq!(chameleon.equilibrium(0.0), None);
    assert!(chameleon.requires_positive_field());

    let linear = NonlinearTerm::Linear { coefficient: 2.0 };
    assert_eq!(linear.equilibrium(4.0), Some(-2.0));
    assert_eq!(NonlinearTerm::Linear { coefficient: 0.0 }.equilibrium(1.0), None);
    assert!(!linear.requires_positive_field());
}

#[test]
fn density_per_region_overrides_parameters() {
    let (interior, _) = radial_meshes(4.0, &Sizing::uniform(0.25, 2));
    let mesh = Arc::new(interior);
    let params = single_sphere_params(CoordinateSystem::Spherical, 4.0);
    let densities: BTreeMap<_, _> = [(RegionTag::Subdomain(300), 1.0), (RegionTag::Subdomain(301), 2.0)]
        .into_iter()
        .collect();
    let form = WeakFormSpec::builder("interior", Arc::clone(&mesh))
        .density(Density::PerRegion(densities))
        .build(&params)
        .unwrap();
    for &cell in mesh.cell_region(301).unwrap() {
        assert_eq!(form.cell_density(cell), 2.0);
    }
}

proptest! {
    #[test]
    fn nonlinear_term_derivatives_are_consistent(u in 0.2..5.0, npot in 1u32..4, coefficient in -3.0..3.0) {
        let h = 1e-6;
        for term in [NonlinearTerm::Chameleon { npot }, NonlinearTerm::Linear { coefficient }] {
            let derivative = (term.value(u + h) - term.value(u - h)) / (2.0 * h);
            let scale = 1.0 + term.derivative(u).abs();
            prop_assert!((derivative - term.derivative(u)).abs() <= 1e-5 * scale);

            // The potential is an antiderivative of -f
            let potential_derivative = (term.potential(u + h) - term.potential(u - h)) / (2.0 * h);
            let scale = 1.0 + term.value(u).abs();
            prop_assert!((potential_derivative + term.value(u)).abs() <= 1e-5 * scale);
        }
    }
}
