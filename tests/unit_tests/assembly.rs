use chameleon_fem::assembly::{BoundaryConditions, CholeskySolver, FemProvider, LinearSystem, SimplexAssembler};
use chameleon_fem::element::SimplexElement;
use chameleon_fem::error::LinearSolveError;
use chameleon_fem::mesh::procedural::Sizing;
use chameleon_fem::mesh::RegionTag;
use chameleon_fem::nalgebra::DVector;
use chameleon_fem::nalgebra_sparse::{CooMatrix, CscMatrix};
use chameleon_fem::physics::PhysicalParameters;
use chameleon_fem::weak_form::{CoordinateSystem, Density, NonlinearTerm, WeakFormSpec};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use std::sync::Arc;

use crate::{disk_meshes, interval_mesh, radial_meshes, screened_interval_form, single_sphere_params};

fn laplace_interval_form() -> WeakFormSpec<chameleon_fem::nalgebra::U1> {
    let params = PhysicalParameters::new(1.0, 1, 1.0);
    WeakFormSpec::builder("laplace", Arc::new(interval_mesh(1.0, 4)))
        .density(Density::Uniform(0.0))
        .nonlinear_term(NonlinearTerm::Linear { coefficient: 0.0 })
        .essential_bc(RegionTag::Vertex(1), 0.0)
        .essential_bc(RegionTag::Vertex(2), 1.0)
        .build(&params)
        .unwrap()
}

#[test]
fn residual_of_linear_field_vanishes_in_interior() {
    let form = laplace_interval_form();
    let field = DVector::from_iterator(5, form.mesh().vertices().iter().map(|v| v.x));
    let residual = SimplexAssembler::new().residual(&form, &field, &BoundaryConditions::default());

    for i in 1..4 {
        assert_scalar_eq!(residual[i], 0.0, comp = abs, tol = 1e-14);
    }
    // Boundary rows carry the flux of the linear field through the ends
    assert_scalar_eq!(residual[0], -1.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(residual[4], 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn residual_includes_natural_loads() {
    let form = laplace_interval_form();
    let field = DVector::zeros(5);
    let mut bcs = BoundaryConditions::default();
    bcs.natural.insert(2, 0.75);
    let residual = SimplexAssembler::new().residual(&form, &field, &bcs);
    assert_matrix_eq!(residual, DVector::from_vec(vec![0.0, 0.0, 0.75, 0.0, 0.0]), comp = abs, tol = 1e-14);
}

#[test]
fn newton_step_of_linear_problem_is_exact() {
    let form = laplace_interval_form();
    let bcs = BoundaryConditions {
        essential: form.essential_dofs(),
        natural: Default::default(),
    };
    let field = DVector::from_vec(vec![0.3, -0.2, 0.5, 2.0, 0.0]);

    let mut assembler = SimplexAssembler::new();
    let system = assembler.assemble(&form, &field, &bcs);
    let increment = assembler.solve_linear(&system).unwrap();
    let solution = field + increment;

    let expected = DVector::from_vec(vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-12);
}

#[test]
fn screened_problem_matches_discrete_solution() {
    // u'' = u with u(0) = 0 and u(1) = 1 has the solution sinh(x) / sinh(1)
    let form = screened_interval_form(interval_mesh(1.0, 64));
    let bcs = BoundaryConditions {
        essential: form.essential_dofs(),
        natural: Default::default(),
    };
    let field = DVector::zeros(65);
    let mut assembler = SimplexAssembler::new();
    let system = assembler.assemble(&form, &field, &bcs);
    let solution = assembler.solve_linear(&system).unwrap();

    let expected = DVector::from_iterator(65, form.mesh().vertices().iter().map(|v| v.x.sinh() / 1f64.sinh()));
    assert_matrix_eq!(solution, expected, comp = abs, tol = 5e-4);
}

#[test]
fn lumped_mass_integrates_spherical_measure() {
    let (interior, _) = radial_meshes(3.0, &Sizing::uniform(0.2, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 3.0);
    let form = WeakFormSpec::builder("interior", Arc::new(interior))
        .build(&params)
        .unwrap();
    let mut assembler = SimplexAssembler::new();
    let mass = assembler.lumped_mass(&form);
    assert!(mass.iter().all(|&m| m >= 0.0));
    assert_scalar_eq!(mass.sum(), 9.0, comp = abs, tol = 1e-12);

    // Body of radius 0.5 with density 10, vacuum with density 0.1
    let body = 0.125 / 3.0;
    let expected_load = 10.0 * body + 0.1 * (9.0 - body);
    assert_scalar_eq!(assembler.load(&form).sum(), expected_load, comp = abs, tol = 1e-12);
}

#[test]
fn lumped_mass_integrates_cylindrical_measure() {
    let (interior, _) = disk_meshes(2.0, &Sizing::uniform(0.25, 20));
    let params = PhysicalParameters::new(1.0, 1, 0.5).with_coordinates(CoordinateSystem::Cylindrical);
    let form = WeakFormSpec::builder("interior", Arc::new(interior))
        .build(&params)
        .unwrap();
    let mesh = form.mesh();

    // The measure is linear in rho, so the centroid rule is exact
    let expected: f64 = (0..mesh.num_cells())
        .map(|i| {
            let vertices: Vec<_> = mesh.cell(i).iter().map(|&v| mesh.vertices()[v]).collect();
            let area = SimplexElement::from_vertices(&vertices).unwrap().jacobian_det_abs() / 2.0;
            area * mesh.cell_centroid(i).x
        })
        .sum();

    let mut assembler = SimplexAssembler::new();
    assert_scalar_eq!(assembler.lumped_mass(&form).sum(), expected, comp = abs, tol = 1e-12);
    assert_scalar_eq!(assembler.load(&form).sum(), 0.5 * expected, comp = abs, tol = 1e-12);
}

fn chameleon_test_form() -> WeakFormSpec<chameleon_fem::nalgebra::U1> {
    let (interior, _) = radial_meshes(2.0, &Sizing::uniform(0.1, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 2.0);
    WeakFormSpec::builder("interior", Arc::new(interior))
        .build(&params)
        .unwrap()
}

fn smooth_positive_field(form: &WeakFormSpec<chameleon_fem::nalgebra::U1>) -> DVector<f64> {
    DVector::from_iterator(
        form.mesh().num_vertices(),
        form.mesh().vertices().iter().map(|v| 0.5 + v.x * v.x),
    )
}

fn direction(n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| (i as f64 * 0.7).sin())
}

#[test]
fn residual_is_energy_gradient() {
    let form = chameleon_test_form();
    let field = smooth_positive_field(&form);
    let v = direction(field.len());
    let mut assembler = SimplexAssembler::new();

    let h = 1e-6;
    let energy_plus = assembler.energy(&form, &(&field + &v * h));
    let energy_minus = assembler.energy(&form, &(&field - &v * h));
    let directional_derivative = (energy_plus - energy_minus) / (2.0 * h);

    let residual = assembler.residual(&form, &field, &BoundaryConditions::default());
    let expected = residual.dot(&v);
    assert!((directional_derivative - expected).abs() <= 1e-6 * (1.0 + expected.abs()));
}

#[test]
fn newton_matrix_is_residual_jacobian() {
    let form = chameleon_test_form();
    let field = smooth_positive_field(&form);
    let v = direction(field.len());
    let bcs = BoundaryConditions::default();
    let mut assembler = SimplexAssembler::new();

    let system = assembler.assemble(&form, &field, &bcs);
    let residual = assembler.residual(&form, &field, &bcs);
    assert_matrix_eq!(system.rhs, -residual, comp = abs, tol = 1e-14);

    let h = 1e-6;
    let residual_plus = assembler.residual(&form, &(&field + &v * h), &bcs);
    let residual_minus = assembler.residual(&form, &(&field - &v * h), &bcs);
    let finite_difference = (residual_plus - residual_minus) / (2.0 * h);
    let product: DVector<f64> = &system.matrix * &v;
    let scale = 1.0 + product.amax();
    assert_matrix_eq!(product, finite_difference, comp = abs, tol = 1e-6 * scale);

    // Symmetric positive definite for positive fields
    let transpose = system.matrix.transpose();
    assert_eq!(transpose, system.matrix);
    assert!(CholeskySolver.solve(&system).is_ok());
}

#[test]
fn assembler_reassembles_for_different_forms() {
    let mut assembler = SimplexAssembler::new();
    let spherical = chameleon_test_form();
    let laplace = laplace_interval_form();
    let spherical_mass = assembler.lumped_mass(&spherical);
    let laplace_mass = assembler.lumped_mass(&laplace);
    assert_eq!(laplace_mass.len(), 5);
    assert_scalar_eq!(laplace_mass.sum(), 1.0, comp = abs, tol = 1e-14);
    assert_eq!(assembler.lumped_mass(&spherical), spherical_mass);
}

#[test]
fn assembler_distinguishes_forms_with_equal_names_on_shared_mesh() {
    let mesh = Arc::new(interval_mesh(1.0, 4));
    let params = PhysicalParameters::new(1.0, 1, 1.0);
    let form_with_density = |rho| {
        WeakFormSpec::builder("f", Arc::clone(&mesh))
            .density(Density::Uniform(rho))
            .nonlinear_term(NonlinearTerm::Linear { coefficient: 0.0 })
            .build(&params)
            .unwrap()
    };
    let light = form_with_density(1.0);
    let heavy = form_with_density(5.0);
    let field = DVector::repeat(5, 1.0);
    let bcs = BoundaryConditions::default();

    let mut shared = SimplexAssembler::new();
    let light_residual = shared.residual(&light, &field, &bcs);
    let heavy_residual = shared.residual(&heavy, &field, &bcs);
    let fresh_residual = SimplexAssembler::new().residual(&heavy, &field, &bcs);

    // A constant field only sees the load
    let expected = DVector::from_vec(vec![0.125, 0.25, 0.25, 0.25, 0.125]);
    assert_matrix_eq!(light_residual, expected, comp = abs, tol = 1e-14);
    assert_matrix_eq!(heavy_residual, fresh_residual, comp = abs, tol = 1e-14);
    assert_matrix_eq!(heavy_residual, expected * 5.0, comp = abs, tol = 1e-14);
    assert_matrix_eq!(shared.residual(&light, &field, &bcs), light_residual, comp = abs, tol = 1e-14);
}

#[test]
fn quadratic_elements_reproduce_quadratic_solution() {
    // u'' = 2 with u(0) = u(1) = 0 has the solution x^2 - x, which lies in the quadratic space
    let mesh = Arc::new(interval_mesh(1.0, 4).to_quadratic());
    let params = PhysicalParameters::new(1.0, 1, 1.0);
    let form = WeakFormSpec::builder("quadratic", Arc::clone(&mesh))
        .density(Density::Uniform(2.0))
        .nonlinear_term(NonlinearTerm::Linear { coefficient: 0.0 })
        .essential_bc(RegionTag::Vertex(1), 0.0)
        .essential_bc(RegionTag::Vertex(2), 0.0)
        .build(&params)
        .unwrap();
    assert_eq!(form.element_order(), 2);
    assert_eq!(mesh.num_vertices(), 9);

    let bcs = BoundaryConditions {
        essential: form.essential_dofs(),
        natural: Default::default(),
    };
    let mut assembler = SimplexAssembler::new();
    let field = DVector::zeros(9);
    let system = assembler.assemble(&form, &field, &bcs);
    let solution = assembler.solve_linear(&system).unwrap();

    let expected = DVector::from_iterator(9, mesh.vertices().iter().map(|v| v.x * v.x - v.x));
    assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-12);
}

#[test]
fn quadratic_lumped_mass_integrates_spherical_measure() {
    let (interior, _) = radial_meshes(3.0, &Sizing::uniform(0.2, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 3.0);
    let form = WeakFormSpec::builder("interior", Arc::new(interior.to_quadratic()))
        .build(&params)
        .unwrap();
    let mut assembler = SimplexAssembler::new();
    let mass = assembler.lumped_mass(&form);
    assert_eq!(mass.len(), 2 * interior.num_vertices() - 1);
    assert!(mass.iter().all(|&m| m > 0.0));
    assert_scalar_eq!(mass.sum(), 9.0, comp = abs, tol = 1e-12);

    let body = 0.125 / 3.0;
    let expected_load = 10.0 * body + 0.1 * (9.0 - body);
    assert_scalar_eq!(assembler.load(&form).sum(), expected_load, comp = abs, tol = 1e-12);
}

#[test]
fn quadratic_residual_is_energy_gradient() {
    let (interior, _) = radial_meshes(2.0, &Sizing::uniform(0.1, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 2.0);
    let form = WeakFormSpec::builder("interior", Arc::new(interior.to_quadratic()))
        .build(&params)
        .unwrap();
    let field = smooth_positive_field(&form);
    let v = direction(field.len());
    let mut assembler = SimplexAssembler::new();

    let h = 1e-6;
    let energy_plus = assembler.energy(&form, &(&field + &v * h));
    let energy_minus = assembler.energy(&form, &(&field - &v * h));
    let directional_derivative = (energy_plus - energy_minus) / (2.0 * h);

    let residual = assembler.residual(&form, &field, &BoundaryConditions::default());
    let expected = residual.dot(&v);
    assert!((directional_derivative - expected).abs() <= 1e-6 * (1.0 + expected.abs()));
}

#[test]
fn cholesky_solver_rejects_indefinite_systems() {
    let mut coo = CooMatrix::new(2, 2);
    coo.push(0, 0, -1.0);
    coo.push(1, 1, -1.0);
    let system = LinearSystem {
        matrix: CscMatrix::from(&coo),
        rhs: DVector::from_vec(vec![1.0, 1.0]),
    };
    assert!(matches!(CholeskySolver.solve(&system), Err(LinearSolveError::Factorization(_))));

    let system = LinearSystem {
        matrix: CscMatrix::identity(2),
        rhs: DVector::zeros(3),
    };
    assert!(matches!(
        CholeskySolver.solve(&system),
        Err(LinearSolveError::DimensionMismatch { rows: 2, rhs: 3 })
    ));
}
