use chameleon_fem::mesh::procedural::{create_polar_disk_mesh, create_radial_interval_mesh, Geometry, Sizing};
use chameleon_fem::mesh::{Mesh, RegionTag};
use chameleon_fem::nalgebra::{U1, U2};
use chameleon_fem::physics::PhysicalParameters;
use chameleon_fem::weak_form::CoordinateSystem;
use std::path::PathBuf;

mod export;
mod kelvin;

fn data_output_path() -> PathBuf {
    PathBuf::from("data/integration_tests/")
}

/// A sphere of radius 0.5 and density 10 at the origin, surrounded by vacuum of density 0.1.
fn single_sphere_params(coordinates: CoordinateSystem, truncation_radius: f64) -> PhysicalParameters {
    PhysicalParameters::new(10.0, 1, 0.1)
        .with_truncation_radius(truncation_radius)
        .with_coordinates(coordinates)
        .with_density(RegionTag::Subdomain(300), 0.1)
        .with_density(RegionTag::Subdomain(301), 10.0)
}

fn single_sphere_radial(truncation_radius: f64, sizing: &Sizing) -> (Mesh<U1>, Mesh<U1>) {
    let interior = Geometry::interior(CoordinateSystem::Spherical, truncation_radius).with_body(0.0, 0.5, 301);
    let exterior = Geometry::exterior(CoordinateSystem::Spherical, truncation_radius);
    (
        create_radial_interval_mesh(&interior, sizing).expect("valid geometry"),
        create_radial_interval_mesh(&exterior, sizing).expect("valid geometry"),
    )
}

fn single_sphere_disk(truncation_radius: f64, sizing: &Sizing) -> (Mesh<U2>, Mesh<U2>) {
    let interior = Geometry::interior(CoordinateSystem::Cylindrical, truncation_radius).with_body(0.0, 0.5, 301);
    let exterior = Geometry::exterior(CoordinateSystem::Cylindrical, truncation_radius);
    (
        create_polar_disk_mesh(&interior, sizing).expect("valid geometry"),
        create_polar_disk_mesh(&exterior, sizing).expect("valid geometry"),
    )
}

fn coarse_disk_sizing() -> Sizing {
    Sizing {
        min_size: 0.1,
        max_size: 0.5,
        interface_nodes: 24,
        grading_length: 1.0,
    }
}
