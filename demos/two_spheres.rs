//! Chameleon field around two equal spheres on the symmetry axis.
//!
//! Writes `interior.vtk`, `exterior.vtk` and `history.json` to `data/demos/two_spheres/`.
use chameleon_fem::config::SolverConfig;
use chameleon_fem::io::vtk::VtkExporter;
use chameleon_fem::mesh::procedural::{create_polar_disk_mesh, Geometry, Sizing};
use chameleon_fem::mesh::RegionTag;
use chameleon_fem::physics::chameleon::ChameleonProblem;
use chameleon_fem::physics::PhysicalParameters;
use chameleon_fem::weak_form::CoordinateSystem;

const TRUNCATION_RADIUS: f64 = 6.0;
const VACUUM_TAG: u32 = 302;

fn main() -> eyre::Result<()> {
    let interior = Geometry::interior(CoordinateSystem::Cylindrical, TRUNCATION_RADIUS)
        .with_body(-2.0, 0.5, 300)
        .with_body(2.0, 0.5, 301)
        .with_vacuum_tag(VACUUM_TAG);
    let exterior = Geometry::exterior(CoordinateSystem::Cylindrical, TRUNCATION_RADIUS);
    let sizing = Sizing {
        min_size: 0.04,
        max_size: 0.3,
        interface_nodes: 120,
        grading_length: 1.5,
    };
    let interior_mesh = create_polar_disk_mesh(&interior, &sizing)?;
    let exterior_mesh = create_polar_disk_mesh(&exterior, &sizing)?;
    println!(
        "Interior mesh: {} vertices, {} cells",
        interior_mesh.num_vertices(),
        interior_mesh.num_cells()
    );
    println!(
        "Exterior mesh: {} vertices, {} cells",
        exterior_mesh.num_vertices(),
        exterior_mesh.num_cells()
    );

    let params = PhysicalParameters::new(10.0, 1, 0.1)
        .with_truncation_radius(TRUNCATION_RADIUS)
        .with_coordinates(CoordinateSystem::Cylindrical)
        .with_density(RegionTag::Subdomain(300), 10.0)
        .with_density(RegionTag::Subdomain(301), 10.0)
        .with_density(RegionTag::Subdomain(VACUUM_TAG), 0.1);

    let mut config = SolverConfig::new(1e-10);
    config.coupling.interface_tolerance = 1e-8;

    let solution = ChameleonProblem::new(params, interior_mesh, exterior_mesh)
        .with_element_order(2)
        .solve(&config)?;
    println!(
        "Converged in {} outer iterations, interface mismatch {:e}",
        solution.outer_iterations, solution.interface_mismatch
    );
    if let Some(residual_norm) = solution.residual_norm {
        println!("Interior residual norm: {:e}", residual_norm);
    }

    let exporter = VtkExporter::new("data/demos/two_spheres");
    exporter.export(&solution)?;
    println!("Results written to {}", exporter.directory().display());
    Ok(())
}
