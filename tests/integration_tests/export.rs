use chameleon_fem::config::SolverConfig;
use chameleon_fem::io::vtk::VtkExporter;
use chameleon_fem::mesh::procedural::Sizing;
use chameleon_fem::physics::chameleon::ChameleonProblem;
use chameleon_fem::weak_form::CoordinateSystem;

use super::{data_output_path, single_sphere_params, single_sphere_radial};

#[test]
fn export_coupled_solution() -> eyre::Result<()> {
    let (interior, exterior) = single_sphere_radial(4.0, &Sizing::uniform(0.1, 2));
    let params = single_sphere_params(CoordinateSystem::Spherical, 4.0);
    let solution = ChameleonProblem::new(params, interior, exterior).solve(&SolverConfig::new(1e-10))?;

    let exporter = VtkExporter::new(data_output_path().join("export_coupled_solution")).with_field_name("phi");
    exporter.export(&solution)?;

    let directory = exporter.directory();
    assert!(directory.join("interior.vtk").exists());
    assert!(directory.join("exterior.vtk").exists());

    let history: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(directory.join("history.json"))?)?;
    let streams = history.as_array().unwrap();
    assert_eq!(streams.len(), 3);
    Ok(())
}
