//! Reading meshes from Gmsh files and writing results to VTK and JSON.
pub mod msh;
pub mod vtk;
