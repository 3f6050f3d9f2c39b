use crate::allocators::DimAllocator;
use crate::mesh::Mesh;
use crate::monitor::ConvergenceRecord;
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::solver::GlobalSolution;
use crate::weak_form::DomainMapping;
use crate::SmallDim;
use eyre::{eyre, WrapErr};
use nalgebra::DefaultAllocator;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataArray, DataSet, ElementType, Piece, UnstructuredGridPiece,
    Version, VertexNumbers, Vtk,
};

fn simplex_cell_type(dim: usize, order: usize) -> CellType {
    match (dim, order) {
        (1, 1) => CellType::Line,
        (2, 1) => CellType::Triangle,
        (_, 1) => CellType::Tetra,
        (1, _) => CellType::QuadraticEdge,
        (2, _) => CellType::QuadraticTriangle,
        _ => CellType::QuadraticTetra,
    }
}

/// Builds a VTK unstructured grid from a mesh and nodal fields.
///
/// Vertices are mapped to physical coordinates through the domain mapping. Vertices without a
/// physical image, such as the point at infinity of an inverted mesh, are dropped together with
/// every cell touching them.
pub struct FieldDataSetBuilder<'a, D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    mesh: &'a Mesh<D>,
    mapping: DomainMapping,
    point_scalars: Vec<(String, &'a [f64])>,

    // Only used for exporting directly to file
    title: Option<String>,
}

impl<'a, D> FieldDataSetBuilder<'a, D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub fn from_mesh(mesh: &'a Mesh<D>) -> Self {
        Self {
            mesh,
            mapping: DomainMapping::Bounded,
            point_scalars: Vec::new(),
            title: None,
        }
    }

    pub fn with_mapping(self, mapping: DomainMapping) -> Self {
        Self { mapping, ..self }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..self
        }
    }

    /// Attaches a scalar field with one value per mesh vertex.
    pub fn with_point_scalars(mut self, name: impl Into<String>, values: &'a [f64]) -> Self {
        self.point_scalars.push((name.into(), values));
        self
    }

    pub fn try_build(&self) -> eyre::Result<DataSet> {
        let mesh = self.mesh;
        for (name, values) in &self.point_scalars {
            if values.len() != mesh.num_vertices() {
                return Err(eyre!(
                    "field '{}' has {} values, but the mesh has {} vertices",
                    name,
                    values.len(),
                    mesh.num_vertices()
                ));
            }
        }

        let mut new_index = vec![None; mesh.num_vertices()];
        let mut kept_vertices = Vec::new();
        let mut points = Vec::new();
        for (i, vertex) in mesh.vertices().iter().enumerate() {
            if let Some(x) = self.mapping.physical_point(vertex) {
                new_index[i] = Some(kept_vertices.len() as u32);
                kept_vertices.push(i);
                points.extend_from_slice(x.coords.as_slice());
                points.extend(std::iter::repeat(0.0).take(3 - D::dim()));
            }
        }

        // Vertices is laid out as follows: N, i_1, i_2, ... i_N
        let mut vertices = Vec::new();
        let mut num_cells = 0;
        for cell in mesh.cells() {
            let indices: Option<Vec<u32>> = cell.iter().map(|&v| new_index[v]).collect();
            if let Some(mut indices) = indices {
                // VTK orders the last two edges of a quadratic tetrahedron the other way around
                if D::dim() == 3 && mesh.order() == 2 {
                    indices.swap(8, 9);
                }
                vertices.push(indices.len() as u32);
                vertices.extend(indices);
                num_cells += 1;
            }
        }
        let cell_types = vec![simplex_cell_type(D::dim(), mesh.order()); num_cells];

        let point_attributes = self
            .point_scalars
            .iter()
            .map(|(name, values)| {
                let data: Vec<f64> = kept_vertices.iter().map(|&i| values[i]).collect();
                Attribute::DataArray(DataArray {
                    name: name.clone(),
                    elem: ElementType::Scalars {
                        num_comp: 1,
                        lookup_table: None,
                    },
                    data: data.into(),
                })
            })
            .collect();

        let piece = UnstructuredGridPiece {
            points: points.into(),
            cells: Cells {
                cell_verts: VertexNumbers::Legacy {
                    num_cells: num_cells as u32,
                    vertices,
                },
                types: cell_types,
            },
            data: Attributes {
                point: point_attributes,
                cell: Vec::new(),
            },
        };

        Ok(DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(piece))],
        })
    }

    /// Convenience function for directly exporting the dataset to a file.
    pub fn try_export(&self, filename: impl AsRef<Path>) -> eyre::Result<()> {
        let filepath = filename.as_ref();
        let fallback_title = filepath
            .file_stem()
            .map(|os_str| os_str.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let dataset = self.try_build()?;
        if let Some(parent) = filepath.parent() {
            create_dir_all(parent).wrap_err_with(|| format!("failed to create directory {}", parent.display()))?;
        }
        Vtk {
            version: Version { major: 4, minor: 1 },
            // If we don't have a title then just make the filepath the title
            title: self.title.clone().unwrap_or(fallback_title),
            byte_order: ByteOrder::BigEndian,
            data: dataset,
            file_path: None,
        }
        .export(filepath)
        .map_err(|err| eyre!("failed to write VTK file {}: {}", filepath.display(), err))
    }
}

/// Writes a coupled solution into a directory.
///
/// Produces `interior.vtk`, `exterior.vtk` with the exterior in physical coordinates, and
/// `history.json` with the convergence records of all streams.
#[derive(Debug, Clone)]
pub struct VtkExporter {
    directory: PathBuf,
    field_name: String,
}

impl VtkExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            field_name: "phi".to_string(),
        }
    }

    pub fn with_field_name(self, field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            ..self
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn export<D>(&self, solution: &GlobalSolution<D>) -> eyre::Result<()>
    where
        D: CanonicalSimplexQuadrature,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        create_dir_all(&self.directory)
            .wrap_err_with(|| format!("failed to create output directory {}", self.directory.display()))?;

        FieldDataSetBuilder::from_mesh(&solution.interior_mesh)
            .with_title("interior")
            .with_point_scalars(self.field_name.clone(), solution.interior.values.as_slice())
            .try_export(self.directory.join("interior.vtk"))?;
        FieldDataSetBuilder::from_mesh(&solution.exterior_mesh)
            .with_title("exterior")
            .with_mapping(solution.exterior_mapping)
            .with_point_scalars(self.field_name.clone(), solution.exterior.values.as_slice())
            .try_export(self.directory.join("exterior.vtk"))?;

        let records: Vec<&ConvergenceRecord> = solution.records().to_vec();
        self.export_history(&records)
    }

    pub fn export_history(&self, records: &[&ConvergenceRecord]) -> eyre::Result<()> {
        let path = self.directory.join("history.json");
        let json = serde_json::to_string_pretty(records).wrap_err("failed to serialize convergence history")?;
        std::fs::write(&path, json).wrap_err_with(|| format!("failed to write {}", path.display()))
    }
}
