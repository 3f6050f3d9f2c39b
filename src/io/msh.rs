use crate::allocators::DimAllocator;
use crate::element::simplex_node_count;
use crate::mesh::Mesh;
use crate::SmallDim;
use eyre::{eyre, Context};
use log::warn;
use mshio::ElementType;
use nalgebra::{DefaultAllocator, OPoint};
use std::collections::BTreeMap;
use std::path::Path;

/// Loads a [`Mesh`] from a Gmsh MSH file at the given path.
pub fn load_msh_from_file<D, P: AsRef<Path>>(file_path: P) -> eyre::Result<Mesh<D>>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let msh_bytes = std::fs::read(file_path).wrap_err("failed to read file")?;
    load_msh_from_bytes(&msh_bytes).wrap_err("failed to load mesh from msh file")
}

/// Loads a [`Mesh`] by parsing the given bytes as a Gmsh MSH file.
///
/// Elements of dimension `D` become cells, elements of dimension `D - 1` become facets and
/// elements of dimension zero become tagged vertices. Regions are named by the physical groups of
/// the entities the elements belong to. Elements of entities without physical groups are only kept
/// if they are cells.
///
/// Linear and quadratic simplices are supported. The order of the mesh is that of its first cell
/// block, and every other block must have the same order. Edge nodes are expected at the
/// midpoints of their edges.
pub fn load_msh_from_bytes<D>(bytes: &[u8]) -> eyre::Result<Mesh<D>>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let mut msh_file = mshio::parse_msh_bytes(bytes).map_err(|e| eyre!("failed to parse msh file: {}", e))?;

    let msh_nodes = msh_file
        .data
        .nodes
        .take()
        .ok_or(eyre!("MSH file does not contain nodes"))?;
    let msh_elements = msh_file
        .data
        .elements
        .take()
        .ok_or(eyre!("MSH file does not contain elements"))?;

    // Physical tags of every entity, keyed by (dimension, entity tag)
    let mut physical_tags: BTreeMap<(i32, i32), Vec<i32>> = BTreeMap::new();
    if let Some(entities) = msh_file.data.entities.take() {
        for point in &entities.points {
            physical_tags.insert((0, point.tag), point.physical_tags.clone());
        }
        for curve in &entities.curves {
            physical_tags.insert((1, curve.tag), curve.physical_tags.clone());
        }
        for surface in &entities.surfaces {
            physical_tags.insert((2, surface.tag), surface.physical_tags.clone());
        }
        for volume in &entities.volumes {
            physical_tags.insert((3, volume.tag), volume.physical_tags.clone());
        }
    }

    let mut vertices = Vec::new();
    for node_block in &msh_nodes.node_blocks {
        // Ensure that node tags are consecutive
        if node_block.node_tags.is_some() {
            return Err(eyre!("node block tags are not consecutive in msh file"));
        }
        for node in &node_block.nodes {
            let coords = [node.x, node.y, node.z];
            if coords[D::dim()..].iter().any(|&x| x != 0.0) {
                warn!("Discarding non-zero node coordinates beyond dimension {}", D::dim());
            }
            vertices.push(OPoint::<f64, D>::from_slice(&coords[..D::dim()]));
        }
    }

    let dim = D::dim();
    let order = msh_elements
        .element_blocks
        .iter()
        .find(|block| usize::try_from(block.entity_dim) == Ok(dim))
        .and_then(|block| simplex_order(block.element_type))
        .ok_or_else(|| eyre!("MSH file does not contain simplex elements of dimension {}", dim))?;

    let mut cells = Vec::new();
    let mut cell_regions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    let mut facet_regions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    let mut vertex_regions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();

    for block in &msh_elements.element_blocks {
        // Ensure that element tags are consecutive
        if block.element_tags.is_some() {
            return Err(eyre!("element block tags are not consecutive in msh file"));
        }
        let block_dim = usize::try_from(block.entity_dim)
            .map_err(|_| eyre!("invalid element block dimension {}", block.entity_dim))?;
        if block_dim > dim {
            warn!("Ignoring element block of dimension {} in mesh of dimension {}", block_dim, dim);
            continue;
        }
        let expected_type = simplex_element_type(block_dim, order);
        if block.element_type != expected_type {
            return Err(eyre!(
                "unsupported element type {:?} in block of dimension {}, expected {:?}",
                block.element_type,
                block_dim,
                expected_type
            ));
        }

        let tags: Vec<u32> = physical_tags
            .get(&(block.entity_dim, block.entity_tag))
            .map(|tags| tags.iter().map(|tag| tag.unsigned_abs()).collect())
            .unwrap_or_default();

        let nodes_per_element = simplex_node_count(block_dim, order).unwrap_or(block_dim + 1);
        let mut block_connectivity = Vec::with_capacity(block.elements.len() * nodes_per_element);
        for element in &block.elements {
            if element.nodes.len() < nodes_per_element {
                return Err(eyre!("not enough nodes to initialize connectivity"));
            }
            for &node in &element.nodes[..nodes_per_element] {
                let index = (node as usize)
                    .checked_sub(1)
                    .filter(|&index| index < vertices.len())
                    .ok_or_else(|| eyre!("element references unknown node {}", node))?;
                block_connectivity.push(index);
            }
        }

        if block_dim == dim {
            let first_cell = cells.len() / nodes_per_element;
            let num_cells = block.elements.len();
            cells.extend_from_slice(&block_connectivity);
            for &tag in &tags {
                cell_regions
                    .entry(tag)
                    .or_default()
                    .extend(first_cell..first_cell + num_cells);
            }
            continue;
        }
        if block_dim + 1 == dim {
            for &tag in &tags {
                facet_regions
                    .entry(tag)
                    .or_default()
                    .extend_from_slice(&block_connectivity);
            }
        }
        if block_dim == 0 {
            for &tag in &tags {
                vertex_regions
                    .entry(tag)
                    .or_default()
                    .extend_from_slice(&block_connectivity);
            }
        }
    }

    if cells.is_empty() {
        return Err(eyre!("MSH file does not contain elements of dimension {}", dim));
    }

    let mut mesh = Mesh::from_vertices_and_cells_of_order(order, vertices, cells);
    for (tag, vertices) in vertex_regions {
        mesh.insert_vertex_region(tag, vertices);
    }
    for (tag, facets) in facet_regions {
        mesh.insert_facet_region(tag, facets);
    }
    for (tag, cells) in cell_regions {
        mesh.insert_cell_region(tag, cells);
    }
    Ok(mesh)
}

/// The simplex element type of the given dimension and order.
fn simplex_element_type(dim: usize, order: usize) -> ElementType {
    match (dim, order) {
        (0, _) => ElementType::Pnt,
        (1, 1) => ElementType::Lin2,
        (1, _) => ElementType::Lin3,
        (2, 1) => ElementType::Tri3,
        (2, _) => ElementType::Tri6,
        (_, 1) => ElementType::Tet4,
        _ => ElementType::Tet10,
    }
}

fn simplex_order(element_type: ElementType) -> Option<usize> {
    match element_type {
        ElementType::Lin2 | ElementType::Tri3 | ElementType::Tet4 => Some(1),
        ElementType::Lin3 | ElementType::Tri6 | ElementType::Tet10 => Some(2),
        _ => None,
    }
}
