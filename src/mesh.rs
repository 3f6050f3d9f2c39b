use crate::allocators::DimAllocator;
use crate::element::{simplex_edges, simplex_node_count};
use crate::mesh::procedural::{Geometry, Sizing};
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OPoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Display;
use std::path::Path;

pub mod procedural;

/// Source of meshes, either read from disk or generated from a geometry description.
pub trait MeshProvider<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    fn load_mesh(&self, path: &Path) -> eyre::Result<Mesh<D>>;

    fn generate_mesh(&self, geometry: &Geometry, sizing: &Sizing) -> eyre::Result<Mesh<D>>;
}

/// Tag identifying a region of a mesh.
///
/// Regions come in three kinds: sets of vertices, sets of boundary facets and sets of cells
/// (subdomains). The integer id is the physical tag assigned by the mesh generator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RegionTag {
    Vertex(u32),
    Facet(u32),
    Subdomain(u32),
}

impl RegionTag {
    pub fn id(&self) -> u32 {
        match *self {
            RegionTag::Vertex(id) | RegionTag::Facet(id) | RegionTag::Subdomain(id) => id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RegionTag::Vertex(_) => "vertex",
            RegionTag::Facet(_) => "facet",
            RegionTag::Subdomain(_) => "subdomain",
        }
    }
}

impl Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.kind_name(), self.id())
    }
}

/// A set of boundary facets together with the distinct nodes they reference.
///
/// Facets are stored as a flat list of node indices with a fixed number of nodes per facet:
/// the `D` vertices of the facet, followed by its edge nodes for quadratic meshes.
/// The node list holds each referenced vertex exactly once, in the order in which the
/// vertices are first encountered, unless reordered by interface matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetRegion {
    facets: Vec<usize>,
    nodes: Vec<usize>,
    facet_size: usize,
}

impl FacetRegion {
    fn from_facets(facet_size: usize, facets: Vec<usize>) -> Self {
        assert!(facet_size > 0);
        assert_eq!(facets.len() % facet_size, 0, "facet list must be a multiple of the facet size");
        let mut seen = BTreeSet::new();
        let nodes = facets
            .iter()
            .copied()
            .filter(|&v| seen.insert(v))
            .collect();
        Self {
            facets,
            nodes,
            facet_size,
        }
    }

    pub fn num_facets(&self) -> usize {
        self.facets.len() / self.facet_size
    }

    pub fn facet(&self, index: usize) -> &[usize] {
        &self.facets[self.facet_size * index..self.facet_size * (index + 1)]
    }

    pub fn facets(&self) -> impl Iterator<Item = &[usize]> {
        self.facets.chunks_exact(self.facet_size)
    }

    /// The distinct nodes of the region.
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub(crate) fn set_node_order(&mut self, nodes: Vec<usize>) {
        debug_assert_eq!(
            nodes.iter().collect::<BTreeSet<_>>(),
            self.nodes.iter().collect::<BTreeSet<_>>()
        );
        self.nodes = nodes;
    }
}

/// Conforming simplicial mesh with tagged regions.
///
/// Cells are simplices stored as a flat index list. Linear meshes have the `D + 1` vertices of
/// each cell, quadratic meshes additionally have one node per edge, ordered as in
/// [`simplex_edges`]. Nodes of either kind are called vertices in the accessors.
/// All region maps are ordered so that every traversal of the mesh is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    vertices: Vec<OPoint<f64, D>>,
    cells: Vec<usize>,
    order: usize,
    vertex_regions: BTreeMap<u32, Vec<usize>>,
    facet_regions: BTreeMap<u32, FacetRegion>,
    cell_regions: BTreeMap<u32, Vec<usize>>,
}

impl<D> Mesh<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    /// Construct a linear mesh from vertices and flat simplex connectivity.
    ///
    /// # Panics
    ///
    /// Panics if the connectivity is not a multiple of `D + 1` or references vertices
    /// out of bounds.
    pub fn from_vertices_and_cells(vertices: Vec<OPoint<f64, D>>, cells: Vec<usize>) -> Self {
        Self::from_vertices_and_cells_of_order(1, vertices, cells)
    }

    /// Construct a mesh of the given element order from nodes and flat connectivity.
    ///
    /// # Panics
    ///
    /// Panics if the order is neither one nor two, if the connectivity is not a multiple of the
    /// number of nodes per cell or if it references nodes out of bounds.
    pub fn from_vertices_and_cells_of_order(order: usize, vertices: Vec<OPoint<f64, D>>, cells: Vec<usize>) -> Self {
        let stride = simplex_node_count(D::dim(), order)
            .unwrap_or_else(|| panic!("unsupported element order {}", order));
        assert_eq!(
            cells.len() % stride,
            0,
            "cell connectivity must be a multiple of the number of nodes per cell"
        );
        assert!(
            cells.iter().all(|&v| v < vertices.len()),
            "cell connectivity references vertices out of bounds"
        );
        Self {
            vertices,
            cells,
            order,
            vertex_regions: BTreeMap::new(),
            facet_regions: BTreeMap::new(),
            cell_regions: BTreeMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        D::dim()
    }

    pub fn vertices(&self) -> &[OPoint<f64, D>] {
        &self.vertices
    }

    pub(crate) fn vertices_mut(&mut self) -> &mut [OPoint<f64, D>] {
        &mut self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Polynomial order of the cells, one or two.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nodes_per_cell(&self) -> usize {
        D::dim() + 1 + if self.order == 2 { simplex_edges(D::dim()).len() } else { 0 }
    }

    pub fn nodes_per_facet(&self) -> usize {
        D::dim() + if self.order == 2 { simplex_edges(D::dim() - 1).len() } else { 0 }
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len() / self.nodes_per_cell()
    }

    pub fn cell(&self, index: usize) -> &[usize] {
        let stride = self.nodes_per_cell();
        &self.cells[stride * index..stride * (index + 1)]
    }

    /// The `D + 1` corner vertices of a cell.
    pub fn cell_vertices(&self, index: usize) -> &[usize] {
        &self.cell(index)[..D::dim() + 1]
    }

    pub fn cells(&self) -> impl Iterator<Item = &[usize]> {
        self.cells.chunks_exact(self.nodes_per_cell())
    }

    pub fn cell_centroid(&self, index: usize) -> OPoint<f64, D> {
        let cell = self.cell_vertices(index);
        let mut centroid = OPoint::<f64, D>::origin();
        for &v in cell {
            centroid.coords += &self.vertices[v].coords;
        }
        centroid.coords /= cell.len() as f64;
        centroid
    }

    /// Inserts a node at the midpoint of every edge, turning a linear mesh into a quadratic one.
    ///
    /// Facets gain the nodes of their edges. Vertex and cell regions are kept as they are.
    /// Quadratic meshes are returned unchanged.
    pub fn to_quadratic(&self) -> Self {
        if self.order == 2 {
            return self.clone();
        }
        let d = D::dim();
        let mut vertices = self.vertices.clone();
        let mut edge_nodes = BTreeMap::new();

        let mut cells = Vec::with_capacity(self.num_cells() * (d + 1 + simplex_edges(d).len()));
        for cell in self.cells() {
            cells.extend_from_slice(cell);
            for &(i, j) in simplex_edges(d) {
                cells.push(edge_node(&mut edge_nodes, &mut vertices, cell[i], cell[j]));
            }
        }

        let mut facet_regions = BTreeMap::new();
        for (&id, region) in &self.facet_regions {
            let mut facets = Vec::new();
            for facet in region.facets() {
                facets.extend_from_slice(facet);
                for &(i, j) in simplex_edges(d - 1) {
                    facets.push(edge_node(&mut edge_nodes, &mut vertices, facet[i], facet[j]));
                }
            }
            facet_regions.insert(id, facets);
        }

        let mut mesh = Self::from_vertices_and_cells_of_order(2, vertices, cells);
        mesh.vertex_regions = self.vertex_regions.clone();
        mesh.cell_regions = self.cell_regions.clone();
        for (id, facets) in facet_regions {
            mesh.insert_facet_region(id, facets);
        }
        mesh
    }

    /// Tag a set of vertices, replacing any previous region with the same id.
    pub fn insert_vertex_region(&mut self, id: u32, vertices: Vec<usize>) {
        assert!(vertices.iter().all(|&v| v < self.vertices.len()));
        self.vertex_regions.insert(id, vertices);
    }

    /// Tag a set of facets given as flat connectivity with [`Mesh::nodes_per_facet`] nodes per facet.
    pub fn insert_facet_region(&mut self, id: u32, facets: Vec<usize>) {
        assert!(facets.iter().all(|&v| v < self.vertices.len()));
        let facet_size = self.nodes_per_facet();
        self.facet_regions
            .insert(id, FacetRegion::from_facets(facet_size, facets));
    }

    pub fn insert_cell_region(&mut self, id: u32, cells: Vec<usize>) {
        let num_cells = self.num_cells();
        assert!(cells.iter().all(|&c| c < num_cells));
        self.cell_regions.insert(id, cells);
    }

    pub fn contains_region(&self, tag: RegionTag) -> bool {
        match tag {
            RegionTag::Vertex(id) => self.vertex_regions.contains_key(&id),
            RegionTag::Facet(id) => self.facet_regions.contains_key(&id),
            RegionTag::Subdomain(id) => self.cell_regions.contains_key(&id),
        }
    }

    /// All region tags declared on this mesh, in ascending order.
    pub fn region_tags(&self) -> Vec<RegionTag> {
        let vertex = self.vertex_regions.keys().map(|&id| RegionTag::Vertex(id));
        let facet = self.facet_regions.keys().map(|&id| RegionTag::Facet(id));
        let cell = self.cell_regions.keys().map(|&id| RegionTag::Subdomain(id));
        vertex.chain(facet).chain(cell).collect()
    }

    pub fn facet_region(&self, id: u32) -> Option<&FacetRegion> {
        self.facet_regions.get(&id)
    }

    pub(crate) fn facet_region_mut(&mut self, id: u32) -> Option<&mut FacetRegion> {
        self.facet_regions.get_mut(&id)
    }

    pub fn vertex_region(&self, id: u32) -> Option<&[usize]> {
        self.vertex_regions.get(&id).map(Vec::as_slice)
    }

    pub fn cell_region(&self, id: u32) -> Option<&[usize]> {
        self.cell_regions.get(&id).map(Vec::as_slice)
    }

    pub fn cell_regions(&self) -> impl Iterator<Item = (u32, &[usize])> {
        self.cell_regions
            .iter()
            .map(|(&id, cells)| (id, cells.as_slice()))
    }

    /// The distinct vertices belonging to a region of any kind.
    ///
    /// For facet regions the node order of the region is preserved, for the other kinds
    /// the nodes are returned in ascending order.
    pub fn region_nodes(&self, tag: RegionTag) -> Option<Vec<usize>> {
        match tag {
            RegionTag::Vertex(id) => self.vertex_regions.get(&id).map(|vertices| {
                let unique: BTreeSet<_> = vertices.iter().copied().collect();
                unique.into_iter().collect()
            }),
            RegionTag::Facet(id) => self
                .facet_regions
                .get(&id)
                .map(|region| region.nodes().to_vec()),
            RegionTag::Subdomain(id) => self.cell_regions.get(&id).map(|cells| {
                let unique: BTreeSet<_> = cells
                    .iter()
                    .flat_map(|&c| self.cell(c).iter().copied())
                    .collect();
                unique.into_iter().collect()
            }),
        }
    }

    /// Find a cell containing all vertices of the given facet.
    ///
    /// For a boundary facet this is the unique adjacent cell.
    pub fn adjacent_cell(&self, facet: &[usize]) -> Option<usize> {
        self.cells()
            .position(|cell| facet.iter().all(|v| cell.contains(v)))
    }

    /// Signed measure of the simplex spanned by a facet and the remaining vertex of its adjacent cell.
    ///
    /// The sign tells on which side of the facet the adjacent cell lies, relative to the order in which
    /// the facet vertices are given. Only the leading `D` vertices of the facet are used. Returns `None`
    /// if the facet has no adjacent cell.
    pub fn facet_side(&self, facet: &[usize]) -> Option<f64> {
        let cell = self.adjacent_cell(facet)?;
        let facet = facet.get(..D::dim())?;
        let opposite = self
            .cell_vertices(cell)
            .iter()
            .copied()
            .find(|v| !facet.contains(v))?;
        let origin = &self.vertices[facet[0]];
        let d = D::dim();
        let edges = nalgebra::OMatrix::<f64, D, D>::from_fn(|i, j| {
            let tip = if j + 1 < d {
                &self.vertices[facet[j + 1]]
            } else {
                &self.vertices[opposite]
            };
            tip[i] - origin[i]
        });
        Some(edges.determinant())
    }
}

/// Index of the node on the edge between `a` and `b`, inserting it at the midpoint if needed.
fn edge_node<D>(
    edge_nodes: &mut BTreeMap<(usize, usize), usize>,
    vertices: &mut Vec<OPoint<f64, D>>,
    a: usize,
    b: usize,
) -> usize
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    *edge_nodes.entry((a.min(b), a.max(b))).or_insert_with(|| {
        let midpoint = OPoint::from((&vertices[a].coords + &vertices[b].coords) * 0.5);
        vertices.push(midpoint);
        vertices.len() - 1
    })
}
