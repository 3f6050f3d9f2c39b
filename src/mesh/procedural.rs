//! Procedural generation of interior and compactified exterior meshes.
//!
//! The generated meshes are built from concentric rings (or radial nodes in one dimension)
//! centered at the origin, so that the truncation boundary at radius $R_c$ is sampled identically
//! by every mesh generated with the same interface resolution. Bodies are spheres centered on
//! the symmetry axis (the second coordinate in two dimensions).
use crate::io::msh::load_msh_from_file;
use crate::mesh::{Mesh, MeshProvider};
use crate::weak_form::CoordinateSystem;
use eyre::eyre;
use nalgebra::{Point1, Point2, U1, U2, U3};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

/// Physical tag of the truncation boundary shared by interior and exterior meshes.
pub const DEFAULT_INTERFACE_TAG: u32 = 200;
/// Physical tag of the vacuum subdomain.
pub const DEFAULT_VACUUM_TAG: u32 = 300;
/// Physical tag of the vertex representing the point at infinity on exterior meshes.
pub const DEFAULT_INFINITY_TAG: u32 = 0;

/// A spherical body centered on the symmetry axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Position of the center along the symmetry axis.
    pub position: f64,
    pub radius: f64,
    /// Subdomain tag of the cells inside the body.
    pub tag: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainPart {
    /// The bounded domain $|x| \leq R_c$ containing the bodies.
    Interior,
    /// The Kelvin-inverted image of $|x| \geq R_c$, meshed as $|\xi| \leq R_c$.
    Exterior,
}

/// Geometry description consumed by [`MeshProvider::generate_mesh`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub coordinates: CoordinateSystem,
    pub part: DomainPart,
    pub truncation_radius: f64,
    pub bodies: Vec<Body>,
    pub vacuum_tag: u32,
    pub interface_tag: u32,
    pub infinity_tag: u32,
}

impl Geometry {
    pub fn interior(coordinates: CoordinateSystem, truncation_radius: f64) -> Self {
        Self {
            coordinates,
            part: DomainPart::Interior,
            truncation_radius,
            bodies: Vec::new(),
            vacuum_tag: DEFAULT_VACUUM_TAG,
            interface_tag: DEFAULT_INTERFACE_TAG,
            infinity_tag: DEFAULT_INFINITY_TAG,
        }
    }

    pub fn exterior(coordinates: CoordinateSystem, truncation_radius: f64) -> Self {
        Self {
            part: DomainPart::Exterior,
            ..Self::interior(coordinates, truncation_radius)
        }
    }

    pub fn with_body(mut self, position: f64, radius: f64, tag: u32) -> Self {
        self.bodies.push(Body { position, radius, tag });
        self
    }

    pub fn with_vacuum_tag(mut self, tag: u32) -> Self {
        self.vacuum_tag = tag;
        self
    }

    pub fn with_interface_tag(mut self, tag: u32) -> Self {
        self.interface_tag = tag;
        self
    }

    fn validate(&self) -> eyre::Result<()> {
        let rc = self.truncation_radius;
        if !(rc.is_finite() && rc > 0.0) {
            return Err(eyre!("truncation radius must be positive, got {}", rc));
        }
        if self.part == DomainPart::Exterior && !self.bodies.is_empty() {
            return Err(eyre!("exterior geometries cannot contain bodies"));
        }
        for (i, body) in self.bodies.iter().enumerate() {
            if !(body.radius.is_finite() && body.radius > 0.0) {
                return Err(eyre!("body {} has invalid radius {}", i, body.radius));
            }
            if body.position.abs() + body.radius >= rc {
                return Err(eyre!("body {} is not contained in the truncation radius", i));
            }
            if self.coordinates == CoordinateSystem::Spherical && body.position != 0.0 {
                return Err(eyre!("bodies must be centered at the origin in spherical coordinates"));
            }
            for (j, other) in self.bodies.iter().enumerate().skip(i + 1) {
                if (body.position - other.position).abs() < body.radius + other.radius {
                    return Err(eyre!("bodies {} and {} overlap", i, j));
                }
            }
        }
        Ok(())
    }

    /// Subdomain tag of the region containing the given point of the meridian plane.
    fn classify(&self, rho: f64, z: f64) -> u32 {
        self.bodies
            .iter()
            .find(|body| rho.hypot(z - body.position) < body.radius)
            .map(|body| body.tag)
            .unwrap_or(self.vacuum_tag)
    }

    /// Distance from the sphere of radius `r` about the origin to the nearest body surface.
    fn distance_to_bodies(&self, r: f64) -> f64 {
        self.bodies
            .iter()
            .map(|body| {
                // The ring crosses the body surface for radii in [lo, hi]
                let lo = (body.position.abs() - body.radius).abs();
                let hi = body.position.abs() + body.radius;
                if r < lo {
                    lo - r
                } else if r > hi {
                    r - hi
                } else {
                    0.0
                }
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Radii at which rings must be placed so that centered bodies are conforming.
    fn radial_breakpoints(&self) -> Vec<f64> {
        let rc = self.truncation_radius;
        let mut breakpoints = vec![0.0, rc];
        for body in &self.bodies {
            for r in [body.position.abs() - body.radius, body.position.abs() + body.radius] {
                if r > 0.0 && r < rc {
                    breakpoints.push(r);
                }
            }
        }
        breakpoints.sort_unstable_by_key(|&r| OrderedFloat(r));
        breakpoints.dedup_by(|a, b| (*a - *b).abs() <= 1e-12 * rc);
        breakpoints
    }
}

/// Mesh resolution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sizing {
    /// Target element size at body surfaces.
    pub min_size: f64,
    /// Target element size far from the bodies.
    pub max_size: f64,
    /// Number of nodes on the truncation boundary.
    pub interface_nodes: usize,
    /// Distance over which the element size grows from `min_size` to `max_size`.
    pub grading_length: f64,
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            min_size: 0.02,
            max_size: 0.15,
            interface_nodes: 150,
            grading_length: 1.0,
        }
    }
}

impl Sizing {
    pub fn uniform(size: f64, interface_nodes: usize) -> Self {
        Self {
            min_size: size,
            max_size: size,
            interface_nodes,
            grading_length: 1.0,
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        if !(self.min_size > 0.0 && self.max_size >= self.min_size && self.max_size.is_finite()) {
            return Err(eyre!(
                "invalid element sizes: min {} and max {}",
                self.min_size,
                self.max_size
            ));
        }
        if !(self.grading_length > 0.0) {
            return Err(eyre!("grading length must be positive"));
        }
        Ok(())
    }

    fn local_size(&self, geometry: &Geometry, r: f64) -> f64 {
        let distance = geometry.distance_to_bodies(r);
        let t = (distance / self.grading_length).min(1.0);
        self.min_size + (self.max_size - self.min_size) * t
    }
}

/// Radial node positions in `[0, R_c]`, conforming to the radial breakpoints of the geometry.
fn radial_nodes(geometry: &Geometry, sizing: &Sizing) -> Vec<f64> {
    let breakpoints = geometry.radial_breakpoints();
    let mut nodes = vec![0.0];
    for interval in breakpoints.windows(2) {
        let (a, b) = (interval[0], interval[1]);
        let mut marks = vec![a];
        let mut r = a;
        while r < b {
            r += sizing.local_size(geometry, r).min(b - a);
            marks.push(r);
        }
        // Keep whichever of the last two marks lies closer to the end of the interval,
        // then stretch the marks to end exactly at b
        let n = marks.len();
        if n > 2 && (b - marks[n - 2]) < (marks[n - 1] - b) {
            marks.pop();
        }
        let end = marks[marks.len() - 1];
        let scale = (b - a) / (end - a);
        let last = marks.len() - 1;
        nodes.extend(marks.iter().enumerate().skip(1).map(|(i, &m)| {
            if i == last {
                b
            } else {
                a + (m - a) * scale
            }
        }));
    }
    nodes
}

/// Creates a mesh of the radial interval `[0, R_c]` for radially symmetric problems.
///
/// Interior meshes tag every segment with the subdomain of its midpoint and the node at $R_c$
/// with the interface facet tag. Exterior meshes additionally tag the node at the origin,
/// which is the image of the point at infinity, with the infinity vertex tag.
pub fn create_radial_interval_mesh(geometry: &Geometry, sizing: &Sizing) -> eyre::Result<Mesh<U1>> {
    geometry.validate()?;
    sizing.validate()?;
    if geometry.coordinates != CoordinateSystem::Spherical {
        return Err(eyre!("interval meshes require spherical coordinates"));
    }

    let radii = radial_nodes(geometry, sizing);
    let vertices = radii.iter().map(|&r| Point1::new(r)).collect();
    let cells = (0..radii.len() - 1).flat_map(|i| [i, i + 1]).collect();
    let mut mesh = Mesh::from_vertices_and_cells(vertices, cells);

    let mut regions = std::collections::BTreeMap::<u32, Vec<usize>>::new();
    for (i, window) in radii.windows(2).enumerate() {
        let midpoint = 0.5 * (window[0] + window[1]);
        regions
            .entry(geometry.classify(0.0, midpoint))
            .or_default()
            .push(i);
    }
    for (tag, cells) in regions {
        mesh.insert_cell_region(tag, cells);
    }

    mesh.insert_facet_region(geometry.interface_tag, vec![radii.len() - 1]);
    if geometry.part == DomainPart::Exterior {
        mesh.insert_vertex_region(geometry.infinity_tag, vec![0]);
    }
    Ok(mesh)
}

/// A ring of nodes traversed by increasing angle.
///
/// Closed rings repeat their first node at the end with angle $2\pi$.
struct Ring {
    nodes: Vec<usize>,
    angles: Vec<f64>,
}

fn push_counter_clockwise(cells: &mut Vec<usize>, vertices: &[Point2<f64>], mut tri: [usize; 3]) {
    let [a, b, c] = tri.map(|i| vertices[i]);
    let signed_area = (b - a).perp(&(c - a));
    if signed_area < 0.0 {
        tri.swap(1, 2);
    }
    cells.extend_from_slice(&tri);
}

/// Triangulates the strip between two rings spanning the same angular range.
fn stitch_rings(cells: &mut Vec<usize>, vertices: &[Point2<f64>], inner: &Ring, outer: &Ring) {
    let (mut i, mut j) = (0, 0);
    let (last_i, last_j) = (inner.nodes.len() - 1, outer.nodes.len() - 1);
    while i < last_i || j < last_j {
        let advance_outer = if i == last_i {
            true
        } else if j == last_j {
            false
        } else {
            outer.angles[j + 1] <= inner.angles[i + 1]
        };
        if advance_outer {
            push_counter_clockwise(cells, vertices, [inner.nodes[i], outer.nodes[j], outer.nodes[j + 1]]);
            j += 1;
        } else {
            push_counter_clockwise(cells, vertices, [inner.nodes[i], outer.nodes[j], inner.nodes[i + 1]]);
            i += 1;
        }
    }
}

/// Creates a triangle mesh of the disk of radius $R_c$ built from concentric rings.
///
/// In cylindrical coordinates only the meridian half-disk $\rho \geq 0$ is meshed, with
/// coordinates $(\rho, z)$ and bodies centered on the $z$-axis. In Cartesian coordinates the
/// full disk is meshed and bodies are centered on the second coordinate axis. The outermost ring
/// always carries exactly `sizing.interface_nodes` nodes, so any two meshes generated with the
/// same truncation radius and interface resolution sample the truncation boundary identically.
///
/// Rings are placed at the radii where bodies start and end, so only a body centered at the
/// origin is resolved exactly. Cells are assigned to bodies by their centroid, which leaves a
/// staircase approximation of off-center bodies at the resolution of `sizing.min_size`.
pub fn create_polar_disk_mesh(geometry: &Geometry, sizing: &Sizing) -> eyre::Result<Mesh<U2>> {
    geometry.validate()?;
    sizing.validate()?;
    let (span, closed, min_segments) = match geometry.coordinates {
        CoordinateSystem::Cylindrical => (PI, false, 2),
        CoordinateSystem::Cartesian => (2.0 * PI, true, 3),
        CoordinateSystem::Spherical => return Err(eyre!("disk meshes are not defined in spherical coordinates")),
    };
    let interface_segments = if closed {
        sizing.interface_nodes
    } else {
        sizing.interface_nodes.saturating_sub(1)
    };
    if interface_segments < min_segments {
        return Err(eyre!(
            "at least {} interface nodes are required, got {}",
            min_segments + usize::from(!closed),
            sizing.interface_nodes
        ));
    }

    let radii = radial_nodes(geometry, sizing);
    let mut vertices = vec![Point2::origin()];
    let mut rings = Vec::with_capacity(radii.len() - 1);
    for (k, &r) in radii.iter().enumerate().skip(1) {
        let segments = if k == radii.len() - 1 {
            interface_segments
        } else {
            let local = (span * r / sizing.local_size(geometry, r)).ceil() as usize;
            local.max(min_segments)
        };
        let num_nodes = if closed { segments } else { segments + 1 };
        let mut ring = Ring {
            nodes: Vec::with_capacity(num_nodes + 1),
            angles: Vec::with_capacity(num_nodes + 1),
        };
        for j in 0..num_nodes {
            let theta = span * j as f64 / segments as f64;
            let point = if !closed && (j == 0 || j == segments) {
                // Nodes on the symmetry axis lie exactly at rho = 0
                Point2::new(0.0, if j == 0 { r } else { -r })
            } else {
                Point2::new(r * theta.sin(), r * theta.cos())
            };
            ring.nodes.push(vertices.len());
            ring.angles.push(theta);
            vertices.push(point);
        }
        if closed {
            ring.nodes.push(ring.nodes[0]);
            ring.angles.push(span);
        }
        rings.push(ring);
    }

    let mut cells = Vec::new();
    if let Some(first) = rings.first() {
        for pair in first.nodes.windows(2) {
            push_counter_clockwise(&mut cells, &vertices, [0, pair[0], pair[1]]);
        }
    }
    for pair in rings.windows(2) {
        stitch_rings(&mut cells, &vertices, &pair[0], &pair[1]);
    }

    let interface_facets = rings
        .last()
        .map(|ring| {
            ring.nodes
                .windows(2)
                .flat_map(|pair| [pair[0], pair[1]])
                .collect()
        })
        .unwrap_or_default();

    let mut mesh = Mesh::from_vertices_and_cells(vertices, cells);
    let mut regions = std::collections::BTreeMap::<u32, Vec<usize>>::new();
    for cell_index in 0..mesh.num_cells() {
        let centroid = mesh.cell_centroid(cell_index);
        let (horizontal, vertical) = (centroid.x, centroid.y);
        let tag = match geometry.part {
            DomainPart::Interior => geometry.classify(horizontal, vertical),
            DomainPart::Exterior => geometry.vacuum_tag,
        };
        regions.entry(tag).or_default().push(cell_index);
    }
    for (tag, cells) in regions {
        mesh.insert_cell_region(tag, cells);
    }
    mesh.insert_facet_region(geometry.interface_tag, interface_facets);
    if geometry.part == DomainPart::Exterior {
        mesh.insert_vertex_region(geometry.infinity_tag, vec![0]);
    }
    Ok(mesh)
}

/// Mesh provider backed by gmsh files and the procedural generators of this module.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshFactory;

impl MeshProvider<U1> for MeshFactory {
    fn load_mesh(&self, path: &Path) -> eyre::Result<Mesh<U1>> {
        load_msh_from_file(path)
    }

    fn generate_mesh(&self, geometry: &Geometry, sizing: &Sizing) -> eyre::Result<Mesh<U1>> {
        create_radial_interval_mesh(geometry, sizing)
    }
}

impl MeshProvider<U2> for MeshFactory {
    fn load_mesh(&self, path: &Path) -> eyre::Result<Mesh<U2>> {
        load_msh_from_file(path)
    }

    fn generate_mesh(&self, geometry: &Geometry, sizing: &Sizing) -> eyre::Result<Mesh<U2>> {
        create_polar_disk_mesh(geometry, sizing)
    }
}

impl MeshProvider<U3> for MeshFactory {
    fn load_mesh(&self, path: &Path) -> eyre::Result<Mesh<U3>> {
        load_msh_from_file(path)
    }

    fn generate_mesh(&self, _geometry: &Geometry, _sizing: &Sizing) -> eyre::Result<Mesh<U3>> {
        Err(eyre!("procedural generation of tetrahedral meshes is not supported, load a gmsh file instead"))
    }
}
