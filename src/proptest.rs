//! Strategies and helpers for property-based tests.
use crate::allocators::DimAllocator;
use crate::mesh::{Mesh, RegionTag};
use crate::physics::PhysicalParameters;
use crate::SmallDim;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra::DefaultAllocator;

/// Physical parameters in the range where the coupled iteration is well behaved.
pub fn physical_parameters() -> impl Strategy<Value = PhysicalParameters> {
    (0.5..20.0, 1u32..=3, 0.05..1.0).prop_map(|(alpha, npot, rho_vac)| PhysicalParameters::new(alpha, npot, rho_vac))
}

/// Offsets for `num_nodes` nodes with every coordinate in `[-magnitude, magnitude]`.
pub fn node_offsets(num_nodes: usize, magnitude: f64) -> impl Strategy<Value = Vec<[f64; 3]>> {
    let range = -magnitude..=magnitude;
    vec([range.clone(), range.clone(), range], num_nodes)
}

/// Moves the nodes of a region by the given offsets, using as many offset components as the
/// mesh has dimensions.
///
/// # Panics
///
/// Panics if the region does not exist or there are fewer offsets than region nodes.
pub fn perturb_region_nodes<D>(mesh: &mut Mesh<D>, tag: RegionTag, offsets: &[[f64; 3]])
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let nodes = mesh
        .region_nodes(tag)
        .unwrap_or_else(|| panic!("mesh has no region {}", tag));
    assert!(offsets.len() >= nodes.len(), "not enough offsets for region nodes");
    let vertices = mesh.vertices_mut();
    for (&node, offset) in nodes.iter().zip(offsets) {
        for i in 0..D::dim() {
            vertices[node][i] += offset[i];
        }
    }
}
