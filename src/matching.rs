//! Node-to-node matching of the coupling interface between two meshes.
use crate::allocators::DimAllocator;
use crate::error::{FacetTopologyIssue, MeshMismatchError, MeshSide};
use crate::mesh::{FacetRegion, Mesh, RegionTag};
use crate::SmallDim;
use log::debug;
use nalgebra::{DefaultAllocator, OPoint};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How the cells adjacent to the interface are expected to sit relative to each other.
///
/// Both generated meshes describe a ball bounded by the interface, the exterior one in
/// Kelvin-inverted coordinates, so their adjacent cells lie on the same side of each facet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterfaceOrientation {
    #[default]
    Same,
    /// The target mesh lies on the other side of the interface, as for two meshes sharing
    /// their coordinate frame.
    Opposite,
}

/// Correspondence between reference and target interface nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceMatch {
    /// Pairs of `(reference node, target node)` in reference interface order.
    pub correspondence: Vec<(usize, usize)>,
    /// Largest distance a target node was moved by.
    pub max_drift: f64,
}

/// Matches the interface of a target mesh onto the interface of a reference mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryMatcher {
    tolerance: f64,
    orientation: InterfaceOrientation,
}

fn padded<D>(point: &OPoint<f64, D>) -> [f64; 3]
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let mut padded = [0.0; 3];
    for (i, x) in point.iter().enumerate() {
        padded[i] = *x;
    }
    padded
}

fn facet_region<D>(mesh: &Mesh<D>, tag: RegionTag, side: MeshSide) -> Result<&FacetRegion, MeshMismatchError>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    let missing = MeshMismatchError::MissingRegion { mesh: side, tag };
    match tag {
        RegionTag::Facet(id) => mesh.facet_region(id).ok_or(missing),
        _ => Err(missing),
    }
}

impl BoundaryMatcher {
    /// # Panics
    ///
    /// Panics if the tolerance is negative or not finite.
    pub fn new(tolerance: f64) -> Self {
        assert!(
            tolerance.is_finite() && tolerance >= 0.0,
            "matching tolerance must be finite and non-negative"
        );
        Self {
            tolerance,
            orientation: InterfaceOrientation::default(),
        }
    }

    pub fn with_orientation(mut self, orientation: InterfaceOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Snaps the target interface nodes onto the reference interface nodes and reorders the
    /// target interface into reference order.
    ///
    /// Every check runs before the target is modified, so the target mesh is left unchanged on
    /// error. Matching already matched meshes is a no-op.
    pub fn match_interfaces<D>(
        &self,
        reference: &Mesh<D>,
        target: &mut Mesh<D>,
        reference_tag: RegionTag,
        target_tag: RegionTag,
    ) -> Result<InterfaceMatch, MeshMismatchError>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let reference_region = facet_region(reference, reference_tag, MeshSide::Reference)?;
        let target_region = facet_region(target, target_tag, MeshSide::Target)?;

        let reference_nodes = reference_region.nodes();
        let target_nodes = target_region.nodes();
        if reference_nodes.len() != target_nodes.len() {
            return Err(MeshMismatchError::NodeCountMismatch {
                reference: reference_nodes.len(),
                target: target_nodes.len(),
            });
        }

        let tree = RTree::bulk_load(
            target_nodes
                .iter()
                .map(|&node| GeomWithData::new(padded(&target.vertices()[node]), node))
                .collect(),
        );

        let mut correspondence = Vec::with_capacity(reference_nodes.len());
        let mut used = BTreeSet::new();
        let mut max_drift: f64 = 0.0;
        for &node in reference_nodes {
            let point = &reference.vertices()[node];
            let nearest = tree
                .nearest_neighbor(&padded(point))
                .ok_or(MeshMismatchError::NodeTooFar {
                    node,
                    distance: f64::INFINITY,
                    tolerance: self.tolerance,
                })?;
            let distance = (&target.vertices()[nearest.data] - point).norm();
            if !(distance <= self.tolerance) {
                return Err(MeshMismatchError::NodeTooFar {
                    node,
                    distance,
                    tolerance: self.tolerance,
                });
            }
            if !used.insert(nearest.data) {
                return Err(MeshMismatchError::AmbiguousCorrespondence {
                    target_node: nearest.data,
                });
            }
            max_drift = max_drift.max(distance);
            correspondence.push((node, nearest.data));
        }

        self.check_facets(reference, target, reference_region, target_region, &correspondence)?;

        debug!(
            "Matched {} interface nodes, max drift {:e}",
            correspondence.len(),
            max_drift
        );

        // All checks passed, so the target may now be modified
        for &(reference_node, target_node) in &correspondence {
            target.vertices_mut()[target_node] = reference.vertices()[reference_node].clone();
        }
        if let RegionTag::Facet(id) = target_tag {
            if let Some(region) = target.facet_region_mut(id) {
                region.set_node_order(correspondence.iter().map(|&(_, t)| t).collect());
            }
        }

        Ok(InterfaceMatch {
            correspondence,
            max_drift,
        })
    }

    fn check_facets<D>(
        &self,
        reference: &Mesh<D>,
        target: &Mesh<D>,
        reference_region: &FacetRegion,
        target_region: &FacetRegion,
        correspondence: &[(usize, usize)],
    ) -> Result<(), MeshMismatchError>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        let node_map: BTreeMap<usize, usize> = correspondence.iter().copied().collect();
        let target_facets: BTreeSet<Vec<usize>> = target_region
            .facets()
            .map(|facet| {
                let mut sorted = facet.to_vec();
                sorted.sort_unstable();
                sorted
            })
            .collect();

        for (index, facet) in reference_region.facets().enumerate() {
            let topology_error = |reason| MeshMismatchError::FacetTopology { facet: index, reason };
            let mapped: Vec<usize> = facet.iter().map(|v| node_map[v]).collect();
            let mut sorted = mapped.clone();
            sorted.sort_unstable();
            if !target_facets.contains(&sorted) {
                return Err(topology_error(FacetTopologyIssue::Missing));
            }

            let reference_side = reference.facet_side(facet);
            let target_side = target.facet_side(&mapped);
            let (Some(reference_side), Some(target_side)) = (reference_side, target_side) else {
                return Err(topology_error(FacetTopologyIssue::NoAdjacentCell));
            };
            let same_side = reference_side.signum() == target_side.signum();
            let expected_same = self.orientation == InterfaceOrientation::Same;
            if same_side != expected_same {
                return Err(topology_error(FacetTopologyIssue::Orientation));
            }
        }
        Ok(())
    }
}
