//! CPU quadtree traversal
//!
//! Runs the same per-node decision as `traverse_quad_tree` in
//! `shaders/terrain_build.wgsl`, one LOD at a time from the coarsest grid
//! down to LOD 0. Each level is evaluated in parallel, then survivors are
//! appended in input order, which keeps the result deterministic.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::asset::TerrainAsset;
use super::config::{CapacityConfig, TerrainConfig, DOUBLE_CUT_BAND};
use super::quadtree::NodeCoord;
use super::queue::{AppendList, CapacityReport, ListKind, PingPong};
use crate::core::types::Vec3;
use crate::core::Camera;
use crate::hiz::Occluder;
use crate::math::{Aabb, Frustum};

/// Terminal node selected for rendering
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FinalNode {
    pub x: u32,
    pub y: u32,
    pub lod: u32,
}

impl FinalNode {
    pub fn coord(&self) -> NodeCoord {
        NodeCoord::new(self.lod, self.x, self.y)
    }
}

impl From<NodeCoord> for FinalNode {
    fn from(node: NodeCoord) -> Self {
        Self { x: node.x, y: node.y, lod: node.lod }
    }
}

/// Per node-ID record written during traversal
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NodeDescriptor {
    /// 1 when the node was split this frame
    pub branch: u32,
    pub lod: u32,
    pub min_height: f32,
    pub max_height: f32,
}

/// What the traversal decided for one node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeDecision {
    /// Outside the frustum or hidden; dropped with its whole subtree
    Culled,
    /// Detailed enough; goes to the final list
    Final,
    /// Too coarse; its children are evaluated at the next level
    Subdivide,
    /// Borderline; children go straight to the final list
    DoubleCut,
}

/// Camera-dependent traversal input
#[derive(Clone, Copy, Debug)]
pub struct TraversalView<'a> {
    pub camera_position: Vec3,
    pub frustum: Frustum,
    /// Depth pyramid from the previous build, if any
    pub occluder: Option<Occluder<'a>>,
}

impl<'a> TraversalView<'a> {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            camera_position: camera.position,
            frustum: Frustum::from_view_projection(&camera.view_projection()),
            occluder: None,
        }
    }

    pub fn with_occluder(mut self, occluder: Occluder<'a>) -> Self {
        self.occluder = Some(occluder);
        self
    }
}

/// Counters for one LOD level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LodStats {
    pub evaluated: u32,
    pub culled: u32,
    pub finals: u32,
    pub subdivided: u32,
}

/// Everything one traversal produces
#[derive(Clone, Debug)]
pub struct TraversalOutput {
    pub final_nodes: Vec<FinalNode>,
    /// Indexed by node ID
    pub descriptors: Vec<NodeDescriptor>,
    /// Indexed by LOD
    pub stats: Vec<LodStats>,
    pub reports: Vec<CapacityReport>,
}

impl TraversalOutput {
    pub fn descriptor(&self, asset: &TerrainAsset, node: NodeCoord) -> &NodeDescriptor {
        &self.descriptors[asset.geometry.node_id(node) as usize]
    }
}

/// Reference traversal over one terrain asset
pub struct QuadTreeTraversal<'a> {
    asset: &'a TerrainAsset,
    capacities: CapacityConfig,
}

impl<'a> QuadTreeTraversal<'a> {
    pub fn new(asset: &'a TerrainAsset, capacities: CapacityConfig) -> Self {
        Self { asset, capacities }
    }

    /// World bounds of a node, padded vertically by the height redundancy
    pub fn node_bounds(&self, node: NodeCoord, redundance: f32) -> Aabb {
        let [min, max] = self.asset.height_ranges.range(node);
        self.asset.geometry.node_bounds(node, min - redundance, max + redundance)
    }

    /// Decide one node
    pub fn evaluate(&self, node: NodeCoord, view: &TraversalView<'_>, config: &TerrainConfig) -> NodeDecision {
        let bounds = self.node_bounds(node, config.bounds_height_redundance as f32);

        if config.frustum_cull && !view.frustum.intersects_aabb(&bounds) {
            return NodeDecision::Culled;
        }
        if config.hiz_cull {
            if let Some(occluder) = &view.occluder {
                if occluder.is_occluded(&bounds, config.hiz_depth_bias) {
                    return NodeDecision::Culled;
                }
            }
        }

        let node_size = self.asset.geometry.level(node.lod).node_size;
        let ratio = view.camera_position.distance(bounds.center()) / (node_size * config.effective_lod_coefficient());
        let can_split = node.lod > 0 && node.lod > self.asset.quadtree_map.floor(node);

        if can_split && ratio < 1.0 {
            NodeDecision::Subdivide
        } else if can_split && config.double_cut && ratio < DOUBLE_CUT_BAND {
            NodeDecision::DoubleCut
        } else {
            NodeDecision::Final
        }
    }

    /// Run all levels and return the final node list
    pub fn run(&self, view: &TraversalView<'_>, config: &TerrainConfig) -> TraversalOutput {
        let config = config.sanitized();
        let geometry = &self.asset.geometry;
        let max_lod = geometry.max_lod();

        let mut descriptors = vec![NodeDescriptor::default(); geometry.total_node_count() as usize];
        let mut final_nodes = AppendList::new(self.capacities.final_nodes);
        let mut stats = vec![LodStats::default(); max_lod as usize + 1];
        let mut queues = PingPong::new(
            AppendList::new(self.capacities.work_queue),
            AppendList::new(self.capacities.work_queue),
        );
        let seed = AppendList::seeded(geometry.coarsest_nodes());

        for lod in (0..=max_lod).rev() {
            let (consume, append) = queues.split_mut();
            let pending = if lod == max_lod { seed.items() } else { consume.items() };
            append.reset_count();

            let decisions: Vec<NodeDecision> = pending
                .par_iter()
                .map(|node| self.evaluate(*node, view, &config))
                .collect();

            let level_stats = &mut stats[lod as usize];
            level_stats.evaluated = pending.len() as u32;
            for (node, decision) in pending.iter().zip(decisions) {
                let [min_height, max_height] = self.asset.height_ranges.range(*node);
                let branch = matches!(decision, NodeDecision::Subdivide | NodeDecision::DoubleCut);
                descriptors[geometry.node_id(*node) as usize] =
                    NodeDescriptor { branch: branch as u32, lod: node.lod, min_height, max_height };

                match decision {
                    NodeDecision::Culled => level_stats.culled += 1,
                    NodeDecision::Final => {
                        level_stats.finals += 1;
                        final_nodes.push(FinalNode::from(*node));
                    }
                    NodeDecision::Subdivide => {
                        level_stats.subdivided += 1;
                        for child in node.children().into_iter().flatten() {
                            append.push(child);
                        }
                    }
                    NodeDecision::DoubleCut => {
                        level_stats.subdivided += 1;
                        for child in node.children().into_iter().flatten() {
                            let [min_height, max_height] = self.asset.height_ranges.range(child);
                            descriptors[geometry.node_id(child) as usize] =
                                NodeDescriptor { branch: 0, lod: child.lod, min_height, max_height };
                            final_nodes.push(FinalNode::from(child));
                        }
                    }
                }
            }
            log::trace!("lod {}: {:?}", lod, stats[lod as usize]);
            queues.swap();
        }

        let peak_queue = queues.both().iter().max_by_key(|q| q.peak()).and_then(|q| q.report(ListKind::WorkQueue));
        let reports: Vec<CapacityReport> =
            peak_queue.into_iter().chain(final_nodes.report(ListKind::FinalNodes)).collect();
        for report in &reports {
            log::warn!("{}", report);
        }

        TraversalOutput { final_nodes: final_nodes.into_items(), descriptors, stats, reports }
    }
}
