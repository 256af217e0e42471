//! Quadtree node addressing and per-LOD geometry
//!
//! LOD 0 is the finest level and `max_lod` the coarsest. Every LOD has four
//! times as many nodes as the one above it, so node IDs are laid out coarse
//! to fine: the coarsest grid occupies IDs `0..grid²`, then each finer level
//! follows with its own contiguous range.

use crate::core::types::{Vec2, Vec3};
use crate::core::{Error, Result};
use crate::math::Aabb;

/// Highest LOD index the traversal supports
pub const MAX_SUPPORTED_LOD: u32 = 10;

/// Patches along one side of a node
pub const PATCHES_PER_NODE_SIDE: u32 = 4;

/// Patches produced per final node
pub const PATCHES_PER_NODE: u32 = PATCHES_PER_NODE_SIDE * PATCHES_PER_NODE_SIDE;

/// A node address: LOD plus grid coordinate within that LOD
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeCoord {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

impl NodeCoord {
    pub const fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// The four children one LOD finer, or `None` at LOD 0
    pub fn children(&self) -> Option<[NodeCoord; 4]> {
        if self.lod == 0 {
            return None;
        }
        let (lod, x, y) = (self.lod - 1, self.x * 2, self.y * 2);
        Some([
            NodeCoord::new(lod, x, y),
            NodeCoord::new(lod, x + 1, y),
            NodeCoord::new(lod, x, y + 1),
            NodeCoord::new(lod, x + 1, y + 1),
        ])
    }

    /// Ancestor at a coarser LOD (or self when `lod == self.lod`)
    pub fn ancestor(&self, lod: u32) -> NodeCoord {
        let shift = lod.saturating_sub(self.lod);
        NodeCoord::new(self.lod.max(lod), self.x >> shift, self.y >> shift)
    }
}

/// Constants for one LOD level
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodLevel {
    /// World-space side length of a node
    pub node_size: f32,
    /// Half side length of one patch (a node is 4 × 4 patches)
    pub patch_extent: f32,
    /// Nodes along one side of the grid
    pub node_count: u32,
    /// LOD-0 nodes along one side of a node at this level
    pub sector_count: u32,
    /// First node ID of this level
    pub id_offset: u32,
}

/// Precomputed geometry of the whole quadtree
#[derive(Clone, Debug)]
pub struct LodGeometry {
    world_size: Vec3,
    max_lod: u32,
    coarsest_grid: u32,
    levels: Vec<LodLevel>,
    total_nodes: u32,
}

impl LodGeometry {
    /// Build the per-LOD tables. `world_size.x` and `world_size.z` must match.
    pub fn new(world_size: Vec3, max_lod: u32, coarsest_grid: u32) -> Result<Self> {
        if coarsest_grid == 0 {
            return Err(Error::Config("coarsest grid dimension must be non-zero".into()));
        }
        if max_lod > MAX_SUPPORTED_LOD {
            return Err(Error::Config(format!(
                "max_lod {} exceeds supported maximum {}",
                max_lod, MAX_SUPPORTED_LOD
            )));
        }
        if !(world_size.x > 0.0 && world_size.z > 0.0) || world_size.x != world_size.z {
            return Err(Error::Config(format!(
                "terrain footprint must be a non-empty square, got {} x {}",
                world_size.x, world_size.z
            )));
        }

        let mut levels = vec![
            LodLevel { node_size: 0.0, patch_extent: 0.0, node_count: 0, sector_count: 0, id_offset: 0 };
            max_lod as usize + 1
        ];
        let mut offset: u64 = 0;
        for lod in (0..=max_lod).rev() {
            let node_count = coarsest_grid << (max_lod - lod);
            let node_size = world_size.x / node_count as f32;
            levels[lod as usize] = LodLevel {
                node_size,
                patch_extent: node_size / (2 * PATCHES_PER_NODE_SIDE) as f32,
                node_count,
                sector_count: 1 << lod,
                id_offset: offset as u32,
            };
            offset += node_count as u64 * node_count as u64;
        }
        let total_nodes = u32::try_from(offset)
            .map_err(|_| Error::Config(format!("quadtree has {} nodes, more than a u32 can address", offset)))?;

        Ok(Self { world_size, max_lod, coarsest_grid, levels, total_nodes })
    }

    pub fn world_size(&self) -> Vec3 {
        self.world_size
    }

    pub fn max_lod(&self) -> u32 {
        self.max_lod
    }

    pub fn coarsest_grid(&self) -> u32 {
        self.coarsest_grid
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    pub fn level(&self, lod: u32) -> &LodLevel {
        &self.levels[lod as usize]
    }

    /// Number of node IDs across every LOD (descriptor table length)
    pub fn total_node_count(&self) -> u32 {
        self.total_nodes
    }

    /// LOD-0 nodes along one side; also the LOD map resolution
    pub fn lod0_grid_dim(&self) -> u32 {
        self.levels[0].node_count
    }

    /// Map a node to its unique ID
    pub fn node_id(&self, node: NodeCoord) -> u32 {
        let level = self.level(node.lod);
        level.id_offset + node.y * level.node_count + node.x
    }

    /// Inverse of [`node_id`](Self::node_id)
    pub fn node_from_id(&self, id: u32) -> Option<NodeCoord> {
        if id >= self.total_nodes {
            return None;
        }
        // Offsets grow from the coarsest level down to LOD 0
        let lod = (0..=self.max_lod)
            .rev()
            .take_while(|&lod| self.levels[lod as usize].id_offset <= id)
            .last()?;
        let level = self.level(lod);
        let local = id - level.id_offset;
        Some(NodeCoord::new(lod, local % level.node_count, local / level.node_count))
    }

    /// World-space xz center of a node
    pub fn node_center_xz(&self, node: NodeCoord) -> Vec2 {
        let size = self.level(node.lod).node_size;
        Vec2::new(
            (node.x as f32 + 0.5) * size - self.world_size.x * 0.5,
            (node.y as f32 + 0.5) * size - self.world_size.z * 0.5,
        )
    }

    /// World-space bounds for a node spanning the given height range
    pub fn node_bounds(&self, node: NodeCoord, min_height: f32, max_height: f32) -> Aabb {
        let center = self.node_center_xz(node);
        let half = self.level(node.lod).node_size * 0.5;
        Aabb::from_footprint(center.x, center.y, half, min_height, max_height)
    }

    /// Every node of the coarsest LOD, in ID order
    pub fn coarsest_nodes(&self) -> Vec<NodeCoord> {
        let n = self.coarsest_grid;
        (0..n * n).map(|i| NodeCoord::new(self.max_lod, i % n, i / n)).collect()
    }

    /// Node at `lod` containing a world-space xz point, if inside the terrain
    pub fn node_at(&self, lod: u32, x: f32, z: f32) -> Option<NodeCoord> {
        let level = self.level(lod);
        let gx = ((x + self.world_size.x * 0.5) / level.node_size).floor();
        let gz = ((z + self.world_size.z * 0.5) / level.node_size).floor();
        let n = level.node_count as f32;
        if gx < 0.0 || gz < 0.0 || gx >= n || gz >= n {
            return None;
        }
        Some(NodeCoord::new(lod, gx as u32, gz as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> LodGeometry {
        LodGeometry::new(Vec3::new(10240.0, 2048.0, 10240.0), 5, 5).unwrap()
    }

    #[test]
    fn test_level_constants() {
        let geo = geometry();
        let coarsest = geo.level(5);
        assert_eq!(coarsest.node_count, 5);
        assert_eq!(coarsest.node_size, 2048.0);
        assert_eq!(coarsest.patch_extent, 256.0);
        assert_eq!(coarsest.sector_count, 32);
        assert_eq!(coarsest.id_offset, 0);

        let finest = geo.level(0);
        assert_eq!(finest.node_count, 160);
        assert_eq!(finest.node_size, 64.0);
        assert_eq!(geo.lod0_grid_dim(), 160);
        assert_eq!(geo.level(4).id_offset, 25);
    }

    #[test]
    fn test_total_node_count() {
        let geo = geometry();
        let expected: u32 = (0..=5).map(|l| (5u32 << (5 - l)).pow(2)).sum();
        assert_eq!(geo.total_node_count(), expected);
    }

    #[test]
    fn test_node_id_bijection() {
        let geo = LodGeometry::new(Vec3::new(1024.0, 100.0, 1024.0), 3, 2).unwrap();
        let mut seen = vec![false; geo.total_node_count() as usize];
        for lod in 0..=3 {
            let n = geo.level(lod).node_count;
            for y in 0..n {
                for x in 0..n {
                    let node = NodeCoord::new(lod, x, y);
                    let id = geo.node_id(node);
                    assert!(!seen[id as usize], "duplicate id {}", id);
                    seen[id as usize] = true;
                    assert_eq!(geo.node_from_id(id), Some(node));
                }
            }
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(geo.node_from_id(geo.total_node_count()), None);
    }

    #[test]
    fn test_node_center_and_lookup() {
        let geo = geometry();
        let center = geo.node_center_xz(NodeCoord::new(5, 0, 0));
        assert_eq!(center, Vec2::new(-4096.0, -4096.0));
        assert_eq!(geo.node_at(5, center.x, center.y), Some(NodeCoord::new(5, 0, 0)));
        assert_eq!(geo.node_at(0, 6000.0, 0.0), None);
    }

    #[test]
    fn test_children_and_ancestor() {
        let node = NodeCoord::new(2, 3, 1);
        let children = node.children().unwrap();
        assert_eq!(children[3], NodeCoord::new(1, 7, 3));
        assert!(children.iter().all(|c| c.ancestor(2) == node));
        assert!(NodeCoord::new(0, 1, 1).children().is_none());
    }

    #[test]
    fn test_rejects_invalid_geometry() {
        assert!(LodGeometry::new(Vec3::new(100.0, 1.0, 100.0), 3, 0).is_err());
        assert!(LodGeometry::new(Vec3::new(100.0, 1.0, 100.0), 11, 1).is_err());
        assert!(LodGeometry::new(Vec3::new(100.0, 1.0, 50.0), 3, 1).is_err());
    }
}
