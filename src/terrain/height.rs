//! Height-range and quadtree-detail lookups
//!
//! Both maps hold one level per LOD, level `L` sized to the node grid at `L`.
//! On the GPU they become the mip chains of an Rg32Float and an R32Uint
//! texture, so level `L` is exactly mip `L`.

use rayon::prelude::*;

use super::quadtree::{LodGeometry, NodeCoord};
use crate::core::{Error, Result};

/// Min/max height of every node at one LOD
#[derive(Clone, Debug, PartialEq)]
pub struct HeightRangeLevel {
    pub dim: u32,
    /// Row-major `[min, max]` pairs
    pub ranges: Vec<[f32; 2]>,
}

impl HeightRangeLevel {
    pub fn get(&self, x: u32, y: u32) -> [f32; 2] {
        self.ranges[(y * self.dim + x) as usize]
    }
}

/// Per-LOD min/max heights used to bound nodes vertically
#[derive(Clone, Debug, PartialEq)]
pub struct HeightRangeMap {
    levels: Vec<HeightRangeLevel>,
}

impl HeightRangeMap {
    /// Sample `height(x, z)` on a `samples × samples` lattice per LOD-0 node
    /// (corners included), then reduce 2×2 up to the coarsest LOD.
    pub fn from_sampler<F>(geometry: &LodGeometry, samples: u32, height: F) -> Self
    where
        F: Fn(f32, f32) -> f32 + Sync,
    {
        let samples = samples.max(2);
        let finest = geometry.level(0);
        let dim = finest.node_count;
        let step = finest.node_size / (samples - 1) as f32;

        let ranges: Vec<[f32; 2]> = (0..dim * dim)
            .into_par_iter()
            .map(|i| {
                let node = NodeCoord::new(0, i % dim, i / dim);
                let center = geometry.node_center_xz(node);
                let origin_x = center.x - finest.node_size * 0.5;
                let origin_z = center.y - finest.node_size * 0.5;

                let mut range = [f32::INFINITY, f32::NEG_INFINITY];
                for sz in 0..samples {
                    for sx in 0..samples {
                        let h = height(origin_x + sx as f32 * step, origin_z + sz as f32 * step);
                        range[0] = range[0].min(h);
                        range[1] = range[1].max(h);
                    }
                }
                range
            })
            .collect();

        Self::from_lod0(geometry, HeightRangeLevel { dim, ranges })
    }

    /// Constant height everywhere
    pub fn flat(geometry: &LodGeometry, height: f32) -> Self {
        let dim = geometry.lod0_grid_dim();
        Self::from_lod0(geometry, HeightRangeLevel { dim, ranges: vec![[height, height]; (dim * dim) as usize] })
    }

    fn from_lod0(geometry: &LodGeometry, lod0: HeightRangeLevel) -> Self {
        let mut levels = Vec::with_capacity(geometry.max_lod() as usize + 1);
        levels.push(lod0);
        for _ in 0..geometry.max_lod() {
            let Some(prev) = levels.last() else { break };
            let dim = prev.dim / 2;
            let ranges = (0..dim * dim)
                .into_par_iter()
                .map(|i| {
                    let (x, y) = (i % dim * 2, i / dim * 2);
                    let quad = [prev.get(x, y), prev.get(x + 1, y), prev.get(x, y + 1), prev.get(x + 1, y + 1)];
                    quad.iter().fold([f32::INFINITY, f32::NEG_INFINITY], |acc, r| [acc[0].min(r[0]), acc[1].max(r[1])])
                })
                .collect();
            levels.push(HeightRangeLevel { dim, ranges });
        }
        Self { levels }
    }

    /// Build from explicit levels, finest first
    pub fn from_levels(levels: Vec<HeightRangeLevel>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[HeightRangeLevel] {
        &self.levels
    }

    /// `[min, max]` height of a node
    pub fn range(&self, node: NodeCoord) -> [f32; 2] {
        self.levels[node.lod as usize].get(node.x, node.y)
    }

    /// Check level count and sizes against the quadtree
    pub fn validate(&self, geometry: &LodGeometry) -> Result<()> {
        check_levels("height range map", self.levels.iter().map(|l| (l.dim, l.ranges.len())), geometry)
    }
}

/// Per-node detail floor: the finest LOD the traversal may subdivide to
#[derive(Clone, Debug, PartialEq)]
pub struct QuadTreeMap {
    /// Finest first; level `L` is row-major over the LOD `L` grid
    levels: Vec<Vec<u32>>,
    dims: Vec<u32>,
}

impl QuadTreeMap {
    /// Floor 0 everywhere: subdivision limited only by distance
    pub fn unrestricted(geometry: &LodGeometry) -> Self {
        let dims: Vec<u32> = geometry.levels().iter().map(|l| l.node_count).collect();
        let levels = dims.iter().map(|d| vec![0; (d * d) as usize]).collect();
        Self { levels, dims }
    }

    /// Derive floors from height ranges. A node whose height span is below
    /// `flatness_tolerance` stops at its own LOD; otherwise its floor is the
    /// lowest floor among its children.
    pub fn from_height_ranges(geometry: &LodGeometry, heights: &HeightRangeMap, flatness_tolerance: f32) -> Self {
        let mut map = Self::unrestricted(geometry);
        for lod in 1..=geometry.max_lod() {
            let dim = map.dims[lod as usize];
            let finer = &map.levels[lod as usize - 1];
            let finer_dim = map.dims[lod as usize - 1];
            let level: Vec<u32> = (0..dim * dim)
                .into_par_iter()
                .map(|i| {
                    let node = NodeCoord::new(lod, i % dim, i / dim);
                    let [min, max] = heights.range(node);
                    if max - min < flatness_tolerance {
                        return lod;
                    }
                    let (cx, cy) = (node.x * 2, node.y * 2);
                    [(cx, cy), (cx + 1, cy), (cx, cy + 1), (cx + 1, cy + 1)]
                        .iter()
                        .map(|&(x, y)| finer[(y * finer_dim + x) as usize])
                        .min()
                        .unwrap_or(0)
                })
                .collect();
            map.levels[lod as usize] = level;
        }
        map
    }

    /// Detail floor of a node
    pub fn floor(&self, node: NodeCoord) -> u32 {
        let dim = self.dims[node.lod as usize];
        self.levels[node.lod as usize][(node.y * dim + node.x) as usize]
    }

    /// Raw level data, finest first, with its side length
    pub fn levels(&self) -> impl Iterator<Item = (u32, &[u32])> {
        self.dims.iter().copied().zip(self.levels.iter().map(Vec::as_slice))
    }

    pub fn validate(&self, geometry: &LodGeometry) -> Result<()> {
        check_levels("quadtree map", self.dims.iter().copied().zip(self.levels.iter().map(Vec::len)), geometry)
    }
}

fn check_levels(what: &str, levels: impl ExactSizeIterator<Item = (u32, usize)>, geometry: &LodGeometry) -> Result<()> {
    let expected = geometry.max_lod() as usize + 1;
    if levels.len() != expected {
        return Err(Error::Config(format!("{} has {} levels, expected {}", what, levels.len(), expected)));
    }
    for (lod, (dim, len)) in levels.enumerate() {
        let want = geometry.level(lod as u32).node_count;
        if dim != want || len != (want * want) as usize {
            return Err(Error::Config(format!(
                "{} level {} is {}x{} ({} entries), expected {}x{}",
                what, lod, dim, dim, len, want, want
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn geometry() -> LodGeometry {
        LodGeometry::new(Vec3::new(1024.0, 256.0, 1024.0), 3, 2).unwrap()
    }

    #[test]
    fn test_flat_map_levels() {
        let geo = geometry();
        let map = HeightRangeMap::flat(&geo, 12.0);
        assert!(map.validate(&geo).is_ok());
        assert_eq!(map.range(NodeCoord::new(3, 1, 1)), [12.0, 12.0]);
    }

    #[test]
    fn test_coarse_levels_contain_fine_ranges() {
        let geo = geometry();
        let map = HeightRangeMap::from_sampler(&geo, 3, |x, z| x * 0.1 + z * 0.01);
        for lod in 1..=3 {
            let dim = geo.level(lod).node_count;
            for y in 0..dim {
                for x in 0..dim {
                    let parent = map.range(NodeCoord::new(lod, x, y));
                    for child in NodeCoord::new(lod, x, y).children().unwrap() {
                        let r = map.range(child);
                        assert!(parent[0] <= r[0] && parent[1] >= r[1]);
                    }
                }
            }
        }
        // Monotonic ramp: lowest corner of the terrain is the global min
        assert_eq!(map.range(NodeCoord::new(3, 0, 0))[0], -512.0 * 0.1 - 512.0 * 0.01);
    }

    #[test]
    fn test_quadtree_floors() {
        let geo = geometry();
        let flat = HeightRangeMap::flat(&geo, 0.0);
        let stop_early = QuadTreeMap::from_height_ranges(&geo, &flat, 1.0);
        assert_eq!(stop_early.floor(NodeCoord::new(3, 0, 0)), 3);

        let unrestricted = QuadTreeMap::from_height_ranges(&geo, &flat, 0.0);
        assert_eq!(unrestricted, QuadTreeMap::unrestricted(&geo));
        assert!(unrestricted.validate(&geo).is_ok());
    }

    #[test]
    fn test_floor_follows_rough_children() {
        let geo = geometry();
        // Only the x < -256 strip is rough
        let map = HeightRangeMap::from_sampler(&geo, 3, |x, _| if x < -256.0 { x } else { 0.0 });
        let floors = QuadTreeMap::from_height_ranges(&geo, &map, 1.0);
        assert_eq!(floors.floor(NodeCoord::new(3, 0, 0)), 0);
        assert_eq!(floors.floor(NodeCoord::new(2, 3, 0)), 2);
    }

    #[test]
    fn test_validate_rejects_wrong_levels() {
        let geo = geometry();
        let other = LodGeometry::new(Vec3::new(1024.0, 256.0, 1024.0), 2, 2).unwrap();
        assert!(HeightRangeMap::flat(&other, 0.0).validate(&geo).is_err());
    }
}
