//! Terrain asset: quadtree geometry plus its height and detail lookups

use super::height::{HeightRangeMap, QuadTreeMap};
use super::quadtree::LodGeometry;
use super::synthetic::{SyntheticHeight, SyntheticParams};
use crate::core::types::Vec3;
use crate::core::Result;

/// Everything the traversal needs to know about one terrain
#[derive(Clone, Debug)]
pub struct TerrainAsset {
    pub geometry: LodGeometry,
    pub height_ranges: HeightRangeMap,
    pub quadtree_map: QuadTreeMap,
}

impl TerrainAsset {
    pub fn new(geometry: LodGeometry, height_ranges: HeightRangeMap, quadtree_map: QuadTreeMap) -> Result<Self> {
        let asset = Self { geometry, height_ranges, quadtree_map };
        asset.validate()?;
        Ok(asset)
    }

    /// Flat terrain at height 0 with unrestricted subdivision
    pub fn flat(world_size: Vec3, max_lod: u32, coarsest_grid: u32) -> Result<Self> {
        let geometry = LodGeometry::new(world_size, max_lod, coarsest_grid)?;
        let height_ranges = HeightRangeMap::flat(&geometry, 0.0);
        let quadtree_map = QuadTreeMap::unrestricted(&geometry);
        Self::new(geometry, height_ranges, quadtree_map)
    }

    /// Noise terrain. Nodes flatter than `flatness_tolerance` stop subdividing.
    pub fn synthetic(
        world_size: Vec3,
        max_lod: u32,
        coarsest_grid: u32,
        params: SyntheticParams,
        flatness_tolerance: f32,
    ) -> Result<Self> {
        let geometry = LodGeometry::new(world_size, max_lod, coarsest_grid)?;
        let source = SyntheticHeight::new(params);
        let height_ranges = HeightRangeMap::from_sampler(&geometry, 5, |x, z| source.height_at(x, z));
        let quadtree_map = QuadTreeMap::from_height_ranges(&geometry, &height_ranges, flatness_tolerance);
        log::info!(
            "Synthetic terrain: {} LODs, {}x{} coarsest grid, {} node ids",
            max_lod + 1,
            coarsest_grid,
            coarsest_grid,
            geometry.total_node_count()
        );
        Self::new(geometry, height_ranges, quadtree_map)
    }

    /// 10.24 km square flat terrain, 6 LODs, 5×5 coarsest grid (160×160 LOD map)
    pub fn standard_flat() -> Result<Self> {
        Self::flat(Vec3::new(10240.0, 2048.0, 10240.0), 5, 5)
    }

    pub fn validate(&self) -> Result<()> {
        self.height_ranges.validate(&self.geometry)?;
        self.quadtree_map.validate(&self.geometry)
    }

    pub fn world_size(&self) -> Vec3 {
        self.geometry.world_size()
    }

    pub fn max_lod(&self) -> u32 {
        self.geometry.max_lod()
    }
}
