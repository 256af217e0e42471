//! LOD map rasterisation and patch expansion
//!
//! CPU counterparts of `build_lod_map` and `build_patches`.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::asset::TerrainAsset;
use super::config::{CapacityConfig, TerrainConfig};
use super::quadtree::{NodeCoord, PATCHES_PER_NODE, PATCHES_PER_NODE_SIDE};
use super::queue::{AppendList, CapacityReport, ListKind};
use super::traversal::{FinalNode, NodeDescriptor};
use crate::core::{Error, Result};

/// One renderable quad; a node expands to 4 × 4 of these
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RenderPatch {
    /// World-space xz center
    pub position: [f32; 2],
    pub min_max_height: [f32; 2],
    pub lod: u32,
    /// LOD steps to the coarser neighbour across each edge: -x, -z, +x, +z
    pub lod_trans: [u32; 4],
}

/// Debug bounding box of one patch
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PatchBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub color: [f32; 4],
}

/// Debug colour per LOD, shared with the kernel
pub fn lod_color(lod: u32) -> [f32; 4] {
    const PALETTE: [[f32; 4]; 6] = [
        [1.0, 0.2, 0.2, 1.0],
        [1.0, 0.6, 0.1, 1.0],
        [1.0, 1.0, 0.2, 1.0],
        [0.2, 1.0, 0.3, 1.0],
        [0.2, 0.6, 1.0, 1.0],
        [0.7, 0.3, 1.0, 1.0],
    ];
    PALETTE[lod as usize % PALETTE.len()]
}

/// Chosen LOD of every LOD-0 tile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LodMap {
    dim: u32,
    texels: Vec<u32>,
}

impl LodMap {
    /// Walk each texel's ancestors from the coarsest LOD down and keep the
    /// first node that did not branch.
    pub fn build(asset: &TerrainAsset, descriptors: &[NodeDescriptor]) -> Self {
        let geometry = &asset.geometry;
        let dim = geometry.lod0_grid_dim();
        let max_lod = geometry.max_lod();

        let texels = (0..dim * dim)
            .into_par_iter()
            .map(|i| {
                let (x, y) = (i % dim, i / dim);
                (0..=max_lod)
                    .rev()
                    .find(|&lod| {
                        let node = NodeCoord::new(lod, x >> lod, y >> lod);
                        descriptors[geometry.node_id(node) as usize].branch == 0
                    })
                    .unwrap_or(0)
            })
            .collect();

        Self { dim, texels }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn texels(&self) -> &[u32] {
        &self.texels
    }

    pub fn lod_at(&self, x: u32, y: u32) -> u32 {
        self.texels[(y * self.dim + x) as usize]
    }

    /// Signed-coordinate lookup; `None` outside the terrain
    pub fn get(&self, x: i64, y: i64) -> Option<u32> {
        let dim = self.dim as i64;
        ((0..dim).contains(&x) && (0..dim).contains(&y)).then(|| self.texels[(y * dim + x) as usize])
    }

    /// Write as a grayscale PNG scaled so `max_lod` is white
    pub fn save_png(&self, max_lod: u32, path: impl AsRef<Path>) -> Result<()> {
        let scale = 255 / max_lod.max(1);
        let pixels = self.texels.iter().map(|lod| (lod * scale).min(255) as u8).collect();
        let img = image::GrayImage::from_raw(self.dim, self.dim, pixels)
            .ok_or_else(|| Error::Config("LOD map size mismatch".into()))?;
        img.save(path).map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

/// Patches and optional debug bounds for one frame
#[derive(Clone, Debug)]
pub struct PatchOutput {
    pub patches: Vec<RenderPatch>,
    pub bounds: Vec<PatchBounds>,
    pub reports: Vec<CapacityReport>,
}

/// Expand every final node into its 16 patches
pub fn build_patches(
    asset: &TerrainAsset,
    final_nodes: &[FinalNode],
    lod_map: &LodMap,
    config: &TerrainConfig,
    capacities: &CapacityConfig,
) -> PatchOutput {
    let sanitized = config.sanitized();
    let config = &sanitized;
    let redundance = config.bounds_height_redundance as f32;

    let expanded: Vec<RenderPatch> = final_nodes
        .par_iter()
        .flat_map_iter(|node| (0..PATCHES_PER_NODE).map(move |i| expand_patch(asset, lod_map, config, *node, i)))
        .collect();

    let mut patches = AppendList::new(capacities.patches);
    let mut bounds = AppendList::new(capacities.bounds);
    for patch in expanded {
        if config.bounds_debug {
            let extent = asset.geometry.level(patch.lod).patch_extent;
            bounds.push(PatchBounds {
                min: [patch.position[0] - extent, patch.min_max_height[0] - redundance, patch.position[1] - extent],
                max: [patch.position[0] + extent, patch.min_max_height[1] + redundance, patch.position[1] + extent],
                color: lod_color(patch.lod),
            });
        }
        patches.push(patch);
    }

    let reports: Vec<CapacityReport> =
        patches.report(ListKind::Patches).into_iter().chain(bounds.report(ListKind::Bounds)).collect();
    for report in &reports {
        log::warn!("{}", report);
    }

    PatchOutput { patches: patches.into_items(), bounds: bounds.into_items(), reports }
}

/// Patch `index` (row-major within the node) of `node`
pub fn expand_patch(asset: &TerrainAsset, lod_map: &LodMap, config: &TerrainConfig, node: FinalNode, index: u32) -> RenderPatch {
    let geometry = &asset.geometry;
    let level = geometry.level(node.lod);
    let (px, py) = (index % PATCHES_PER_NODE_SIDE, index / PATCHES_PER_NODE_SIDE);

    let center = geometry.node_center_xz(node.coord());
    let patch_size = level.patch_extent * 2.0;
    let offset = (PATCHES_PER_NODE_SIDE as f32 - 1.0) * 0.5;
    let position = [
        center.x + (px as f32 - offset) * patch_size,
        center.y + (py as f32 - offset) * patch_size,
    ];

    // A patch is exactly a node two LODs finer; below LOD 2 fall back to the
    // finest covering node.
    let height_node = match node.lod {
        0 => node.coord(),
        1 => NodeCoord::new(0, node.x * 2 + px / 2, node.y * 2 + py / 2),
        lod => NodeCoord::new(lod - 2, node.x * 4 + px, node.y * 4 + py),
    };
    let min_max_height = asset.height_ranges.range(height_node);

    let lod_trans = if config.seamless || config.seam_debug {
        edge_transitions(lod_map, node, px, py)
    } else {
        [0; 4]
    };

    RenderPatch { position, min_max_height, lod: node.lod, lod_trans }
}

/// Per-edge LOD deltas for patches on the node border
fn edge_transitions(lod_map: &LodMap, node: FinalNode, px: u32, py: u32) -> [u32; 4] {
    let sectors = 1i64 << node.lod;
    let (x0, y0) = (node.x as i64 * sectors, node.y as i64 * sectors);
    let side = PATCHES_PER_NODE_SIDE as i64;
    // LOD-0 tile under this patch's row/column
    let tx = x0 + px as i64 * sectors / side;
    let ty = y0 + py as i64 * sectors / side;

    let delta = |x: i64, y: i64| lod_map.get(x, y).map_or(0, |lod| lod.saturating_sub(node.lod));
    let last = PATCHES_PER_NODE_SIDE - 1;
    [
        if px == 0 { delta(x0 - 1, ty) } else { 0 },
        if py == 0 { delta(tx, y0 - 1) } else { 0 },
        if px == last { delta(x0 + sectors, ty) } else { 0 },
        if py == last { delta(tx, y0 + sectors) } else { 0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::core::Camera;
    use crate::terrain::traversal::{QuadTreeTraversal, TraversalView};

    fn asset() -> TerrainAsset {
        TerrainAsset::flat(Vec3::new(2048.0, 0.0, 2048.0), 4, 2).unwrap()
    }

    fn run(asset: &TerrainAsset, config: &TerrainConfig) -> (Vec<FinalNode>, LodMap) {
        let mut camera = Camera::new(Vec3::new(-700.0, 30.0, -700.0), 60.0, 256, 256);
        camera.set_look_at(Vec3::new(500.0, 0.0, 500.0), Vec3::Y);
        let traversal = QuadTreeTraversal::new(asset, CapacityConfig::for_final_nodes(4096));
        let out = traversal.run(&TraversalView::from_camera(&camera), config);
        let lod_map = LodMap::build(asset, &out.descriptors);
        (out.final_nodes, lod_map)
    }

    #[test]
    fn test_lod_map_matches_final_nodes() {
        let asset = asset();
        let (nodes, lod_map) = run(&asset, &TerrainConfig::no_culling());
        assert_eq!(lod_map.dim(), 32);
        for node in &nodes {
            let span = 1 << node.lod;
            assert_eq!(lod_map.lod_at(node.x * span, node.y * span), node.lod);
            assert_eq!(lod_map.lod_at((node.x + 1) * span - 1, (node.y + 1) * span - 1), node.lod);
        }
    }

    #[test]
    fn test_sixteen_patches_per_node() {
        let asset = asset();
        let config = TerrainConfig::default();
        let (nodes, lod_map) = run(&asset, &config);
        let out = build_patches(&asset, &nodes, &lod_map, &config, &CapacityConfig::for_final_nodes(4096));
        assert_eq!(out.patches.len(), nodes.len() * 16);
        assert!(out.bounds.is_empty());
        assert!(out.reports.is_empty());
    }

    #[test]
    fn test_patch_capacity_saturates() {
        let asset = asset();
        let config = TerrainConfig { bounds_debug: true, ..TerrainConfig::no_culling() };
        let (nodes, lod_map) = run(&asset, &config);
        let caps = CapacityConfig { patches: 20, bounds: 8, ..CapacityConfig::default() };
        let out = build_patches(&asset, &nodes, &lod_map, &config, &caps);
        assert_eq!(out.patches.len(), 20);
        assert_eq!(out.bounds.len(), 8);
        assert_eq!(out.reports.len(), 2);
        assert_eq!(out.reports[0].peak, nodes.len() as u32 * 16);
    }

    #[test]
    fn test_patches_tile_their_node() {
        let asset = asset();
        let (_, lod_map) = run(&asset, &TerrainConfig::no_culling());
        let node = FinalNode { x: 0, y: 0, lod: 4 };
        let config = TerrainConfig::default();
        let first = expand_patch(&asset, &lod_map, &config, node, 0);
        let last = expand_patch(&asset, &lod_map, &config, node, 15);
        // LOD 4 node covers [-1024, 0]; patches are 256 wide
        assert_eq!(first.position, [-896.0, -896.0]);
        assert_eq!(last.position, [-128.0, -128.0]);
        assert_eq!(first.lod, 4);
    }

    #[test]
    fn test_seams_point_to_coarser_neighbours() {
        let asset = asset();
        let config = TerrainConfig::no_culling();
        let (nodes, lod_map) = run(&asset, &config);
        let out = build_patches(&asset, &nodes, &lod_map, &config, &CapacityConfig::for_final_nodes(4096));

        assert!(out.patches.iter().any(|p| p.lod_trans.iter().any(|t| *t > 0)));
        for patch in &out.patches {
            for t in patch.lod_trans {
                assert!(patch.lod + t <= 4);
            }
        }

        let plain = TerrainConfig { seamless: false, ..config };
        let flat = build_patches(&asset, &nodes, &lod_map, &plain, &CapacityConfig::for_final_nodes(4096));
        assert!(flat.patches.iter().all(|p| p.lod_trans == [0; 4]));
    }

    #[test]
    fn test_bounds_follow_patches() {
        let asset = asset();
        let config = TerrainConfig { bounds_debug: true, ..TerrainConfig::no_culling() };
        let (nodes, lod_map) = run(&asset, &config);
        let out = build_patches(&asset, &nodes, &lod_map, &config, &CapacityConfig::for_final_nodes(4096));
        assert_eq!(out.bounds.len(), out.patches.len());
        let b = out.bounds[0];
        assert_eq!(b.min[1], -5.0);
        assert_eq!(b.max[1], 5.0);
    }

    #[test]
    fn test_lod_map_png() {
        let asset = asset();
        let (_, lod_map) = run(&asset, &TerrainConfig::no_culling());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lod.png");
        lod_map.save_png(4, &path).unwrap();
        assert!(path.exists());
    }
}
