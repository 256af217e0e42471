//! Runtime toggles and allocation sizes for the terrain pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::quadtree::PATCHES_PER_NODE;
use crate::core::{Error, Result};

/// Smallest accepted Hi-Z depth bias (world units)
pub const MIN_HIZ_DEPTH_BIAS: f32 = 0.01;
/// Largest accepted Hi-Z depth bias (world units)
pub const MAX_HIZ_DEPTH_BIAS: f32 = 1000.0;
/// Largest accepted bounding-box height redundancy
pub const MAX_BOUNDS_HEIGHT_REDUNDANCE: u32 = 100;

// ---------------------------------------------------------------------------
// Terrain config
// ---------------------------------------------------------------------------

/// Per-frame toggles and tunables. Immutable while a frame is recorded;
/// pass a new value to `TerrainFrame::set_config` to change it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Reject nodes entirely outside the view frustum.
    pub frustum_cull: bool,
    /// Reject nodes hidden behind the previous depth pyramid.
    pub hiz_cull: bool,
    /// Split borderline LOD-sufficient nodes one extra level.
    pub double_cut: bool,
    /// Record per-edge LOD transitions so patches can stitch seams.
    pub seamless: bool,
    /// Emit one bounding box per patch for debug drawing.
    pub bounds_debug: bool,
    /// Widen the evaluation threshold and always emit LOD transitions.
    pub seam_debug: bool,
    /// Shading-stage visualisation toggles.
    pub patch_debug: bool,
    pub node_debug: bool,
    pub mip_debug: bool,
    /// Extra height added above and below each node's range (0-100).
    pub bounds_height_redundance: u32,
    /// LOD evaluation distance coefficient. Larger keeps detail further out.
    pub lod_coefficient: f32,
    /// Occlusion test bias in world units (clamped to 0.01-1000).
    pub hiz_depth_bias: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            frustum_cull: true,
            hiz_cull: true,
            double_cut: true,
            seamless: true,
            bounds_debug: false,
            seam_debug: false,
            patch_debug: false,
            node_debug: false,
            mip_debug: false,
            bounds_height_redundance: 5,
            lod_coefficient: 1.2,
            hiz_depth_bias: 1.0,
        }
    }
}

impl TerrainConfig {
    /// Every culling stage and extra split disabled
    pub fn no_culling() -> Self {
        Self {
            frustum_cull: false,
            hiz_cull: false,
            double_cut: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bounds_height_redundance > MAX_BOUNDS_HEIGHT_REDUNDANCE {
            return Err(Error::Config(format!(
                "bounds_height_redundance {} exceeds {}",
                self.bounds_height_redundance, MAX_BOUNDS_HEIGHT_REDUNDANCE
            )));
        }
        if !self.lod_coefficient.is_finite() || self.lod_coefficient <= 0.0 {
            return Err(Error::Config(format!("lod_coefficient must be positive, got {}", self.lod_coefficient)));
        }
        if !self.hiz_depth_bias.is_finite() {
            return Err(Error::Config("hiz_depth_bias must be finite".into()));
        }
        Ok(())
    }

    /// Copy with the tunables clamped into their accepted ranges
    pub fn sanitized(&self) -> Self {
        Self {
            bounds_height_redundance: self.bounds_height_redundance.min(MAX_BOUNDS_HEIGHT_REDUNDANCE),
            hiz_depth_bias: self.hiz_depth_bias.clamp(MIN_HIZ_DEPTH_BIAS, MAX_HIZ_DEPTH_BIAS),
            ..self.clone()
        }
    }

    /// Coefficient actually used for LOD evaluation
    pub fn effective_lod_coefficient(&self) -> f32 {
        if self.seam_debug {
            self.lod_coefficient * SEAM_DEBUG_SCALE
        } else {
            self.lod_coefficient
        }
    }

    pub fn shader_variant(&self) -> ShaderVariant {
        ShaderVariant::from_config(self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Evaluation coefficient multiplier in seam-debug mode
pub const SEAM_DEBUG_SCALE: f32 = 1.5;

/// Upper bound of the LOD-sufficiency ratio that still triggers a double cut
pub const DOUBLE_CUT_BAND: f32 = 2.0;

// ---------------------------------------------------------------------------
// Shader variant
// ---------------------------------------------------------------------------

/// Bit set handed to the kernels in the terrain uniform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderVariant(pub u32);

impl ShaderVariant {
    pub const FRUSTUM_CULL: Self = Self(1 << 0);
    pub const HIZ_CULL: Self = Self(1 << 1);
    pub const DOUBLE_CUT: Self = Self(1 << 2);
    pub const SEAMLESS: Self = Self(1 << 3);
    pub const BOUNDS_DEBUG: Self = Self(1 << 4);
    pub const SEAM_DEBUG: Self = Self(1 << 5);
    pub const PATCH_DEBUG: Self = Self(1 << 6);
    pub const NODE_DEBUG: Self = Self(1 << 7);
    pub const MIP_DEBUG: Self = Self(1 << 8);

    pub fn from_config(config: &TerrainConfig) -> Self {
        let flags = [
            (config.frustum_cull, Self::FRUSTUM_CULL),
            (config.hiz_cull, Self::HIZ_CULL),
            (config.double_cut, Self::DOUBLE_CUT),
            (config.seamless, Self::SEAMLESS),
            (config.bounds_debug, Self::BOUNDS_DEBUG),
            (config.seam_debug, Self::SEAM_DEBUG),
            (config.patch_debug, Self::PATCH_DEBUG),
            (config.node_debug, Self::NODE_DEBUG),
            (config.mip_debug, Self::MIP_DEBUG),
        ];
        flags
            .iter()
            .filter(|(on, _)| *on)
            .fold(Self::default(), |acc, (_, bit)| Self(acc.0 | bit.0))
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ShaderVariant {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Capacity config
// ---------------------------------------------------------------------------

/// Allocation sizes of every bounded GPU list, in items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Each of the two traversal work queues.
    pub work_queue: u32,
    /// Final node list.
    pub final_nodes: u32,
    /// Render patches.
    pub patches: u32,
    /// Debug patch bounds.
    pub bounds: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self::for_final_nodes(2048)
    }
}

impl CapacityConfig {
    /// Queue and final list sized alike, patch lists sized to hold every node's patches
    pub fn for_final_nodes(final_nodes: u32) -> Self {
        let patches = final_nodes.saturating_mul(PATCHES_PER_NODE);
        Self { work_queue: final_nodes, final_nodes, patches, bounds: patches }
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("work_queue", self.work_queue),
            ("final_nodes", self.final_nodes),
            ("patches", self.patches),
            ("bounds", self.bounds),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::Config(format!("capacity {} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TerrainConfig::default();
        assert!(config.frustum_cull && config.hiz_cull && config.double_cut && config.seamless);
        assert_eq!(config.bounds_height_redundance, 5);
        assert_eq!(config.lod_coefficient, 1.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitized_clamps_bias() {
        let config = TerrainConfig { hiz_depth_bias: 5000.0, bounds_height_redundance: 400, ..Default::default() };
        let clean = config.sanitized();
        assert_eq!(clean.hiz_depth_bias, MAX_HIZ_DEPTH_BIAS);
        assert_eq!(clean.bounds_height_redundance, 100);

        let tiny = TerrainConfig { hiz_depth_bias: 0.0, ..Default::default() }.sanitized();
        assert_eq!(tiny.hiz_depth_bias, MIN_HIZ_DEPTH_BIAS);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TerrainConfig { bounds_height_redundance: 101, ..Default::default() }.validate().is_err());
        assert!(TerrainConfig { lod_coefficient: 0.0, ..Default::default() }.validate().is_err());
        assert!(CapacityConfig { patches: 0, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_shader_variant_bits() {
        let variant = TerrainConfig::default().shader_variant();
        assert!(variant.contains(ShaderVariant::FRUSTUM_CULL | ShaderVariant::HIZ_CULL));
        assert!(variant.contains(ShaderVariant::SEAMLESS));
        assert!(!variant.contains(ShaderVariant::BOUNDS_DEBUG));
        assert_eq!(TerrainConfig::no_culling().shader_variant().bits() & 0b111, 0);
    }

    #[test]
    fn test_seam_debug_widens_coefficient() {
        let config = TerrainConfig { seam_debug: true, lod_coefficient: 1.0, ..Default::default() };
        assert_eq!(config.effective_lod_coefficient(), 1.5);
    }

    #[test]
    fn test_capacity_defaults() {
        let caps = CapacityConfig::default();
        assert_eq!(caps.final_nodes, 2048);
        assert_eq!(caps.patches, 2048 * 16);
        assert!(caps.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_with_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrain.json");
        std::fs::write(&path, r#"{ "hiz_cull": false, "lod_coefficient": 0.8 }"#).unwrap();

        let config = TerrainConfig::load(&path).unwrap();
        assert!(!config.hiz_cull);
        assert!(config.frustum_cull);
        assert_eq!(config.lod_coefficient, 0.8);

        config.save(&path).unwrap();
        assert_eq!(TerrainConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CapacityConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
