//! Uniform and storage records shared with `terrain_build.wgsl`
//! (layouts must match the shader structs exactly)

use bytemuck::{Pod, Zeroable};

use crate::core::types::{Mat4, Vec3};
use crate::math::Frustum;
use crate::terrain::config::DOUBLE_CUT_BAND;
use crate::terrain::{LodGeometry, TerrainConfig};

/// Per-frame traversal parameters (176 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainParams {
    /// Camera position, w unused (offset 0)
    pub camera_position: [f32; 4],
    /// World size xyz, w unused (offset 16)
    pub world_size: [f32; 4],
    /// Frustum planes as (normal, distance) (offset 32)
    pub frustum_planes: [[f32; 4]; 6],
    /// x = LOD coefficient, y = double-cut band (offset 128)
    pub node_eval: [f32; 4],
    /// (offset 144)
    pub max_lod: u32,
    /// LOD-0 grid side, also the LOD map size (offset 148)
    pub lod_map_size: u32,
    /// ShaderVariant bits (offset 152)
    pub variant: u32,
    /// (offset 156)
    pub bounds_height_redundance: f32,
    /// (offset 160)
    pub hiz_depth_bias: f32,
    /// Padding to 176 bytes
    pub _pad: [u32; 3],
}

impl TerrainParams {
    pub fn new(geometry: &LodGeometry, config: &TerrainConfig, camera_position: Vec3, frustum: &Frustum) -> Self {
        let config = config.sanitized();
        Self {
            camera_position: camera_position.extend(1.0).to_array(),
            world_size: geometry.world_size().extend(0.0).to_array(),
            frustum_planes: frustum.to_gpu_planes(),
            node_eval: [config.effective_lod_coefficient(), DOUBLE_CUT_BAND, 0.0, 0.0],
            max_lod: geometry.max_lod(),
            lod_map_size: geometry.lod0_grid_dim(),
            variant: config.shader_variant().bits(),
            bounds_height_redundance: config.bounds_height_redundance as f32,
            hiz_depth_bias: config.hiz_depth_bias,
            _pad: [0; 3],
        }
    }
}

/// Constants for one LOD (32 bytes, storage array indexed by LOD)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LodParams {
    pub node_size: f32,
    pub patch_extent: f32,
    pub node_count: u32,
    pub sector_count: u32,
    pub id_offset: u32,
    pub _pad: [u32; 3],
}

impl LodParams {
    pub fn table(geometry: &LodGeometry) -> Vec<Self> {
        geometry
            .levels()
            .iter()
            .map(|level| Self {
                node_size: level.node_size,
                patch_extent: level.patch_extent,
                node_count: level.node_count,
                sector_count: level.sector_count,
                id_offset: level.id_offset,
                _pad: [0; 3],
            })
            .collect()
    }
}

/// Hi-Z pyramid metadata read by the occlusion test (96 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct HizUniform {
    /// View-projection the pyramid was built with (offset 0)
    pub view_proj: [[f32; 4]; 4],
    /// Camera position at build time, w unused (offset 64)
    pub camera_position: [f32; 4],
    /// Mip 0 side length (offset 80)
    pub size: u32,
    pub mip_count: u32,
    /// 0 until the first build completes
    pub valid: u32,
    pub reversed_z: u32,
}

impl HizUniform {
    pub fn new(view_proj: Mat4, camera_position: Vec3, size: u32, mip_count: u32, reversed_z: bool) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_position: camera_position.extend(1.0).to_array(),
            size,
            mip_count,
            valid: 1,
            reversed_z: reversed_z as u32,
        }
    }

    pub fn invalid(reversed_z: bool) -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            camera_position: [0.0; 4],
            size: 1,
            mip_count: 1,
            valid: 0,
            reversed_z: reversed_z as u32,
        }
    }
}

/// Per-level traversal uniform, one 256-byte slot per LOD (dynamic offset)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LevelUniform {
    pub lod: u32,
    pub _pad: [u32; 63],
}

impl LevelUniform {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(lod: u32) -> Self {
        Self { lod, _pad: [0; 63] }
    }
}
