//! Quadtree selection kernels: traversal, LOD map and patch expansion
//!
//! All three entry points live in `terrain_build.wgsl` and share bind group 0
//! (terrain uniform, LOD table, height and detail textures, descriptors).
//! Group 1 holds the lists each kernel reads and appends to, group 2 the
//! per-level uniform and group 3 the Hi-Z pyramid.

use crate::core::error::Error;
use crate::render::buffer::{AppendBuffer, LevelUniform};

const SHADER_SOURCE: &str = include_str!("../../../shaders/terrain_build.wgsl");

/// Kernel names the pipeline binds to
pub const TRAVERSE_ENTRY: &str = "traverse_quad_tree";
pub const LOD_MAP_ENTRY: &str = "build_lod_map";
pub const PATCHES_ENTRY: &str = "build_patches";

/// Threads per group of the 1D kernels
pub const LINEAR_GROUP_SIZE: u32 = 64;
/// Side of the 2D LOD map group
pub const LOD_MAP_GROUP_SIZE: u32 = 8;

/// Where a kernel takes its group count from
#[derive(Clone, Copy, Debug)]
pub enum Dispatch<'a> {
    Indirect { buffer: &'a wgpu::Buffer, offset: u64 },
    Direct { x: u32, y: u32 },
}

fn storage_buffer(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_buffer(binding: u32, dynamic: bool, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: wgpu::BufferSize::new(size),
        },
        count: None,
    }
}

fn texture(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

const UNFILTERED: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: false };

/// Check that every kernel this pipeline binds exists in the shader source
fn check_entry_points(source: &str) -> Result<(), Error> {
    for entry in [TRAVERSE_ENTRY, LOD_MAP_ENTRY, PATCHES_ENTRY] {
        if !source.contains(&format!("fn {}(", entry)) {
            return Err(Error::Config(format!("terrain shader is missing kernel `{}`", entry)));
        }
    }
    Ok(())
}

/// Compute pipelines and layouts of the selection kernels
pub struct QuadTreePipeline {
    traverse_pipeline: wgpu::ComputePipeline,
    lod_map_pipeline: wgpu::ComputePipeline,
    patches_pipeline: wgpu::ComputePipeline,
    shared_layout: wgpu::BindGroupLayout,
    traverse_layout: wgpu::BindGroupLayout,
    lod_map_layout: wgpu::BindGroupLayout,
    patches_layout: wgpu::BindGroupLayout,
    level_layout: wgpu::BindGroupLayout,
    hiz_layout: wgpu::BindGroupLayout,
}

impl QuadTreePipeline {
    pub fn new(device: &wgpu::Device) -> Result<Self, Error> {
        check_entry_points(SHADER_SOURCE)?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain_build_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let shared_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_shared_layout"),
            entries: &[
                uniform_buffer(0, false, std::mem::size_of::<crate::render::buffer::TerrainParams>() as u64),
                storage_buffer(1, true),
                texture(2, UNFILTERED),
                texture(3, wgpu::TextureSampleType::Uint),
                storage_buffer(4, false),
            ],
        });

        let traverse_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_traverse_layout"),
            entries: &[storage_buffer(0, true), storage_buffer(1, false), storage_buffer(2, false)],
        });

        let lod_map_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_lod_map_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::R32Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }],
        });

        let patches_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_patches_layout"),
            entries: &[
                storage_buffer(2, false),
                texture(5, wgpu::TextureSampleType::Uint),
                storage_buffer(6, false),
                storage_buffer(7, false),
            ],
        });

        let level_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_level_layout"),
            entries: &[uniform_buffer(0, true, 16)],
        });

        let hiz_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_hiz_layout"),
            entries: &[
                texture(0, UNFILTERED),
                uniform_buffer(1, false, std::mem::size_of::<crate::render::buffer::HizUniform>() as u64),
            ],
        });

        let make_pipeline = |label: &str, layouts: &[&wgpu::BindGroupLayout], entry: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: layouts,
                immediate_size: 0,
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let traverse_pipeline = make_pipeline(
            "terrain_traverse_pipeline",
            &[&shared_layout, &traverse_layout, &level_layout, &hiz_layout],
            TRAVERSE_ENTRY,
        );
        let lod_map_pipeline = make_pipeline("terrain_lod_map_pipeline", &[&shared_layout, &lod_map_layout], LOD_MAP_ENTRY);
        let patches_pipeline = make_pipeline("terrain_patches_pipeline", &[&shared_layout, &patches_layout], PATCHES_ENTRY);

        Ok(Self {
            traverse_pipeline,
            lod_map_pipeline,
            patches_pipeline,
            shared_layout,
            traverse_layout,
            lod_map_layout,
            patches_layout,
            level_layout,
            hiz_layout,
        })
    }

    pub fn shared_bind_group(
        &self,
        device: &wgpu::Device,
        params: &wgpu::Buffer,
        lod_params: &wgpu::Buffer,
        height_range: &wgpu::TextureView,
        quadtree_map: &wgpu::TextureView,
        descriptors: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_shared_bg"),
            layout: &self.shared_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: lod_params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(height_range) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(quadtree_map) },
                wgpu::BindGroupEntry { binding: 4, resource: descriptors.as_entire_binding() },
            ],
        })
    }

    /// Lists for one traversal level
    pub fn traverse_bind_group(
        &self,
        device: &wgpu::Device,
        consume: &AppendBuffer,
        append: &AppendBuffer,
        final_nodes: &AppendBuffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_traverse_bg"),
            layout: &self.traverse_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: consume.buffer().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: append.buffer().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: final_nodes.buffer().as_entire_binding() },
            ],
        })
    }

    pub fn lod_map_bind_group(&self, device: &wgpu::Device, lod_map: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_lod_map_bg"),
            layout: &self.lod_map_layout,
            entries: &[wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(lod_map) }],
        })
    }

    pub fn patches_bind_group(
        &self,
        device: &wgpu::Device,
        final_nodes: &AppendBuffer,
        lod_map: &wgpu::TextureView,
        patches: &AppendBuffer,
        bounds: &AppendBuffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_patches_bg"),
            layout: &self.patches_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 2, resource: final_nodes.buffer().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(lod_map) },
                wgpu::BindGroupEntry { binding: 6, resource: patches.buffer().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: bounds.buffer().as_entire_binding() },
            ],
        })
    }

    /// `levels` holds one [`LevelUniform`] slot per LOD
    pub fn level_bind_group(&self, device: &wgpu::Device, levels: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_level_bg"),
            layout: &self.level_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: levels,
                    offset: 0,
                    size: wgpu::BufferSize::new(16),
                }),
            }],
        })
    }

    pub fn hiz_bind_group(&self, device: &wgpu::Device, hiz_view: &wgpu::TextureView, hiz_uniform: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_hiz_bg"),
            layout: &self.hiz_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(hiz_view) },
                wgpu::BindGroupEntry { binding: 1, resource: hiz_uniform.as_entire_binding() },
            ],
        })
    }

    /// Record one traversal level inside an open compute pass
    #[allow(clippy::too_many_arguments)]
    pub fn record_traverse(
        &self,
        pass: &mut wgpu::ComputePass<'_>,
        shared: &wgpu::BindGroup,
        lists: &wgpu::BindGroup,
        levels: &wgpu::BindGroup,
        lod: u32,
        hiz: &wgpu::BindGroup,
        dispatch: Dispatch<'_>,
    ) {
        pass.set_pipeline(&self.traverse_pipeline);
        pass.set_bind_group(0, shared, &[]);
        pass.set_bind_group(1, lists, &[]);
        pass.set_bind_group(2, levels, &[(lod as u64 * LevelUniform::STRIDE) as u32]);
        pass.set_bind_group(3, hiz, &[]);
        record_dispatch(pass, dispatch);
    }

    pub fn record_lod_map(&self, pass: &mut wgpu::ComputePass<'_>, shared: &wgpu::BindGroup, lod_map: &wgpu::BindGroup, dim: u32) {
        pass.set_pipeline(&self.lod_map_pipeline);
        pass.set_bind_group(0, shared, &[]);
        pass.set_bind_group(1, lod_map, &[]);
        let groups = dim.div_ceil(LOD_MAP_GROUP_SIZE);
        pass.dispatch_workgroups(groups, groups, 1);
    }

    pub fn record_patches(
        &self,
        pass: &mut wgpu::ComputePass<'_>,
        shared: &wgpu::BindGroup,
        lists: &wgpu::BindGroup,
        dispatch: Dispatch<'_>,
    ) {
        pass.set_pipeline(&self.patches_pipeline);
        pass.set_bind_group(0, shared, &[]);
        pass.set_bind_group(1, lists, &[]);
        record_dispatch(pass, dispatch);
    }
}

fn record_dispatch(pass: &mut wgpu::ComputePass<'_>, dispatch: Dispatch<'_>) {
    match dispatch {
        Dispatch::Indirect { buffer, offset } => pass.dispatch_workgroups_indirect(buffer, offset),
        Dispatch::Direct { x, y } => pass.dispatch_workgroups(x, y, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_has_all_kernels() {
        assert!(check_entry_points(SHADER_SOURCE).is_ok());
        assert!(check_entry_points("fn traverse_quad_tree() {}").is_err());
    }

    #[test]
    fn test_shader_avoids_reserved_identifiers() {
        // `patch` and `final` are reserved in WGSL
        for word in ["var patch", "let patch", "var final ", "let final "] {
            assert!(!SHADER_SOURCE.contains(word), "reserved identifier in `{}`", word);
        }
    }
}
