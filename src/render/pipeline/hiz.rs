//! Hi-Z pyramid builder compute pipeline
//!
//! Builds the farthest-depth mip chain from the renderer's depth buffer in
//! `ceil(mips / 4)` dispatches. Pass 0 reads the depth texture; every later
//! pass reads the previous pass's last mip from one of two scratch textures.

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::{Mat4, Vec3};
use crate::hiz::{hiz_passes, hiz_scratch_size, hiz_size, DepthConvention, HizPass, MIPS_PER_PASS};
use crate::render::buffer::{DispatchIndirectArgs, HizUniform};
use crate::render::context::GpuCapabilities;
use crate::render::profiler::{GpuProfiler, TerrainPass};

/// Hi-Z texel format
pub const HIZ_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Passes supported (16384² pyramid)
const MAX_PASSES: u64 = 4;
const PARAMS_STRIDE: u64 = 256;

/// Per-pass parameters (must match `HizPassParams` in hiz.wgsl)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct HizPassParams {
    pub src_size: [u32; 2],
    pub dst_size: u32,
    pub mip_count: u32,
    pub reversed: u32,
    pub _pad: [u32; 3],
}

struct HizResources {
    size: u32,
    mip_count: u32,
    passes: Vec<HizPass>,
    texture: wgpu::Texture,
    full_view: wgpu::TextureView,
    mip_views: Vec<wgpu::TextureView>,
    scratch_views: [wgpu::TextureView; 2],
    dummy_view: wgpu::TextureView,
    /// Bind groups of passes 1.., which never change for a given size
    copy_bind_groups: Vec<wgpu::BindGroup>,
}

/// GPU Hi-Z builder owning the pyramid texture
pub struct HizPyramid {
    convention: DepthConvention,
    capabilities: GpuCapabilities,
    depth_pipeline: wgpu::ComputePipeline,
    copy_pipeline: wgpu::ComputePipeline,
    depth_layout: wgpu::BindGroupLayout,
    copy_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    args_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    resources: Option<HizResources>,
    view_proj: Mat4,
    generation: u64,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: HIZ_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn pass_layout(device: &wgpu::Device, label: &str, source: wgpu::BindGroupLayoutEntry) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        source,
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<HizPassParams>() as u64),
            },
            count: None,
        },
    ];
    entries.extend((3..8).map(storage_entry));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries: &entries })
}

impl HizPyramid {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, capabilities: GpuCapabilities, convention: DepthConvention) -> Result<Self, Error> {
        let storage_limit = device.limits().max_storage_textures_per_shader_stage;
        if storage_limit < MIPS_PER_PASS + 1 {
            return Err(Error::Config(format!(
                "Hi-Z needs {} storage textures per stage, device allows {}",
                MIPS_PER_PASS + 1,
                storage_limit
            )));
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hiz_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/hiz.wgsl").into()),
        });

        // Group 0 for pass 0: camera depth
        let depth_layout = pass_layout(device, "hiz_depth_layout", wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });

        // Group 0 for later passes: scratch copy
        let copy_layout = pass_layout(device, "hiz_copy_layout", wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });

        let make_pipeline = |layout: &wgpu::BindGroupLayout, entry: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("hiz_pipeline_layout"),
                bind_group_layouts: &[layout],
                immediate_size: 0,
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let depth_pipeline = make_pipeline(&depth_layout, "build_hiz_from_depth");
        let copy_pipeline = make_pipeline(&copy_layout, "build_hiz_from_copy");

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hiz_pass_params"),
            size: PARAMS_STRIDE * MAX_PASSES,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let args_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hiz_dispatch_args"),
            size: DispatchIndirectArgs::SIZE * MAX_PASSES,
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hiz_uniform"),
            size: std::mem::size_of::<HizUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&uniform_buffer, 0, bytemuck::bytes_of(&HizUniform::invalid(convention.is_reversed())));

        Ok(Self {
            convention,
            capabilities,
            depth_pipeline,
            copy_pipeline,
            depth_layout,
            copy_layout,
            params_buffer,
            args_buffer,
            uniform_buffer,
            resources: None,
            view_proj: Mat4::IDENTITY,
            generation: 0,
        })
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    /// Bumped on every reallocation; holders of bind groups rebuild when it changes
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn size(&self) -> u32 {
        self.resources.as_ref().map_or(0, |r| r.size)
    }

    pub fn mip_count(&self) -> u32 {
        self.resources.as_ref().map_or(0, |r| r.mip_count)
    }

    /// View-projection the current pyramid was built with
    pub fn view_proj(&self) -> Mat4 {
        self.view_proj
    }

    /// All mips, for sampling in the occlusion test
    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.resources.as_ref().map(|r| &r.full_view)
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.resources.as_ref().map(|r| &r.texture)
    }

    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    /// (Re)allocate for a viewport. Returns true when the pyramid changed size.
    pub fn ensure_size(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32) -> Result<bool, Error> {
        let size = hiz_size(width, height);
        if self.resources.as_ref().is_some_and(|r| r.size == size) {
            return Ok(false);
        }
        let max_dim = self.capabilities.max_texture_dimension_2d;
        if size > max_dim {
            return Err(Error::Config(format!(
                "Hi-Z size {} for {}x{} viewport exceeds device limit {}",
                size, width, height, max_dim
            )));
        }

        let passes = hiz_passes(size);
        if passes.len() as u64 > MAX_PASSES {
            return Err(Error::Config(format!("Hi-Z size {} needs {} passes", size, passes.len())));
        }
        let mip_count = crate::hiz::hiz_mip_count(size);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("hiz_pyramid"),
            size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HIZ_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let full_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views: Vec<wgpu::TextureView> = (0..mip_count)
            .map(|mip| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("hiz_mip_view"),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let scratch_size = hiz_scratch_size(size);
        let make_scratch = |label: &str, extent: u32| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d { width: extent, height: extent, depth_or_array_layers: 1 },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: HIZ_FORMAT,
                    usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        };
        let scratch_views = [make_scratch("hiz_scratch_a", scratch_size), make_scratch("hiz_scratch_b", scratch_size)];
        let dummy_view = make_scratch("hiz_dummy", 1);

        // Group counts only depend on the size, so the indirect args are written once here
        let reversed = self.convention.is_reversed() as u32;
        for pass in &passes {
            let src = if pass.reads_depth() { [width, height] } else { [pass.dst_size * 2; 2] };
            let params = HizPassParams {
                src_size: src,
                dst_size: pass.dst_size,
                mip_count: pass.mip_count,
                reversed,
                _pad: [0; 3],
            };
            queue.write_buffer(&self.params_buffer, pass.index as u64 * PARAMS_STRIDE, bytemuck::bytes_of(&params));
            let args = DispatchIndirectArgs::new(pass.groups, pass.groups, 1);
            queue.write_buffer(&self.args_buffer, pass.index as u64 * DispatchIndirectArgs::SIZE, bytemuck::bytes_of(&args));
        }

        let mut resources = HizResources {
            size,
            mip_count,
            passes,
            texture,
            full_view,
            mip_views,
            scratch_views,
            dummy_view,
            copy_bind_groups: Vec::new(),
        };
        resources.copy_bind_groups = resources
            .passes
            .iter()
            .filter_map(|pass| {
                let read = pass.scratch_read()?;
                let source = wgpu::BindingResource::TextureView(&resources.scratch_views[read]);
                Some(self.pass_bind_group(device, &self.copy_layout, &resources, pass, 1, source))
            })
            .collect();

        log::info!("Hi-Z pyramid allocated: {}x{} with {} mips in {} passes", size, size, mip_count, resources.passes.len());
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&HizUniform::invalid(self.convention.is_reversed())));
        self.resources = Some(resources);
        self.generation += 1;
        Ok(true)
    }

    fn pass_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        resources: &HizResources,
        pass: &HizPass,
        source_binding: u32,
        source: wgpu::BindingResource<'_>,
    ) -> wgpu::BindGroup {
        let mip_view = |slot: u32| {
            let mip = pass.first_mip + slot;
            if slot < pass.mip_count {
                &resources.mip_views[mip as usize]
            } else {
                &resources.dummy_view
            }
        };
        let mut entries = vec![
            wgpu::BindGroupEntry { binding: source_binding, resource: source },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.params_buffer,
                    offset: pass.index as u64 * PARAMS_STRIDE,
                    size: wgpu::BufferSize::new(std::mem::size_of::<HizPassParams>() as u64),
                }),
            },
        ];
        entries.extend((0..MIPS_PER_PASS).map(|slot| wgpu::BindGroupEntry {
            binding: 3 + slot,
            resource: wgpu::BindingResource::TextureView(mip_view(slot)),
        }));
        entries.push(wgpu::BindGroupEntry {
            binding: 7,
            resource: wgpu::BindingResource::TextureView(&resources.scratch_views[pass.scratch_write()]),
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor { label: Some("hiz_pass_bg"), layout, entries: &entries })
    }

    /// Record the reduction of `depth_view` (a `width × height` depth texture
    /// rendered with `view_proj` from `camera_position`) and publish the result.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        depth_view: &wgpu::TextureView,
        width: u32,
        height: u32,
        view_proj: Mat4,
        camera_position: Vec3,
        profiler: Option<&GpuProfiler>,
    ) -> Result<(), Error> {
        self.ensure_size(device, queue, width, height)?;
        let resources = self.resources.as_ref().ok_or_else(|| Error::Gpu("Hi-Z resources missing".into()))?;

        // Pass 0 reads the live viewport size, which can change within one pyramid size
        let first = resources.passes[0];
        let params = HizPassParams {
            src_size: [width, height],
            dst_size: first.dst_size,
            mip_count: first.mip_count,
            reversed: self.convention.is_reversed() as u32,
            _pad: [0; 3],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        let depth_bind_group = self.pass_bind_group(
            device,
            &self.depth_layout,
            resources,
            &first,
            0,
            wgpu::BindingResource::TextureView(depth_view),
        );

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("hiz_build_pass"),
                timestamp_writes: profiler.and_then(|p| p.timestamp_writes(TerrainPass::Hiz, true, true)),
            });
            for hiz_pass in &resources.passes {
                let (pipeline, bind_group) = if hiz_pass.reads_depth() {
                    (&self.depth_pipeline, &depth_bind_group)
                } else {
                    (&self.copy_pipeline, &resources.copy_bind_groups[hiz_pass.index as usize - 1])
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                if self.capabilities.indirect_execution {
                    pass.dispatch_workgroups_indirect(&self.args_buffer, hiz_pass.index as u64 * DispatchIndirectArgs::SIZE);
                } else {
                    pass.dispatch_workgroups(hiz_pass.groups, hiz_pass.groups, 1);
                }
            }
        }

        let uniform = HizUniform::new(view_proj, camera_position, resources.size, resources.mip_count, self.convention.is_reversed());
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
        self.view_proj = view_proj;
        log::trace!("Hi-Z build recorded ({} passes)", resources.passes.len());
        Ok(())
    }

    /// Copy one mip back to the CPU (blocking; tests and debugging only)
    pub fn read_mip_blocking(&self, device: &wgpu::Device, queue: &wgpu::Queue, mip: u32) -> Result<Vec<f32>, Error> {
        let resources = self.resources.as_ref().ok_or_else(|| Error::Gpu("Hi-Z not allocated".into()))?;
        if mip >= resources.mip_count {
            return Err(Error::Config(format!("mip {} out of range", mip)));
        }
        let dim = (resources.size >> mip).max(1);
        let row_bytes = dim * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hiz_mip_readback"),
            size: (padded_row * dim) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("hiz_mip_readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &resources.texture,
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(dim),
                },
            },
            wgpu::Extent3d { width: dim, height: dim, depth_or_array_layers: 1 },
        );
        queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| Error::Gpu(e.to_string()))?;
        rx.recv()
            .map_err(|e| Error::Gpu(e.to_string()))?
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let data = slice.get_mapped_range();
        let texels = data
            .chunks_exact(padded_row as usize)
            .flat_map(|row| row[..row_bytes as usize].chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>))
            .collect();
        drop(data);
        staging.unmap();
        Ok(texels)
    }
}
