//! Per-frame orchestration of the GPU terrain selection
//!
//! One [`TerrainFrame`] owns every buffer and texture the selection kernels
//! touch and records a frame in a fixed order:
//!
//! 1. clear the list counters and upload the terrain uniform
//! 2. optionally build the Hi-Z pyramid from the caller's depth buffer
//! 3. traverse each LOD from coarsest to finest, ping-ponging work queues
//! 4. rasterise the LOD map
//! 5. expand final nodes into patches and fill the indirect draw records
//!
//! Nothing waits on the GPU. List headers and timestamps come back through
//! asynchronous readbacks polled on later frames.

use bytemuck::Pod;

use crate::core::error::Error;
use crate::core::types::{Mat4, Vec3};
use crate::core::Camera;
use crate::hiz::DepthConvention;
use crate::math::Frustum;
use crate::render::buffer::{
    read_buffer_blocking, AppendBuffer, AppendHeader, ArgsJob, ArgsMode, DispatchIndirectArgs,
    DrawIndexedIndirectArgs, IndirectArgsPipeline, LevelUniform, LodParams, TerrainParams,
};
use crate::render::buffer::indirect::MAX_DISPATCH_GROUPS;
use crate::render::capacity::{grown_capacities, CapacityMonitor};
use crate::render::context::GpuCapabilities;
use crate::render::pipeline::hiz::HizPyramid;
use crate::render::pipeline::quadtree::{Dispatch, QuadTreePipeline, LINEAR_GROUP_SIZE};
use crate::render::profiler::{GpuProfiler, TerrainPass, TerrainTimings};
use crate::terrain::{
    CapacityConfig, CapacityReport, FinalNode, ListKind, NodeDescriptor, PatchBounds, RenderPatch,
    ShaderVariant, TerrainAsset, TerrainConfig, PATCHES_PER_NODE,
};
use crate::terrain::quadtree::LodGeometry;

/// Indices of one patch mesh (16 × 16 quads)
pub const PATCH_MESH_INDEX_COUNT: u32 = 16 * 16 * 6;

/// Indices of a wireframe box (12 edges as a line list)
pub const BOUNDS_MESH_INDEX_COUNT: u32 = 24;

/// Depth buffer handed in for Hi-Z occlusion
#[derive(Clone, Copy, Debug)]
pub struct DepthInput<'a> {
    pub view: &'a wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// View-projection the depth was rendered with
    pub view_proj: Mat4,
    pub camera_position: Vec3,
}

impl<'a> DepthInput<'a> {
    pub fn from_camera(view: &'a wgpu::TextureView, camera: &Camera) -> Self {
        Self {
            view,
            width: camera.width,
            height: camera.height,
            view_proj: camera.view_projection(),
            camera_position: camera.position,
        }
    }
}

/// Blocking snapshot of the output list headers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub final_nodes: AppendHeader,
    pub patches: AppendHeader,
    pub bounds: AppendHeader,
}

/// Bounded lists reallocated together when capacities grow
struct FrameLists {
    /// Work queues; step parity picks which one is appended to
    queues: [AppendBuffer; 2],
    final_nodes: AppendBuffer,
    patches: AppendBuffer,
    bounds: AppendBuffer,
}

/// Reject capacities whose lists would not fit in one storage binding
fn check_binding_limits(device: &wgpu::Device, caps: &CapacityConfig) -> Result<(), Error> {
    let limit = device.limits().max_storage_buffer_binding_size as u64;
    let lists = [
        (ListKind::WorkQueue, caps.work_queue, std::mem::size_of::<[u32; 2]>()),
        (ListKind::FinalNodes, caps.final_nodes, std::mem::size_of::<FinalNode>()),
        (ListKind::Patches, caps.patches, std::mem::size_of::<RenderPatch>()),
        (ListKind::Bounds, caps.bounds, std::mem::size_of::<PatchBounds>()),
    ];
    for (list, capacity, item) in lists {
        let bytes = AppendHeader::SIZE + capacity as u64 * item as u64;
        if bytes > limit {
            return Err(Error::Capacity(format!(
                "{} of {} items needs {} bytes, device binding limit is {}",
                list, capacity, bytes, limit
            )));
        }
    }
    Ok(())
}

impl FrameLists {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue, caps: &CapacityConfig) -> Self {
        let work_queue = |label: &str| {
            AppendBuffer::new(device, queue, label, ListKind::WorkQueue, std::mem::size_of::<[u32; 2]>() as u64, caps.work_queue)
        };
        Self {
            queues: [work_queue("terrain_work_queue_a"), work_queue("terrain_work_queue_b")],
            final_nodes: AppendBuffer::new(
                device,
                queue,
                "terrain_final_nodes",
                ListKind::FinalNodes,
                std::mem::size_of::<FinalNode>() as u64,
                caps.final_nodes,
            ),
            patches: AppendBuffer::new(
                device,
                queue,
                "terrain_patches",
                ListKind::Patches,
                std::mem::size_of::<RenderPatch>() as u64,
                caps.patches,
            ),
            bounds: AppendBuffer::new(
                device,
                queue,
                "terrain_patch_bounds",
                ListKind::Bounds,
                std::mem::size_of::<PatchBounds>() as u64,
                caps.bounds,
            ),
        }
    }

    /// Work queue appended to at traversal step `step` (0 = coarsest LOD)
    fn append_queue(&self, step: u32) -> &AppendBuffer {
        &self.queues[step as usize % 2]
    }

    /// Work queue consumed at `step`; `None` for the seeded first step
    fn consume_queue(&self, step: u32) -> Option<&AppendBuffer> {
        step.checked_sub(1).map(|prev| self.append_queue(prev))
    }

    fn monitored(&self) -> [&AppendBuffer; 5] {
        let [a, b] = &self.queues;
        [a, b, &self.final_nodes, &self.patches, &self.bounds]
    }
}

/// Bind groups and indirect-args jobs that point at the current lists
struct ListBindings {
    /// [seed → A, A → B, B → A]
    traverse: [wgpu::BindGroup; 3],
    patches: wgpu::BindGroup,
    level_jobs: Vec<ArgsJob>,
    patch_dispatch_job: ArgsJob,
    patch_draw_job: ArgsJob,
    bounds_draw_job: ArgsJob,
}

/// GPU terrain selection for one terrain asset
pub struct TerrainFrame {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: GpuCapabilities,
    geometry: LodGeometry,
    config: TerrainConfig,
    capacities: CapacityConfig,
    convention: DepthConvention,

    pipeline: QuadTreePipeline,
    args_pipeline: IndirectArgsPipeline,
    hiz: HizPyramid,
    hiz_generation: u64,

    params_buffer: wgpu::Buffer,
    lod_params_buffer: wgpu::Buffer,
    level_buffer: wgpu::Buffer,
    descriptors: wgpu::Buffer,
    _height_range: wgpu::Texture,
    _quadtree_map: wgpu::Texture,
    lod_map_texture: wgpu::Texture,
    lod_map_view: wgpu::TextureView,
    dummy_hiz_view: wgpu::TextureView,
    dispatch_args: wgpu::Buffer,
    patch_draw_args: wgpu::Buffer,
    bounds_draw_args: wgpu::Buffer,

    seed: AppendBuffer,
    lists: FrameLists,
    bindings: ListBindings,
    shared_bind_group: wgpu::BindGroup,
    level_bind_group: wgpu::BindGroup,
    lod_map_bind_group: wgpu::BindGroup,
    hiz_bind_group: wgpu::BindGroup,

    monitor: CapacityMonitor,
    profiler: Option<GpuProfiler>,
}

fn upload_mip_chain<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    format: wgpu::TextureFormat,
    texel_bytes: u32,
    levels: &[(u32, &[T])],
) -> wgpu::Texture {
    let base = levels.first().map_or(1, |(dim, _)| *dim);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width: base, height: base, depth_or_array_layers: 1 },
        mip_level_count: levels.len().max(1) as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    for (mip, (dim, data)) in levels.iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: mip as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dim * texel_bytes),
                rows_per_image: Some(*dim),
            },
            wgpu::Extent3d { width: *dim, height: *dim, depth_or_array_layers: 1 },
        );
    }
    texture
}

impl TerrainFrame {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        capabilities: GpuCapabilities,
        asset: &TerrainAsset,
        capacities: CapacityConfig,
        config: TerrainConfig,
        convention: DepthConvention,
    ) -> Result<Self, Error> {
        asset.validate()?;
        capacities.validate()?;
        config.validate()?;
        check_binding_limits(device, &capacities)?;

        let geometry = asset.geometry.clone();
        let max_lod = geometry.max_lod();
        let lod_map_dim = geometry.lod0_grid_dim();
        if lod_map_dim > capabilities.max_texture_dimension_2d {
            return Err(Error::Config(format!(
                "LOD map of {} texels per side exceeds device limit {}",
                lod_map_dim, capabilities.max_texture_dimension_2d
            )));
        }

        let pipeline = QuadTreePipeline::new(device)?;
        // One job per traversal level, plus patch dispatch and two draw records
        let mut args_pipeline = IndirectArgsPipeline::new(device, max_lod + 4);
        let hiz = HizPyramid::new(device, queue, capabilities, convention)?;

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_params"),
            size: std::mem::size_of::<TerrainParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let lod_table = LodParams::table(&geometry);
        let lod_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_lod_params"),
            size: (std::mem::size_of::<LodParams>() * lod_table.len()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&lod_params_buffer, 0, bytemuck::cast_slice(&lod_table));

        let levels: Vec<LevelUniform> = (0..=max_lod).map(LevelUniform::new).collect();
        let level_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_level_uniforms"),
            size: LevelUniform::STRIDE * levels.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&level_buffer, 0, bytemuck::cast_slice(&levels));

        // Descriptors persist across frames; only nodes visited this frame are rewritten
        let descriptors = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_node_descriptors"),
            size: std::mem::size_of::<NodeDescriptor>() as u64 * geometry.total_node_count() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let height_levels: Vec<(u32, &[[f32; 2]])> =
            asset.height_ranges.levels().iter().map(|l| (l.dim, l.ranges.as_slice())).collect();
        let height_range = upload_mip_chain(device, queue, "terrain_height_range", wgpu::TextureFormat::Rg32Float, 8, &height_levels);
        let floor_levels: Vec<(u32, &[u32])> = asset.quadtree_map.levels().collect();
        let quadtree_map = upload_mip_chain(device, queue, "terrain_quadtree_map", wgpu::TextureFormat::R32Uint, 4, &floor_levels);

        let lod_map_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("terrain_lod_map"),
            size: wgpu::Extent3d { width: lod_map_dim, height: lod_map_dim, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let lod_map_view = lod_map_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let dummy_hiz_view = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("terrain_hiz_placeholder"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Traversal levels first, patch expansion last
        let dispatch_args = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_dispatch_args"),
            size: DispatchIndirectArgs::SIZE * (max_lod as u64 + 2),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_args = |label: &str, index_count: u32| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: DrawIndexedIndirectArgs::SIZE,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::INDIRECT
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&DrawIndexedIndirectArgs::for_mesh(index_count)));
            buffer
        };
        let patch_draw_args = draw_args("terrain_patch_draw_args", PATCH_MESH_INDEX_COUNT);
        let bounds_draw_args = draw_args("terrain_bounds_draw_args", BOUNDS_MESH_INDEX_COUNT);

        let seed_items: Vec<[u32; 2]> = geometry.coarsest_nodes().iter().map(|n| [n.x, n.y]).collect();
        let seed = AppendBuffer::seeded(device, queue, "terrain_seed_queue", ListKind::WorkQueue, &seed_items);

        let height_view = height_range.create_view(&wgpu::TextureViewDescriptor::default());
        let quadtree_view = quadtree_map.create_view(&wgpu::TextureViewDescriptor::default());
        let shared_bind_group =
            pipeline.shared_bind_group(device, &params_buffer, &lod_params_buffer, &height_view, &quadtree_view, &descriptors);
        let level_bind_group = pipeline.level_bind_group(device, &level_buffer);
        let lod_map_bind_group = pipeline.lod_map_bind_group(device, &lod_map_view);
        let hiz_bind_group = pipeline.hiz_bind_group(device, &dummy_hiz_view, hiz.uniform_buffer());

        let lists = FrameLists::new(device, queue, &capacities);
        let bindings = bind_lists(
            device,
            queue,
            &pipeline,
            &mut args_pipeline,
            max_lod,
            &seed,
            &lists,
            &lod_map_view,
            [&dispatch_args, &patch_draw_args, &bounds_draw_args],
        );

        let profiler = if capabilities.timestamp_query { GpuProfiler::new(device, queue, true) } else { None };

        let frame = Self {
            device: device.clone(),
            queue: queue.clone(),
            capabilities,
            geometry,
            config,
            capacities,
            convention,
            pipeline,
            args_pipeline,
            hiz,
            hiz_generation: 0,
            params_buffer,
            lod_params_buffer,
            level_buffer,
            descriptors,
            _height_range: height_range,
            _quadtree_map: quadtree_map,
            lod_map_texture,
            lod_map_view,
            dummy_hiz_view,
            dispatch_args,
            patch_draw_args,
            bounds_draw_args,
            seed,
            lists,
            bindings,
            shared_bind_group,
            level_bind_group,
            lod_map_bind_group,
            hiz_bind_group,
            monitor: CapacityMonitor::new(device, 5),
            profiler,
        };
        log::info!(
            "Terrain frame ready: {} LODs, {}x{} LOD map, {} final nodes, {} patches, {:.1} MiB",
            max_lod + 1,
            lod_map_dim,
            lod_map_dim,
            frame.capacities.final_nodes,
            frame.capacities.patches,
            frame.memory_footprint() as f64 / (1024.0 * 1024.0)
        );
        Ok(frame)
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Replace the runtime switches; takes effect on the next dispatch
    pub fn set_config(&mut self, config: TerrainConfig) -> Result<(), Error> {
        config.validate()?;
        if config.hiz_cull && !self.capabilities.indirect_execution {
            log::debug!("Hi-Z culling enabled with direct-dispatch fallback");
        }
        if self.config.bounds_debug && !config.bounds_debug {
            // The bounds draw record is no longer refreshed per frame
            let idle = DrawIndexedIndirectArgs::for_mesh(BOUNDS_MESH_INDEX_COUNT);
            self.queue.write_buffer(&self.bounds_draw_args, 0, bytemuck::bytes_of(&idle));
        }
        self.config = config;
        Ok(())
    }

    pub fn shader_variant(&self) -> ShaderVariant {
        self.config.sanitized().shader_variant()
    }

    pub fn capacities(&self) -> CapacityConfig {
        self.capacities
    }

    pub fn geometry(&self) -> &LodGeometry {
        &self.geometry
    }

    pub fn hiz(&self) -> &HizPyramid {
        &self.hiz
    }

    /// Patch list: a 16-byte header, then [`RenderPatch`] records
    pub fn patch_buffer(&self) -> &wgpu::Buffer {
        self.lists.patches.buffer()
    }

    /// `draw_indexed_indirect` record for the patch mesh
    pub fn patch_draw_args(&self) -> &wgpu::Buffer {
        &self.patch_draw_args
    }

    /// Debug bounds list: a 16-byte header, then [`PatchBounds`] records
    pub fn bounds_buffer(&self) -> &wgpu::Buffer {
        self.lists.bounds.buffer()
    }

    pub fn bounds_draw_args(&self) -> &wgpu::Buffer {
        &self.bounds_draw_args
    }

    pub fn lod_map_view(&self) -> &wgpu::TextureView {
        &self.lod_map_view
    }

    pub fn descriptor_buffer(&self) -> &wgpu::Buffer {
        &self.descriptors
    }

    pub fn profiler(&self) -> Option<&GpuProfiler> {
        self.profiler.as_ref()
    }

    pub fn profiler_mut(&mut self) -> Option<&mut GpuProfiler> {
        self.profiler.as_mut()
    }

    /// Record one frame of terrain selection into `encoder`
    pub fn dispatch(&mut self, encoder: &mut wgpu::CommandEncoder, camera: &Camera, depth: Option<DepthInput<'_>>) -> Result<(), Error> {
        if camera.depth != self.convention {
            return Err(Error::Config(format!(
                "camera uses {:?} depth but the terrain frame was built for {:?}",
                camera.depth, self.convention
            )));
        }
        let config = self.config.sanitized();
        let max_lod = self.geometry.max_lod();

        for list in self.lists.monitored() {
            list.clear_counters(encoder);
        }

        let frustum = Frustum::from_view_projection(&camera.view_projection());
        let params = TerrainParams::new(&self.geometry, &config, camera.position, &frustum);
        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        if let Some(depth) = depth.filter(|_| config.hiz_cull) {
            self.hiz.build(
                &self.device,
                &self.queue,
                encoder,
                depth.view,
                depth.width,
                depth.height,
                depth.view_proj,
                depth.camera_position,
                self.profiler.as_ref(),
            )?;
        }
        if self.hiz.generation() != self.hiz_generation {
            let view = self.hiz.view().unwrap_or(&self.dummy_hiz_view);
            self.hiz_bind_group = self.pipeline.hiz_bind_group(&self.device, view, self.hiz.uniform_buffer());
            self.hiz_generation = self.hiz.generation();
        }

        let indirect = self.capabilities.indirect_execution;
        for step in 0..=max_lod {
            let lod = max_lod - step;
            self.lists.append_queue(step).reset_count(encoder);

            let consume_capacity = self.lists.consume_queue(step).map_or(self.seed.capacity(), AppendBuffer::capacity);
            let dispatch = if indirect {
                Dispatch::Indirect { buffer: &self.dispatch_args, offset: step as u64 * DispatchIndirectArgs::SIZE }
            } else {
                Dispatch::Direct { x: consume_capacity.div_ceil(LINEAR_GROUP_SIZE).min(MAX_DISPATCH_GROUPS), y: 1 }
            };
            let lists = match step {
                0 => &self.bindings.traverse[0],
                s if s % 2 == 1 => &self.bindings.traverse[1],
                _ => &self.bindings.traverse[2],
            };

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("terrain_traverse_pass"),
                timestamp_writes: self
                    .profiler
                    .as_ref()
                    .and_then(|p| p.timestamp_writes(TerrainPass::Traversal, step == 0, step == max_lod)),
            });
            if indirect {
                self.args_pipeline.record(&mut pass, &self.bindings.level_jobs[step as usize]);
            }
            self.pipeline.record_traverse(
                &mut pass,
                &self.shared_bind_group,
                lists,
                &self.level_bind_group,
                lod,
                &self.hiz_bind_group,
                dispatch,
            );
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("terrain_lod_map_pass"),
                timestamp_writes: self.profiler.as_ref().and_then(|p| p.timestamp_writes(TerrainPass::LodMap, true, true)),
            });
            self.pipeline
                .record_lod_map(&mut pass, &self.shared_bind_group, &self.lod_map_bind_group, self.geometry.lod0_grid_dim());
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("terrain_patches_pass"),
                timestamp_writes: self.profiler.as_ref().and_then(|p| p.timestamp_writes(TerrainPass::Patches, true, true)),
            });
            let dispatch = if indirect {
                self.args_pipeline.record(&mut pass, &self.bindings.patch_dispatch_job);
                Dispatch::Indirect {
                    buffer: &self.dispatch_args,
                    offset: (max_lod as u64 + 1) * DispatchIndirectArgs::SIZE,
                }
            } else {
                let threads = self.lists.final_nodes.capacity().saturating_mul(PATCHES_PER_NODE);
                Dispatch::Direct { x: threads.div_ceil(LINEAR_GROUP_SIZE).min(MAX_DISPATCH_GROUPS), y: 1 }
            };
            self.pipeline.record_patches(&mut pass, &self.shared_bind_group, &self.bindings.patches, dispatch);
            self.args_pipeline.record(&mut pass, &self.bindings.patch_draw_job);
            if config.bounds_debug {
                self.args_pipeline.record(&mut pass, &self.bindings.bounds_draw_job);
            }
        }

        self.monitor.record(encoder, &self.lists.monitored());
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.resolve(encoder);
        }
        Ok(())
    }

    /// Kick off this frame's readbacks. Call right after `queue.submit`.
    pub fn after_submit(&mut self) {
        self.monitor.after_submit();
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.after_submit();
        }
    }

    /// Overruns seen in the newest completed header readback (non-blocking)
    pub fn poll_capacity(&mut self) -> Vec<CapacityReport> {
        self.monitor.poll(&self.device)
    }

    /// Latest GPU timings, if profiling is available (non-blocking)
    pub fn poll_timings(&mut self) -> Option<TerrainTimings> {
        let profiler = self.profiler.as_mut()?;
        profiler.read_results(&self.device);
        Some(profiler.latest_timings())
    }

    /// Reallocate the lists named in `reports` to their suggested sizes.
    /// Returns true when anything was reallocated.
    pub fn grow_capacity(&mut self, reports: &[CapacityReport]) -> Result<bool, Error> {
        let grown = grown_capacities(&self.capacities, reports);
        if grown == self.capacities {
            return Ok(false);
        }
        grown.validate()?;
        check_binding_limits(&self.device, &grown)?;
        log::info!("Growing terrain lists: {:?} -> {:?}", self.capacities, grown);

        self.lists = FrameLists::new(&self.device, &self.queue, &grown);
        self.args_pipeline.reset_jobs();
        self.bindings = bind_lists(
            &self.device,
            &self.queue,
            &self.pipeline,
            &mut self.args_pipeline,
            self.geometry.max_lod(),
            &self.seed,
            &self.lists,
            &self.lod_map_view,
            [&self.dispatch_args, &self.patch_draw_args, &self.bounds_draw_args],
        );
        self.capacities = grown;
        log::info!("Terrain lists now hold {:.1} MiB", self.memory_footprint() as f64 / (1024.0 * 1024.0));
        Ok(true)
    }

    /// Output list headers after the submitted work completes (stalls)
    pub fn read_counters(&self) -> Result<FrameCounters, Error> {
        let header = |list: &AppendBuffer| -> Result<AppendHeader, Error> {
            let bytes = read_buffer_blocking(&self.device, &self.queue, list.buffer(), AppendHeader::SIZE)?;
            Ok(bytemuck::pod_read_unaligned(&bytes[..AppendHeader::SIZE as usize]))
        };
        Ok(FrameCounters {
            final_nodes: header(&self.lists.final_nodes)?,
            patches: header(&self.lists.patches)?,
            bounds: header(&self.lists.bounds)?,
        })
    }

    /// Patch and bounds draw records after the submitted work completes (stalls)
    pub fn read_draw_args(&self) -> Result<[DrawIndexedIndirectArgs; 2], Error> {
        let record = |buffer: &wgpu::Buffer| -> Result<DrawIndexedIndirectArgs, Error> {
            let bytes = read_buffer_blocking(&self.device, &self.queue, buffer, DrawIndexedIndirectArgs::SIZE)?;
            Ok(bytemuck::pod_read_unaligned(&bytes[..DrawIndexedIndirectArgs::SIZE as usize]))
        };
        Ok([record(&self.patch_draw_args)?, record(&self.bounds_draw_args)?])
    }

    /// Final nodes of the last completed frame (stalls)
    pub fn read_final_nodes_blocking(&self) -> Result<Vec<FinalNode>, Error> {
        self.read_list_blocking(&self.lists.final_nodes)
    }

    /// Render patches of the last completed frame (stalls)
    pub fn read_patches_blocking(&self) -> Result<Vec<RenderPatch>, Error> {
        self.read_list_blocking(&self.lists.patches)
    }

    fn read_list_blocking<T: Pod>(&self, list: &AppendBuffer) -> Result<Vec<T>, Error> {
        let size = AppendHeader::SIZE + list.item_size() * list.capacity() as u64;
        let bytes = read_buffer_blocking(&self.device, &self.queue, list.buffer(), size)?;
        let header: AppendHeader = bytemuck::pod_read_unaligned(&bytes[..AppendHeader::SIZE as usize]);
        let item = std::mem::size_of::<T>();
        Ok(bytes[AppendHeader::SIZE as usize..]
            .chunks_exact(item)
            .take(header.readable() as usize)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    /// Chosen LOD per LOD-0 tile of the last completed frame (stalls)
    pub fn read_lod_map_blocking(&self) -> Result<Vec<u32>, Error> {
        let dim = self.geometry.lod0_grid_dim();
        let row_bytes = dim * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_lod_map_staging"),
            size: (padded_row * dim) as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("terrain_lod_map_copy") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.lod_map_texture,
                mip_level: 0,
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
        self.queue.submit(Some(encoder.finish()));

        let bytes = read_buffer_blocking(&self.device, &self.queue, &staging, (padded_row * dim) as u64)?;
        Ok(bytes
            .chunks_exact(padded_row as usize)
            .flat_map(|row| row[..row_bytes as usize].chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>))
            .collect())
    }

    /// Bytes of GPU memory held by the selection buffers and textures
    pub fn memory_footprint(&self) -> u64 {
        let lists: u64 = self.lists.monitored().iter().map(|l| l.buffer().size()).sum();
        lists
            + self.seed.buffer().size()
            + self.descriptors.size()
            + self.lod_params_buffer.size()
            + self.level_buffer.size()
            + self.dispatch_args.size()
    }
}

#[allow(clippy::too_many_arguments)]
fn bind_lists(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &QuadTreePipeline,
    args: &mut IndirectArgsPipeline,
    max_lod: u32,
    seed: &AppendBuffer,
    lists: &FrameLists,
    lod_map_view: &wgpu::TextureView,
    [dispatch_args, patch_draw_args, bounds_draw_args]: [&wgpu::Buffer; 3],
) -> ListBindings {
    let [queue_a, queue_b] = &lists.queues;
    let traverse = [
        pipeline.traverse_bind_group(device, seed, queue_a, &lists.final_nodes),
        pipeline.traverse_bind_group(device, queue_a, queue_b, &lists.final_nodes),
        pipeline.traverse_bind_group(device, queue_b, queue_a, &lists.final_nodes),
    ];
    let patches = pipeline.patches_bind_group(device, &lists.final_nodes, lod_map_view, &lists.patches, &lists.bounds);

    let words = (DispatchIndirectArgs::SIZE / 4) as u32;
    let level_jobs = (0..=max_lod)
        .map(|step| {
            let source = lists.consume_queue(step).unwrap_or(seed);
            let mode = ArgsMode::Dispatch { group_size: LINEAR_GROUP_SIZE, multiplier: 1 };
            args.create_job(device, queue, source, dispatch_args, step * words, mode)
        })
        .collect();
    let patch_dispatch_job = args.create_job(
        device,
        queue,
        &lists.final_nodes,
        dispatch_args,
        (max_lod + 1) * words,
        ArgsMode::Dispatch { group_size: LINEAR_GROUP_SIZE, multiplier: PATCHES_PER_NODE },
    );
    let draw = ArgsMode::DrawInstances { multiplier: 1 };
    let patch_draw_job = args.create_job(device, queue, &lists.patches, patch_draw_args, 0, draw);
    let bounds_draw_job = args.create_job(device, queue, &lists.bounds, bounds_draw_args, 0, draw);

    ListBindings { traverse, patches, level_jobs, patch_dispatch_job, patch_draw_job, bounds_draw_job }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_index_counts() {
        assert_eq!(PATCH_MESH_INDEX_COUNT % 6, 0);
        assert_eq!(BOUNDS_MESH_INDEX_COUNT, 12 * 2);
    }
}
