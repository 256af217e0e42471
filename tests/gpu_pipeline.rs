//! Headless GPU checks of the selection kernels. Each test returns early
//! when no adapter is available.

use glam::Vec3;

use quadterrain::core::Camera;
use quadterrain::hiz::reference::DepthPyramid;
use quadterrain::hiz::DepthConvention;
use quadterrain::render::buffer::DrawIndexedIndirectArgs;
use quadterrain::render::pipeline::HizPyramid;
use quadterrain::render::terrain_frame::{BOUNDS_MESH_INDEX_COUNT, PATCH_MESH_INDEX_COUNT};
use quadterrain::render::{GpuContext, TerrainFrame};
use quadterrain::terrain::{CapacityConfig, ListKind, NodeCoord, RenderPatch, TerrainAsset, TerrainConfig};

fn gpu() -> Option<GpuContext> {
    quadterrain::core::logging::init_for_tests();
    match GpuContext::new_blocking() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {}", e);
            None
        }
    }
}

fn small_flat_asset() -> TerrainAsset {
    // 32 x 32 LOD-0 tiles
    TerrainAsset::flat(Vec3::new(2048.0, 0.0, 2048.0), 4, 2).unwrap()
}

fn overhead_camera(position: Vec3, fov: f32) -> Camera {
    let mut camera = Camera::new(position, fov, 512, 512);
    camera.far = 50000.0;
    camera.set_look_at(position - Vec3::Y, Vec3::Z);
    camera
}

fn run_frame(ctx: &GpuContext, frame: &mut TerrainFrame, camera: &Camera) {
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("test_frame") });
    frame.dispatch(&mut encoder, camera, None).unwrap();
    ctx.queue.submit(Some(encoder.finish()));
    frame.after_submit();
}

#[test]
fn gpu_all_leaves_with_culling_off() {
    let Some(ctx) = gpu() else { return };
    let asset = small_flat_asset();
    let config = TerrainConfig { lod_coefficient: 1000.0, ..TerrainConfig::no_culling() };
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        CapacityConfig::for_final_nodes(1024),
        config,
        DepthConvention::Standard,
    )
    .unwrap();

    run_frame(&ctx, &mut frame, &overhead_camera(Vec3::new(0.0, 100.0, 0.0), 60.0));

    let counters = frame.read_counters().unwrap();
    assert_eq!(counters.final_nodes.readable(), 1024);
    assert_eq!(counters.patches.readable(), 1024 * 16);
    assert_eq!(counters.bounds.readable(), 0);

    let nodes = frame.read_final_nodes_blocking().unwrap();
    assert!(nodes.iter().all(|n| n.lod == 0));
    let mut ids: Vec<u32> = nodes.iter().map(|n| asset.geometry.node_id(n.coord())).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 1024);

    let lod_map = frame.read_lod_map_blocking().unwrap();
    assert_eq!(lod_map.len(), 32 * 32);
    assert!(lod_map.iter().all(|lod| *lod == 0));
}

#[test]
fn gpu_camera_facing_away_selects_nothing() {
    let Some(ctx) = gpu() else { return };
    let asset = small_flat_asset();
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        CapacityConfig::default(),
        TerrainConfig::default(),
        DepthConvention::Standard,
    )
    .unwrap();

    let mut camera = Camera::new(Vec3::new(0.0, 500.0, 0.0), 60.0, 512, 512);
    camera.set_look_at(Vec3::new(0.0, 1000.0, 0.0), Vec3::Z);
    run_frame(&ctx, &mut frame, &camera);

    let counters = frame.read_counters().unwrap();
    assert_eq!(counters.final_nodes.count, 0);
    assert_eq!(counters.patches.count, 0);
}

#[test]
fn gpu_single_coarse_node_in_view() {
    let Some(ctx) = gpu() else { return };
    let asset = TerrainAsset::flat(Vec3::new(10240.0, 0.0, 10240.0), 5, 8).unwrap();
    let config = TerrainConfig { hiz_cull: false, ..TerrainConfig::default() };
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        CapacityConfig::for_final_nodes(8192),
        config,
        DepthConvention::Standard,
    )
    .unwrap();

    run_frame(&ctx, &mut frame, &overhead_camera(Vec3::new(-640.0, 1000.0, -640.0), 30.0));

    let nodes = frame.read_final_nodes_blocking().unwrap();
    assert!(!nodes.is_empty());
    for node in &nodes {
        assert_eq!(node.coord().ancestor(5), NodeCoord::new(5, 3, 3));
    }
}

#[test]
fn gpu_overflow_is_reported_and_grown() {
    let Some(ctx) = gpu() else { return };
    let asset = small_flat_asset();
    let config = TerrainConfig { lod_coefficient: 1000.0, ..TerrainConfig::no_culling() };
    let capacities = CapacityConfig { work_queue: 1024, final_nodes: 100, patches: 1600, bounds: 16 };
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        capacities,
        config,
        DepthConvention::Standard,
    )
    .unwrap();

    run_frame(&ctx, &mut frame, &overhead_camera(Vec3::new(0.0, 100.0, 0.0), 60.0));

    let counters = frame.read_counters().unwrap();
    assert_eq!(counters.final_nodes.readable(), 100);
    assert_eq!(counters.final_nodes.peak, 1024);
    assert_eq!(counters.patches.readable(), 1600);

    let reports = frame.poll_capacity();
    let final_report = reports.iter().find(|r| r.list == ListKind::FinalNodes).unwrap();
    assert_eq!(final_report.peak, 1024);

    assert!(frame.grow_capacity(&reports).unwrap());
    assert!(frame.capacities().final_nodes >= 1024);

    run_frame(&ctx, &mut frame, &overhead_camera(Vec3::new(0.0, 100.0, 0.0), 60.0));
    assert_eq!(frame.read_counters().unwrap().final_nodes.readable(), 1024);
}

#[test]
fn gpu_hiz_of_uniform_depth() {
    let Some(ctx) = gpu() else { return };
    let (width, height) = (300, 200);
    let depth = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test_depth"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

    let mut hiz = HizPyramid::new(&ctx.device, &ctx.queue, ctx.capabilities, DepthConvention::Standard).unwrap();
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("test_hiz") });
    {
        let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear_depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(0.5), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }
    let camera = Camera::new(Vec3::ZERO, 60.0, width, height);
    hiz.build(
        &ctx.device,
        &ctx.queue,
        &mut encoder,
        &depth_view,
        width,
        height,
        camera.view_projection(),
        camera.position,
        None,
    )
    .unwrap();
    ctx.queue.submit(Some(encoder.finish()));

    assert_eq!(hiz.size(), 512);
    assert_eq!(hiz.mip_count(), 10);
    for mip in [0, 3, 4, 9] {
        let texels = hiz.read_mip_blocking(&ctx.device, &ctx.queue, mip).unwrap();
        assert_eq!(texels.len(), ((512u32 >> mip) * (512u32 >> mip)) as usize);
        assert!(texels.iter().all(|d| (*d - 0.5).abs() < 1e-6), "mip {} differs", mip);
    }

    // Same pyramid size for a slightly different viewport: no reallocation
    let generation = hiz.generation();
    assert!(!hiz.ensure_size(&ctx.device, &ctx.queue, 310, 190).unwrap());
    assert_eq!(hiz.generation(), generation);
}

/// Draws `depth` (row-major, `width × height`) into a Depth32Float texture
/// through `frag_depth`, since depth formats cannot be copy destinations.
fn depth_texture_from(ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder, depth: &[f32], width: u32, height: u32) -> wgpu::Texture {
    let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
    let source = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test_depth_source"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &source,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(depth),
        wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(width * 4), rows_per_image: Some(height) },
        size,
    );
    let target = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test_depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });

    let shader = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("test_depth_writer"),
        source: wgpu::ShaderSource::Wgsl(
            r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @builtin(frag_depth) f32 {
    return textureLoad(source, vec2<i32>(position.xy), 0).r;
}
"#
            .into(),
        ),
    });
    let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("test_depth_writer_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        }],
    });
    let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("test_depth_writer_pipeline_layout"),
        bind_group_layouts: &[&layout],
        immediate_size: 0,
    });
    let pipeline = ctx.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("test_depth_writer_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, ..Default::default() },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: Default::default(),
            bias: Default::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[],
            compilation_options: Default::default(),
        }),
        multiview_mask: None,
        cache: None,
    });
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("test_depth_writer_bg"),
        layout: &layout,
        entries: &[wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&source_view) }],
    });

    let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("write_depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
    target
}

#[test]
fn gpu_hiz_matches_cpu_pyramid_on_varied_depth() {
    let Some(ctx) = gpu() else { return };
    // Non-square, odd height; 128 pyramid with 8 mips takes two passes
    let (width, height) = (72, 45);
    let depth: Vec<f32> = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x * 37 + y * 101 + (x * y) % 17) % 256) as f32 / 255.0))
        .collect();

    for convention in [DepthConvention::Standard, DepthConvention::Reversed] {
        let expected = DepthPyramid::build(&depth, width, height, convention).unwrap();
        let mut hiz = HizPyramid::new(&ctx.device, &ctx.queue, ctx.capabilities, convention).unwrap();

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("test_hiz") });
        let texture = depth_texture_from(&ctx, &mut encoder, &depth, width, height);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let camera = Camera::new(Vec3::ZERO, 60.0, width, height);
        hiz.build(
            &ctx.device,
            &ctx.queue,
            &mut encoder,
            &view,
            width,
            height,
            camera.view_projection(),
            camera.position,
            None,
        )
        .unwrap();
        ctx.queue.submit(Some(encoder.finish()));

        assert_eq!(hiz.size(), 128);
        assert_eq!(hiz.mip_count(), expected.mip_count());
        for mip in 0..expected.mip_count() {
            let texels = hiz.read_mip_blocking(&ctx.device, &ctx.queue, mip).unwrap();
            let gpu_bits: Vec<u32> = texels.iter().map(|d| d.to_bits()).collect();
            let cpu_bits: Vec<u32> = expected.mip(mip).iter().map(|d| d.to_bits()).collect();
            assert_eq!(gpu_bits, cpu_bits, "{:?} mip {} differs", convention, mip);
        }
    }
}

#[test]
fn gpu_draw_records_carry_list_counts() {
    let Some(ctx) = gpu() else { return };
    let asset = small_flat_asset();
    let config = TerrainConfig { lod_coefficient: 1000.0, bounds_debug: true, ..TerrainConfig::no_culling() };
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        CapacityConfig::for_final_nodes(1024),
        config.clone(),
        DepthConvention::Standard,
    )
    .unwrap();
    let camera = overhead_camera(Vec3::new(0.0, 100.0, 0.0), 60.0);

    run_frame(&ctx, &mut frame, &camera);

    let counters = frame.read_counters().unwrap();
    assert_eq!(counters.patches.readable(), 1024 * 16);
    assert_eq!(counters.bounds.readable(), counters.patches.readable());
    let [patch_draw, bounds_draw] = frame.read_draw_args().unwrap();
    assert_eq!(
        patch_draw,
        DrawIndexedIndirectArgs { index_count: PATCH_MESH_INDEX_COUNT, instance_count: 1024 * 16, ..Default::default() }
    );
    assert_eq!(
        bounds_draw,
        DrawIndexedIndirectArgs { index_count: BOUNDS_MESH_INDEX_COUNT, instance_count: 1024 * 16, ..Default::default() }
    );

    // Turning the debug capture off retires the bounds draw
    frame.set_config(TerrainConfig { bounds_debug: false, ..config }).unwrap();
    run_frame(&ctx, &mut frame, &camera);
    let [patch_draw, bounds_draw] = frame.read_draw_args().unwrap();
    assert_eq!(patch_draw.instance_count, 1024 * 16);
    assert_eq!(bounds_draw, DrawIndexedIndirectArgs::for_mesh(BOUNDS_MESH_INDEX_COUNT));
}

#[test]
fn gpu_repeated_frame_selects_same_patches() {
    let Some(ctx) = gpu() else { return };
    // Capacities cover every leaf, so no append saturates and drops an arbitrary item
    let asset = small_flat_asset();
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        &asset,
        CapacityConfig::for_final_nodes(1024),
        TerrainConfig::default(),
        DepthConvention::Standard,
    )
    .unwrap();
    let mut camera = Camera::new(Vec3::new(-900.0, 60.0, -900.0), 60.0, 512, 512);
    camera.far = 50000.0;
    camera.set_look_at(Vec3::new(900.0, 0.0, 900.0), Vec3::Y);

    let sorted_patches = |frame: &TerrainFrame| -> Vec<Vec<u8>> {
        let mut patches: Vec<Vec<u8>> = frame
            .read_patches_blocking()
            .unwrap()
            .iter()
            .map(|p: &RenderPatch| bytemuck::bytes_of(p).to_vec())
            .collect();
        patches.sort_unstable();
        patches
    };

    run_frame(&ctx, &mut frame, &camera);
    let first = sorted_patches(&frame);
    run_frame(&ctx, &mut frame, &camera);
    let second = sorted_patches(&frame);

    assert!(!first.is_empty());
    assert_eq!(first.len() % 16, 0);
    assert_eq!(first, second);
}
