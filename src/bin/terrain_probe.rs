//! Terrain selection probe: runs the quadtree LOD selection for one camera
//! and prints what it picked.
//!
//! Usage: cargo run --release --bin terrain_probe -- [OPTIONS]
//!
//! Options:
//!   --world <METERS>     Terrain side length (default: 10240)
//!   --max-lod <N>        Coarsest LOD index (default: 5)
//!   --grid <N>           Nodes per side at the coarsest LOD (default: 5)
//!   --seed <SEED>        Noise seed (default: 12345)
//!   --height <H>         Terrain height scale (default: 1200)
//!   --tolerance <H>      Flatness tolerance for the detail floor (default: 0 = unrestricted)
//!   --camera <X,Y,Z>     Camera position (default: 0,300,0)
//!   --target <X,Y,Z>     Look-at target (default: 1000,0,1000)
//!   --fov <DEG>          Vertical field of view (default: 60)
//!   --config <PATH>      TerrainConfig JSON
//!   --caps <PATH>        CapacityConfig JSON
//!   --lod-map <PATH>     Write the LOD map as a PNG
//!   --gpu                Also run the GPU pipeline headless and compare counts

use std::time::Instant;

use glam::Vec3;

use quadterrain::core::Camera;
use quadterrain::hiz::DepthConvention;
use quadterrain::render::{GpuContext, TerrainFrame};
use quadterrain::terrain::{
    build_patches, CapacityConfig, LodMap, QuadTreeTraversal, SyntheticParams, TerrainAsset, TerrainConfig,
    TraversalView,
};

fn main() {
    quadterrain::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        log::error!("terrain_probe failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> quadterrain::core::Result<()> {
    let world = parse_f32_arg(args, "--world").unwrap_or(10240.0);
    let max_lod = parse_u32_arg(args, "--max-lod").unwrap_or(5);
    let grid = parse_u32_arg(args, "--grid").unwrap_or(5);
    let seed = parse_u32_arg(args, "--seed").unwrap_or(12345);
    let height_scale = parse_f32_arg(args, "--height").unwrap_or(1200.0);
    let tolerance = parse_f32_arg(args, "--tolerance").unwrap_or(0.0);
    let position = parse_vec3_arg(args, "--camera").unwrap_or(Vec3::new(0.0, 300.0, 0.0));
    let target = parse_vec3_arg(args, "--target").unwrap_or(Vec3::new(1000.0, 0.0, 1000.0));
    let fov = parse_f32_arg(args, "--fov").unwrap_or(60.0);
    let use_gpu = args.iter().any(|a| a == "--gpu");

    let config = match parse_str_arg(args, "--config") {
        Some(path) => TerrainConfig::load(path)?,
        None => TerrainConfig::default(),
    };
    let capacities = match parse_str_arg(args, "--caps") {
        Some(path) => CapacityConfig::load(path)?,
        None => CapacityConfig::default(),
    };

    println!("=== Quadtree Terrain Probe ===");
    println!("World:  {}m, {} LODs, {}x{} coarsest grid", world, max_lod + 1, grid, grid);
    println!("Noise:  seed {}, height {}", seed, height_scale);
    println!("Camera: {:?} -> {:?}, fov {}", position, target, fov);
    println!();

    let start = Instant::now();
    let params = SyntheticParams { seed, height_scale, ..Default::default() };
    let asset = TerrainAsset::synthetic(Vec3::new(world, height_scale, world), max_lod, grid, params, tolerance)?;
    println!("Asset built in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    let mut camera = Camera::new(position, fov, 1920, 1080);
    camera.set_look_at(target, Vec3::Y);

    let start = Instant::now();
    let traversal = QuadTreeTraversal::new(&asset, capacities);
    let output = traversal.run(&TraversalView::from_camera(&camera), &config);
    let lod_map = LodMap::build(&asset, &output.descriptors);
    let patches = build_patches(&asset, &output.final_nodes, &lod_map, &config, &capacities);
    println!("CPU selection in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
    println!();

    println!("{:>4} {:>10} {:>8} {:>8} {:>10}", "LOD", "evaluated", "culled", "final", "subdivided");
    for (lod, stats) in output.stats.iter().enumerate().rev() {
        println!(
            "{:>4} {:>10} {:>8} {:>8} {:>10}",
            lod, stats.evaluated, stats.culled, stats.finals, stats.subdivided
        );
    }
    println!();
    println!("Final nodes: {}", output.final_nodes.len());
    println!("Patches:     {}", patches.patches.len());
    println!("Bounds:      {}", patches.bounds.len());
    match asset.geometry.node_at(0, position.x, position.z) {
        Some(tile) => println!("Under camera: LOD {}", lod_map.lod_at(tile.x, tile.y)),
        None => println!("Under camera: outside terrain"),
    }
    for report in output.reports.iter().chain(&patches.reports) {
        println!("Overflow:    {}", report);
    }

    if let Some(path) = parse_str_arg(args, "--lod-map") {
        lod_map.save_png(max_lod, &path)?;
        println!("LOD map written to {}", path);
    }

    if use_gpu {
        println!();
        run_gpu(&asset, &camera, capacities, config)?;
    }
    Ok(())
}

fn run_gpu(asset: &TerrainAsset, camera: &Camera, capacities: CapacityConfig, config: TerrainConfig) -> quadterrain::core::Result<()> {
    let ctx = GpuContext::new_blocking()?;
    let mut frame = TerrainFrame::new(
        &ctx.device,
        &ctx.queue,
        ctx.capabilities,
        asset,
        capacities,
        config,
        DepthConvention::Standard,
    )?;

    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("terrain_probe") });
    frame.dispatch(&mut encoder, camera, None)?;
    ctx.queue.submit(Some(encoder.finish()));
    frame.after_submit();

    let counters = frame.read_counters()?;
    println!("GPU final nodes: {} (peak {})", counters.final_nodes.readable(), counters.final_nodes.peak);
    println!("GPU patches:     {} (peak {})", counters.patches.readable(), counters.patches.peak);
    println!("GPU bounds:      {} (peak {})", counters.bounds.readable(), counters.bounds.peak);
    let [patch_draw, bounds_draw] = frame.read_draw_args()?;
    println!("GPU draws:       {} patch instances, {} bounds instances", patch_draw.instance_count, bounds_draw.instance_count);
    println!("GPU memory:      {:.1} MiB", frame.memory_footprint() as f64 / (1024.0 * 1024.0));
    for report in frame.poll_capacity() {
        println!("GPU overflow:    {}", report);
    }
    if let Some(timings) = frame.poll_timings() {
        println!(
            "GPU time: hiz {:.3}ms, traversal {:.3}ms, lod map {:.3}ms, patches {:.3}ms",
            timings.hiz_ms, timings.traversal_ms, timings.lod_map_ms, timings.patches_ms
        );
    }
    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// `x,y,z` triple
fn parse_vec3_arg(args: &[String], flag: &str) -> Option<Vec3> {
    let text = parse_str_arg(args, flag)?;
    let parts: Vec<f32> = text.split(',').map(|s| s.trim().parse().ok()).collect::<Option<_>>()?;
    match parts.as_slice() {
        [x, y, z] => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}
