use criterion::{criterion_group, criterion_main, Criterion, black_box};

use quadterrain::core::Camera;
use quadterrain::hiz::{DepthConvention, DepthPyramid};
use quadterrain::terrain::{
    build_patches, CapacityConfig, HeightRangeMap, LodGeometry, LodMap, QuadTreeTraversal, SyntheticParams,
    TerrainAsset, TerrainConfig, TraversalView,
};

use glam::Vec3;

fn synthetic_asset() -> TerrainAsset {
    TerrainAsset::synthetic(Vec3::new(10240.0, 1200.0, 10240.0), 5, 5, SyntheticParams::default(), 0.0)
        .expect("synthetic asset")
}

fn ground_camera() -> Camera {
    let mut camera = Camera::new(Vec3::new(0.0, 400.0, 0.0), 60.0, 1920, 1080);
    camera.set_look_at(Vec3::new(2000.0, 0.0, 2000.0), Vec3::Y);
    camera
}

fn bench_traversal_default(c: &mut Criterion) {
    let asset = synthetic_asset();
    let traversal = QuadTreeTraversal::new(&asset, CapacityConfig::for_final_nodes(8192));
    let camera = ground_camera();
    let view = TraversalView::from_camera(&camera);
    let config = TerrainConfig::default();

    c.bench_function("traversal_default_view", |b| {
        b.iter(|| traversal.run(black_box(&view), black_box(&config)));
    });
}

fn bench_traversal_all_leaves(c: &mut Criterion) {
    let asset = TerrainAsset::flat(Vec3::new(10240.0, 0.0, 10240.0), 5, 8).expect("flat asset");
    let traversal = QuadTreeTraversal::new(&asset, CapacityConfig::for_final_nodes(65536));
    let camera = ground_camera();
    let view = TraversalView::from_camera(&camera);
    let config = TerrainConfig { lod_coefficient: 1000.0, ..TerrainConfig::no_culling() };

    c.bench_function("traversal_65536_leaves", |b| {
        b.iter(|| traversal.run(black_box(&view), black_box(&config)));
    });
}

fn bench_lod_map_and_patches(c: &mut Criterion) {
    let asset = synthetic_asset();
    let capacities = CapacityConfig::for_final_nodes(8192);
    let traversal = QuadTreeTraversal::new(&asset, capacities);
    let config = TerrainConfig::default();
    let output = traversal.run(&TraversalView::from_camera(&ground_camera()), &config);

    c.bench_function("lod_map_build", |b| {
        b.iter(|| LodMap::build(black_box(&asset), black_box(&output.descriptors)));
    });

    let lod_map = LodMap::build(&asset, &output.descriptors);
    c.bench_function("patch_expansion", |b| {
        b.iter(|| build_patches(&asset, black_box(&output.final_nodes), &lod_map, &config, &capacities));
    });
}

fn bench_height_ranges(c: &mut Criterion) {
    let geometry = LodGeometry::new(Vec3::new(10240.0, 1200.0, 10240.0), 5, 5).expect("geometry");
    let source = quadterrain::terrain::SyntheticHeight::new(SyntheticParams::default());

    c.bench_function("height_ranges_160x160", |b| {
        b.iter(|| HeightRangeMap::from_sampler(&geometry, 5, |x, z| source.height_at(x, z)));
    });
}

fn bench_depth_pyramid_1080p(c: &mut Criterion) {
    let (width, height) = (1920, 1080);
    let depth: Vec<f32> = (0..width * height).map(|i| (i % 1013) as f32 / 1013.0).collect();

    c.bench_function("depth_pyramid_1080p", |b| {
        b.iter(|| DepthPyramid::build(black_box(&depth), width, height, DepthConvention::Standard));
    });
}

criterion_group!(
    benches,
    bench_traversal_default,
    bench_traversal_all_leaves,
    bench_lod_map_and_patches,
    bench_height_ranges,
    bench_depth_pyramid_1080p,
);
criterion_main!(benches);
