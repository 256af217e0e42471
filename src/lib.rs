//! Quadterrain - GPU-driven quadtree terrain LOD selection with Hi-Z occlusion culling

pub mod core;
pub mod math;
pub mod terrain;
pub mod hiz;
pub mod render;
