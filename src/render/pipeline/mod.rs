//! Compute pipelines

pub mod hiz;
pub mod quadtree;

pub use hiz::HizPyramid;
pub use quadtree::QuadTreePipeline;
