//! Quadtree terrain: node addressing, height lookups, configuration and
//! the CPU reference of the GPU selection kernels

pub mod asset;
pub mod config;
pub mod height;
pub mod patch;
pub mod quadtree;
pub mod queue;
pub mod synthetic;
pub mod traversal;

pub use asset::TerrainAsset;
pub use config::{CapacityConfig, ShaderVariant, TerrainConfig};
pub use height::{HeightRangeMap, QuadTreeMap};
pub use patch::{build_patches, LodMap, PatchBounds, RenderPatch};
pub use quadtree::{LodGeometry, NodeCoord, PATCHES_PER_NODE};
pub use queue::{AppendList, CapacityReport, ListKind, PingPong};
pub use synthetic::{SyntheticHeight, SyntheticParams};
pub use traversal::{FinalNode, NodeDescriptor, QuadTreeTraversal, TraversalView};
