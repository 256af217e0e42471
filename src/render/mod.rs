//! GPU side of the terrain selection: device setup, buffers, kernels and
//! the per-frame orchestrator

pub mod buffer;
pub mod capacity;
pub mod context;
pub mod pipeline;
pub mod profiler;
pub mod terrain_frame;

pub use capacity::CapacityMonitor;
pub use context::{GpuCapabilities, GpuContext};
pub use profiler::{GpuProfiler, TerrainTimings};
pub use terrain_frame::{DepthInput, FrameCounters, TerrainFrame};
