//! GPU buffer management

pub mod append_buffer;
pub mod indirect;
pub mod readback;
pub mod terrain_uniforms;

pub use append_buffer::{AppendBuffer, AppendHeader};
pub use indirect::{ArgsJob, ArgsMode, DispatchIndirectArgs, DrawIndexedIndirectArgs, IndirectArgsPipeline};
pub use readback::{read_buffer_blocking, AsyncReadback};
pub use terrain_uniforms::{HizUniform, LevelUniform, LodParams, TerrainParams};
