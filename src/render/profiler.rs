//! GPU profiling using wgpu timestamp queries

use std::collections::VecDeque;

use super::buffer::AsyncReadback;

/// Per-stage GPU timing data (in milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TerrainTimings {
    pub hiz_ms: f32,
    pub traversal_ms: f32,
    pub lod_map_ms: f32,
    pub patches_ms: f32,
    pub total_gpu_ms: f32,
}

/// Profiled stages, in recording order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainPass {
    Hiz = 0,
    Traversal = 1,
    LodMap = 2,
    Patches = 3,
}

const NUM_PASSES: u32 = 4;
const TIMESTAMPS_PER_PASS: u32 = 2; // begin + end
const TOTAL_TIMESTAMPS: u32 = NUM_PASSES * TIMESTAMPS_PER_PASS;
const BUFFER_SIZE: u64 = TOTAL_TIMESTAMPS as u64 * std::mem::size_of::<u64>() as u64;

/// GPU profiler using timestamp queries
pub struct GpuProfiler {
    enabled: bool,
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback: AsyncReadback,
    timestamp_period: f32,
    /// Stores the latest resolved timings
    latest_timings: TerrainTimings,
    /// Rolling average over N frames
    frame_timings: VecDeque<TerrainTimings>,
    max_history: usize,
}

impl GpuProfiler {
    /// Returns `None` when the device lacks timestamp queries
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, enabled: bool) -> Option<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            log::info!("Timestamp queries unavailable, terrain profiling disabled");
            return None;
        }

        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("terrain_profiler_queries"),
            ty: wgpu::QueryType::Timestamp,
            count: TOTAL_TIMESTAMPS,
        });

        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_profiler_resolve"),
            size: BUFFER_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Some(Self {
            enabled,
            query_set,
            resolve_buffer,
            readback: AsyncReadback::new(device, "terrain_profiler_read", BUFFER_SIZE),
            timestamp_period: queue.get_timestamp_period(),
            latest_timings: TerrainTimings::default(),
            frame_timings: VecDeque::new(),
            max_history: 60,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Timestamp writes for a compute pass. A stage spanning several passes
    /// asks for `begin` on its first and `end` on its last.
    pub fn timestamp_writes(&self, stage: TerrainPass, begin: bool, end: bool) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        if !self.enabled || !(begin || end) {
            return None;
        }
        let index = stage as u32 * TIMESTAMPS_PER_PASS;
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: begin.then_some(index),
            end_of_pass_write_index: end.then_some(index + 1),
        })
    }

    /// Resolve queries and copy to the staging buffer. Call after all passes, before submit.
    /// Skipped while the previous frame's results are still being mapped.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if !self.enabled {
            return;
        }
        let Some(target) = self.readback.copy_target() else {
            return;
        };
        encoder.resolve_query_set(&self.query_set, 0..TOTAL_TIMESTAMPS, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, target, 0, BUFFER_SIZE);
    }

    /// Start mapping the resolved timestamps. Call after submit.
    pub fn after_submit(&mut self) {
        self.readback.request_map();
    }

    /// Pick up results of an earlier frame. Non-blocking - keeps cached values if not ready.
    pub fn read_results(&mut self, device: &wgpu::Device) {
        let Some(bytes) = self.readback.try_read(device) else {
            return;
        };
        let timestamps: Vec<u64> = bytes.chunks_exact(8).map(bytemuck::pod_read_unaligned::<u64>).collect();
        if let Some(timings) = timings_from_ticks(&timestamps, self.timestamp_period) {
            self.frame_timings.push_back(timings);
            if self.frame_timings.len() > self.max_history {
                self.frame_timings.pop_front();
            }
            self.latest_timings = timings;
        }
    }

    /// Get latest per-stage timings
    pub fn latest_timings(&self) -> TerrainTimings {
        self.latest_timings
    }

    /// Get averaged timings over the history window
    pub fn average_timings(&self) -> TerrainTimings {
        average(&self.frame_timings)
    }
}

fn timings_from_ticks(timestamps: &[u64], ns_per_tick: f32) -> Option<TerrainTimings> {
    if timestamps.len() < TOTAL_TIMESTAMPS as usize {
        return None;
    }
    let ms = |begin: u64, end: u64| -> f32 {
        (end.wrapping_sub(begin) as f64 * ns_per_tick as f64 / 1_000_000.0) as f32
    };
    Some(TerrainTimings {
        hiz_ms: ms(timestamps[0], timestamps[1]),
        traversal_ms: ms(timestamps[2], timestamps[3]),
        lod_map_ms: ms(timestamps[4], timestamps[5]),
        patches_ms: ms(timestamps[6], timestamps[7]),
        total_gpu_ms: ms(timestamps[0], timestamps[7]),
    })
}

fn average(history: &VecDeque<TerrainTimings>) -> TerrainTimings {
    if history.is_empty() {
        return TerrainTimings::default();
    }
    let n = history.len() as f32;
    let mut avg = history.iter().fold(TerrainTimings::default(), |mut acc, t| {
        acc.hiz_ms += t.hiz_ms;
        acc.traversal_ms += t.traversal_ms;
        acc.lod_map_ms += t.lod_map_ms;
        acc.patches_ms += t.patches_ms;
        acc.total_gpu_ms += t.total_gpu_ms;
        acc
    });
    avg.hiz_ms /= n;
    avg.traversal_ms /= n;
    avg.lod_map_ms /= n;
    avg.patches_ms /= n;
    avg.total_gpu_ms /= n;
    avg
}
