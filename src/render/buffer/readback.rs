//! Non-blocking GPU to CPU buffer readback
//!
//! One staging buffer cycles through three states: free to receive a copy,
//! copied and waiting for `request_map`, and mapping in flight. Results are
//! picked up by polling on a later frame, so the frame never waits.

use std::sync::mpsc::{channel, Receiver, TryRecvError};

enum State {
    Free,
    Copied,
    Mapping(Receiver<Result<(), wgpu::BufferAsyncError>>),
}

/// Staging buffer with a poll-based map cycle
pub struct AsyncReadback {
    buffer: wgpu::Buffer,
    size: u64,
    state: State,
}

impl AsyncReadback {
    pub fn new(device: &wgpu::Device, label: &str, size: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, size, state: State::Free }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether a copy may be recorded into the staging buffer this frame
    pub fn is_free(&self) -> bool {
        matches!(self.state, State::Free)
    }

    /// Staging buffer for `copy_buffer_to_buffer`. Returns `None` while a
    /// previous readback is still in flight.
    pub fn copy_target(&mut self) -> Option<&wgpu::Buffer> {
        if !self.is_free() {
            return None;
        }
        self.state = State::Copied;
        Some(&self.buffer)
    }

    /// Start mapping after the copy was submitted
    pub fn request_map(&mut self) {
        if !matches!(self.state, State::Copied) {
            return;
        }
        let (tx, rx) = channel();
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.state = State::Mapping(rx);
    }

    /// Collect the mapped bytes if ready, without waiting
    pub fn try_read(&mut self, device: &wgpu::Device) -> Option<Vec<u8>> {
        let State::Mapping(rx) = &self.state else {
            return None;
        };
        device.poll(wgpu::PollType::Poll).ok();
        match rx.try_recv() {
            Ok(Ok(())) => {
                let bytes = self.buffer.slice(..).get_mapped_range().to_vec();
                self.buffer.unmap();
                self.state = State::Free;
                Some(bytes)
            }
            Ok(Err(e)) => {
                log::warn!("Readback map failed: {}", e);
                self.state = State::Free;
                None
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.state = State::Free;
                None
            }
        }
    }

    /// Block until the in-flight map finishes (debug paths only)
    pub fn read_blocking(&mut self, device: &wgpu::Device) -> Option<Vec<u8>> {
        self.request_map();
        if !matches!(self.state, State::Mapping(_)) {
            return None;
        }
        device.poll(wgpu::PollType::Wait { submission_index: None, timeout: None }).ok();
        self.try_read(device)
    }
}

/// Copy `size` bytes of `source` to a fresh staging buffer and wait for them.
/// Stalls the device; tests and debug tools only.
pub fn read_buffer_blocking(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, crate::core::Error> {
    use crate::core::Error;

    let mut readback = AsyncReadback::new(device, "blocking_readback", size);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("blocking_readback") });
    let target = readback
        .copy_target()
        .ok_or_else(|| Error::Gpu("readback staging buffer busy".into()))?;
    encoder.copy_buffer_to_buffer(source, 0, target, 0, size);
    queue.submit(Some(encoder.finish()));
    readback
        .read_blocking(device)
        .ok_or_else(|| Error::Gpu("readback did not complete".into()))
}
