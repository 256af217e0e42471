//! Bounded GPU append buffers
//!
//! Layout: a 16-byte [`AppendHeader`] followed by `capacity` items. Kernels
//! bump `count` with `atomicAdd`, raise `peak` with `atomicMax`, and store
//! only when the returned index is below `capacity`.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};

use crate::terrain::ListKind;

/// Header at offset 0 of every append buffer (must match WGSL)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AppendHeader {
    pub count: u32,
    pub peak: u32,
    pub capacity: u32,
    pub _pad: u32,
}

impl AppendHeader {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Items a consumer may read
    pub fn readable(&self) -> u32 {
        self.count.min(self.capacity)
    }

    pub fn overflowed(&self) -> bool {
        self.peak > self.capacity
    }
}

/// One bounded list living in a storage buffer
pub struct AppendBuffer {
    buffer: wgpu::Buffer,
    kind: ListKind,
    capacity: u32,
    item_size: u64,
}

impl AppendBuffer {
    /// Empty list with room for `capacity` items of `item_size` bytes
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        kind: ListKind,
        item_size: u64,
        capacity: u32,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: AppendHeader::SIZE + item_size * capacity as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let header = AppendHeader { capacity, ..Default::default() };
        queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&header));
        Self { buffer, kind, capacity, item_size }
    }

    /// Full list holding `items`; never cleared
    pub fn seeded<T: Pod>(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, kind: ListKind, items: &[T]) -> Self {
        let count = items.len() as u32;
        let item_size = std::mem::size_of::<T>() as u64;
        let this = Self::new(device, queue, label, kind, item_size, count);
        let header = AppendHeader { count, peak: count, capacity: count, _pad: 0 };
        queue.write_buffer(&this.buffer, 0, bytemuck::bytes_of(&header));
        if !items.is_empty() {
            queue.write_buffer(&this.buffer, AppendHeader::SIZE, bytemuck::cast_slice(items));
        }
        this
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn item_size(&self) -> u64 {
        self.item_size
    }

    /// Zero `count` and `peak` (start of frame)
    pub fn clear_counters(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.buffer, 0, Some(8));
    }

    /// Zero `count` only, keeping the frame's peak
    pub fn reset_count(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.buffer, 0, Some(4));
    }

    /// Binding of just the header, for kernels that only read the counter
    pub fn header_binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(AppendHeader::SIZE),
        })
    }

    pub fn copy_header(&self, encoder: &mut wgpu::CommandEncoder, dst: &wgpu::Buffer, dst_offset: u64) {
        encoder.copy_buffer_to_buffer(&self.buffer, 0, dst, dst_offset, AppendHeader::SIZE);
    }
}
