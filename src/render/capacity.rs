//! Capacity overrun detection for the GPU append buffers
//!
//! After each frame the list headers are copied into a staging buffer and
//! mapped asynchronously. A later frame polls the mapping; any header whose
//! peak exceeded its capacity turns into a [`CapacityReport`].

use super::buffer::{AppendBuffer, AppendHeader, AsyncReadback};
use crate::terrain::{CapacityConfig, CapacityReport, ListKind};

/// Header snapshot of one list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListSnapshot {
    pub list: ListKind,
    pub header: AppendHeader,
}

impl ListSnapshot {
    pub fn report(&self) -> Option<CapacityReport> {
        self.header.overflowed().then(|| CapacityReport {
            list: self.list,
            peak: self.header.peak,
            capacity: self.header.capacity,
        })
    }
}

/// Watches a fixed set of append buffers without stalling the frame
pub struct CapacityMonitor {
    readback: AsyncReadback,
    lists: Vec<ListKind>,
    pending_lists: Vec<ListKind>,
    latest: Vec<ListSnapshot>,
}

impl CapacityMonitor {
    pub fn new(device: &wgpu::Device, max_lists: usize) -> Self {
        Self {
            readback: AsyncReadback::new(device, "capacity_monitor_read", AppendHeader::SIZE * max_lists.max(1) as u64),
            lists: Vec::new(),
            pending_lists: Vec::new(),
            latest: Vec::new(),
        }
    }

    /// Record header copies for `buffers`. Skipped while the previous copy is still mapping.
    pub fn record(&mut self, encoder: &mut wgpu::CommandEncoder, buffers: &[&AppendBuffer]) {
        let max_lists = (self.readback.size() / AppendHeader::SIZE) as usize;
        let Some(target) = self.readback.copy_target() else {
            return;
        };
        self.lists.clear();
        for (slot, buffer) in buffers.iter().take(max_lists).enumerate() {
            buffer.copy_header(encoder, target, slot as u64 * AppendHeader::SIZE);
            self.lists.push(buffer.kind());
        }
    }

    /// Start mapping the copied headers. Call after submit.
    pub fn after_submit(&mut self) {
        if !self.lists.is_empty() {
            self.pending_lists = std::mem::take(&mut self.lists);
            self.readback.request_map();
        }
    }

    /// Non-blocking check; returns overruns seen in the newest completed readback
    pub fn poll(&mut self, device: &wgpu::Device) -> Vec<CapacityReport> {
        match self.readback.try_read(device) {
            Some(bytes) => self.absorb(&bytes),
            None => Vec::new(),
        }
    }

    /// Blocking readback for debugging
    pub fn poll_blocking(&mut self, device: &wgpu::Device) -> Vec<CapacityReport> {
        self.after_submit();
        match self.readback.read_blocking(device) {
            Some(bytes) => self.absorb(&bytes),
            None => Vec::new(),
        }
    }

    /// Headers from the newest completed readback
    pub fn latest(&self) -> &[ListSnapshot] {
        &self.latest
    }

    fn absorb(&mut self, bytes: &[u8]) -> Vec<CapacityReport> {
        // Staging bytes carry no alignment guarantee
        let headers = bytes
            .chunks_exact(AppendHeader::SIZE as usize)
            .map(bytemuck::pod_read_unaligned::<AppendHeader>);
        self.latest = self
            .pending_lists
            .iter()
            .zip(headers)
            .map(|(list, header)| ListSnapshot { list: *list, header })
            .collect();
        let reports: Vec<CapacityReport> = self.latest.iter().filter_map(ListSnapshot::report).collect();
        for report in &reports {
            log::warn!("{}", report);
        }
        reports
    }
}

/// Capacities grown to cover every report (never shrunk)
pub fn grown_capacities(current: &CapacityConfig, reports: &[CapacityReport]) -> CapacityConfig {
    let mut grown = *current;
    for report in reports {
        let slot = match report.list {
            ListKind::WorkQueue => &mut grown.work_queue,
            ListKind::FinalNodes => &mut grown.final_nodes,
            ListKind::Patches => &mut grown.patches,
            ListKind::Bounds => &mut grown.bounds,
        };
        *slot = (*slot).max(report.suggested_capacity());
    }
    grown
}
