//! GPU context management using wgpu

use crate::core::error::Error;

/// Optional device features the terrain pipeline adapts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Compute dispatches can read their group counts from a buffer
    pub indirect_execution: bool,
    /// Timestamp queries are available for pass profiling
    pub timestamp_query: bool,
    pub max_texture_dimension_2d: u32,
}

impl GpuCapabilities {
    pub fn detect(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        Self {
            indirect_execution: downlevel.flags.contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION),
            timestamp_query: device.features().contains(wgpu::Features::TIMESTAMP_QUERY),
            max_texture_dimension_2d: device.limits().max_texture_dimension_2d,
        }
    }
}

/// Headless GPU context (no surface; the host renderer owns presentation)
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub capabilities: GpuCapabilities,
}

impl GpuContext {
    /// Pick a high-performance adapter and create a device with the limits
    /// the terrain kernels need. Timestamp queries are enabled when offered.
    pub async fn new() -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let adapter_limits = adapter.limits();
        let optional_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("quadterrain_device"),
            required_features: optional_features,
            required_limits: wgpu::Limits {
                max_storage_textures_per_shader_stage: adapter_limits.max_storage_textures_per_shader_stage.min(8),
                max_storage_buffers_per_shader_stage: 8,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                max_texture_dimension_2d: adapter_limits.max_texture_dimension_2d,
                ..Default::default()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);
        log::info!("GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB",
            adapter_limits.max_buffer_size / 1024 / 1024,
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024);

        let capabilities = GpuCapabilities::detect(&adapter, &device);
        if !capabilities.indirect_execution {
            log::warn!("Indirect execution unsupported, Hi-Z passes fall back to direct dispatch");
        }

        Ok(Self { instance, adapter, device, queue, capabilities })
    }

    /// Blocking wrapper for tools and tests
    pub fn new_blocking() -> Result<Self, Error> {
        pollster::block_on(Self::new())
    }
}
