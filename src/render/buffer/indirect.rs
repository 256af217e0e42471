//! Indirect argument records and the kernel that fills them from counters

use bytemuck::{Pod, Zeroable};

use super::append_buffer::{AppendBuffer, AppendHeader};

/// `draw_indexed_indirect` record (must match wgpu's layout)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Mesh with `index_count` indices, instance count filled on the GPU
    pub fn for_mesh(index_count: u32) -> Self {
        Self { index_count, ..Default::default() }
    }
}

/// `dispatch_workgroups_indirect` record
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectArgs {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Largest group count per dimension
pub const MAX_DISPATCH_GROUPS: u32 = 65535;

/// Dynamic-offset stride for per-call uniform slots
pub const UNIFORM_SLOT_STRIDE: u64 = 256;

/// What the args kernel writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgsMode {
    /// `(ceil(n * multiplier / group_size), 1, 1)` at `dst_word`
    Dispatch { group_size: u32, multiplier: u32 },
    /// `n * multiplier` into the instance count of the draw record starting at `dst_word`
    DrawInstances { multiplier: u32 },
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ArgsUniform {
    mode: u32,
    dst_word: u32,
    divisor: u32,
    multiplier: u32,
    _pad: [u32; 60],
}

impl ArgsUniform {
    fn new(mode: ArgsMode, dst_word: u32) -> Self {
        let (mode, divisor, multiplier) = match mode {
            ArgsMode::Dispatch { group_size, multiplier } => (0, group_size.max(1), multiplier),
            ArgsMode::DrawInstances { multiplier } => (1, 1, multiplier),
        };
        Self { mode, dst_word, divisor, multiplier, _pad: [0; 60] }
    }
}

/// One configured args write: source list, target words and mode
pub struct ArgsJob {
    bind_group: wgpu::BindGroup,
    uniform_offset: u32,
}

/// Single-thread kernel that converts a list counter into indirect args
pub struct IndirectArgsPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    slots: u32,
    used: u32,
}

impl IndirectArgsPipeline {
    /// `slots` is the number of distinct jobs that will be created
    pub fn new(device: &wgpu::Device, slots: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("indirect_args_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/indirect_args.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("indirect_args_params"),
            size: UNIFORM_SLOT_STRIDE * slots.max(1) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("indirect_args_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(AppendHeader::SIZE),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(16),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("indirect_args_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("indirect_args_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("write_args"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self { pipeline, bind_group_layout, uniform_buffer, slots: slots.max(1), used: 0 }
    }

    /// Register a job writing into `args`. `dst_word` is the first word of
    /// the target record in both modes.
    pub fn create_job(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &AppendBuffer,
        args: &wgpu::Buffer,
        dst_word: u32,
        mode: ArgsMode,
    ) -> ArgsJob {
        let slot = self.used % self.slots;
        self.used += 1;
        let uniform_offset = slot as u64 * UNIFORM_SLOT_STRIDE;
        queue.write_buffer(&self.uniform_buffer, uniform_offset, bytemuck::bytes_of(&ArgsUniform::new(mode, dst_word)));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("indirect_args_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: source.header_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: args.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(16),
                    }),
                },
            ],
        });
        ArgsJob { bind_group, uniform_offset: uniform_offset as u32 }
    }

    /// Forget all jobs (after reallocating the buffers they point at)
    pub fn reset_jobs(&mut self) {
        self.used = 0;
    }

    /// Record the job inside an open compute pass
    pub fn record(&self, pass: &mut wgpu::ComputePass<'_>, job: &ArgsJob) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &job.bind_group, &[job.uniform_offset]);
        pass.dispatch_workgroups(1, 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(DispatchIndirectArgs::SIZE, 12);
        assert_eq!(std::mem::size_of::<ArgsUniform>() as u64, UNIFORM_SLOT_STRIDE);
    }

    #[test]
    fn test_draw_job_targets_record_start() {
        // The kernel adds one word to reach the instance count
        assert_eq!(std::mem::offset_of!(DrawIndexedIndirectArgs, instance_count), 4);
        let uniform = ArgsUniform::new(ArgsMode::DrawInstances { multiplier: 1 }, 0);
        assert_eq!((uniform.mode, uniform.dst_word, uniform.multiplier), (1, 0, 1));
        let uniform = ArgsUniform::new(ArgsMode::Dispatch { group_size: 0, multiplier: 16 }, 6);
        assert_eq!((uniform.mode, uniform.dst_word, uniform.divisor), (0, 6, 1));
    }
}
