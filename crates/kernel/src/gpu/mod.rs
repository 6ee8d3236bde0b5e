//! GPU (Metal/Vulkan via wgpu) implementation of the local counting engine.
//!
//! `GpuEngine` implements `BalancingEngine` with a single compute pass: one
//! invocation per particle locates its slab along each axis and atomically
//! increments the counter of the owning rank. Counts are read back and
//! widened to `u64` before they enter the collective reduction, so the
//! balancing arithmetic is identical to the CPU path.
//!
//! Boundaries are compared in f32 on the device. A particle lying within one
//! f32 ulp of a boundary may be binned differently than by `CpuEngine`.

pub mod buffers;

use buffers::{CountBuffers, GpuCountParams};

use crate::binning::RankBounds;
use crate::particle::ParticleArrays;
use crate::{BalancingEngine, EngineError};

/// Threads per workgroup; must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: u32 = 256;

/// Maximum workgroups per dispatch dimension guaranteed by wgpu.
const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// GPU-accelerated rank counting using a wgpu compute shader.
pub struct GpuEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

/// Check whether a GPU (Metal on macOS) is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

impl GpuEngine {
    /// Create a new GPU counting engine.
    ///
    /// Returns `Err(EngineError::Unavailable)` if no suitable GPU adapter is
    /// found, allowing callers to fall back to `CpuEngine`.
    pub fn new() -> Result<Self, EngineError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| EngineError::Unavailable("No suitable GPU adapter found".into()))?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("balance_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| EngineError::Unavailable(format!("Failed to create device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("count_ranks"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/count_ranks.wgsl").into()),
        });

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("count_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1),
                bgl_storage_ro(2),
                bgl_storage_ro(3),
                bgl_storage_ro(4),
                bgl_storage_rw(5),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("count_pl"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("count_ranks"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("count_ranks"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bgl,
        })
    }
}

impl BalancingEngine for GpuEngine {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn count_by_rank(&mut self, particles: &ParticleArrays, bounds: &RankBounds<'_>) -> Vec<u64> {
        let n = particles.len() as u32;
        if n == 0 {
            return vec![0; bounds.num_ranks()];
        }

        let [nx, ny, nz] = bounds.shape();
        let total_groups = dispatch_size(n, WORKGROUP_SIZE);
        let groups_x = total_groups.min(MAX_WORKGROUPS_PER_DIM);
        let groups_y = dispatch_size(total_groups, groups_x);

        let params = GpuCountParams {
            n_particles: n,
            nx: nx as u32,
            ny: ny as u32,
            nz: nz as u32,
            row_stride: groups_x * WORKGROUP_SIZE,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        let bufs = CountBuffers::new(&self.device, particles, bounds, &params);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("count_bg"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: bufs.params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: bufs.pos_x.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: bufs.pos_y.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: bufs.pos_z.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: bufs.bounds.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: bufs.counts.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("count_ranks"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("count_ranks"), timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        bufs.readback_counts(&self.device, &self.queue)
    }
}

fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
