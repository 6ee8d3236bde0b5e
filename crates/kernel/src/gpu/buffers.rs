//! GPU buffer management for rank counting.
//!
//! Creates the storage buffers for one counting pass (positions, packed
//! boundaries, zeroed counters) and handles GPU->CPU readback of the counts.

use wgpu::util::DeviceExt;

use crate::binning::RankBounds;
use crate::particle::ParticleArrays;

/// Counting parameters uniform buffer layout.
/// Must match the CountParams struct in `count_ranks.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuCountParams {
    pub n_particles: u32,
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    /// Invocations per dispatch row, for 2D dispatch of large particle counts.
    pub row_stride: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub _pad2: u32,
}

/// All GPU buffers needed for a single counting pass.
pub struct CountBuffers {
    pub params_buffer: wgpu::Buffer,
    pub pos_x: wgpu::Buffer,
    pub pos_y: wgpu::Buffer,
    pub pos_z: wgpu::Buffer,
    pub bounds: wgpu::Buffer,
    pub counts: wgpu::Buffer,
    pub staging_counts: wgpu::Buffer,
    /// Number of ranks (length of the counts buffer)
    pub n_ranks: u32,
}

/// Minimum buffer size (wgpu requires non-zero buffers).
const MIN_BUF_SIZE: u64 = 4;

/// Create a read-only storage buffer from f32 slice data.
fn create_storage_buf(device: &wgpu::Device, label: &str, data: &[f32]) -> wgpu::Buffer {
    if data.is_empty() {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: MIN_BUF_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    } else {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        })
    }
}

impl CountBuffers {
    /// Upload positions and boundaries and allocate zeroed counters.
    pub fn new(
        device: &wgpu::Device,
        particles: &ParticleArrays,
        bounds: &RankBounds<'_>,
        params: &GpuCountParams,
    ) -> Self {
        let n_ranks = bounds.num_ranks() as u32;

        // Boundaries are compared in f32 on the device.
        let packed: Vec<f32> = (0..3)
            .flat_map(|axis| bounds.axis(axis).iter().map(|&b| b as f32))
            .collect();

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("count_params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let zeros = vec![0u32; n_ranks as usize];
        let counts = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rank_counts"),
            contents: bytemuck::cast_slice(&zeros),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let staging_counts = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_rank_counts"),
            size: (n_ranks as u64 * std::mem::size_of::<u32>() as u64).max(MIN_BUF_SIZE),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            params_buffer,
            pos_x: create_storage_buf(device, "pos_x", &particles.x),
            pos_y: create_storage_buf(device, "pos_y", &particles.y),
            pos_z: create_storage_buf(device, "pos_z", &particles.z),
            bounds: create_storage_buf(device, "bounds", &packed),
            counts,
            staging_counts,
            n_ranks,
        }
    }

    /// Copy the counters to the staging buffer and read them back.
    pub fn readback_counts(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<u64> {
        let byte_len = self.n_ranks as u64 * std::mem::size_of::<u32>() as u64;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_counts"),
        });
        encoder.copy_buffer_to_buffer(&self.counts, 0, &self.staging_counts, 0, byte_len);
        queue.submit(std::iter::once(encoder.finish()));

        read_u32_buffer(device, &self.staging_counts, self.n_ranks as usize)
            .into_iter()
            .map(u64::from)
            .collect()
    }
}

/// Block on mapping a staging buffer and read u32 data.
fn read_u32_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, count: usize) -> Vec<u32> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).unwrap();
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv().unwrap().unwrap();

    let data = slice.get_mapped_range();
    let result: Vec<u32> = bytemuck::cast_slice(&data)[..count].to_vec();
    drop(data);
    buffer.unmap();
    result
}
