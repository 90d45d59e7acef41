/// Histogram of rendered frames
///
/// `make_plan` decides between two kernels: per-workgroup counters in
/// shared memory when the whole histogram fits there, global atomics
/// otherwise. `FrameHistogram` runs the planned kernel over an output image;
/// `calculate_histogram` is the CPU version over a BGRA readback.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::pipeline::RenderedFrame;
use super::shaders;
use super::GpuContext;
use crate::error::RenderError;

const COUNTER_BYTES: usize = std::mem::size_of::<u32>();

/// Histogram accumulation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramStrategy {
    /// Workgroup-local counters, one global atomic per bin per workgroup
    Threadgroup,
    /// Global atomics for every sample
    Legacy,
}

impl HistogramStrategy {
    /// Kernel entry point implementing this strategy
    pub fn kernel_name(&self) -> &'static str {
        match self {
            Self::Threadgroup => "computeHistogramThreadgroup",
            Self::Legacy => "computeHistogramLegacy",
        }
    }
}

/// Resolved histogram request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramKernelPlan {
    pub bins: u32,
    pub channel_count: u32,
    /// Bytes of counters: one `u32` per bin per channel
    pub buffer_length: usize,
    pub strategy: HistogramStrategy,
}

impl HistogramKernelPlan {
    pub fn uses_threadgroup_memory(&self) -> bool {
        self.strategy == HistogramStrategy::Threadgroup
    }

    pub fn kernel_name(&self) -> &'static str {
        self.strategy.kernel_name()
    }

    pub fn counter_count(&self) -> u32 {
        self.channel_count * self.bins
    }
}

/// Plan a histogram: resolve the bin count and pick the kernel.
///
/// A non-positive `requested_bins` selects `default_bin_count`.
pub fn make_plan(
    channel_count: u32,
    requested_bins: i32,
    default_bin_count: u32,
    max_threadgroup_memory_length: usize,
) -> HistogramKernelPlan {
    let bins = if requested_bins > 0 {
        requested_bins as u32
    } else {
        default_bin_count.max(1)
    };
    let buffer_length = channel_count as usize * bins as usize * COUNTER_BYTES;
    let strategy = if buffer_length <= max_threadgroup_memory_length {
        HistogramStrategy::Threadgroup
    } else {
        HistogramStrategy::Legacy
    };

    HistogramKernelPlan {
        bins,
        channel_count,
        buffer_length,
        strategy,
    }
}

/// CPU histogram of a BGRA8 image, channels in R, G, B, A order.
/// Values map to bins exactly like the GPU kernels.
pub fn calculate_histogram(bgra_bytes: &[u8], channel_count: u32, bins: u32) -> Vec<Vec<u32>> {
    const BGRA_OFFSETS: [usize; 4] = [2, 1, 0, 3];
    let channel_count = channel_count.min(4) as usize;
    let bins = bins.max(1);
    let mut histograms = vec![vec![0u32; bins as usize]; channel_count];

    for pixel in bgra_bytes.chunks_exact(4) {
        for (channel, histogram) in histograms.iter_mut().enumerate() {
            let value = pixel[BGRA_OFFSETS[channel]] as f32 / 255.0;
            histogram[bin_of(value, bins)] += 1;
        }
    }
    histograms
}

fn bin_of(value: f32, bins: u32) -> usize {
    ((value.clamp(0.0, 1.0) * bins as f32) as u32).min(bins - 1) as usize
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuHistogramParams {
    size: [u32; 2],
    bins: u32,
    channel_count: u32,
}

/// GPU histogram over rendered frames; pipelines cached per plan shape
pub struct FrameHistogram {
    ctx: Arc<GpuContext>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(HistogramStrategy, u32), wgpu::ComputePipeline>,
}

impl FrameHistogram {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        let device = ctx.device();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Histogram Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Histogram Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            ctx,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    /// Plan for this device's shared-memory limit
    pub fn plan(&self, channel_count: u32, requested_bins: i32) -> HistogramKernelPlan {
        let plan = make_plan(
            channel_count,
            requested_bins,
            self.ctx.config().default_histogram_bins,
            self.ctx.max_threadgroup_memory_length(),
        );
        log::debug!(
            "📊 Histogram plan: {} channels x {} bins ({} bytes) via {}",
            plan.channel_count,
            plan.bins,
            plan.buffer_length,
            plan.kernel_name()
        );
        plan
    }

    /// Histogram of `frame`, one `Vec` of `plan.bins` counters per channel (blocks)
    pub fn compute(&mut self, frame: &RenderedFrame, plan: &HistogramKernelPlan) -> Result<Vec<Vec<u32>>, RenderError> {
        if !(1..=4).contains(&plan.channel_count) {
            return Err(RenderError::InvalidHistogramChannels {
                channel_count: plan.channel_count,
            });
        }

        let (width, height) = frame.size();
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();

        let params = GpuHistogramParams {
            size: [width, height],
            bins: plan.bins,
            channel_count: plan.channel_count,
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Histogram Uniform Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let counter_bytes = plan.buffer_length as u64;
        let counters = ctx
            .scoped(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Histogram Counters"),
                    size: counter_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: "histogram counters".to_string(),
                reason,
            })?;
        let readback = ctx
            .scoped(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Histogram Readback"),
                    size: counter_bytes,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: "histogram readback".to_string(),
                reason,
            })?;

        let frame_view = frame.texture().create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Histogram Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: counters.as_entire_binding(),
                },
            ],
        });

        let pipeline = self.pipeline(&ctx, plan)?;
        let side = shaders::HISTOGRAM_WORKGROUP_SIDE;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Histogram Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Histogram Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(side), height.div_ceil(side), 1);
        }
        encoder.copy_buffer_to_buffer(&counters, 0, &readback, 0, counter_bytes);
        ctx.queue().submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| RenderError::ReadbackInterrupted)??;

        let flat: Vec<u32> = {
            let data = slice.get_mapped_range();
            data.chunks_exact(COUNTER_BYTES)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()
        };
        readback.unmap();

        Ok(flat.chunks(plan.bins as usize).map(|channel| channel.to_vec()).collect())
    }

    fn pipeline(&mut self, ctx: &GpuContext, plan: &HistogramKernelPlan) -> Result<&wgpu::ComputePipeline, RenderError> {
        // The threadgroup kernel sizes its shared array from the plan
        let key = match plan.strategy {
            HistogramStrategy::Threadgroup => (plan.strategy, plan.counter_count()),
            HistogramStrategy::Legacy => (plan.strategy, 0),
        };

        if !self.pipelines.contains_key(&key) {
            let source = match plan.strategy {
                HistogramStrategy::Threadgroup => shaders::histogram_threadgroup_source(plan.counter_count()),
                HistogramStrategy::Legacy => shaders::histogram_legacy_source(),
            };
            let layout = &self.pipeline_layout;
            let pipeline = ctx
                .scoped(|device| {
                    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(plan.kernel_name()),
                        source: wgpu::ShaderSource::Wgsl(source.into()),
                    });
                    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(plan.kernel_name()),
                        layout: Some(layout),
                        module: &module,
                        entry_point: plan.kernel_name(),
                    })
                })
                .map_err(|reason| RenderError::PipelineCompilation {
                    label: plan.kernel_name().to_string(),
                    reason,
                })?;
            log::debug!("🔧 Compiled {}", plan.kernel_name());
            self.pipelines.insert(key, pipeline);
        }

        self.pipelines.get(&key).ok_or_else(|| RenderError::PipelineCompilation {
            label: plan.kernel_name().to_string(),
            reason: "pipeline missing from cache".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bins_and_buffer_length() {
        let plan = make_plan(3, 0, 512, usize::MAX);
        assert_eq!(plan.bins, 512);
        assert_eq!(plan.buffer_length, 6144);
        assert!(plan.uses_threadgroup_memory());
        assert_eq!(plan.kernel_name(), "computeHistogramThreadgroup");

        let negative = make_plan(1, -8, 256, usize::MAX);
        assert_eq!(negative.bins, 256);
    }

    #[test]
    fn test_requested_bins_win_over_default() {
        let plan = make_plan(4, 64, 512, usize::MAX);
        assert_eq!(plan.bins, 64);
        assert_eq!(plan.buffer_length, 4 * 64 * 4);
    }

    #[test]
    fn test_strategy_boundary() {
        // 3 * 512 * 4 = 6144 bytes
        assert_eq!(make_plan(3, 512, 512, 6144).strategy, HistogramStrategy::Threadgroup);
        let legacy = make_plan(3, 512, 512, 6143);
        assert_eq!(legacy.strategy, HistogramStrategy::Legacy);
        assert!(!legacy.uses_threadgroup_memory());
        assert_eq!(legacy.kernel_name(), "computeHistogramLegacy");
    }

    #[test]
    fn test_cpu_histogram_bins_like_gpu() {
        // Two BGRA pixels: pure red opaque, transparent black
        let bgra = [0, 0, 255, 255, 0, 0, 0, 0];
        let histogram = calculate_histogram(&bgra, 4, 256);
        assert_eq!(histogram.len(), 4);
        assert_eq!(histogram[0][255], 1); // red
        assert_eq!(histogram[0][0], 1);
        assert_eq!(histogram[2][0], 2); // blue
        assert_eq!(histogram[3][255], 1); // alpha

        let coarse = calculate_histogram(&bgra, 1, 4);
        assert_eq!(coarse, vec![vec![1, 0, 0, 1]]);
    }
}
