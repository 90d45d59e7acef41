/// GPU ray casting with wgpu compute shaders
///
/// Architecture:
/// - `shaders.rs` - WGSL sources (ray-march library, kernels, histogram)
/// - `dispatch.rs` - workgroup geometry candidates and the benchmark cache
/// - `timing.rs` - per-dispatch timings from timestamps and queue callbacks
/// - `texture.rs` - volume and transfer-function textures, BGRA readback
/// - `pipeline.rs` - the compute renderer
/// - `reference.rs` - fragment-shader renderer used as a parity oracle
/// - `histogram.rs` - histogram kernel planning and execution
///
/// Everything hangs off one `GpuContext` (device + queue), shared via `Arc`.

pub mod dispatch;
pub mod histogram;
pub mod pipeline;
pub mod reference;
pub mod shaders;
pub mod texture;
pub mod timing;

pub use dispatch::{ThreadgroupDispatchConfiguration, ThreadgroupDispatchOptimizer, ThreadgroupPipelineLimits};
pub use histogram::{FrameHistogram, HistogramKernelPlan, HistogramStrategy};
pub use pipeline::{RenderedFrame, VolumeComputeRenderer};
pub use reference::FragmentReferenceRenderer;
pub use texture::{TransferChannels, TransferTexture, VolumeTexture};
pub use timing::CommandBufferTimings;

use crate::error::RenderError;
use crate::state::settings::RendererConfig;

/// Headless wgpu device and queue plus what was negotiated for them
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    config: RendererConfig,
}

// wgpu types don't implement Debug consistently
impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Pick an adapter and open a device with its full limits
    pub async fn new(config: RendererConfig) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power_preference = if config.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::AdapterUnavailable)?;

        let adapter_info = adapter.get_info();
        log::info!("🖥️  Adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        let mut required_features = wgpu::Features::empty();
        if config.enable_timestamps && adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        } else {
            log::info!("⏱️  Timestamp queries unavailable, kernel time falls back to queue time");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Volume Raycaster Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            config,
        })
    }

    /// `new` for synchronous callers
    pub fn new_blocking(config: RendererConfig) -> Result<Self, RenderError> {
        pollster::block_on(Self::new(config))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn supports_timestamps(&self) -> bool {
        self.device.features().contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    /// Workgroup limits for tuning compute dispatch geometry
    pub fn pipeline_limits(&self) -> ThreadgroupPipelineLimits {
        let limits = self.limits();
        ThreadgroupPipelineLimits::new(
            self.config.thread_execution_width,
            limits.max_compute_invocations_per_workgroup,
        )
        .with_axis_limits(limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y)
    }

    /// Bytes of workgroup (threadgroup) memory a kernel may declare
    pub fn max_threadgroup_memory_length(&self) -> usize {
        self.limits().max_compute_workgroup_storage_size as usize
    }

    /// Run `create` inside validation and out-of-memory error scopes.
    ///
    /// wgpu reports creation failures asynchronously through error scopes;
    /// popping them here turns those into a per-call `Err(reason)`.
    pub(crate) fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match validation.or(out_of_memory) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }
}
