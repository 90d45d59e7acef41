/// Compute-shader volume renderer
///
/// This module manages:
/// - The uniform block shared with the fragment reference path
/// - One compute pipeline per workgroup geometry (sizes are compiled in)
/// - Dispatch geometry selection through `ThreadgroupDispatchOptimizer`
/// - Output image allocation, dispatch, timings and readback
///
/// `render` does not wait for the GPU. Timings become available through
/// `latest_timings` once the queue reports completion, or through
/// `wait_for_timings` when the caller is happy to block.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use wgpu::util::DeviceExt;

use super::dispatch::{ThreadgroupDispatchConfiguration, ThreadgroupDispatchOptimizer};
use super::shaders;
use super::texture::{read_bgra, TransferChannels, VolumeTexture};
use super::timing::{CommandBufferTimings, PendingTimings, TimestampQueries};
use super::GpuContext;
use crate::error::RenderError;
use crate::state::camera::CameraParameters;
use crate::state::settings::RenderSettings;
use crate::transfer::TransferLookup;

/// Optimizer cache key of the ray-march kernel
pub const RAY_MARCH_PIPELINE_KEY: &str = "ray_march_kernel";

/// Ray-march uniforms in the layout of `RayMarchUniforms` in WGSL.
/// Matrices are column-major, as WGSL expects.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct GpuRayMarchParams {
    inverse_model: [[f32; 4]; 4],
    inverse_view_projection: [[f32; 4]; 4],
    camera_local: [f32; 4],
    channel_weights: [f32; 4],
    window: [f32; 4],  // min HU, max HU, rescale slope, rescale intercept
    output: [u32; 4],  // width, height, steps, method
    options: [f32; 4], // early termination alpha, unused x3
}

impl GpuRayMarchParams {
    pub(crate) fn new(
        volume: &VolumeTexture,
        settings: &RenderSettings,
        camera: &CameraParameters,
        output_size: (u32, u32),
        channel_weights: [f32; 4],
        early_termination_alpha: f32,
    ) -> Self {
        let rescale = volume.rescale();
        let local = camera.camera_local;
        Self {
            inverse_model: camera.inverse_model_columns(),
            inverse_view_projection: camera.inverse_view_projection_columns(),
            camera_local: [local.x, local.y, local.z, 1.0],
            channel_weights,
            window: [settings.window.min_hu, settings.window.max_hu, rescale.slope, rescale.intercept],
            output: [
                output_size.0,
                output_size.1,
                settings.resolved_steps(output_size.0),
                settings.method.shader_id(),
            ],
            options: [early_termination_alpha, 0.0, 0.0, 0.0],
        }
    }
}

/// Layout entries for bindings 0-5, plus the storage output at 6 for compute
pub(crate) fn ray_march_layout_entries(visibility: wgpu::ShaderStages, with_output: bool) -> Vec<wgpu::BindGroupLayoutEntry> {
    let texture = |binding: u32, sample_type: wgpu::TextureSampleType, view_dimension: wgpu::TextureViewDimension| {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        }
    };

    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        // Volume (R16Sint = signed integer texture)
        texture(1, wgpu::TextureSampleType::Sint, wgpu::TextureViewDimension::D3),
    ];
    for binding in 2..6 {
        entries.push(texture(
            binding,
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D2,
        ));
    }

    if with_output {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 6,
            visibility,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });
    }
    entries
}

/// Bind group for bindings 0-5, plus `output` at binding 6 when given
pub(crate) fn ray_march_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniforms: &wgpu::Buffer,
    volume: &VolumeTexture,
    channels: &TransferChannels,
    output: Option<&wgpu::TextureView>,
) -> wgpu::BindGroup {
    let [t0, t1, t2, t3] = channels.views();
    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        },
        wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::TextureView(volume.view()),
        },
    ];
    for (binding, view) in (2..).zip([t0, t1, t2, t3]) {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }
    if let Some(view) = output {
        entries.push(wgpu::BindGroupEntry {
            binding: 6,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Ray March Bind Group"),
        layout,
        entries: &entries,
    })
}

/// Reject sizes the device cannot hold in a 2D texture
pub(crate) fn validate_output_size(ctx: &GpuContext, width: u32, height: u32) -> Result<(), RenderError> {
    let max = ctx.limits().max_texture_dimension_2d;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(RenderError::InvalidOutputSize { width, height, max });
    }
    Ok(())
}

/// The ray-march kernel, compiled once per workgroup geometry
struct RayMarchKernel {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<ThreadgroupDispatchConfiguration, wgpu::ComputePipeline>,
}

impl RayMarchKernel {
    fn new(device: &wgpu::Device) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ray March Compute Layout"),
            entries: &ray_march_layout_entries(wgpu::ShaderStages::COMPUTE, true),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray March Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    fn pipeline(
        &mut self,
        ctx: &GpuContext,
        geometry: ThreadgroupDispatchConfiguration,
    ) -> Result<&wgpu::ComputePipeline, RenderError> {
        match self.pipelines.entry(geometry) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let label = format!("Ray March Kernel {}", geometry);
                let source = shaders::ray_march_compute_source(geometry);
                let layout = &self.pipeline_layout;
                let pipeline = ctx
                    .scoped(|device| {
                        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                            label: Some(&label),
                            source: wgpu::ShaderSource::Wgsl(source.into()),
                        });
                        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(&label),
                            layout: Some(layout),
                            module: &module,
                            entry_point: shaders::RAY_MARCH_ENTRY,
                        })
                    })
                    .map_err(|reason| RenderError::PipelineCompilation { label, reason })?;
                log::debug!("🔧 Compiled ray march kernel for {}", geometry);
                Ok(entry.insert(pipeline))
            }
        }
    }
}

/// Encode one ray-march dispatch covering `size`
fn encode_dispatch(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    geometry: ThreadgroupDispatchConfiguration,
    size: (u32, u32),
    timestamps: Option<&TimestampQueries>,
) {
    let (groups_x, groups_y) = geometry.workgroup_count(size.0, size.1);
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("Ray March Pass"),
        timestamp_writes: timestamps.map(|t| t.compute_pass_writes()),
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(groups_x, groups_y, 1);
}

/// Run one dispatch with `geometry` and wait for its timings.
/// `None` if the kernel fails to build or the dispatch errors.
fn benchmark_geometry(
    ctx: &GpuContext,
    kernel: &mut RayMarchKernel,
    bind_group: &wgpu::BindGroup,
    timestamps: Option<&TimestampQueries>,
    geometry: ThreadgroupDispatchConfiguration,
    size: (u32, u32),
) -> Option<CommandBufferTimings> {
    let pipeline = match kernel.pipeline(ctx, geometry) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::warn!("⚠️  {}", e);
            return None;
        }
    };

    let device = ctx.device();
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let started = Instant::now();
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Ray March Benchmark Encoder"),
    });
    encode_dispatch(&mut encoder, pipeline, bind_group, geometry, size, timestamps);
    let readback = timestamps.map(|t| t.resolve(device, &mut encoder));
    ctx.queue().submit(Some(encoder.finish()));
    let pending = PendingTimings::track(ctx.queue(), started, started.elapsed(), readback);
    let timings = pending.wait(device);

    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        log::warn!("⚠️  Dispatch with {} failed: {}", geometry, error);
        return None;
    }
    timings
}

/// Output of one render call; pixels are ready once the queue has run it
pub struct RenderedFrame {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
    geometry: ThreadgroupDispatchConfiguration,
}

impl RenderedFrame {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Workgroup geometry the frame was dispatched with
    pub fn geometry(&self) -> ThreadgroupDispatchConfiguration {
        self.geometry
    }
}

/// Ray-march renderer driving the compute kernel
pub struct VolumeComputeRenderer {
    ctx: Arc<GpuContext>,
    kernel: RayMarchKernel,
    optimizer: ThreadgroupDispatchOptimizer,
    uniform_buffer: wgpu::Buffer,
    channels: TransferChannels,
    timestamps: Option<TimestampQueries>,
    pending: Option<PendingTimings>,
    latest_timings: Option<CommandBufferTimings>,
}

// Manual Debug implementation (wgpu types don't implement Debug)
impl std::fmt::Debug for VolumeComputeRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeComputeRenderer")
            .field("compiled_geometries", &self.kernel.pipelines.len())
            .field("latest_timings", &self.latest_timings)
            .finish_non_exhaustive()
    }
}

impl VolumeComputeRenderer {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self, RenderError> {
        let kernel = RayMarchKernel::new(ctx.device());
        let uniform_buffer = ctx.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Ray March Uniform Buffer"),
            contents: bytemuck::bytes_of(&<GpuRayMarchParams as bytemuck::Zeroable>::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let channels = TransferChannels::new(&ctx)?;
        let timestamps = TimestampQueries::new(&ctx);

        Ok(Self {
            ctx,
            kernel,
            optimizer: ThreadgroupDispatchOptimizer::new(),
            uniform_buffer,
            channels,
            timestamps,
            pending: None,
            latest_timings: None,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Dispatch the ray-march kernel into a new output image.
    ///
    /// The first call tunes the dispatch geometry (blocking, see
    /// `ThreadgroupDispatchOptimizer`); later calls only submit.
    pub fn render(
        &mut self,
        volume: &VolumeTexture,
        settings: &RenderSettings,
        camera: &CameraParameters,
        output_size: (u32, u32),
    ) -> Result<RenderedFrame, RenderError> {
        let (width, height) = output_size;
        validate_output_size(&self.ctx, width, height)?;
        self.poll_pending();

        let started = Instant::now();
        let texture = self
            .ctx
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Ray March Output (Rgba8Unorm)"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: "ray march output".to_string(),
                reason,
            })?;
        let output_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let params = GpuRayMarchParams::new(
            volume,
            settings,
            camera,
            output_size,
            self.channels.intensities(),
            self.ctx.config().early_termination_alpha,
        );
        self.ctx
            .queue()
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = ray_march_bind_group(
            self.ctx.device(),
            &self.kernel.bind_group_layout,
            &self.uniform_buffer,
            volume,
            &self.channels,
            Some(&output_view),
        );

        let limits = self.ctx.pipeline_limits();
        let Self {
            ref ctx,
            ref mut kernel,
            ref mut optimizer,
            ref timestamps,
            ..
        } = *self;
        let geometry = optimizer.configuration(RAY_MARCH_PIPELINE_KEY, &limits, "ray march", width, height, |candidate| {
            benchmark_geometry(ctx, kernel, &bind_group, timestamps.as_ref(), candidate, output_size)
        });

        let pipeline = kernel.pipeline(ctx, geometry)?;
        let mut encoder = ctx.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Ray March Encoder"),
        });
        encode_dispatch(&mut encoder, pipeline, &bind_group, geometry, output_size, timestamps.as_ref());
        let readback = timestamps.as_ref().map(|t| t.resolve(ctx.device(), &mut encoder));
        ctx.queue().submit(Some(encoder.finish()));

        let pending = PendingTimings::track(ctx.queue(), started, started.elapsed(), readback);
        self.pending = Some(pending);

        log::debug!("📐 Dispatched {}x{} with {}", width, height, geometry);
        Ok(RenderedFrame {
            texture,
            width,
            height,
            geometry,
        })
    }

    /// Copy a rendered frame to host memory as BGRA8 (blocks)
    pub fn readback(&self, frame: &RenderedFrame) -> Result<Vec<u8>, RenderError> {
        read_bgra(&self.ctx, &frame.texture, frame.width, frame.height)
    }

    /// Replace all four transfer-function lookups; applies to the next render
    pub fn update_transfer_textures(&mut self, lookups: [&TransferLookup; 4]) {
        self.channels.update_lookups(&self.ctx, lookups);
    }

    /// Per-channel weights of the four transfer functions
    pub fn update_channel_intensities(&mut self, intensities: [f32; 4]) {
        self.channels.set_intensities(intensities);
    }

    /// Timings of the most recent completed dispatch, without blocking
    pub fn latest_timings(&mut self) -> Option<CommandBufferTimings> {
        self.ctx.device().poll(wgpu::Maintain::Poll);
        self.poll_pending();
        self.latest_timings
    }

    /// Block until the last dispatch has finished and return its timings
    pub fn wait_for_timings(&mut self) -> Option<CommandBufferTimings> {
        if let Some(pending) = self.pending.take() {
            if let Some(timings) = pending.wait(self.ctx.device()) {
                self.latest_timings = Some(timings);
            }
        }
        self.latest_timings
    }

    /// Run `callback` once all work submitted so far has finished
    pub fn notify_on_completion(&self, callback: impl FnOnce() + Send + 'static) {
        self.ctx.queue().on_submitted_work_done(callback);
    }

    /// Selected geometry for the ray-march kernel, once tuned
    pub fn dispatch_geometry(&self) -> Option<ThreadgroupDispatchConfiguration> {
        self.optimizer.cached(RAY_MARCH_PIPELINE_KEY)
    }

    /// Forget tuned geometries, e.g. after a driver or power-state change
    pub fn invalidate_dispatch_cache(&mut self) {
        self.optimizer.invalidate_all();
    }

    fn poll_pending(&mut self) {
        let resolved = match self.pending.as_mut() {
            Some(pending) => pending.try_resolve(),
            None => return,
        };
        if let Some(result) = resolved {
            self.pending = None;
            if let Some(timings) = result {
                self.latest_timings = Some(timings);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        // 2 mat4x4 + 5 vec4
        assert_eq!(std::mem::size_of::<GpuRayMarchParams>(), 208);
    }

    #[test]
    fn test_layout_entries() {
        let compute = ray_march_layout_entries(wgpu::ShaderStages::COMPUTE, true);
        assert_eq!(compute.len(), 7);
        assert_eq!(compute[6].binding, 6);

        let fragment = ray_march_layout_entries(wgpu::ShaderStages::FRAGMENT, false);
        assert_eq!(fragment.len(), 6);
        assert!(fragment.iter().all(|e| e.visibility == wgpu::ShaderStages::FRAGMENT));
    }
}
