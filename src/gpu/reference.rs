/// Fragment-shader reference renderer
///
/// Draws a full-screen triangle whose fragment shader calls the same
/// `march_ray` as the compute kernel. It exists to cross-check the compute
/// path: both renderers must agree within a normalized RMSE of 0.01.
///
/// Sharing the WGSL means this mostly checks dispatch and pixel-coordinate
/// plumbing. `raymarch::CpuReferenceRenderer` is the independent oracle for
/// the per-ray arithmetic.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::pipeline::{ray_march_bind_group, ray_march_layout_entries, validate_output_size, GpuRayMarchParams};
use super::shaders;
use super::texture::{read_bgra, TransferChannels, VolumeTexture};
use super::GpuContext;
use crate::error::RenderError;
use crate::state::camera::CameraParameters;
use crate::state::settings::RenderSettings;
use crate::transfer::TransferLookup;

pub struct FragmentReferenceRenderer {
    ctx: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    channels: TransferChannels,
}

impl FragmentReferenceRenderer {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self, RenderError> {
        let device = ctx.device();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ray March Fragment Layout"),
            entries: &ray_march_layout_entries(wgpu::ShaderStages::FRAGMENT, false),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Reference Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let source = shaders::ray_march_fragment_source();
        let pipeline = ctx
            .scoped(|device| {
                let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("Ray March Reference Shader"),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });

                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Ray March Reference Pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: "vs_main",
                        buffers: &[],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: "fs_main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None, // Disable culling for full-screen triangle
                        unclipped_depth: false,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    multiview: None,
                })
            })
            .map_err(|reason| RenderError::PipelineCompilation {
                label: "ray march reference pipeline".to_string(),
                reason,
            })?;

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Reference Uniform Buffer"),
            contents: bytemuck::bytes_of(&<GpuRayMarchParams as bytemuck::Zeroable>::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let channels = TransferChannels::new(&ctx)?;

        Ok(Self {
            ctx,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            channels,
        })
    }

    pub fn update_transfer_textures(&mut self, lookups: [&TransferLookup; 4]) {
        self.channels.update_lookups(&self.ctx, lookups);
    }

    pub fn update_channel_intensities(&mut self, intensities: [f32; 4]) {
        self.channels.set_intensities(intensities);
    }

    /// Render and read back as BGRA8 (blocks)
    pub fn render_to_bytes(
        &self,
        volume: &VolumeTexture,
        settings: &RenderSettings,
        camera: &CameraParameters,
        output_size: (u32, u32),
    ) -> Result<Vec<u8>, RenderError> {
        let (width, height) = output_size;
        validate_output_size(&self.ctx, width, height)?;

        let output_texture = self
            .ctx
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Reference Output (Rgba8Unorm)"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: "reference output".to_string(),
                reason,
            })?;
        let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

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
            &self.bind_group_layout,
            &self.uniform_buffer,
            volume,
            &self.channels,
            None,
        );

        let mut encoder = self.ctx.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Reference Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Reference Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Full-screen triangle
        }
        self.ctx.queue().submit(Some(encoder.finish()));

        read_bgra(&self.ctx, &output_texture, width, height)
    }
}
