/// GPU textures for volume data and transfer functions, plus readback
///
/// - Volume: `R16Sint` 3D texture, one texel per voxel, x fastest
/// - Transfer function: 512x2 `Rgba32Float` lookup, one per channel
///
/// Both are read with `textureLoad` and filtered manually in WGSL, so no
/// samplers (and no filterable-float feature) are needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::GpuContext;
use crate::error::RenderError;
use crate::transfer::{TransferLookup, LOOKUP_HEIGHT, LOOKUP_WIDTH};
use crate::volume::dataset::BYTES_PER_VOXEL;
use crate::volume::{Rescale, VolumeDataset};

const RGBA32F_BYTES: u32 = 16;

/// A dataset uploaded to GPU memory
pub struct VolumeTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: [u32; 3],
    rescale: Rescale,
    dataset_id: u64,
    ready: Arc<AtomicBool>,
}

impl std::fmt::Debug for VolumeTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeTexture")
            .field("dimensions", &self.dimensions)
            .field("dataset_id", &self.dataset_id)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl VolumeTexture {
    /// Create the 3D texture and queue the voxel upload.
    ///
    /// The upload completes asynchronously; `on_ready` runs once the queue
    /// has processed it. Do not treat the texture as valid before then.
    pub fn upload(
        ctx: &GpuContext,
        dataset: &VolumeDataset,
        on_ready: impl FnOnce() + Send + 'static,
    ) -> Result<Self, RenderError> {
        let dimensions = dataset.dimensions();
        let max = ctx.limits().max_texture_dimension_3d;
        if dimensions.iter().any(|&d| d > max) {
            return Err(RenderError::VolumeTooLarge { dimensions, max });
        }

        let size = wgpu::Extent3d {
            width: dimensions[0],
            height: dimensions[1],
            depth_or_array_layers: dimensions[2],
        };

        let texture = ctx
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Volume Texture (R16Sint)"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D3,
                    format: wgpu::TextureFormat::R16Sint,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: "volume texture".to_string(),
                reason,
            })?;

        let bytes = dataset.voxel_bytes();
        log::info!(
            "💾 Uploading {} bytes of volume data ({}x{}x{})",
            bytes.len(),
            dimensions[0],
            dimensions[1],
            dimensions[2]
        );
        ctx.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(BYTES_PER_VOXEL as u32 * dimensions[0]),
                rows_per_image: Some(dimensions[1]),
            },
            size,
        );

        // Flush the staged write so the completion callback covers it
        ctx.queue().submit(std::iter::empty());
        let ready = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        ctx.queue().on_submitted_work_done(move || {
            flag.store(true, Ordering::Release);
            log::debug!("✅ Volume upload finished");
            on_ready();
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            dimensions,
            rescale: dataset.rescale(),
            dataset_id: dataset.id(),
            ready,
        })
    }

    /// Whether the upload callback has fired
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn dimensions(&self) -> [u32; 3] {
        self.dimensions
    }

    pub fn rescale(&self) -> Rescale {
        self.rescale
    }

    pub fn dataset_id(&self) -> u64 {
        self.dataset_id
    }
}

/// One 512x2 transfer-function lookup on the GPU
pub struct TransferTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl TransferTexture {
    pub fn new(ctx: &GpuContext, label: &str, lookup: &TransferLookup) -> Result<Self, RenderError> {
        let texture = ctx
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: Self::extent(),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba32Float,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .map_err(|reason| RenderError::Allocation {
                label: label.to_string(),
                reason,
            })?;

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let transfer = Self { texture, view };
        transfer.write(ctx, lookup);
        Ok(transfer)
    }

    /// Replace the texel data; visible to the next submitted command buffer
    pub fn write(&self, ctx: &GpuContext, lookup: &TransferLookup) {
        ctx.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            lookup.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(RGBA32F_BYTES * LOOKUP_WIDTH as u32),
                rows_per_image: Some(LOOKUP_HEIGHT as u32),
            },
            Self::extent(),
        );
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn extent() -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: LOOKUP_WIDTH as u32,
            height: LOOKUP_HEIGHT as u32,
            depth_or_array_layers: 1,
        }
    }
}

/// Four transfer channels and their blend weights
pub struct TransferChannels {
    textures: [TransferTexture; 4],
    intensities: [f32; 4],
}

impl TransferChannels {
    /// All channels transparent; only channel 0 weighted
    pub fn new(ctx: &GpuContext) -> Result<Self, RenderError> {
        let empty = TransferLookup::transparent();
        Ok(Self {
            textures: [
                TransferTexture::new(ctx, "Transfer Function 0", &empty)?,
                TransferTexture::new(ctx, "Transfer Function 1", &empty)?,
                TransferTexture::new(ctx, "Transfer Function 2", &empty)?,
                TransferTexture::new(ctx, "Transfer Function 3", &empty)?,
            ],
            intensities: [1.0, 0.0, 0.0, 0.0],
        })
    }

    pub fn update_lookups(&mut self, ctx: &GpuContext, lookups: [&TransferLookup; 4]) {
        for (texture, lookup) in self.textures.iter().zip(lookups) {
            texture.write(ctx, lookup);
        }
    }

    pub fn set_intensities(&mut self, intensities: [f32; 4]) {
        self.intensities = intensities;
    }

    pub fn intensities(&self) -> [f32; 4] {
        self.intensities
    }

    pub fn views(&self) -> [&wgpu::TextureView; 4] {
        [
            self.textures[0].view(),
            self.textures[1].view(),
            self.textures[2].view(),
            self.textures[3].view(),
        ]
    }
}

/// Copy an `Rgba8Unorm` texture to host memory as tightly packed BGRA8.
/// Blocks until the copy has finished.
pub fn read_bgra(ctx: &GpuContext, texture: &wgpu::Texture, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
    let bytes_per_row = width * 4;
    let padded_bytes_per_row = (bytes_per_row + 255) & !255;
    let buffer_size = (padded_bytes_per_row * height) as u64;

    let output_buffer = ctx
        .scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Buffer"),
                size: buffer_size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })
        .map_err(|reason| RenderError::Allocation {
            label: "readback buffer".to_string(),
            reason,
        })?;

    let mut encoder = ctx.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &output_buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.queue().submit(Some(encoder.finish()));

    let buffer_slice = output_buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device().poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|_| RenderError::ReadbackInterrupted)??;

    let data = buffer_slice.get_mapped_range();
    let mut output = Vec::with_capacity((bytes_per_row * height) as usize);
    for y in 0..height {
        let start = (y * padded_bytes_per_row) as usize;
        let end = start + bytes_per_row as usize;
        // RGBA → BGRA
        for pixel in data[start..end].chunks_exact(4) {
            output.extend_from_slice(&[pixel[2], pixel[1], pixel[0], pixel[3]]);
        }
    }

    drop(data);
    output_buffer.unmap();
    log::debug!("📥 Read back {}x{} ({} bytes)", width, height, output.len());
    Ok(output)
}
