/// Image comparison, frame statistics and PNG output
///
/// Everything here works on host-side readbacks: tightly packed BGRA8 rows
/// as returned by `VolumeComputeRenderer::readback`.

use std::fmt;
use std::path::Path;

use crate::gpu::{CommandBufferTimings, ThreadgroupDispatchConfiguration};

/// Per-channel RMSE in [0,1] units, channels in B, G, R, A order.
/// `None` when the images differ in length or are not whole pixels.
pub fn channel_rmse(a: &[u8], b: &[u8]) -> Option<[f32; 4]> {
    if a.len() != b.len() || a.len() % 4 != 0 {
        return None;
    }
    let pixels = (a.len() / 4).max(1) as f64;

    let mut sums = [0.0f64; 4];
    for (pa, pb) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        for channel in 0..4 {
            let diff = (pa[channel] as f64 - pb[channel] as f64) / 255.0;
            sums[channel] += diff * diff;
        }
    }
    Some(sums.map(|sum| (sum / pixels).sqrt() as f32))
}

/// Largest of the four channel errors
pub fn max_channel_rmse(a: &[u8], b: &[u8]) -> Option<f32> {
    channel_rmse(a, b).map(|rmse| rmse.into_iter().fold(0.0, f32::max))
}

/// Summary of one BGRA8 frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Fraction of pixels with non-zero alpha
    pub coverage: f32,
    pub mean_luminance: f32,
    pub mean_alpha: f32,
    /// RGBA of the centre pixel
    pub centre: [u8; 4],
}

impl FrameStats {
    pub fn from_bgra(bgra: &[u8], width: u32, height: u32) -> Self {
        let mut covered = 0usize;
        let mut luminance = 0.0f64;
        let mut alpha = 0.0f64;
        let pixels = bgra.chunks_exact(4);
        let count = pixels.len().max(1) as f64;

        for pixel in pixels {
            let (b, g, r, a) = (pixel[0] as f64, pixel[1] as f64, pixel[2] as f64, pixel[3] as f64);
            if pixel[3] > 0 {
                covered += 1;
            }
            // Rec. 709
            luminance += (0.2126 * r + 0.7152 * g + 0.0722 * b) / 255.0;
            alpha += a / 255.0;
        }

        let centre_index = ((height / 2) * width + width / 2) as usize * 4;
        let centre = bgra
            .get(centre_index..centre_index + 4)
            .map(|p| [p[2], p[1], p[0], p[3]])
            .unwrap_or_default();

        Self {
            coverage: (covered as f64 / count) as f32,
            mean_luminance: (luminance / count) as f32,
            mean_alpha: (alpha / count) as f32,
            centre,
        }
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coverage {:.1}%, luminance {:.3}, alpha {:.3}, centre {:?}",
            self.coverage * 100.0,
            self.mean_luminance,
            self.mean_alpha,
            self.centre
        )
    }
}

/// Save a BGRA8 readback as an RGBA PNG
pub fn write_png(path: impl AsRef<Path>, bgra: &[u8], width: u32, height: u32) -> image::ImageResult<()> {
    let rgba: Vec<u8> = bgra
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect();
    write_rgba_png(path, &rgba, width, height)
}

/// Save straight RGBA8 pixels (e.g. an MPR slice) as PNG
pub fn write_rgba_png(path: impl AsRef<Path>, rgba: &[u8], width: u32, height: u32) -> image::ImageResult<()> {
    image::save_buffer(path.as_ref(), rgba, width, height, image::ColorType::Rgba8)?;
    log::info!("🖼️  Wrote {}x{} PNG to {}", width, height, path.as_ref().display());
    Ok(())
}

/// Timings of a dispatch together with the geometry it ran with
#[derive(Debug, Clone, Copy)]
pub struct RenderDiagnostics {
    pub timings: Option<CommandBufferTimings>,
    pub geometry: Option<ThreadgroupDispatchConfiguration>,
    pub output_size: (u32, u32),
}

impl RenderDiagnostics {
    pub fn log(&self) {
        log::info!("📊 {}", self);
    }
}

impl fmt::Display for RenderDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.output_size.0, self.output_size.1)?;
        match self.geometry {
            Some(geometry) => write!(f, ", workgroup {}", geometry)?,
            None => write!(f, ", workgroup untuned")?,
        }
        match self.timings {
            Some(t) => write!(
                f,
                ", kernel {:.3} ms, gpu {:.3} ms, cpu {:.3} ms",
                t.kernel_time.as_secs_f64() * 1e3,
                t.gpu_time.as_secs_f64() * 1e3,
                t.cpu_time.as_secs_f64() * 1e3
            ),
            None => write!(f, ", no timings"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rmse_identical_and_opposite() {
        let a = vec![10, 20, 30, 255, 0, 0, 0, 0];
        assert_eq!(channel_rmse(&a, &a), Some([0.0; 4]));

        let black = vec![0u8; 8];
        let white = vec![255u8; 8];
        assert_eq!(max_channel_rmse(&black, &white), Some(1.0));
    }

    #[test]
    fn test_rmse_single_channel() {
        // One of two pixels differs by 255 in red only: sqrt(1/2)
        let a = vec![0, 0, 0, 0, 0, 0, 0, 0];
        let b = vec![0, 0, 255, 0, 0, 0, 0, 0];
        let rmse = channel_rmse(&a, &b).unwrap();
        assert_eq!(rmse[0], 0.0);
        assert!((rmse[2] - 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_rmse_mismatched_lengths() {
        assert_eq!(channel_rmse(&[0; 8], &[0; 4]), None);
        assert_eq!(channel_rmse(&[0; 3], &[0; 3]), None);
    }

    #[test]
    fn test_frame_stats() {
        // 2x1: opaque white (BGRA), transparent black
        let bgra = [255, 255, 255, 255, 0, 0, 0, 0];
        let stats = FrameStats::from_bgra(&bgra, 2, 1);
        assert_eq!(stats.coverage, 0.5);
        assert!((stats.mean_luminance - 0.5).abs() < 1e-4);
        assert_eq!(stats.mean_alpha, 0.5);
        assert_eq!(stats.centre, [0, 0, 0, 0]);
    }

    #[test]
    fn test_png_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let bgra = [0, 0, 255, 255, 255, 0, 0, 255];
        write_png(&path, &bgra, 2, 1).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_diagnostics_display() {
        let diagnostics = RenderDiagnostics {
            timings: Some(CommandBufferTimings {
                kernel_time: Duration::from_micros(1500),
                gpu_time: Duration::from_millis(2),
                cpu_time: Duration::from_micros(100),
            }),
            geometry: Some(ThreadgroupDispatchConfiguration::new(32, 8)),
            output_size: (256, 128),
        };
        let text = diagnostics.to_string();
        assert!(text.starts_with("256x128, workgroup 32x8"));
        assert!(text.contains("kernel 1.500 ms"));
    }
}
