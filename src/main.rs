use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use volume_raycaster::diagnostics::{self, FrameStats, RenderDiagnostics};
use volume_raycaster::gpu::{FrameHistogram, GpuContext, VolumeComputeRenderer, VolumeTexture};
use volume_raycaster::state::{CameraParameters, HuWindow, RenderSettings, RendererConfig, SliceAxis, SliceRenderer};
use volume_raycaster::transfer::presets;
use volume_raycaster::volume::SyntheticVolume;

const USAGE: &str = "usage: volume-raycaster [dataset] [size] [out.png] [preset]\n  \
    dataset: uniform | sphere | checkerboard | gradient (default sphere)\n  \
    size:    output width and height in pixels (default 512)\n  \
    preset:  grayscale_ramp | ct_bone | ct_soft_tissue (default ct_bone)";

/// Edge length of the generated volume
const VOLUME_SIDE: u32 = 64;

/// Command-line arguments, all positional and optional
#[derive(Debug)]
struct CliArgs {
    dataset: String,
    size: u32,
    output: PathBuf,
    preset: String,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let dataset = args.next().unwrap_or_else(|| "sphere".to_string());
        if dataset == "-h" || dataset == "--help" {
            bail!("{}", USAGE);
        }
        let size = match args.next() {
            Some(size) => size.parse().with_context(|| format!("invalid size \"{}\"\n{}", size, USAGE))?,
            None => 512,
        };
        let output = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("render.png"));
        let preset = args.next().unwrap_or_else(|| "ct_bone".to_string());

        Ok(Self {
            dataset,
            size,
            output,
            preset,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let shape = SyntheticVolume::from_name(&args.dataset)
        .with_context(|| format!("unknown dataset \"{}\"\n{}", args.dataset, USAGE))?;
    let transfer_function = presets::by_name(&args.preset)
        .with_context(|| format!("unknown preset \"{}\", expected one of {:?}", args.preset, presets::PRESET_NAMES))?;

    log::info!("🚀 Volume raycaster starting: {} -> {}", args.dataset, args.output.display());
    let dataset = shape.generate_async([VOLUME_SIDE; 3]).await?;
    log::info!("🧊 {} {:?}", dataset.description(), dataset.dimensions());

    let ctx = Arc::new(GpuContext::new(RendererConfig::default()).await?);
    let (uploaded_tx, uploaded_rx) = tokio::sync::oneshot::channel();
    let volume = VolumeTexture::upload(&ctx, &dataset, move || {
        let _ = uploaded_tx.send(());
    })?;
    // Completion callbacks fire from device polling
    ctx.device().poll(wgpu::Maintain::Wait);
    uploaded_rx.await.context("volume upload was dropped before completing")?;
    log::info!("💾 Volume resident on GPU (ready: {})", volume.is_ready());

    let lookup = transfer_function.lookup();
    let empty = volume_raycaster::TransferLookup::transparent();
    let mut renderer = VolumeComputeRenderer::new(Arc::clone(&ctx))?;
    renderer.update_transfer_textures([&lookup, &empty, &empty, &empty]);
    renderer.update_channel_intensities([1.0, 0.0, 0.0, 0.0]);

    let settings = RenderSettings {
        window: HuWindow::new(transfer_function.min, transfer_function.max),
        ..RenderSettings::default()
    };
    let output_size = (args.size, args.size);
    let camera = CameraParameters::orbit(dataset.physical_extent(), 30.0, 20.0, 2.5, 40.0, 1.0)
        .context("degenerate camera for this volume")?;

    let frame = renderer.render(&volume, &settings, &camera, output_size)?;
    let timings = renderer.wait_for_timings();
    let bgra = renderer.readback(&frame)?;

    RenderDiagnostics {
        timings,
        geometry: renderer.dispatch_geometry(),
        output_size,
    }
    .log();
    log::info!("🖼️  Frame: {}", FrameStats::from_bgra(&bgra, output_size.0, output_size.1));
    diagnostics::write_png(&args.output, &bgra, output_size.0, output_size.1)?;

    let mut histogram = FrameHistogram::new(Arc::clone(&ctx));
    let plan = histogram.plan(3, 0);
    let channels = histogram.compute(&frame, &plan)?;
    for (name, counts) in ["R", "G", "B"].iter().zip(&channels) {
        let (peak_bin, peak) = counts
            .iter()
            .enumerate()
            .max_by_key(|&(_, &count)| count)
            .map(|(bin, &count)| (bin, count))
            .unwrap_or_default();
        log::info!("📊 {} histogram peak: bin {} of {} ({} pixels)", name, peak_bin, plan.bins, peak);
    }

    let mut slices = SliceRenderer::new(SliceAxis::Axial, settings.window);
    slices.set_transfer_function_enabled(true);
    slices.set_slice_position(&dataset, 0.5);
    let slice = slices.render_if_needed(&dataset, &lookup);
    let slice_path = args.output.with_extension("axial.png");
    diagnostics::write_rgba_png(&slice_path, &slice.rgba, slice.width, slice.height)?;

    log::info!("✅ Done");
    Ok(())
}
