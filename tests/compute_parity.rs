//! GPU integration tests: compute kernel against the fragment reference and
//! the CPU ray marcher, dispatch tuning cache, histogram kernels.
//!
//! Every test returns early when the machine has no usable adapter.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use volume_raycaster::diagnostics::{max_channel_rmse, FrameStats};
use volume_raycaster::gpu::histogram::{calculate_histogram, make_plan, HistogramStrategy};
use volume_raycaster::gpu::{FragmentReferenceRenderer, FrameHistogram, GpuContext, VolumeComputeRenderer, VolumeTexture};
use volume_raycaster::raymarch::CpuReferenceRenderer;
use volume_raycaster::state::{CameraParameters, HuWindow, RenderMethod, RenderSettings, RendererConfig};
use volume_raycaster::transfer::{presets, TransferLookup};
use volume_raycaster::volume::{SyntheticVolume, VolumeDataset};

const SIZE: (u32, u32) = (64, 64);
const PARITY_TOLERANCE: f32 = 0.01;
// Host and device round f32 differently in a few places
const CPU_TOLERANCE: f32 = 0.02;

fn gpu() -> Option<Arc<GpuContext>> {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuContext::new_blocking(RendererConfig::default()) {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) => {
            log::warn!("Skipping GPU test: {}", e);
            None
        }
    }
}

fn upload(ctx: &GpuContext, dataset: &VolumeDataset) -> VolumeTexture {
    let (tx, rx) = mpsc::channel();
    let volume = VolumeTexture::upload(ctx, dataset, move || {
        let _ = tx.send(());
    })
    .unwrap();
    ctx.device().poll(wgpu::Maintain::Wait);
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(volume.is_ready());
    volume
}

fn orbit(dataset: &VolumeDataset, yaw: f32) -> CameraParameters {
    CameraParameters::orbit(dataset.physical_extent(), yaw, 17.0, 2.5, 40.0, 1.0).unwrap()
}

fn with_first_channel(lookup: &TransferLookup) -> [TransferLookup; 4] {
    [
        lookup.clone(),
        TransferLookup::transparent(),
        TransferLookup::transparent(),
        TransferLookup::transparent(),
    ]
}

#[test]
fn compute_matches_fragment_reference() {
    let Some(ctx) = gpu() else { return };
    let mut compute = VolumeComputeRenderer::new(Arc::clone(&ctx)).unwrap();
    let mut fragment = FragmentReferenceRenderer::new(Arc::clone(&ctx)).unwrap();
    let mut cpu = CpuReferenceRenderer::new(ctx.config());

    let settings = RenderSettings {
        window: HuWindow::new(-1000.0, 1000.0),
        quality: 64,
        method: RenderMethod::Dvr,
    };

    for name in ["sphere", "checkerboard", "gradient"] {
        let dataset = SyntheticVolume::from_name(name).unwrap().generate([32, 32, 32]).unwrap();
        let volume = upload(&ctx, &dataset);

        for preset in presets::PRESET_NAMES {
            let lookup = presets::by_name(preset).unwrap().lookup();
            let empty = TransferLookup::transparent();
            compute.update_transfer_textures([&lookup, &empty, &empty, &empty]);
            fragment.update_transfer_textures([&lookup, &empty, &empty, &empty]);
            cpu.update_transfer_lookups(with_first_channel(&lookup));

            for step in 0..10 {
                let yaw = step as f32 * 36.0;
                let camera = orbit(&dataset, yaw);

                let frame = compute.render(&volume, &settings, &camera, SIZE).unwrap();
                let from_compute = compute.readback(&frame).unwrap();
                let from_fragment = fragment.render_to_bytes(&volume, &settings, &camera, SIZE).unwrap();

                let rmse = max_channel_rmse(&from_compute, &from_fragment).unwrap();
                assert!(
                    rmse <= PARITY_TOLERANCE,
                    "{} / {} / yaw {}: compute vs fragment RMSE {}",
                    name,
                    preset,
                    yaw,
                    rmse
                );

                // The host marcher is the independent check; slow in debug builds, so every other angle
                if step % 2 == 0 {
                    let from_cpu = cpu.render(&dataset, &settings, &camera, SIZE);
                    let rmse = max_channel_rmse(&from_compute, &from_cpu).unwrap();
                    assert!(
                        rmse <= CPU_TOLERANCE,
                        "{} / {} / yaw {}: compute vs CPU RMSE {}",
                        name,
                        preset,
                        yaw,
                        rmse
                    );
                }
            }
        }
    }
}

#[test]
fn window_controls_visibility_on_gpu() {
    let Some(ctx) = gpu() else { return };
    let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([16, 16, 16]).unwrap();
    let volume = upload(&ctx, &dataset);
    let mut renderer = VolumeComputeRenderer::new(Arc::clone(&ctx)).unwrap();
    let ramp = presets::grayscale_ramp().lookup();
    let empty = TransferLookup::transparent();
    renderer.update_transfer_textures([&ramp, &empty, &empty, &empty]);

    let camera = orbit(&dataset, 20.0);
    let mut centre_alpha = |window: HuWindow| {
        let settings = RenderSettings {
            window,
            quality: 64,
            method: RenderMethod::Dvr,
        };
        let frame = renderer.render(&volume, &settings, &camera, SIZE).unwrap();
        let bgra = renderer.readback(&frame).unwrap();
        FrameStats::from_bgra(&bgra, SIZE.0, SIZE.1).centre[3]
    };

    assert!(centre_alpha(HuWindow::new(-150.0, 150.0)) > 128);
    assert_eq!(centre_alpha(HuWindow::new(400.0, 600.0)), 0);
}

#[test]
fn projection_methods_on_gpu() {
    let Some(ctx) = gpu() else { return };
    let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([16, 16, 16]).unwrap();
    let volume = upload(&ctx, &dataset);
    let mut renderer = VolumeComputeRenderer::new(Arc::clone(&ctx)).unwrap();
    let camera = orbit(&dataset, 20.0);

    for method in [RenderMethod::Mip, RenderMethod::MinIp, RenderMethod::Aip] {
        let settings = RenderSettings {
            window: HuWindow::new(-150.0, 150.0),
            quality: 32,
            method,
        };
        let frame = renderer.render(&volume, &settings, &camera, SIZE).unwrap();
        let bgra = renderer.readback(&frame).unwrap();
        let centre = FrameStats::from_bgra(&bgra, SIZE.0, SIZE.1).centre;
        // 0.5 in unorm8
        assert!((centre[0] as i32 - 128).abs() <= 1, "{:?}: {:?}", method, centre);
        assert_eq!(centre[3], 255);
    }
}

#[test]
fn dispatch_geometry_is_tuned_once() {
    let Some(ctx) = gpu() else { return };
    let dataset = SyntheticVolume::from_name("sphere").unwrap().generate([16, 16, 16]).unwrap();
    let volume = upload(&ctx, &dataset);
    let mut renderer = VolumeComputeRenderer::new(Arc::clone(&ctx)).unwrap();
    let settings = RenderSettings::default();
    let camera = orbit(&dataset, 0.0);

    assert_eq!(renderer.dispatch_geometry(), None);
    let first = renderer.render(&volume, &settings, &camera, SIZE).unwrap();
    let tuned = renderer.dispatch_geometry().unwrap();
    assert_eq!(first.geometry(), tuned);

    let limits = ctx.pipeline_limits();
    assert!(tuned.thread_count() <= limits.max_total_threads_per_threadgroup);

    // Different output size, same kernel: cache hit
    let second = renderer.render(&volume, &settings, &camera, (48, 32)).unwrap();
    assert_eq!(second.geometry(), tuned);
    assert!(renderer.wait_for_timings().is_some());

    renderer.invalidate_dispatch_cache();
    assert_eq!(renderer.dispatch_geometry(), None);
}

#[test]
fn gpu_histogram_matches_cpu() {
    let Some(ctx) = gpu() else { return };
    let dataset = SyntheticVolume::from_name("gradient").unwrap().generate([32, 32, 32]).unwrap();
    let volume = upload(&ctx, &dataset);
    let mut renderer = VolumeComputeRenderer::new(Arc::clone(&ctx)).unwrap();
    let lookup = presets::ct_soft_tissue().lookup();
    let empty = TransferLookup::transparent();
    renderer.update_transfer_textures([&lookup, &empty, &empty, &empty]);

    let settings = RenderSettings {
        window: HuWindow::new(-1000.0, 1000.0),
        quality: 64,
        method: RenderMethod::Dvr,
    };
    let frame = renderer.render(&volume, &settings, &camera_for(&dataset), SIZE).unwrap();
    let bgra = renderer.readback(&frame).unwrap();
    let mut histogram = FrameHistogram::new(Arc::clone(&ctx));

    let planned = histogram.plan(4, 256);
    let forced_legacy = make_plan(4, 256, 512, 0);
    assert_eq!(forced_legacy.strategy, HistogramStrategy::Legacy);

    for plan in [planned, forced_legacy] {
        let counts = histogram.compute(&frame, &plan).unwrap();
        assert_eq!(counts, calculate_histogram(&bgra, 4, 256), "{}", plan.kernel_name());
        let total: u32 = counts[0].iter().sum();
        assert_eq!(total, SIZE.0 * SIZE.1);
    }

    let invalid = make_plan(5, 16, 512, usize::MAX);
    assert!(histogram.compute(&frame, &invalid).is_err());
}

fn camera_for(dataset: &VolumeDataset) -> CameraParameters {
    orbit(dataset, 45.0)
}
