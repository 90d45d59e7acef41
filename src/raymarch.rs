/// Host-side ray marcher
///
/// Every function here has a WGSL twin in `gpu::shaders::RAY_MARCH_LIBRARY`
/// and evaluates the same arithmetic in the same order: ray setup, slab
/// intersection against the unit cube, manual trilinear sampling, HU
/// windowing, transfer lookup and front-to-back compositing. It serves as a
/// second oracle next to the fragment-shader renderer and backs the
/// windowing tests that do not need a GPU.

use cgmath::{InnerSpace, Vector3};

use crate::state::camera::CameraParameters;
use crate::state::settings::{HuWindow, RenderMethod, RenderSettings, RendererConfig};
use crate::state::slice::to_unorm8;
use crate::transfer::{mix, TransferLookup};
use crate::volume::{Rescale, VolumeDataset};

/// Direction components smaller than this are treated as parallel to a slab
pub const RAY_EPSILON: f32 = 1e-6;

/// Camera-to-pixel distances at or below this give the zero direction
pub const DIRECTION_EPSILON: f32 = 1e-8;

/// Stand-in for infinity; WGSL has no infinity literal
pub const FAR: f32 = 1e30;

/// `normalize(to - from)`, or the zero vector when the points coincide
pub fn compute_ray_direction(from: Vector3<f32>, to: Vector3<f32>) -> Vector3<f32> {
    let delta = to - from;
    let length = delta.magnitude();
    if length <= DIRECTION_EPSILON {
        return Vector3::new(0.0, 0.0, 0.0);
    }
    delta / length
}

/// Slab intersection with the unit cube `[0,1]^3`.
///
/// Returns `(t_near, t_exit)`; the ray misses when `t_near >= t_exit`.
/// Axes the ray runs parallel to do not narrow the interval, unless the
/// origin lies outside that slab, which is a guaranteed miss.
pub fn intersect_box(origin: Vector3<f32>, direction: Vector3<f32>) -> (f32, f32) {
    let mut t_near = -FAR;
    let mut t_exit = FAR;

    for axis in 0..3 {
        let o = origin[axis];
        let d = direction[axis];
        if d.abs() < RAY_EPSILON {
            if !(0.0..=1.0).contains(&o) {
                return (1.0, 0.0);
            }
            continue;
        }

        let inverse = 1.0 / d;
        let t0 = (0.0 - o) * inverse;
        let t1 = (1.0 - o) * inverse;
        t_near = t_near.max(t0.min(t1));
        t_exit = t_exit.min(t0.max(t1));
    }

    (t_near, t_exit)
}

/// Trilinear sample of the stored (raw) values at a local position
pub fn sample_trilinear(dataset: &VolumeDataset, local: Vector3<f32>) -> f32 {
    let dimensions = dataset.dimensions();
    let mut base = [0i64; 3];
    let mut fraction = [0.0f32; 3];
    for axis in 0..3 {
        let position = local[axis] * dimensions[axis] as f32 - 0.5;
        let floor = position.floor();
        base[axis] = floor as i64;
        fraction[axis] = position - floor;
    }

    let load = |dx: i64, dy: i64, dz: i64| -> f32 {
        let coordinate = |axis: usize, offset: i64| -> u32 {
            (base[axis] + offset).clamp(0, dimensions[axis] as i64 - 1) as u32
        };
        dataset.sample(coordinate(0, dx), coordinate(1, dy), coordinate(2, dz)) as f32
    };

    let c00 = mix(load(0, 0, 0), load(1, 0, 0), fraction[0]);
    let c10 = mix(load(0, 1, 0), load(1, 1, 0), fraction[0]);
    let c01 = mix(load(0, 0, 1), load(1, 0, 1), fraction[0]);
    let c11 = mix(load(0, 1, 1), load(1, 1, 1), fraction[0]);
    let c0 = mix(c00, c10, fraction[1]);
    let c1 = mix(c01, c11, fraction[1]);
    mix(c0, c1, fraction[2])
}

/// Weighted sum of up to four transfer channels, clamped to [0, 1]
pub fn classify(lookups: &[TransferLookup; 4], intensities: [f32; 4], normalized: f32) -> [f32; 4] {
    let mut colour = [0.0f32; 4];
    for (lookup, weight) in lookups.iter().zip(intensities) {
        let sample = lookup.sample(normalized);
        for (channel, value) in colour.iter_mut().zip(sample) {
            *channel += value * weight;
        }
    }
    colour.map(|c| c.clamp(0.0, 1.0))
}

/// Front-to-back "under" operator on a premultiplied accumulator
pub fn composite(accumulated: [f32; 4], sample: [f32; 4]) -> [f32; 4] {
    let transparency = 1.0 - accumulated[3];
    [
        accumulated[0] + transparency * (sample[0] * sample[3]),
        accumulated[1] + transparency * (sample[1] * sample[3]),
        accumulated[2] + transparency * (sample[2] * sample[3]),
        accumulated[3] + transparency * sample[3],
    ]
}

/// Everything a single ray needs besides its origin and direction
pub struct MarchParameters<'a> {
    pub window: HuWindow,
    pub rescale: Rescale,
    pub method: RenderMethod,
    pub steps: u32,
    pub lookups: &'a [TransferLookup; 4],
    pub intensities: [f32; 4],
    pub early_termination_alpha: f32,
}

/// March one ray through the volume; returns premultiplied RGBA
pub fn march(dataset: &VolumeDataset, origin: Vector3<f32>, direction: Vector3<f32>, params: &MarchParameters) -> [f32; 4] {
    if direction.magnitude2() == 0.0 {
        return [0.0; 4];
    }

    let (t_near, t_exit) = intersect_box(origin, direction);
    let t_near = t_near.max(0.0);
    if t_near >= t_exit {
        return [0.0; 4];
    }

    let steps = params.steps.max(1);
    let dt = (t_exit - t_near) / steps as f32;

    let mut accumulated = [0.0f32; 4];
    let mut extreme = if params.method == RenderMethod::MinIp { 1.0f32 } else { 0.0 };
    let mut total = 0.0f32;

    for i in 0..steps {
        let t = t_near + (i as f32 + 0.5) * dt;
        let position = origin + direction * t;
        let hu = params.rescale.apply(sample_trilinear(dataset, position));
        let normalized = params.window.normalize(hu);

        match params.method {
            RenderMethod::Dvr => {
                let sample = classify(params.lookups, params.intensities, normalized);
                accumulated = composite(accumulated, sample);
                if accumulated[3] >= params.early_termination_alpha {
                    break;
                }
            }
            RenderMethod::Mip => extreme = extreme.max(normalized),
            RenderMethod::MinIp => extreme = extreme.min(normalized),
            RenderMethod::Aip => total += normalized,
        }
    }

    let value = match params.method {
        RenderMethod::Dvr => return accumulated,
        RenderMethod::Aip => total / steps as f32,
        RenderMethod::Mip | RenderMethod::MinIp => extreme,
    };
    [value, value, value, 1.0]
}

/// CPU twin of the compute renderer, producing the same BGRA8 readback layout
#[derive(Debug, Clone)]
pub struct CpuReferenceRenderer {
    lookups: [TransferLookup; 4],
    intensities: [f32; 4],
    early_termination_alpha: f32,
}

impl CpuReferenceRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            lookups: [
                TransferLookup::transparent(),
                TransferLookup::transparent(),
                TransferLookup::transparent(),
                TransferLookup::transparent(),
            ],
            intensities: [1.0, 0.0, 0.0, 0.0],
            early_termination_alpha: config.early_termination_alpha,
        }
    }

    pub fn update_transfer_lookups(&mut self, lookups: [TransferLookup; 4]) {
        self.lookups = lookups;
    }

    pub fn update_channel_intensities(&mut self, intensities: [f32; 4]) {
        self.intensities = intensities;
    }

    /// Premultiplied RGBA of pixel (x, y)
    pub fn render_pixel(
        &self,
        dataset: &VolumeDataset,
        settings: &RenderSettings,
        camera: &CameraParameters,
        output_size: (u32, u32),
        x: u32,
        y: u32,
    ) -> [f32; 4] {
        let params = MarchParameters {
            window: settings.window,
            rescale: dataset.rescale(),
            method: settings.method,
            steps: settings.resolved_steps(output_size.0),
            lookups: &self.lookups,
            intensities: self.intensities,
            early_termination_alpha: self.early_termination_alpha,
        };

        let origin = camera.camera_local;
        let target = camera.unproject_pixel([x as f32 + 0.5, y as f32 + 0.5], output_size);
        march(dataset, origin, compute_ray_direction(origin, target), &params)
    }

    /// Render the full image as BGRA8, row-major, no padding
    pub fn render(
        &self,
        dataset: &VolumeDataset,
        settings: &RenderSettings,
        camera: &CameraParameters,
        output_size: (u32, u32),
    ) -> Vec<u8> {
        let (width, height) = output_size;
        let mut bgra = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let [r, g, b, a] = self.render_pixel(dataset, settings, camera, output_size, x, y);
                bgra.extend_from_slice(&[to_unorm8(b), to_unorm8(g), to_unorm8(r), to_unorm8(a)]);
            }
        }
        bgra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::presets;
    use crate::volume::SyntheticVolume;

    #[test]
    fn test_ray_direction() {
        let a = Vector3::new(0.25, 0.5, 0.75);
        assert_eq!(compute_ray_direction(a, a), Vector3::new(0.0, 0.0, 0.0));

        let b = Vector3::new(1.0, 2.0, -3.0);
        let direction = compute_ray_direction(a, b);
        assert!((direction.magnitude() - 1.0).abs() < 1e-6);
        let expected = (b - a).normalize();
        assert!((direction - expected).magnitude() < 1e-6);
    }

    #[test]
    fn test_box_intersection_along_x() {
        let (t_near, t_exit) = intersect_box(Vector3::new(-1.0, 0.5, 0.5), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!((t_near, t_exit), (1.0, 2.0));
        assert!(t_near < t_exit);
    }

    #[test]
    fn test_axis_aligned_rays_stay_finite() {
        // Parallel to two slabs, inside both
        let (near, exit) = intersect_box(Vector3::new(0.5, -2.0, 0.25), Vector3::new(0.0, 1.0, 0.0));
        assert!(near.is_finite() && exit.is_finite());
        assert_eq!((near, exit), (2.0, 3.0));

        // Same axis through a tilted ray gives the same y bounds
        let tilted = Vector3::new(1e-3, 1.0, 0.0).normalize();
        let (tilted_near, tilted_exit) = intersect_box(Vector3::new(0.5, -2.0, 0.25), tilted);
        assert!((tilted_near - 2.0).abs() < 1e-3);
        assert!((tilted_exit - 3.0).abs() < 1e-3);

        // Parallel but outside a slab misses
        let (near, exit) = intersect_box(Vector3::new(1.5, -2.0, 0.5), Vector3::new(0.0, 1.0, 0.0));
        assert!(near >= exit);
    }

    #[test]
    fn test_ray_pointing_away_misses() {
        let origin = Vector3::new(-1.0, 0.5, 0.5);
        let (t_near, t_exit) = intersect_box(origin, Vector3::new(-1.0, 0.0, 0.0));
        assert!(t_exit < 0.0 || t_near >= t_exit || t_near.max(0.0) >= t_exit);
    }

    #[test]
    fn test_trilinear_sampling() {
        let dataset = SyntheticVolume::Gradient { low: -1000, high: 1000 }
            .generate([4, 1, 1])
            .unwrap();
        // Voxel centres sit at (i + 0.5) / 4
        assert_eq!(sample_trilinear(&dataset, Vector3::new(0.125, 0.5, 0.5)), dataset.sample(0, 0, 0) as f32);
        let halfway = sample_trilinear(&dataset, Vector3::new(0.25, 0.5, 0.5));
        let expected = (dataset.sample(0, 0, 0) as f32 + dataset.sample(1, 0, 0) as f32) * 0.5;
        assert!((halfway - expected).abs() < 1e-3);
        // Outside the centres, values clamp to the edge voxel
        assert_eq!(sample_trilinear(&dataset, Vector3::new(0.0, 0.5, 0.5)), dataset.sample(0, 0, 0) as f32);
    }

    fn centre_pixel(window: HuWindow, method: RenderMethod) -> [f32; 4] {
        let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([16, 16, 16]).unwrap();
        let mut renderer = CpuReferenceRenderer::new(&RendererConfig::default());
        let ramp = presets::grayscale_ramp().lookup();
        renderer.update_transfer_lookups([
            ramp,
            TransferLookup::transparent(),
            TransferLookup::transparent(),
            TransferLookup::transparent(),
        ]);

        let camera = CameraParameters::orbit(dataset.physical_extent(), 20.0, 10.0, 2.5, 40.0, 1.0).unwrap();
        let settings = RenderSettings { window, quality: 64, method };
        renderer.render_pixel(&dataset, &settings, &camera, (32, 32), 16, 16)
    }

    #[test]
    fn test_window_includes_and_excludes_samples() {
        let inside = centre_pixel(HuWindow::new(-150.0, 150.0), RenderMethod::Dvr);
        assert!(inside[3] > 0.5, "opacity {}", inside[3]);
        assert!(inside[0] > 0.1);

        let outside = centre_pixel(HuWindow::new(400.0, 600.0), RenderMethod::Dvr);
        assert!(outside[3] < 1e-3, "opacity {}", outside[3]);
        assert!(outside[0] < 1e-3);
    }

    #[test]
    fn test_projection_methods_on_uniform_volume() {
        let window = HuWindow::new(-150.0, 150.0);
        for method in [RenderMethod::Mip, RenderMethod::MinIp, RenderMethod::Aip] {
            let pixel = centre_pixel(window, method);
            assert!((pixel[0] - 0.5).abs() < 1e-4, "{:?}: {:?}", method, pixel);
            assert_eq!(pixel[3], 1.0);
        }
    }

    #[test]
    fn test_early_termination_stops_at_threshold() {
        let opaque = [1.0, 1.0, 1.0, 0.95];
        let mut accumulated = [0.0; 4];
        let mut steps = 0;
        while accumulated[3] < 0.99 {
            accumulated = composite(accumulated, opaque);
            steps += 1;
        }
        assert_eq!(steps, 2);
        assert!(accumulated[0] <= accumulated[3] + 1e-6);
    }

    #[test]
    fn test_missed_rays_are_transparent() {
        let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([4, 4, 4]).unwrap();
        let renderer = CpuReferenceRenderer::new(&RendererConfig::default());
        let camera = CameraParameters::orbit(dataset.physical_extent(), 0.0, 0.0, 3.0, 40.0, 1.0).unwrap();
        let bgra = renderer.render(&dataset, &RenderSettings::default(), &camera, (8, 8));
        assert_eq!(bgra.len(), 8 * 8 * 4);
        // Corner ray at this distance and fov passes beside the cube
        assert_eq!(&bgra[0..4], &[0, 0, 0, 0]);
    }
}
