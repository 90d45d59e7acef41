/// Multiplanar reformation (MPR) of axis-aligned slices
///
/// `SliceRenderer` keeps the last produced image and only recomputes it when
/// something that affects the pixels changed: HU window, axis, slice index,
/// transfer-function toggle, or the dataset itself. Setters that store the
/// value already held leave the image clean.

use crate::state::settings::HuWindow;
use crate::transfer::TransferLookup;
use crate::volume::VolumeDataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceAxis {
    /// YZ plane, indexed along x
    Sagittal,
    /// XZ plane, indexed along y
    Coronal,
    /// XY plane, indexed along z
    #[default]
    Axial,
}

impl SliceAxis {
    /// Index of the volume axis this plane is perpendicular to
    pub fn normal_axis(&self) -> usize {
        match self {
            Self::Sagittal => 0,
            Self::Coronal => 1,
            Self::Axial => 2,
        }
    }

    /// (width, height) of a slice through a volume of `dimensions`
    pub fn plane_size(&self, dimensions: [u32; 3]) -> (u32, u32) {
        match self {
            Self::Sagittal => (dimensions[1], dimensions[2]),
            Self::Coronal => (dimensions[0], dimensions[2]),
            Self::Axial => (dimensions[0], dimensions[1]),
        }
    }

    fn voxel(&self, u: u32, v: u32, index: u32) -> [u32; 3] {
        match self {
            Self::Sagittal => [index, u, v],
            Self::Coronal => [u, index, v],
            Self::Axial => [u, v, index],
        }
    }
}

/// RGBA8 slice image, straight alpha
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SliceImage {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * self.width + x) * 4) as usize;
        [
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
            self.rgba[offset + 3],
        ]
    }
}

#[derive(Debug, Default)]
pub struct SliceRenderer {
    axis: SliceAxis,
    slice_index: u32,
    window: HuWindow,
    transfer_function_enabled: bool,
    dirty: bool,
    dataset_id: Option<u64>,
    image: SliceImage,
    render_count: usize,
}

impl SliceRenderer {
    pub fn new(axis: SliceAxis, window: HuWindow) -> Self {
        Self {
            axis,
            window,
            dirty: true,
            ..Default::default()
        }
    }

    pub fn axis(&self) -> SliceAxis {
        self.axis
    }

    pub fn slice_index(&self) -> u32 {
        self.slice_index
    }

    pub fn window(&self) -> HuWindow {
        self.window
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of times the slice was actually recomputed
    pub fn render_count(&self) -> usize {
        self.render_count
    }

    pub fn set_window(&mut self, window: HuWindow) {
        if self.window != window {
            self.window = window;
            self.dirty = true;
        }
    }

    pub fn set_axis(&mut self, axis: SliceAxis) {
        if self.axis != axis {
            self.axis = axis;
            self.dirty = true;
        }
    }

    /// Index along the slice normal; clamped to the volume at render time
    pub fn set_slice_index(&mut self, index: u32) {
        if self.slice_index != index {
            self.slice_index = index;
            self.dirty = true;
        }
    }

    /// Select the slice at a normalized position in [0, 1] along the normal
    pub fn set_slice_position(&mut self, dataset: &VolumeDataset, position: f32) {
        let depth = dataset.dimensions()[self.axis.normal_axis()];
        let index = (position.clamp(0.0, 1.0) * (depth - 1) as f32).round() as u32;
        self.set_slice_index(index);
    }

    pub fn set_transfer_function_enabled(&mut self, enabled: bool) {
        if self.transfer_function_enabled != enabled {
            self.transfer_function_enabled = enabled;
            self.dirty = true;
        }
    }

    /// Force a recompute, e.g. after the transfer-function curve was edited
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Return the current slice, recomputing it only if dirty or the dataset changed
    pub fn render_if_needed(&mut self, dataset: &VolumeDataset, lookup: &TransferLookup) -> &SliceImage {
        if self.dataset_id != Some(dataset.id()) {
            self.dataset_id = Some(dataset.id());
            self.dirty = true;
        }

        if self.dirty {
            self.image = self.compute(dataset, lookup);
            self.dirty = false;
            self.render_count += 1;
            log::debug!(
                "🔪 Recomputed {:?} slice {} ({}x{})",
                self.axis,
                self.slice_index,
                self.image.width,
                self.image.height
            );
        }
        &self.image
    }

    fn compute(&self, dataset: &VolumeDataset, lookup: &TransferLookup) -> SliceImage {
        let dimensions = dataset.dimensions();
        let (width, height) = self.axis.plane_size(dimensions);
        let index = self.slice_index.min(dimensions[self.axis.normal_axis()] - 1);

        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for v in 0..height {
            for u in 0..width {
                let [x, y, z] = self.axis.voxel(u, v, index);
                let normalized = self.window.normalize(dataset.hounsfield(x, y, z));

                if self.transfer_function_enabled {
                    let colour = lookup.sample(normalized);
                    rgba.extend(colour.iter().map(|&c| to_unorm8(c)));
                } else {
                    let grey = to_unorm8(normalized);
                    rgba.extend_from_slice(&[grey, grey, grey, 255]);
                }
            }
        }

        SliceImage { width, height, rgba }
    }
}

/// Float in [0, 1] to an 8-bit channel, rounding like a unorm store
pub(crate) fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::presets;
    use crate::volume::SyntheticVolume;

    fn gradient() -> VolumeDataset {
        SyntheticVolume::Gradient { low: -1000, high: 1000 }
            .generate([16, 8, 4])
            .unwrap()
    }

    #[test]
    fn test_first_render_computes_then_reuses() {
        let dataset = gradient();
        let lookup = TransferLookup::transparent();
        let mut slicer = SliceRenderer::new(SliceAxis::Axial, HuWindow::new(-1000.0, 1000.0));

        let image = slicer.render_if_needed(&dataset, &lookup).clone();
        assert_eq!((image.width, image.height), (16, 8));
        assert_eq!(slicer.render_count(), 1);

        slicer.render_if_needed(&dataset, &lookup);
        assert_eq!(slicer.render_count(), 1);
        assert!(!slicer.is_dirty());
    }

    #[test]
    fn test_mutations_mark_dirty_only_on_change() {
        let dataset = gradient();
        let lookup = TransferLookup::transparent();
        let mut slicer = SliceRenderer::new(SliceAxis::Axial, HuWindow::new(-1000.0, 1000.0));
        slicer.render_if_needed(&dataset, &lookup);

        slicer.set_window(HuWindow::new(-1000.0, 1000.0));
        slicer.set_slice_index(0);
        slicer.set_transfer_function_enabled(false);
        assert!(!slicer.is_dirty());

        slicer.set_window(HuWindow::new(-500.0, 500.0));
        assert!(slicer.is_dirty());
        slicer.render_if_needed(&dataset, &lookup);

        slicer.set_slice_index(2);
        slicer.render_if_needed(&dataset, &lookup);

        slicer.set_transfer_function_enabled(true);
        slicer.render_if_needed(&dataset, &lookup);
        assert_eq!(slicer.render_count(), 4);
    }

    #[test]
    fn test_new_dataset_forces_recompute() {
        let lookup = TransferLookup::transparent();
        let mut slicer = SliceRenderer::new(SliceAxis::Coronal, HuWindow::default());
        slicer.render_if_needed(&gradient(), &lookup);
        slicer.render_if_needed(&gradient(), &lookup);
        assert_eq!(slicer.render_count(), 2);
    }

    #[test]
    fn test_grayscale_follows_window() {
        let dataset = gradient();
        let lookup = TransferLookup::transparent();
        let mut slicer = SliceRenderer::new(SliceAxis::Axial, HuWindow::new(-1000.0, 1000.0));
        let image = slicer.render_if_needed(&dataset, &lookup);

        let left = image.pixel(0, 0);
        let right = image.pixel(15, 0);
        assert!(left[0] < right[0]);
        assert_eq!(left[0], left[1]);
        assert_eq!(left[3], 255);
    }

    #[test]
    fn test_transfer_function_colours_slice() {
        let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([4, 4, 4]).unwrap();
        let lookup = presets::grayscale_ramp().lookup();
        let mut slicer = SliceRenderer::new(SliceAxis::Sagittal, HuWindow::new(-150.0, 150.0));
        slicer.set_transfer_function_enabled(true);

        let pixel = slicer.render_if_needed(&dataset, &lookup).pixel(1, 1);
        let expected = lookup.sample(0.5);
        assert_eq!(pixel[3], to_unorm8(expected[3]));
        assert!(pixel[3] > 100 && pixel[3] < 155);
    }

    #[test]
    fn test_slice_position_and_clamping() {
        let dataset = gradient();
        let mut slicer = SliceRenderer::new(SliceAxis::Axial, HuWindow::default());
        slicer.set_slice_position(&dataset, 1.0);
        assert_eq!(slicer.slice_index(), 3);

        slicer.set_slice_index(99);
        let image = slicer.render_if_needed(&dataset, &TransferLookup::transparent());
        assert_eq!(image.rgba.len(), 16 * 8 * 4);
    }
}
