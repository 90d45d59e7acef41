/// Camera matrices in the form the ray-march shaders consume
///
/// The volume occupies the local unit cube `[0,1]^3`. The model matrix maps
/// that cube into world space, scaled by the physical extent and centred at
/// the origin, so anisotropic spacing renders with the right proportions.

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix, Vector3, Vector4};

const NEAR_PLANE: f32 = 0.01;
const FAR_PLANE: f32 = 100.0;

/// Depth at which pixels are unprojected; any depth inside the frustum
/// gives a point on the same view ray
const UNPROJECT_DEPTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParameters {
    pub model: Matrix4<f32>,
    pub inverse_model: Matrix4<f32>,
    pub inverse_view_projection: Matrix4<f32>,
    /// Camera position in local `[0,1]^3` coordinates
    pub camera_local: Vector3<f32>,
}

impl CameraParameters {
    /// Assemble parameters from a model matrix and a view-projection.
    /// Returns `None` if either matrix is singular.
    pub fn new(model: Matrix4<f32>, view: Matrix4<f32>, projection: Matrix4<f32>, eye: Point3<f32>) -> Option<Self> {
        let inverse_model = model.invert()?;
        let inverse_view_projection = (projection * view).invert()?;
        let local = inverse_model * eye.to_homogeneous();
        if local.w == 0.0 {
            return None;
        }

        Some(Self {
            model,
            inverse_model,
            inverse_view_projection,
            camera_local: local.truncate() / local.w,
        })
    }

    /// Orbit camera looking at the volume centre.
    ///
    /// - `extent`: physical size of the volume (mm), see `VolumeDataset::physical_extent`
    /// - `yaw`/`pitch`: orbit angles in degrees
    /// - `distance`: eye distance from the centre, in units of the longest side
    /// - `fov_y`: vertical field of view in degrees
    pub fn orbit(extent: [f32; 3], yaw: f32, pitch: f32, distance: f32, fov_y: f32, aspect: f32) -> Option<Self> {
        let longest = extent[0].max(extent[1]).max(extent[2]);
        if !(longest > 0.0) || !(aspect > 0.0) {
            return None;
        }

        let model = Matrix4::from_nonuniform_scale(extent[0] / longest, extent[1] / longest, extent[2] / longest)
            * Matrix4::from_translation(Vector3::new(-0.5, -0.5, -0.5));

        let (yaw, pitch) = (yaw.to_radians(), pitch.to_radians());
        let eye = Point3::new(
            distance * pitch.cos() * yaw.sin(),
            distance * pitch.sin(),
            distance * pitch.cos() * yaw.cos(),
        );

        let view = Matrix4::look_at_rh(eye, Point3::origin(), Vector3::unit_y());
        let projection = cgmath::perspective(Deg(fov_y), aspect, NEAR_PLANE, FAR_PLANE);
        Self::new(model, view, projection, eye)
    }

    /// Point on the view ray through pixel centre `pixel`, in local space.
    /// Matches `pixel_local` in the WGSL ray-march library.
    pub fn unproject_pixel(&self, pixel: [f32; 2], output_size: (u32, u32)) -> Vector3<f32> {
        let (width, height) = (output_size.0 as f32, output_size.1 as f32);
        let ndc_x = pixel[0] / width * 2.0 - 1.0;
        let ndc_y = 1.0 - pixel[1] / height * 2.0;

        let world = self.inverse_view_projection * Vector4::new(ndc_x, ndc_y, UNPROJECT_DEPTH, 1.0);
        let world = world / world.w;
        let local = self.inverse_model * world;
        local.truncate() / local.w
    }

    /// Unit view direction from the camera towards the volume centre (local space)
    pub fn forward_local(&self) -> Vector3<f32> {
        let delta = Vector3::new(0.5, 0.5, 0.5) - self.camera_local;
        if delta.magnitude2() == 0.0 {
            delta
        } else {
            delta.normalize()
        }
    }

    pub(crate) fn inverse_model_columns(&self) -> [[f32; 4]; 4] {
        self.inverse_model.into()
    }

    pub(crate) fn inverse_view_projection_columns(&self) -> [[f32; 4]; 4] {
        self.inverse_view_projection.into()
    }
}
