//! Intrinsic calibration of image and motion streams, and the pinhole
//! model used to move between pixels and 3-D points.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Lens distortion model tag attached to an intrinsic calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    #[default]
    None,
    /// Distortion is applied when projecting points to pixels.
    ModifiedBrownConrady,
    /// Distortion is undone when deprojecting pixels to points.
    InverseBrownConrady,
    BrownConrady,
}

/// Pinhole intrinsics of an image stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    /// Principal point, horizontal, in pixels.
    pub ppx: f32,
    /// Principal point, vertical, in pixels.
    pub ppy: f32,
    pub fx: f32,
    pub fy: f32,
    pub model: DistortionModel,
    pub coeffs: [f32; 5],
}

impl Intrinsics {
    /// An undistorted pinhole with the principal point at the image
    /// center.
    pub fn ideal(focal: f32, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
            fx: focal,
            fy: focal,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        }
    }

    /// Rescales the calibration for an image downsampled by `factor`.
    pub fn scaled(&self, factor: u32, width: u32, height: u32) -> Self {
        let f = factor as f32;
        Self {
            width,
            height,
            ppx: self.ppx / f,
            ppy: self.ppy / f,
            fx: self.fx / f,
            fy: self.fy / f,
            ..*self
        }
    }

    /// Calibration of a `width` x `height` image taken from this one,
    /// either at full resolution or downsampled by an integer factor.
    pub fn fit_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.width == width && self.height == height {
            return Some(*self);
        }
        if width == 0 || height == 0 {
            return None;
        }

        let factor = self.width / width;
        (factor > 1 && self.width / factor == width && self.height / factor == height)
            .then(|| self.scaled(factor, width, height))
    }

    /// Projects a point in the camera frame onto the image plane.
    pub fn project(&self, point: &Point3<f32>) -> Point2<f32> {
        let mut x = point.x / point.z;
        let mut y = point.y / point.z;

        if matches!(
            self.model,
            DistortionModel::ModifiedBrownConrady | DistortionModel::BrownConrady
        ) {
            let [k1, k2, p1, p2, k3] = self.coeffs;
            let r2 = x * x + y * y;
            let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            x *= f;
            y *= f;
            let dx = x + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = y + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
            x = dx;
            y = dy;
        }

        Point2::new(x * self.fx + self.ppx, y * self.fy + self.ppy)
    }

    /// Lifts a pixel with known depth (in meters) to a point in the
    /// camera frame.
    pub fn deproject(&self, pixel: &Point2<f32>, depth: f32) -> Point3<f32> {
        let mut x = (pixel.x - self.ppx) / self.fx;
        let mut y = (pixel.y - self.ppy) / self.fy;

        if self.model == DistortionModel::InverseBrownConrady {
            let [k1, k2, p1, p2, k3] = self.coeffs;
            let r2 = x * x + y * y;
            let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let ux = x * f + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let uy = y * f + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
            x = ux;
            y = uy;
        }

        Point3::new(depth * x, depth * y, depth)
    }
}

/// Intrinsics of a motion sensor: a 3x4 scale/bias matrix plus noise
/// and bias variances per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionIntrinsics {
    pub data: [[f32; 4]; 3],
    pub noise_variances: [f32; 3],
    pub bias_variances: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_deproject_ideal() {
        let intr = Intrinsics::ideal(600.0, 640, 480);
        let point = intr.deproject(&Point2::new(400.0, 100.0), 2.0);
        assert!((point.z - 2.0).abs() < 1e-6);

        let pixel = intr.project(&point);
        assert!((pixel.x - 400.0).abs() < 1e-3);
        assert!((pixel.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_principal_point_maps_to_optical_axis() {
        let intr = Intrinsics::ideal(500.0, 640, 480);
        let point = intr.deproject(&Point2::new(320.0, 240.0), 1.5);
        assert_eq!(point, Point3::new(0.0, 0.0, 1.5));
    }

    #[test]
    fn test_scaled_intrinsics() {
        let intr = Intrinsics::ideal(600.0, 640, 480);
        let half = intr.scaled(2, 320, 240);
        assert_eq!(half.fx, 300.0);
        assert_eq!(half.ppx, 160.0);
        assert_eq!((half.width, half.height), (320, 240));
    }

    #[test]
    fn test_fit_to_decimated_resolution() {
        let intr = Intrinsics::ideal(600.0, 640, 480);
        assert_eq!(intr.fit_to(640, 480), Some(intr));
        assert_eq!(intr.fit_to(320, 240), Some(intr.scaled(2, 320, 240)));
        assert_eq!(intr.fit_to(213, 160), Some(intr.scaled(3, 213, 160)));
        assert_eq!(intr.fit_to(320, 200), None);
        assert_eq!(intr.fit_to(1280, 960), None);
        assert_eq!(intr.fit_to(0, 0), None);
    }

    #[test]
    fn test_distortion_moves_off_axis_pixels() {
        let mut intr = Intrinsics::ideal(600.0, 640, 480);
        intr.model = DistortionModel::ModifiedBrownConrady;
        intr.coeffs = [0.1, 0.0, 0.0, 0.0, 0.0];

        let on_axis = intr.project(&Point3::new(0.0, 0.0, 1.0));
        assert_eq!(on_axis, Point2::new(320.0, 240.0));

        let off_axis = intr.project(&Point3::new(0.5, 0.0, 1.0));
        assert!(off_axis.x > 320.0 + 0.5 * 600.0);
    }
}
