//! Records handed to the messaging collaborator.

use crate::{
    calibration::{Intrinsics, MotionIntrinsics},
    extrinsics::Extrinsics,
    types::Encoding,
};
use nalgebra::UnitQuaternion;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Header {
    /// Project time of the record.
    #[serde(with = "humantime_serde")]
    pub stamp: Duration,
    pub frame_id: String,
    pub seq: u64,
}

impl Header {
    pub fn new(stamp: Duration, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
            seq: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub encoding: Encoding,
    pub is_bigendian: bool,
    /// Row length in bytes.
    pub step: u32,
    pub data: Vec<u8>,
}

/// Pinhole calibration record with a plumb-bob distortion model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
}

impl CameraInfo {
    pub fn from_intrinsics(intrinsics: &Intrinsics, frame_id: &str) -> Self {
        let Intrinsics {
            width,
            height,
            ppx,
            ppy,
            fx,
            fy,
            coeffs,
            ..
        } = *intrinsics;
        let (fx, fy, ppx, ppy) = (fx as f64, fy as f64, ppx as f64, ppy as f64);

        Self {
            header: Header::new(Duration::ZERO, frame_id),
            width,
            height,
            distortion_model: "plumb_bob".to_string(),
            d: coeffs.iter().map(|&c| c as f64).collect(),
            k: [fx, 0.0, ppx, 0.0, fy, ppy, 0.0, 0.0, 1.0],
            r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            p: [fx, 0.0, ppx, 0.0, 0.0, fy, ppy, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self {
            x: x as f64,
            y: y as f64,
            z: z as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl From<UnitQuaternion<f32>> for Quaternion {
    fn from(q: UnitQuaternion<f32>) -> Self {
        Self {
            x: q.i as f64,
            y: q.j as f64,
            z: q.k as f64,
            w: q.w as f64,
        }
    }
}

/// A single gyroscope or accelerometer reading. Orientation is not
/// estimated and is flagged with `-1` in the first covariance entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vec3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vec3,
    pub linear_acceleration_covariance: [f64; 9],
}

/// Intrinsics of a motion sensor, published once per session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuInfo {
    pub header: Header,
    /// Row-major 3x4 scale and bias matrix.
    pub data: [f64; 12],
    pub noise_variances: [f64; 3],
    pub bias_variances: [f64; 3],
}

impl ImuInfo {
    pub fn from_intrinsics(intrinsics: &MotionIntrinsics, frame_id: &str) -> Self {
        let mut data = [0.0; 12];
        for (i, row) in intrinsics.data.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                data[i * 4 + j] = *value as f64;
            }
        }

        Self {
            header: Header::new(Duration::ZERO, frame_id),
            data,
            noise_variances: intrinsics.noise_variances.map(|v| v as f64),
            bias_variances: intrinsics.bias_variances.map(|v| v as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub translation: Vec3,
    pub rotation: Quaternion,
}

/// Rotation (column-major) and translation between two streams.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtrinsicsMsg {
    pub header: Header,
    pub rotation: [f64; 9],
    pub translation: [f64; 3],
}

impl ExtrinsicsMsg {
    pub fn new(extrinsics: &Extrinsics, frame_id: &str) -> Self {
        Self {
            header: Header::new(Duration::ZERO, frame_id),
            rotation: extrinsics.rotation.map(|v| v as f64),
            translation: extrinsics.translation.map(|v| v as f64),
        }
    }
}

/// Side-channel record counting frames that produced output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counter {
    pub header: Header,
    pub counter: u64,
}
