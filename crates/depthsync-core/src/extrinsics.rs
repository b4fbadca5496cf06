//! Rigid transforms between stream coordinate frames.

use crate::{
    config::FrameIds,
    messages::{Header, Quaternion, TransformStamped, Vec3},
    profile::StreamProfile,
    types::{DEPTH, StreamKey},
};
use eyre::{Result, eyre};
use indexmap::IndexMap;
use nalgebra::{Isometry3, Matrix3, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::{f32::consts::FRAC_PI_2, time::Duration};
use tracing::info;

/// Rotation and translation from one stream's frame to another's.
///
/// The rotation is stored column-major, the layout used by depth camera
/// firmware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    /// Translation in meters.
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }

    /// A pure translation.
    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            translation: [x, y, z],
            ..Self::identity()
        }
    }

    pub fn from_parts(rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Self {
        let mut rot = [0.0; 9];
        rot.copy_from_slice(rotation.as_slice());
        Self {
            rotation: rot,
            translation: [translation.x, translation.y, translation.z],
        }
    }

    pub fn from_isometry(iso: &Isometry3<f32>) -> Self {
        let rotation = iso.rotation.to_rotation_matrix().into_inner();
        Self::from_parts(&rotation, &iso.translation.vector)
    }

    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_column_slice(&self.rotation)
    }

    pub fn translation_vector(&self) -> Vector3<f32> {
        Vector3::from(self.translation)
    }

    pub fn to_isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(
            Translation3::from(self.translation_vector()),
            UnitQuaternion::from_matrix(&self.rotation_matrix()),
        )
    }

    /// Maps a point from the source frame to the target frame.
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let p = self.rotation_matrix() * point.coords + self.translation_vector();
        Point3::from(p)
    }

    /// The transform in the opposite direction.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation_matrix().transpose();
        let t = -(rt * self.translation_vector());
        Self::from_parts(&rt, &t)
    }

    /// Applies `self` and then `next`.
    pub fn then(&self, next: &Extrinsics) -> Self {
        let r = next.rotation_matrix() * self.rotation_matrix();
        let t = next.rotation_matrix() * self.translation_vector() + next.translation_vector();
        Self::from_parts(&r, &t)
    }
}

/// Computes extrinsics between enabled streams. Each enabled profile
/// carries its transform into the depth frame.
#[derive(Debug, Clone)]
pub struct ExtrinsicsCalculator<'a> {
    profiles: &'a IndexMap<StreamKey, StreamProfile>,
}

impl<'a> ExtrinsicsCalculator<'a> {
    pub fn new(profiles: &'a IndexMap<StreamKey, StreamProfile>) -> Self {
        Self { profiles }
    }

    /// Extrinsics from `from` to `to`. Both streams must be enabled.
    pub fn extrinsics(&self, from: StreamKey, to: StreamKey) -> Result<Extrinsics> {
        let from_profile = self
            .profiles
            .get(&from)
            .ok_or_else(|| eyre!("stream {from} has no enabled profile"))?;
        let to_profile = self
            .profiles
            .get(&to)
            .ok_or_else(|| eyre!("stream {to} has no enabled profile"))?;

        Ok(from_profile
            .extrinsics_to_depth
            .then(&to_profile.extrinsics_to_depth.inverse()))
    }
}

/// Converts a column-major rotation to a quaternion.
pub fn quaternion_from_rotation(rotation: &[f32; 9]) -> UnitQuaternion<f32> {
    // Reading the slice column by column yields the row-major matrix
    // the conversion expects.
    let m = Matrix3::from_column_slice(rotation);
    UnitQuaternion::from_matrix(&m)
}

/// Rotation from a body frame (x forward, y left, z up) to its optical
/// frame (x right, y down, z forward).
pub fn optical_quaternion() -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(-FRAC_PI_2, 0.0, -FRAC_PI_2)
}

/// Builds a static transform record. The camera-space translation
/// (x, y, z) is published as (z, -x, -y).
pub fn static_transform(
    stamp: Duration,
    translation: [f32; 3],
    rotation: Quaternion,
    from: &str,
    to: &str,
) -> TransformStamped {
    let [x, y, z] = translation;
    TransformStamped {
        header: Header::new(stamp, from),
        child_frame_id: to.to_string(),
        translation: Vec3::from([z, -x, -y]),
        rotation,
    }
}

/// Static transforms of every enabled image stream relative to the base
/// frame, with the depth frame as base link.
pub fn static_transforms(
    calculator: &ExtrinsicsCalculator<'_>,
    frame_ids: &FrameIds,
    streams: &[StreamKey],
    align_depth: bool,
    stamp: Duration,
) -> Result<Vec<TransformStamped>> {
    let q_optical = optical_quaternion();
    let optical = Quaternion::from(q_optical);
    let zero = [0.0; 3];

    let mut transforms = vec![
        static_transform(
            stamp,
            zero,
            Quaternion::IDENTITY,
            &frame_ids.base,
            frame_ids.frame(DEPTH),
        ),
        static_transform(
            stamp,
            zero,
            optical,
            frame_ids.frame(DEPTH),
            frame_ids.optical(DEPTH),
        ),
    ];

    for &key in streams.iter().filter(|&&key| key != DEPTH) {
        let ex = calculator.extrinsics(key, DEPTH)?;
        let q = q_optical * quaternion_from_rotation(&ex.rotation) * q_optical.inverse();
        let rotation = Quaternion::from(q);

        transforms.push(static_transform(
            stamp,
            ex.translation,
            rotation,
            &frame_ids.base,
            frame_ids.frame(key),
        ));
        transforms.push(static_transform(
            stamp,
            zero,
            optical,
            frame_ids.frame(key),
            frame_ids.optical(key),
        ));

        if align_depth && let Some(aligned) = frame_ids.aligned(key) {
            transforms.push(static_transform(
                stamp,
                ex.translation,
                rotation,
                &frame_ids.base,
                aligned,
            ));
            transforms.push(static_transform(
                stamp,
                zero,
                optical,
                aligned,
                frame_ids.optical(key),
            ));
        }
    }

    info!(count = transforms.len(), "static transforms computed");
    Ok(transforms)
}
