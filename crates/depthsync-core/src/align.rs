//! Re-projection of depth into the pixel grid of another stream.

use crate::{
    calibration::Intrinsics,
    error::FrameSkipped,
    extrinsics::Extrinsics,
    frame::VideoFrame,
    types::StreamKey,
};
use indexmap::IndexMap;
use nalgebra::Point2;

/// Aligns depth frames to target streams and counts how often each
/// target was re-projected.
#[derive(Debug, Clone, Default)]
pub struct AlignmentEngine {
    depth_scale: f32,
    reprojections: IndexMap<StreamKey, usize>,
}

impl AlignmentEngine {
    pub fn new(depth_scale: f32) -> Self {
        Self {
            depth_scale,
            reprojections: IndexMap::new(),
        }
    }

    /// Number of re-projections into `target` since the engine was
    /// created.
    pub fn reprojections(&self, target: StreamKey) -> usize {
        self.reprojections.get(&target).copied().unwrap_or(0)
    }

    pub fn total_reprojections(&self) -> usize {
        self.reprojections.values().sum()
    }

    /// Re-projects a Z16 depth frame into the grid of `target`.
    ///
    /// Each depth pixel is deprojected at its two opposite corners,
    /// moved into the target frame and projected; the covered target
    /// pixels take the depth value, the nearest depth winning collisions.
    /// The result is a Z16 frame at the target resolution keyed by the
    /// target stream.
    pub fn align(
        &mut self,
        depth: &VideoFrame,
        depth_intrinsics: &Intrinsics,
        target: StreamKey,
        target_intrinsics: &Intrinsics,
        depth_to_target: &Extrinsics,
    ) -> Result<VideoFrame, FrameSkipped> {
        let samples = depth
            .depth_samples()
            .ok_or(FrameSkipped::MalformedFrame(depth.key))?;

        *self.reprojections.entry(target).or_default() += 1;

        let (dw, dh) = (depth.width as usize, depth.height as usize);
        let (tw, th) = (
            target_intrinsics.width as i64,
            target_intrinsics.height as i64,
        );
        let mut out = vec![0u16; (tw * th) as usize];

        let project = |x: f32, y: f32, meters: f32| {
            let point = depth_intrinsics.deproject(&Point2::new(x, y), meters);
            let point = depth_to_target.transform_point(&point);
            let pixel = target_intrinsics.project(&point);
            (pixel.x.round() as i64, pixel.y.round() as i64)
        };

        for y in 0..dh {
            for x in 0..dw {
                let raw = samples[y * dw + x];
                if raw == 0 {
                    continue;
                }
                let meters = raw as f32 * self.depth_scale;

                let (x0, y0) = project(x as f32 - 0.5, y as f32 - 0.5, meters);
                let (x1, y1) = project(x as f32 + 0.5, y as f32 + 0.5, meters);
                if x0 < 0 || y0 < 0 || x1 >= tw || y1 >= th {
                    continue;
                }

                for ty in y0..=y1 {
                    for tx in x0..=x1 {
                        let cell = &mut out[(ty * tw + tx) as usize];
                        *cell = if *cell == 0 { raw } else { (*cell).min(raw) };
                    }
                }
            }
        }

        let mut aligned = VideoFrame::from_depth(
            target,
            target_intrinsics.width,
            target_intrinsics.height,
            &out,
        );
        aligned.timestamp_ms = depth.timestamp_ms;
        aligned.domain = depth.domain;
        aligned.frame_number = depth.frame_number;
        aligned.metadata = depth.metadata;
        aligned.intrinsics = Some(*target_intrinsics);
        Ok(aligned)
    }
}
