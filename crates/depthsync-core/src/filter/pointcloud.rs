use super::{Filter, FilterContext, TextureTarget};
use crate::{
    calibration::Intrinsics,
    frame::{CompositeFrame, PointSet, SubFrame, TexCoord, VideoFrame, Vertex},
    types::{Format, StreamKind},
};
use nalgebra::Point2;
use tracing::debug;

/// Texture coordinate given to pixels without depth. It lies outside the
/// unit square so the point is dropped downstream.
const NO_DEPTH: TexCoord = TexCoord { u: -1.0, v: -1.0 };

/// Deprojects the first depth sub-frame into vertices and appends them
/// as a point set.
#[derive(Debug, Clone)]
pub struct PointCloudGenerator {
    depth_scale: f32,
    stereo_baseline: f32,
    depth_intrinsics: Option<Intrinsics>,
    texture: Option<TextureTarget>,
}

impl PointCloudGenerator {
    pub fn new(context: &FilterContext) -> Self {
        Self {
            depth_scale: context.depth_scale,
            stereo_baseline: context.stereo_baseline,
            depth_intrinsics: context.depth_intrinsics,
            texture: context.texture,
        }
    }

    /// Depth of every pixel in meters, or `None` when the frame does not
    /// carry depth.
    fn depth_meters(&self, frame: &VideoFrame) -> Option<Vec<f32>> {
        match frame.format {
            Format::Z16 => Some(
                frame
                    .depth_samples()?
                    .into_iter()
                    .map(|d| d as f32 * self.depth_scale)
                    .collect(),
            ),
            Format::Disparity32 => {
                let factor = self.depth_intrinsics?.fx * self.stereo_baseline;
                Some(
                    frame
                        .disparity_samples()?
                        .into_iter()
                        .map(|d| if d > 0.0 { factor / d } else { 0.0 })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// Calibration matching the frame resolution.
    fn intrinsics_for(&self, frame: &VideoFrame) -> Option<Intrinsics> {
        frame
            .intrinsics
            .or_else(|| self.depth_intrinsics?.fit_to(frame.width, frame.height))
    }

    pub fn generate(&self, frame: &VideoFrame) -> Option<PointSet> {
        let depth = self.depth_meters(frame)?;
        let intr = self.intrinsics_for(frame)?;
        let width = frame.width as usize;

        let mut vertices = Vec::with_capacity(depth.len());
        let mut texture_coordinates = Vec::with_capacity(depth.len());

        for (i, &z) in depth.iter().enumerate() {
            if z <= 0.0 {
                vertices.push(Vertex::default());
                texture_coordinates.push(NO_DEPTH);
                continue;
            }

            let pixel = Point2::new((i % width) as f32, (i / width) as f32);
            let point = intr.deproject(&pixel, z);
            vertices.push(Vertex {
                x: point.x,
                y: point.y,
                z: point.z,
            });

            let tex = match &self.texture {
                Some(target) => {
                    let p = target.depth_to_texture.transform_point(&point);
                    let pix = target.intrinsics.project(&p);
                    TexCoord {
                        u: pix.x / target.intrinsics.width as f32,
                        v: pix.y / target.intrinsics.height as f32,
                    }
                }
                None => TexCoord::default(),
            };
            texture_coordinates.push(tex);
        }

        Some(PointSet {
            key: frame.key,
            vertices,
            texture_coordinates,
            timestamp_ms: frame.timestamp_ms,
            frame_number: frame.frame_number,
        })
    }
}

impl Filter for PointCloudGenerator {
    fn name(&self) -> &'static str {
        "pointcloud"
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        let depth = frames
            .iter()
            .filter_map(SubFrame::as_video)
            .find(|frame| frame.key.kind == StreamKind::Depth);

        let Some(depth) = depth else {
            debug!("no depth frame to build a point cloud from");
            return frames;
        };

        match self.generate(depth) {
            Some(points) => frames.push(SubFrame::Points(points)),
            None => debug!(format = %depth.format, "depth frame cannot be deprojected"),
        }
        frames
    }
}
