//! Conversion of a point set into a colored point cloud record.

use crate::{
    error::FrameSkipped,
    frame::{PointSet, VideoFrame},
    messages::Header,
    types::StreamKey,
};
use serde::Serialize;

/// Size in bytes of one packed point.
pub const POINT_STEP: usize = 16;

const WHITE: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PointCloudPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// An unordered, dense cloud. `width` is the number of points and
/// `height` is always 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointCloud {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub is_dense: bool,
    pub points: Vec<PointCloudPoint>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Packs every point as x, y, z in little-endian f32 followed by b,
    /// g, r and a zero pad byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.points.len() * POINT_STEP);
        for p in &self.points {
            bytes.extend_from_slice(&p.x.to_le_bytes());
            bytes.extend_from_slice(&p.y.to_le_bytes());
            bytes.extend_from_slice(&p.z.to_le_bytes());
            bytes.extend_from_slice(&[p.b, p.g, p.r, 0]);
        }
        bytes
    }
}

/// Builds a cloud from the points whose texture coordinates lie in the
/// unit square.
///
/// When `texture_key` is set the texture frame must be present and carry
/// three bytes per pixel; each point takes the color of the nearest
/// texture pixel. Without a texture stream every point is white.
pub fn build(
    points: &PointSet,
    texture_key: Option<StreamKey>,
    texture: Option<&VideoFrame>,
    header: Header,
) -> Result<PointCloud, FrameSkipped> {
    let texture = match texture_key {
        Some(key) => {
            let frame = texture.ok_or(FrameSkipped::MissingFrame(key))?;
            if frame.bytes_per_pixel() != 3 {
                return Err(FrameSkipped::UnsupportedTexture {
                    key,
                    format: frame.format,
                });
            }
            if frame.data.len() < frame.pixel_count() * 3 {
                return Err(FrameSkipped::MalformedFrame(key));
            }
            Some(frame)
        }
        None => None,
    };

    let cloud: Vec<PointCloudPoint> = points
        .vertices
        .iter()
        .zip(&points.texture_coordinates)
        .filter(|(_, tex)| tex.is_valid())
        .map(|(vertex, tex)| {
            let [r, g, b] = match texture {
                Some(frame) => {
                    let (w, h) = (frame.width as usize, frame.height as usize);
                    let px = ((tex.u * w as f32) as usize).min(w.saturating_sub(1));
                    let py = ((tex.v * h as f32) as usize).min(h.saturating_sub(1));
                    let offset = (py * w + px) * 3;
                    [
                        frame.data[offset],
                        frame.data[offset + 1],
                        frame.data[offset + 2],
                    ]
                }
                None => WHITE,
            };

            PointCloudPoint {
                x: vertex.x,
                y: vertex.y,
                z: vertex.z,
                r,
                g,
                b,
            }
        })
        .collect();

    Ok(PointCloud {
        header,
        width: cloud.len() as u32,
        height: 1,
        is_dense: true,
        points: cloud,
    })
}
