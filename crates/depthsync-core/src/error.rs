use crate::types::{Format, StreamKey};
use std::fmt;

/// Why a derived output was not produced for a frame. The frame itself
/// is still processed.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameSkipped {
    /// The stream the output is derived from is not in the frame.
    MissingFrame(StreamKey),
    /// The texture frame does not have three bytes per pixel.
    UnsupportedTexture { key: StreamKey, format: Format },
    /// A stream has no intrinsic calibration.
    MissingCalibration(StreamKey),
    /// The payload size does not match the frame dimensions.
    MalformedFrame(StreamKey),
}

impl fmt::Display for FrameSkipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSkipped::MissingFrame(key) => write!(f, "{key} frame not found"),
            FrameSkipped::UnsupportedTexture { key, format } => {
                write!(f, "texture {key} has unsupported format {format}")
            }
            FrameSkipped::MissingCalibration(key) => write!(f, "{key} has no calibration"),
            FrameSkipped::MalformedFrame(key) => write!(f, "{key} frame payload is malformed"),
        }
    }
}

impl std::error::Error for FrameSkipped {}
