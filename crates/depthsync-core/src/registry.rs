//! Static description of the streams a depth camera can deliver.

use crate::types::{
    ACCEL, COLOR, DEPTH, Encoding, FISHEYE, FISHEYE1, FISHEYE2, Format, GYRO, INFRA1, INFRA2,
    StreamKey,
};

/// Per-stream metadata known before any device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Short name used to build topic names, e.g. `infra1`.
    pub name: &'static str,
    /// Format requested from the device.
    pub format: Format,
    /// Encoding of the published image.
    pub encoding: Encoding,
    /// Bytes per pixel of the published image.
    pub unit_step_size: u32,
    /// Encoding of depth aligned to this stream, if alignment targets it.
    pub aligned_encoding: Option<Encoding>,
    /// Whether the stream is delivered rectified by the device.
    pub rectified: bool,
}

const fn image(name: &'static str, format: Format, encoding: Encoding, step: u32) -> StreamDescriptor {
    StreamDescriptor {
        name,
        format,
        encoding,
        unit_step_size: step,
        aligned_encoding: Some(Encoding::Mono16),
        rectified: false,
    }
}

const fn motion(name: &'static str) -> StreamDescriptor {
    StreamDescriptor {
        name,
        format: Format::MotionXyz32f,
        encoding: Encoding::Mono8,
        unit_step_size: 1,
        aligned_encoding: None,
        rectified: false,
    }
}

/// Looks up the descriptor of a supported stream.
pub fn describe(key: StreamKey) -> Option<StreamDescriptor> {
    let desc = match key {
        DEPTH => StreamDescriptor {
            rectified: true,
            ..image("depth", Format::Z16, Encoding::Mono16, 2)
        },
        INFRA1 => StreamDescriptor {
            rectified: true,
            ..image("infra1", Format::Y8, Encoding::Mono8, 1)
        },
        INFRA2 => StreamDescriptor {
            rectified: true,
            ..image("infra2", Format::Y8, Encoding::Mono8, 1)
        },
        COLOR => image("color", Format::Rgb8, Encoding::Rgb8, 3),
        FISHEYE => image("fisheye", Format::Raw8, Encoding::Mono8, 1),
        FISHEYE1 => image("fisheye1", Format::Raw8, Encoding::Mono8, 1),
        FISHEYE2 => image("fisheye2", Format::Raw8, Encoding::Mono8, 1),
        GYRO => motion("gyro"),
        ACCEL => motion("accel"),
        _ => return None,
    };
    Some(desc)
}

/// Maps a sensor module name reported by the device to the streams it
/// provides. Returns `None` for modules this crate does not know.
pub fn module_streams(module_name: &str) -> Option<&'static [StreamKey]> {
    const STEREO: &[StreamKey] = &[DEPTH, INFRA1, INFRA2];
    const CODED_LIGHT: &[StreamKey] = &[DEPTH, INFRA1];
    const RGB: &[StreamKey] = &[COLOR];
    const WIDE_FOV: &[StreamKey] = &[FISHEYE];
    const MOTION: &[StreamKey] = &[GYRO, ACCEL];

    match module_name {
        "Stereo Module" => Some(STEREO),
        "Coded-Light Depth Sensor" => Some(CODED_LIGHT),
        "RGB Camera" => Some(RGB),
        "Wide FOV Camera" => Some(WIDE_FOV),
        "Motion Module" => Some(MOTION),
        _ => None,
    }
}

/// Topic carrying the raw images of a stream.
pub fn image_topic(desc: &StreamDescriptor) -> String {
    if desc.rectified {
        format!("{}/image_rect_raw", desc.name)
    } else {
        format!("{}/image_raw", desc.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IMAGE_STREAMS, StreamKind};

    #[test]
    fn test_every_image_stream_is_described() {
        for key in IMAGE_STREAMS {
            let desc = describe(key).unwrap();
            assert_eq!(desc.aligned_encoding, Some(Encoding::Mono16));
            assert_eq!(desc.format.bytes_per_pixel() as u32, desc.unit_step_size);
        }
    }

    #[test]
    fn test_unknown_stream_has_no_descriptor() {
        assert!(describe(StreamKey::new(StreamKind::Infrared, 3)).is_none());
        assert!(describe(StreamKey::new(StreamKind::Any, 0)).is_none());
    }

    #[test]
    fn test_module_streams() {
        assert_eq!(module_streams("Stereo Module").unwrap(), &[DEPTH, INFRA1, INFRA2]);
        assert_eq!(module_streams("Motion Module").unwrap(), &[GYRO, ACCEL]);
        assert!(module_streams("Tracking Module").is_none());
    }

    #[test]
    fn test_image_topic() {
        assert_eq!(image_topic(&describe(DEPTH).unwrap()), "depth/image_rect_raw");
        assert_eq!(image_topic(&describe(COLOR).unwrap()), "color/image_raw");
    }
}
