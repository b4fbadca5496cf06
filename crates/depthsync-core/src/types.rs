use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Creates the device timestamp used by the synchronizer to group frames.
pub trait WithTimestamp: Send {
    fn timestamp(&self) -> Duration;
}

/// The kind of a sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Any,
    Depth,
    Infrared,
    Color,
    Fisheye,
    Gyro,
    Accel,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Any => "any",
            StreamKind::Depth => "depth",
            StreamKind::Infrared => "infrared",
            StreamKind::Color => "color",
            StreamKind::Fisheye => "fisheye",
            StreamKind::Gyro => "gyro",
            StreamKind::Accel => "accel",
        }
    }

    /// Checks if frames of this kind carry motion samples instead of
    /// pixels.
    pub fn is_motion(&self) -> bool {
        matches!(self, StreamKind::Gyro | StreamKind::Accel)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical stream: the stream kind plus its sub-index.
///
/// Every enabled stream owns exactly one key, and all per-stream state
/// of a session is indexed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub kind: StreamKind,
    pub index: u32,
}

impl StreamKey {
    pub const fn new(kind: StreamKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.kind, self.index)
    }
}

pub const DEPTH: StreamKey = StreamKey::new(StreamKind::Depth, 0);
pub const INFRA1: StreamKey = StreamKey::new(StreamKind::Infrared, 1);
pub const INFRA2: StreamKey = StreamKey::new(StreamKind::Infrared, 2);
pub const COLOR: StreamKey = StreamKey::new(StreamKind::Color, 0);
pub const FISHEYE: StreamKey = StreamKey::new(StreamKind::Fisheye, 0);
pub const FISHEYE1: StreamKey = StreamKey::new(StreamKind::Fisheye, 1);
pub const FISHEYE2: StreamKey = StreamKey::new(StreamKind::Fisheye, 2);
pub const GYRO: StreamKey = StreamKey::new(StreamKind::Gyro, 0);
pub const ACCEL: StreamKey = StreamKey::new(StreamKind::Accel, 0);

/// Streams delivering images, in the order sensors are opened.
pub const IMAGE_STREAMS: [StreamKey; 7] = [DEPTH, INFRA1, INFRA2, COLOR, FISHEYE, FISHEYE1, FISHEYE2];

/// Streams delivering motion samples.
pub const HID_STREAMS: [StreamKey; 2] = [GYRO, ACCEL];

/// Pixel or sample format of a frame as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Any,
    /// 16-bit depth in device units.
    Z16,
    /// 32-bit float disparity.
    Disparity32,
    Y8,
    Rgb8,
    Raw8,
    MotionXyz32f,
}

impl Format {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Format::Any => 0,
            Format::Z16 => 2,
            Format::Disparity32 => 4,
            Format::Y8 | Format::Raw8 => 1,
            Format::Rgb8 => 3,
            Format::MotionXyz32f => 12,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Any => "ANY",
            Format::Z16 => "Z16",
            Format::Disparity32 => "DISPARITY32",
            Format::Y8 => "Y8",
            Format::Rgb8 => "RGB8",
            Format::Raw8 => "RAW8",
            Format::MotionXyz32f => "MOTION_XYZ32F",
        };
        f.write_str(name)
    }
}

/// Image encoding announced to consumers of published images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "16UC1")]
    Mono16,
    #[serde(rename = "8UC1")]
    Mono8,
    #[serde(rename = "rgb8")]
    Rgb8,
    #[serde(rename = "32FC1")]
    Float32,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Mono16 => "16UC1",
            Encoding::Mono8 => "8UC1",
            Encoding::Rgb8 => "rgb8",
            Encoding::Float32 => "32FC1",
        }
    }

    /// Maps a device format to the encoding its pixels are published in.
    pub fn for_format(format: Format) -> Option<Self> {
        match format {
            Format::Z16 => Some(Encoding::Mono16),
            Format::Y8 | Format::Raw8 => Some(Encoding::Mono8),
            Format::Rgb8 => Some(Encoding::Rgb8),
            Format::Disparity32 => Some(Encoding::Float32),
            Format::Any | Format::MotionXyz32f => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clock domain the device stamped a frame in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampDomain {
    #[default]
    HardwareClock,
    /// Frame metadata is unavailable and the host clock was used instead.
    SystemTime,
    GlobalTime,
}

/// Converts a device timestamp in milliseconds to a [Duration],
/// flooring negative values at zero.
pub fn device_ms_to_duration(timestamp_ms: f64) -> Duration {
    if timestamp_ms > 0.0 {
        Duration::try_from_secs_f64(timestamp_ms / 1000.0).unwrap_or_default()
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        assert_eq!(INFRA1.to_string(), "(infrared, 1)");
        assert_eq!(DEPTH.to_string(), "(depth, 0)");
    }

    #[test]
    fn test_stream_keys_are_distinct() {
        let mut keys: Vec<_> = IMAGE_STREAMS.iter().chain(HID_STREAMS.iter()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), IMAGE_STREAMS.len() + HID_STREAMS.len());
    }

    #[test]
    fn test_encoding_for_format() {
        assert_eq!(Encoding::for_format(Format::Z16), Some(Encoding::Mono16));
        assert_eq!(Encoding::for_format(Format::Rgb8), Some(Encoding::Rgb8));
        assert_eq!(Encoding::for_format(Format::MotionXyz32f), None);
    }

    #[test]
    fn test_device_ms_to_duration() {
        assert_eq!(device_ms_to_duration(1500.0), Duration::from_millis(1500));
        assert_eq!(device_ms_to_duration(-3.0), Duration::ZERO);
        assert_eq!(device_ms_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(device_ms_to_duration(f64::INFINITY), Duration::ZERO);
        assert_eq!(device_ms_to_duration(1e300), Duration::ZERO);
    }
}
