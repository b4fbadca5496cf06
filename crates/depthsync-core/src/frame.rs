//! Frames delivered by the device and restructured by the filter chain.
//!
//! A delivery from the device is a [Frame], a closed union of a single
//! video frame, a composite frame bundling several streams captured at
//! one instant, or a point set. Motion samples travel separately as
//! [MotionFrame]s inside a [SensorEvent].

use crate::{
    calibration::Intrinsics,
    types::{Format, StreamKey, TimestampDomain, WithTimestamp, device_ms_to_duration},
};
use std::time::Duration;

/// Optional per-frame metadata reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameMetadata {
    /// Actual exposure in microseconds, when the device reports it.
    pub actual_exposure: Option<f64>,
}

/// A single image from one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub key: StreamKey,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// Row-major pixel data without padding.
    pub data: Vec<u8>,
    /// Device timestamp in milliseconds.
    pub timestamp_ms: f64,
    pub domain: TimestampDomain,
    pub frame_number: u64,
    pub metadata: FrameMetadata,
    /// Calibration of the stream profile the frame was produced with.
    pub intrinsics: Option<Intrinsics>,
}

impl VideoFrame {
    pub fn new(key: StreamKey, format: Format, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            key,
            format,
            width,
            height,
            data,
            timestamp_ms: 0.0,
            domain: TimestampDomain::HardwareClock,
            frame_number: 0,
            metadata: FrameMetadata::default(),
            intrinsics: None,
        }
    }

    /// Builds a Z16 frame from depth samples in device units.
    pub fn from_depth(key: StreamKey, width: u32, height: u32, depth: &[u16]) -> Self {
        let data = depth.iter().flat_map(|d| d.to_le_bytes()).collect();
        Self::new(key, Format::Z16, width, height, data)
    }

    /// Builds a disparity frame from float samples.
    pub fn from_disparity(key: StreamKey, width: u32, height: u32, disparity: &[f32]) -> Self {
        let data = disparity.iter().flat_map(|d| d.to_le_bytes()).collect();
        Self::new(key, Format::Disparity32, width, height, data)
    }

    pub fn with_timestamp(mut self, timestamp_ms: f64, frame_number: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self.frame_number = frame_number;
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// Row step in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Decodes Z16 samples. Returns `None` for other formats or when the
    /// payload does not match the frame dimensions.
    pub fn depth_samples(&self) -> Option<Vec<u16>> {
        if self.format != Format::Z16 || self.data.len() != self.pixel_count() * 2 {
            return None;
        }
        let samples = self
            .data
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        Some(samples)
    }

    /// Decodes disparity samples. Returns `None` for other formats or
    /// when the payload does not match the frame dimensions.
    pub fn disparity_samples(&self) -> Option<Vec<f32>> {
        if self.format != Format::Disparity32 || self.data.len() != self.pixel_count() * 4 {
            return None;
        }
        let samples = self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Some(samples)
    }

    /// Replaces the payload with re-encoded depth samples, keeping the
    /// frame identity and capture metadata.
    pub fn set_depth_samples(&mut self, depth: &[u16]) {
        self.format = Format::Z16;
        self.data = depth.iter().flat_map(|d| d.to_le_bytes()).collect();
    }

    pub fn set_disparity_samples(&mut self, disparity: &[f32]) {
        self.format = Format::Disparity32;
        self.data = disparity.iter().flat_map(|d| d.to_le_bytes()).collect();
    }
}

impl WithTimestamp for VideoFrame {
    fn timestamp(&self) -> Duration {
        device_ms_to_duration(self.timestamp_ms)
    }
}

/// A 3-D vertex in the depth optical frame, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Normalized texture coordinate of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TexCoord {
    pub u: f32,
    pub v: f32,
}

impl TexCoord {
    /// Checks if the coordinate lies inside the unit square.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.u) && (0.0..=1.0).contains(&self.v)
    }
}

/// A set of vertices with one texture coordinate per vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    pub key: StreamKey,
    pub vertices: Vec<Vertex>,
    pub texture_coordinates: Vec<TexCoord>,
    pub timestamp_ms: f64,
    pub frame_number: u64,
}

impl PointSet {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// One constituent of a [CompositeFrame].
#[derive(Debug, Clone, PartialEq)]
pub enum SubFrame {
    Video(VideoFrame),
    Points(PointSet),
}

impl SubFrame {
    pub fn key(&self) -> StreamKey {
        match self {
            SubFrame::Video(frame) => frame.key,
            SubFrame::Points(points) => points.key,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            SubFrame::Video(frame) => frame.format,
            SubFrame::Points(_) => Format::Any,
        }
    }

    pub fn as_video(&self) -> Option<&VideoFrame> {
        match self {
            SubFrame::Video(frame) => Some(frame),
            SubFrame::Points(_) => None,
        }
    }
}

/// An ordered bundle of sub-frames sharing one capture instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeFrame {
    frames: Vec<SubFrame>,
}

impl CompositeFrame {
    pub fn new(frames: Vec<SubFrame>) -> Self {
        Self { frames }
    }

    pub fn from_video<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = VideoFrame>,
    {
        Self {
            frames: frames.into_iter().map(SubFrame::Video).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubFrame> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SubFrame> {
        self.frames.iter_mut()
    }

    pub fn push(&mut self, frame: SubFrame) {
        self.frames.push(frame);
    }

    pub fn insert(&mut self, index: usize, frame: SubFrame) {
        self.frames.insert(index, frame);
    }

    /// Finds the first video sub-frame of the given stream.
    pub fn video(&self, key: StreamKey) -> Option<&VideoFrame> {
        self.frames
            .iter()
            .filter_map(SubFrame::as_video)
            .find(|frame| frame.key == key)
    }

    /// Position of the first video sub-frame of the given stream.
    pub fn position(&self, key: StreamKey) -> Option<usize> {
        self.frames
            .iter()
            .position(|frame| matches!(frame, SubFrame::Video(v) if v.key == key))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SubFrame> {
        self.frames.get_mut(index)
    }

    /// Device timestamp of the composite, taken from the first sub-frame.
    pub fn timestamp_ms(&self) -> f64 {
        match self.frames.first() {
            Some(SubFrame::Video(frame)) => frame.timestamp_ms,
            Some(SubFrame::Points(points)) => points.timestamp_ms,
            None => 0.0,
        }
    }

    pub fn frame_number(&self) -> u64 {
        match self.frames.first() {
            Some(SubFrame::Video(frame)) => frame.frame_number,
            Some(SubFrame::Points(points)) => points.frame_number,
            None => 0,
        }
    }

    pub fn domain(&self) -> TimestampDomain {
        self.frames
            .iter()
            .filter_map(SubFrame::as_video)
            .map(|frame| frame.domain)
            .next()
            .unwrap_or_default()
    }
}

impl IntoIterator for CompositeFrame {
    type Item = SubFrame;
    type IntoIter = std::vec::IntoIter<SubFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl<'a> IntoIterator for &'a CompositeFrame {
    type Item = &'a SubFrame;
    type IntoIter = std::slice::Iter<'a, SubFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// A delivery from an image sensor or the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Single(VideoFrame),
    Composite(CompositeFrame),
    Points(PointSet),
}

impl Frame {
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            Frame::Single(frame) => frame.timestamp_ms,
            Frame::Composite(frames) => frames.timestamp_ms(),
            Frame::Points(points) => points.timestamp_ms,
        }
    }

    pub fn domain(&self) -> TimestampDomain {
        match self {
            Frame::Single(frame) => frame.domain,
            Frame::Composite(frames) => frames.domain(),
            Frame::Points(_) => TimestampDomain::default(),
        }
    }
}

/// A sample from the gyroscope or the accelerometer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionFrame {
    pub key: StreamKey,
    /// Angular velocity (rad/s) or linear acceleration (m/s²).
    pub axes: [f32; 3],
    pub timestamp_ms: f64,
    pub domain: TimestampDomain,
    pub frame_number: u64,
}

/// Anything a device pushes into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Frame(Frame),
    Motion(MotionFrame),
}

impl From<Frame> for SensorEvent {
    fn from(frame: Frame) -> Self {
        SensorEvent::Frame(frame)
    }
}

impl From<VideoFrame> for SensorEvent {
    fn from(frame: VideoFrame) -> Self {
        SensorEvent::Frame(Frame::Single(frame))
    }
}

impl From<MotionFrame> for SensorEvent {
    fn from(sample: MotionFrame) -> Self {
        SensorEvent::Motion(sample)
    }
}
