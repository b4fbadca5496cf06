//! Negotiation of stream profiles against the capabilities a sensor
//! advertises.

use crate::{
    calibration::{Intrinsics, MotionIntrinsics},
    extrinsics::Extrinsics,
    registry,
    types::{Format, StreamKey},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Requested resolution and rate. Zero accepts any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamRequest {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Accepts any resolution and rate.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn accepts(&self, profile: &StreamProfile) -> bool {
        (self.width == 0 || self.width == profile.width)
            && (self.height == 0 || self.height == profile.height)
            && (self.fps == 0 || self.fps == profile.fps)
    }
}

/// A stream configuration offered by a sensor, with the calibration that
/// goes with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub key: StreamKey,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub intrinsics: Option<Intrinsics>,
    pub motion_intrinsics: Option<MotionIntrinsics>,
    /// Transform from this stream's frame into the depth frame.
    #[serde(default)]
    pub extrinsics_to_depth: Extrinsics,
}

impl StreamProfile {
    pub fn video(key: StreamKey, format: Format, width: u32, height: u32, fps: u32) -> Self {
        Self {
            key,
            format,
            width,
            height,
            fps,
            intrinsics: None,
            motion_intrinsics: None,
            extrinsics_to_depth: Extrinsics::identity(),
        }
    }

    pub fn motion(key: StreamKey, fps: u32) -> Self {
        Self::video(key, Format::MotionXyz32f, 0, 0, fps)
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn with_motion_intrinsics(mut self, intrinsics: MotionIntrinsics) -> Self {
        self.motion_intrinsics = Some(intrinsics);
        self
    }

    pub fn with_extrinsics_to_depth(mut self, extrinsics: Extrinsics) -> Self {
        self.extrinsics_to_depth = extrinsics;
        self
    }
}

/// Selects the first video profile of `key` in its registry format that
/// satisfies the request. On success the request is overwritten with the
/// negotiated values.
pub fn resolve_video(
    key: StreamKey,
    request: &mut StreamRequest,
    capabilities: &[StreamProfile],
) -> Option<StreamProfile> {
    let format = registry::describe(key)?.format;

    let profile = capabilities
        .iter()
        .inspect(|profile| {
            debug!(
                stream = %profile.key,
                format = %profile.format,
                width = profile.width,
                height = profile.height,
                fps = profile.fps,
                "Sensor profile"
            );
        })
        .find(|profile| {
            profile.key == key && profile.format == format && request.accepts(profile)
        })?
        .clone();

    *request = StreamRequest::new(profile.width, profile.height, profile.fps);
    info!(
        stream = %key,
        width = profile.width,
        height = profile.height,
        fps = profile.fps,
        "stream is enabled"
    );
    Some(profile)
}

/// Selects the first motion profile of `key` with exactly the requested
/// rate.
pub fn resolve_motion(key: StreamKey, fps: u32, capabilities: &[StreamProfile]) -> Option<StreamProfile> {
    let format = registry::describe(key)?.format;
    let profile = capabilities
        .iter()
        .find(|profile| profile.key == key && profile.format == format && profile.fps == fps)?
        .clone();

    info!(stream = %key, fps, "motion stream is enabled");
    Some(profile)
}

/// Logs an unsupported request. The caller disables the stream.
pub(crate) fn warn_unsupported(key: StreamKey, request: &StreamRequest) {
    let format = registry::describe(key).map(|desc| desc.format).unwrap_or(Format::Any);
    warn!(
        stream = %key,
        %format,
        width = request.width,
        height = request.height,
        fps = request.fps,
        "Given stream configuration is not supported by the device!"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEPTH, GYRO, INFRA1};

    fn capabilities() -> Vec<StreamProfile> {
        vec![
            StreamProfile::video(DEPTH, Format::Z16, 1280, 720, 30),
            StreamProfile::video(DEPTH, Format::Z16, 640, 480, 60),
            StreamProfile::video(DEPTH, Format::Z16, 640, 480, 30),
            StreamProfile::video(INFRA1, Format::Y8, 640, 480, 30),
            StreamProfile::motion(GYRO, 200),
            StreamProfile::motion(GYRO, 400),
        ]
    }

    #[test]
    fn test_exact_match() {
        let mut request = StreamRequest::new(640, 480, 30);
        let profile = resolve_video(DEPTH, &mut request, &capabilities()).unwrap();
        assert_eq!((profile.width, profile.height, profile.fps), (640, 480, 30));
        assert_eq!(request, StreamRequest::new(640, 480, 30));
    }

    #[test]
    fn test_wildcard_takes_first_and_records_values() {
        let mut request = StreamRequest::new(640, 0, 0);
        let profile = resolve_video(DEPTH, &mut request, &capabilities()).unwrap();
        assert_eq!(profile.fps, 60);
        assert_eq!(request, StreamRequest::new(640, 480, 60));

        let mut request = StreamRequest::any();
        let profile = resolve_video(DEPTH, &mut request, &capabilities()).unwrap();
        assert_eq!(profile.width, 1280);
    }

    #[test]
    fn test_unsupported_request() {
        let mut request = StreamRequest::new(424, 240, 90);
        assert!(resolve_video(DEPTH, &mut request, &capabilities()).is_none());
        assert_eq!(request, StreamRequest::new(424, 240, 90));
    }

    #[test]
    fn test_stream_index_must_match() {
        let mut request = StreamRequest::new(640, 480, 30);
        let infra2 = StreamKey::new(INFRA1.kind, 2);
        assert!(resolve_video(infra2, &mut request, &capabilities()).is_none());
    }

    #[test]
    fn test_motion_exact_fps() {
        assert_eq!(resolve_motion(GYRO, 400, &capabilities()).unwrap().fps, 400);
        assert!(resolve_motion(GYRO, 1000, &capabilities()).is_none());
    }
}
