//! Per-frame processing: timestamping, filtering, fan-out and
//! publication.
//!
//! All per-stream bookkeeping lives in a [SessionContext] that the
//! [Pipeline] borrows for each frame. A frame never fails as a whole:
//! derived outputs that cannot be built are skipped, and publishing
//! errors are logged.

use crate::{
    align::AlignmentEngine,
    calibration::Intrinsics,
    config::FrameIds,
    dedup,
    error::FrameSkipped,
    extrinsics::Extrinsics,
    filter::FilterChain,
    frame::{CompositeFrame, Frame, MotionFrame, PointSet, SubFrame, VideoFrame},
    gate::{Output, OutputSink, Payload, Topic},
    messages::{CameraInfo, Counter, Header, Image, Imu, Quaternion, Vec3},
    pointcloud,
    registry::StreamDescriptor,
    time::TimeBase,
    types::{DEPTH, Encoding, GYRO, StreamKey, StreamKind},
};
use eyre::{Result, eyre};
use indexmap::IndexMap;
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

/// Publication state of one enabled stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamState {
    /// Declared format and encoding of published images.
    pub descriptor: StreamDescriptor,
    /// Calibration record of image streams. Motion streams have none.
    pub camera_info: Option<CameraInfo>,
    /// Number of frames processed so far.
    pub seq: u64,
    pub arrived: bool,
}

impl StreamState {
    pub fn new(descriptor: StreamDescriptor, camera_info: Option<CameraInfo>) -> Self {
        Self {
            descriptor,
            camera_info,
            seq: 0,
            arrived: false,
        }
    }
}

/// A stream depth is aligned to.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTarget {
    pub intrinsics: Intrinsics,
    /// Transform from the depth frame into the target frame.
    pub depth_to_target: Extrinsics,
    /// Calibration record published with aligned images. It is the
    /// target stream's own record.
    pub camera_info: CameraInfo,
    pub seq: u64,
}

/// Session-wide state shared by every frame.
#[derive(Debug)]
pub struct SessionContext {
    pub frame_ids: FrameIds,
    pub time_base: Arc<TimeBase>,
    pub streams: IndexMap<StreamKey, StreamState>,
    pub aligned: IndexMap<StreamKey, AlignedTarget>,
    /// Calibration of the negotiated depth profile.
    pub depth_intrinsics: Option<Intrinsics>,
    pub align_depth: bool,
    /// Stream sampled for point colors. `None` paints every point white.
    pub texture_key: Option<StreamKey>,
    image_counter: u64,
    send_counter: bool,
}

impl SessionContext {
    pub fn new(frame_ids: FrameIds, time_base: Arc<TimeBase>) -> Self {
        Self {
            frame_ids,
            time_base,
            streams: IndexMap::new(),
            aligned: IndexMap::new(),
            depth_intrinsics: None,
            align_depth: false,
            texture_key: None,
            image_counter: 0,
            send_counter: false,
        }
    }

    pub fn add_stream(&mut self, key: StreamKey, state: StreamState) {
        self.streams.insert(key, state);
    }

    pub fn add_aligned_target(&mut self, key: StreamKey, target: AlignedTarget) {
        self.aligned.insert(key, target);
    }

    /// Makes depth images publish as the colorized output of the color
    /// stream would. Applies to every frame processed afterwards.
    pub fn declare_colorized_depth(&mut self, color: &StreamDescriptor) {
        if let Some(depth) = self.streams.get_mut(&DEPTH) {
            depth.descriptor.format = color.format;
            depth.descriptor.encoding = color.encoding;
            depth.descriptor.unit_step_size = color.unit_step_size;
        }
    }

    pub fn seq(&self, key: StreamKey) -> u64 {
        self.streams.get(&key).map(|state| state.seq).unwrap_or(0)
    }

    pub fn aligned_seq(&self, key: StreamKey) -> u64 {
        self.aligned.get(&key).map(|target| target.seq).unwrap_or(0)
    }

    /// Number of counter records emitted.
    pub fn image_counter(&self) -> u64 {
        self.image_counter
    }

    fn mark_arrived(&mut self, key: StreamKey) {
        match self.streams.get_mut(&key) {
            Some(state) => state.arrived = true,
            None => error!(stream = %key, "Stream type is not supported!"),
        }
    }
}

/// What processing one delivery produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub published: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Topics and encoding an image is published with.
struct ImageRoute<'a> {
    image: Topic,
    info: Topic,
    encoding: Encoding,
    seq: &'a mut u64,
    camera_info: &'a mut CameraInfo,
}

/// The stateful part of frame processing: the filter chain and the
/// alignment engine.
#[derive(Debug)]
pub struct Pipeline {
    filters: FilterChain,
    aligner: AlignmentEngine,
}

impl Pipeline {
    pub fn new(filters: FilterChain, depth_scale: f32) -> Self {
        Self {
            filters,
            aligner: AlignmentEngine::new(depth_scale),
        }
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn aligner(&self) -> &AlignmentEngine {
        &self.aligner
    }

    /// Processes one image delivery. Errors are logged and counted in
    /// the report, never returned.
    pub fn process_frame(
        &mut self,
        ctx: &mut SessionContext,
        frame: Frame,
        sink: &dyn OutputSink,
    ) -> FrameReport {
        let mut report = FrameReport::default();

        if let Err(err) = self.try_process_frame(ctx, frame, sink, &mut report) {
            error!("An error has occurred during frame callback: {err:#}");
            report.errors += 1;
        }

        report
    }

    fn try_process_frame(
        &mut self,
        ctx: &mut SessionContext,
        frame: Frame,
        sink: &dyn OutputSink,
        report: &mut FrameReport,
    ) -> Result<()> {
        let timestamp_ms = frame.timestamp_ms();
        let stamp = ctx
            .time_base
            .assign(timestamp_ms, frame.domain())
            .ok_or_else(|| eyre!("Invalid device timestamp: {timestamp_ms} ms"))?;

        match frame {
            Frame::Composite(frames) => {
                self.process_composite(ctx, frames, stamp, sink, report)?;
            }
            Frame::Single(frame) => {
                ctx.mark_arrived(frame.key);
                debug!(
                    stream = %frame.key,
                    frame_number = frame.frame_number,
                    timestamp_ms = frame.timestamp_ms,
                    stamp = ?stamp,
                    "Single video frame arrived"
                );
                publish_stream_frame(ctx, &frame, stamp, sink, report)?;
            }
            Frame::Points(points) => {
                ctx.mark_arrived(points.key);
                publish_point_cloud(ctx, &points, None, stamp, sink, report)?;
            }
        }

        if ctx.send_counter {
            ctx.send_counter = false;
            if sink.has_subscribers(&Topic::Counter) {
                let counter = Counter {
                    header: Header::new(stamp, ""),
                    counter: ctx.image_counter,
                };
                sink.publish(Output::new(Topic::Counter, Payload::Counter(counter)))?;
                debug!(counter = ctx.image_counter, "Publishing Counter");
                ctx.image_counter += 1;
                report.published += 1;
            }
        }

        Ok(())
    }

    fn process_composite(
        &mut self,
        ctx: &mut SessionContext,
        frames: CompositeFrame,
        stamp: Duration,
        sink: &dyn OutputSink,
        report: &mut FrameReport,
    ) -> Result<()> {
        for sub in &frames {
            ctx.mark_arrived(sub.key());
        }
        debug!(
            size = frames.len(),
            frames = %describe(&frames),
            "List of frameset before applying filters"
        );

        let frames = self.filters.apply(frames);
        debug!(
            size = frames.len(),
            frames = %describe(&frames),
            "List of frameset after applying filters"
        );

        let texture = ctx.texture_key.and_then(|key| {
            frames
                .iter()
                .filter_map(SubFrame::as_video)
                .filter(|frame| frame.key == key)
                .last()
                .cloned()
        });

        let fan = dedup::select(frames, ctx.align_depth);

        for frame in &fan.frames {
            publish_stream_frame(ctx, frame, stamp, sink, report)?;
        }

        if let Some(points) = &fan.points {
            publish_point_cloud(ctx, points, texture.as_ref(), stamp, sink, report)?;
        }

        if ctx.align_depth
            && let Some(depth) = &fan.raw_depth
        {
            self.publish_aligned(ctx, depth, &fan.frames, stamp, sink, report)?;
        }

        Ok(())
    }

    /// Aligns depth to every other stream in the frame that has a
    /// consumer for its aligned outputs.
    fn publish_aligned(
        &mut self,
        ctx: &mut SessionContext,
        depth: &VideoFrame,
        frames: &[VideoFrame],
        stamp: Duration,
        sink: &dyn OutputSink,
        report: &mut FrameReport,
    ) -> Result<()> {
        let depth_intrinsics = depth
            .intrinsics
            .or_else(|| ctx.depth_intrinsics?.fit_to(depth.width, depth.height));

        for frame in frames.iter().filter(|frame| frame.key.kind != StreamKind::Depth) {
            let key = frame.key;
            let Some(target) = ctx.aligned.get_mut(&key) else {
                debug!(stream = %key, "no aligned output for stream");
                continue;
            };

            if !sink.has_subscribers(&Topic::AlignedImage(key))
                && !sink.has_subscribers(&Topic::AlignedInfo(key))
            {
                continue;
            }

            let aligned = depth_intrinsics
                .ok_or(FrameSkipped::MissingCalibration(DEPTH))
                .and_then(|intr| {
                    self.aligner.align(
                        depth,
                        &intr,
                        key,
                        &target.intrinsics,
                        &target.depth_to_target,
                    )
                });

            match aligned {
                Ok(aligned) => {
                    let route = ImageRoute {
                        image: Topic::AlignedImage(key),
                        info: Topic::AlignedInfo(key),
                        encoding: Encoding::Mono16,
                        seq: &mut target.seq,
                        camera_info: &mut target.camera_info,
                    };
                    if publish_image(route, &aligned, stamp, sink)? {
                        ctx.send_counter = true;
                        report.published += 2;
                    }
                }
                Err(skip) => {
                    debug!(stream = %key, "aligned depth skipped: {skip}");
                    report.skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Publishes a gyroscope or accelerometer sample. Samples arriving
    /// before the time base is anchored are dropped.
    pub fn process_motion(
        &mut self,
        ctx: &mut SessionContext,
        sample: MotionFrame,
        sink: &dyn OutputSink,
    ) -> FrameReport {
        let mut report = FrameReport::default();

        if let Err(err) = try_process_motion(ctx, sample, sink, &mut report) {
            error!("An error has occurred during motion callback: {err:#}");
            report.errors += 1;
        }

        report
    }
}

fn try_process_motion(
    ctx: &mut SessionContext,
    sample: MotionFrame,
    sink: &dyn OutputSink,
    report: &mut FrameReport,
) -> Result<()> {
    if !ctx.time_base.is_initialized() {
        return Ok(());
    }
    let stamp = ctx
        .time_base
        .assign_motion(sample.timestamp_ms)
        .ok_or_else(|| eyre!("Invalid device timestamp: {} ms", sample.timestamp_ms))?;

    let key = sample.key;
    debug!(stream = %key, domain = ?sample.domain, "Frame arrived");

    if !sink.has_subscribers(&Topic::Imu(key)) && !sink.has_subscribers(&Topic::ImuInfo(key)) {
        return Ok(());
    }

    let frame_id = ctx.frame_ids.optical(key).to_string();
    let Some(state) = ctx.streams.get_mut(&key) else {
        error!(stream = %key, "Stream type is not supported!");
        return Ok(());
    };

    let zero = Vec3::default();
    let axes = Vec3::from(sample.axes);
    let (angular_velocity, linear_acceleration) = if key == GYRO {
        (axes, zero)
    } else {
        (zero, axes)
    };

    state.seq += 1;
    let mut header = Header::new(stamp, frame_id);
    header.seq = state.seq;

    let mut orientation_covariance = [0.0; 9];
    orientation_covariance[0] = -1.0;

    let imu = Imu {
        header,
        orientation: Quaternion::default(),
        orientation_covariance,
        angular_velocity,
        angular_velocity_covariance: [0.0; 9],
        linear_acceleration,
        linear_acceleration_covariance: [0.0; 9],
    };

    sink.publish(Output::new(Topic::Imu(key), Payload::Imu(imu)))?;
    debug!(stream = %key, "Publish motion sample");
    report.published += 1;
    Ok(())
}

/// Lists the stream and format of every sub-frame.
fn describe(frames: &CompositeFrame) -> String {
    frames
        .iter()
        .map(|sub| format!("{} {}", sub.key(), sub.format()))
        .join(", ")
}

/// Publishes a frame on its stream's own topics.
fn publish_stream_frame(
    ctx: &mut SessionContext,
    frame: &VideoFrame,
    stamp: Duration,
    sink: &dyn OutputSink,
    report: &mut FrameReport,
) -> Result<()> {
    let key = frame.key;
    let Some(state) = ctx.streams.get_mut(&key) else {
        error!(stream = %key, "Stream type is not supported!");
        return Ok(());
    };
    let Some(camera_info) = state.camera_info.as_mut() else {
        debug!(stream = %key, "stream has no image output");
        return Ok(());
    };

    let route = ImageRoute {
        image: Topic::Image(key),
        info: Topic::CameraInfo(key),
        encoding: state.descriptor.encoding,
        seq: &mut state.seq,
        camera_info,
    };

    if publish_image(route, frame, stamp, sink)? {
        ctx.send_counter = true;
        report.published += 2;
    }
    Ok(())
}

/// Advances the sequence number and, when anyone listens, publishes the
/// image with its calibration record. Returns whether it published.
fn publish_image(
    route: ImageRoute<'_>,
    frame: &VideoFrame,
    stamp: Duration,
    sink: &dyn OutputSink,
) -> Result<bool> {
    *route.seq += 1;

    if !sink.has_subscribers(&route.image) && !sink.has_subscribers(&route.info) {
        return Ok(false);
    }

    let mut header = Header::new(stamp, route.camera_info.header.frame_id.clone());
    header.seq = frame.frame_number;

    let image = Image {
        header: header.clone(),
        width: frame.width,
        height: frame.height,
        encoding: route.encoding,
        is_bigendian: false,
        step: frame.width * frame.bytes_per_pixel() as u32,
        data: frame.data.clone(),
    };

    route.camera_info.header.stamp = stamp;
    route.camera_info.header.seq = header.seq;

    let exposure = frame.metadata.actual_exposure.unwrap_or(0.0);
    debug!(exposure, "Actual Exposure");

    sink.publish(Output::new(
        route.info,
        Payload::CameraInfo(route.camera_info.clone()),
    ))?;
    sink.publish(Output::new(route.image, Payload::Image(image)))?;
    debug!(stream = %frame.key, "stream published");

    Ok(true)
}

fn publish_point_cloud(
    ctx: &mut SessionContext,
    points: &PointSet,
    texture: Option<&VideoFrame>,
    stamp: Duration,
    sink: &dyn OutputSink,
    report: &mut FrameReport,
) -> Result<()> {
    if !sink.has_subscribers(&Topic::PointCloud) {
        return Ok(());
    }

    let header = Header::new(stamp, ctx.frame_ids.optical(DEPTH));
    match pointcloud::build(points, ctx.texture_key, texture, header) {
        Ok(cloud) => {
            debug!(points = cloud.len(), "Publish pointscloud");
            sink.publish(Output::new(Topic::PointCloud, Payload::PointCloud(cloud)))?;
            ctx.send_counter = true;
            report.published += 1;
        }
        Err(skip) => {
            debug!("point cloud skipped: {skip}");
            report.skipped += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gate::ChannelSink,
        registry,
        time::{SystemClock, TimestampPolicy},
        types::{ACCEL, COLOR, Format, TimestampDomain},
    };

    fn context() -> SessionContext {
        let time_base = Arc::new(TimeBase::new(
            Arc::new(SystemClock::new()),
            TimestampPolicy::Unsynchronized,
        ));
        let mut ctx = SessionContext::new(FrameIds::default(), time_base);
        let ids = FrameIds::default();

        for key in [DEPTH, COLOR] {
            let intr = Intrinsics::ideal(2.0, 2, 2);
            let desc = registry::describe(key).unwrap();
            let info = CameraInfo::from_intrinsics(&intr, ids.optical(key));
            ctx.add_stream(key, StreamState::new(desc, Some(info)));
        }
        ctx.add_stream(
            ACCEL,
            StreamState::new(registry::describe(ACCEL).unwrap(), None),
        );
        ctx
    }

    fn drain(rx: &flume::Receiver<Output>) -> Vec<Output> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_seq_advances_without_subscribers() {
        let mut ctx = context();
        let mut pipeline = Pipeline::new(FilterChain::empty(), 0.001);
        let (sink, rx) = ChannelSink::unbounded();

        for i in 0..3 {
            let frame = VideoFrame::from_depth(DEPTH, 2, 2, &[1, 2, 3, 4])
                .with_timestamp(i as f64 * 33.0, i);
            let report = pipeline.process_frame(&mut ctx, Frame::Single(frame), &sink);
            assert_eq!(report.published, 0);
        }

        assert_eq!(ctx.seq(DEPTH), 3);
        assert!(drain(&rx).is_empty());
        assert_eq!(ctx.image_counter(), 0);
    }

    #[test]
    fn test_publish_image_and_counter() {
        let mut ctx = context();
        let mut pipeline = Pipeline::new(FilterChain::empty(), 0.001);
        let (sink, rx) = ChannelSink::unbounded();
        sink.subscribe(Topic::Image(DEPTH));
        sink.subscribe(Topic::Counter);

        let frame = VideoFrame::from_depth(DEPTH, 2, 2, &[1, 2, 3, 4]).with_timestamp(10.0, 42);
        let report = pipeline.process_frame(&mut ctx, Frame::Single(frame), &sink);
        assert_eq!(report.published, 3);

        let outputs = drain(&rx);
        let topics: Vec<_> = outputs.iter().map(|o| o.topic).collect();
        assert_eq!(
            topics,
            vec![Topic::CameraInfo(DEPTH), Topic::Image(DEPTH), Topic::Counter]
        );

        let Payload::Image(image) = &outputs[1].payload else {
            panic!("expected an image");
        };
        assert_eq!(image.header.seq, 42);
        assert_eq!(image.header.frame_id, "camera_depth_optical_frame");
        assert_eq!(image.encoding, Encoding::Mono16);
        assert_eq!(image.step, 4);
        assert_eq!(ctx.image_counter(), 1);
    }

    #[test]
    fn test_colorized_depth_declares_color_encoding() {
        let mut ctx = context();
        ctx.declare_colorized_depth(&registry::describe(COLOR).unwrap());
        let mut pipeline = Pipeline::new(FilterChain::empty(), 0.001);
        let (sink, rx) = ChannelSink::unbounded();
        sink.subscribe(Topic::Image(DEPTH));

        let frame = VideoFrame::new(DEPTH, Format::Rgb8, 2, 2, vec![0; 12]);
        pipeline.process_frame(&mut ctx, Frame::Single(frame), &sink);

        let image = drain(&rx)
            .into_iter()
            .find_map(|o| match o.payload {
                Payload::Image(image) => Some(image),
                _ => None,
            })
            .unwrap();
        assert_eq!(image.encoding, Encoding::Rgb8);
        assert_eq!(image.step, 6);
    }

    #[test]
    fn test_motion_dropped_until_anchored() {
        let mut ctx = context();
        let mut pipeline = Pipeline::new(FilterChain::empty(), 0.001);
        let (sink, rx) = ChannelSink::unbounded();
        sink.subscribe_all();

        let sample = MotionFrame {
            key: ACCEL,
            axes: [0.0, 0.0, 9.81],
            timestamp_ms: 5.0,
            domain: TimestampDomain::HardwareClock,
            frame_number: 1,
        };
        let report = pipeline.process_motion(&mut ctx, sample, &sink);
        assert_eq!(report, FrameReport::default());
        assert!(drain(&rx).is_empty());

        let frame = VideoFrame::from_depth(DEPTH, 2, 2, &[1, 2, 3, 4]).with_timestamp(0.0, 0);
        pipeline.process_frame(&mut ctx, Frame::Single(frame), &sink);
        drain(&rx);

        pipeline.process_motion(&mut ctx, sample, &sink);
        let outputs = drain(&rx);
        assert_eq!(outputs.len(), 1);
        let Payload::Imu(imu) = &outputs[0].payload else {
            panic!("expected an IMU sample");
        };
        assert_eq!(imu.header.seq, 1);
        assert_eq!(imu.header.frame_id, "camera_accel_optical_frame");
        assert_eq!(imu.orientation_covariance[0], -1.0);
        assert_eq!(imu.orientation, Quaternion::default());
        assert!((imu.linear_acceleration.z - 9.81).abs() < 1e-5);
        assert_eq!(imu.angular_velocity, Vec3::default());
    }

    #[test]
    fn test_unknown_stream_is_logged_not_fatal() {
        let mut ctx = context();
        let mut pipeline = Pipeline::new(FilterChain::empty(), 0.001);
        let (sink, _rx) = ChannelSink::unbounded();
        sink.subscribe_all();

        let frame = VideoFrame::new(crate::types::FISHEYE, Format::Raw8, 1, 1, vec![0]);
        let report = pipeline.process_frame(&mut ctx, Frame::Single(frame), &sink);
        assert_eq!(report, FrameReport::default());
    }
}
