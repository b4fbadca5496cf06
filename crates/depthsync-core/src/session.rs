//! Device setup and the event loop of a streaming session.
//!
//! [Session::setup] maps the device's sensors to streams, negotiates
//! profiles, builds the filter chain and publishes the one-time records
//! (static transforms, extrinsics and IMU intrinsics). Afterwards every
//! [SensorEvent] goes through [Session::handle], either directly or from
//! the channel consumed by [Session::run].

use crate::{
    config::SessionConfig,
    extrinsics::{ExtrinsicsCalculator, static_transforms},
    filter::{FilterChain, FilterContext, FilterKind, TextureTarget, parse_filters},
    frame::{CompositeFrame, Frame, SensorEvent, VideoFrame},
    gate::{Output, OutputSink, Payload, Topic},
    messages::{CameraInfo, ExtrinsicsMsg, ImuInfo},
    pipeline::{AlignedTarget, FrameReport, Pipeline, SessionContext, StreamState},
    profile::{StreamProfile, resolve_motion, resolve_video, warn_unsupported},
    registry,
    syncer::{FrameSyncer, Group},
    time::{Clock, TimeBase, TimestampPolicy},
    types::{ACCEL, COLOR, DEPTH, GYRO, StreamKey, StreamKind},
};
use eyre::{Result, WrapErr, bail, ensure, eyre};
use flume::{Receiver, Sender};
use futures::StreamExt;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// A sensor as reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    /// Module name, e.g. `Stereo Module`.
    pub module_name: String,
    /// Every profile the sensor can stream, with calibration.
    pub profiles: Vec<StreamProfile>,
}

/// The camera the session drives. Opening, starting and stopping
/// sensors is the device's business.
pub trait Device: Send {
    fn sensors(&self) -> Vec<SensorInfo>;

    /// Meters per depth unit.
    fn depth_scale(&self) -> f32;

    /// Distance between the stereo imagers in meters.
    fn stereo_baseline(&self) -> f32;

    /// Sets the inter-camera sync option of the depth sensor.
    fn set_inter_cam_sync_mode(&mut self, value: u32) -> Result<()>;

    /// Starts streaming the given profiles into `events`.
    fn start(&mut self, profiles: &[StreamProfile], events: Sender<SensorEvent>) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Running totals of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Deliveries received from the device.
    pub events: usize,
    /// Composite frames formed by the synchronizer.
    pub composites: usize,
    /// Frames discarded by the synchronizer.
    pub dropped: usize,
    pub published: usize,
    /// Derived outputs skipped for missing inputs.
    pub skipped: usize,
    pub errors: usize,
}

pub struct Session {
    config: SessionConfig,
    profiles: IndexMap<StreamKey, StreamProfile>,
    ctx: SessionContext,
    pipeline: Pipeline,
    syncer: Option<FrameSyncer<VideoFrame>>,
    sink: Arc<dyn OutputSink>,
    stats: SessionStats,
    stats_tx: watch::Sender<SessionStats>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("streams", &self.profiles.keys().collect::<Vec<_>>())
            .field("pipeline", &self.pipeline)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Session {
    /// Prepares a session. Errors are logged before they are returned.
    pub fn setup(
        config: SessionConfig,
        device: &mut dyn Device,
        sink: Arc<dyn OutputSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::try_setup(config, device, sink, clock).inspect_err(|err| {
            error!("An exception has been thrown: {err:#}");
        })
    }

    fn try_setup(
        mut config: SessionConfig,
        device: &mut dyn Device,
        sink: Arc<dyn OutputSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        // Map sensors to the streams they provide.
        let mut capabilities: IndexMap<StreamKey, Vec<StreamProfile>> = IndexMap::new();
        for sensor in device.sensors() {
            let keys = registry::module_streams(&sensor.module_name).ok_or_else(|| {
                eyre!("Module Name \"{}\" isn't supported", sensor.module_name)
            })?;
            for &key in keys {
                ensure!(
                    !capabilities.contains_key(&key),
                    "stream {key} is provided by more than one sensor"
                );
                capabilities.insert(key, sensor.profiles.clone());
            }
        }

        let mut enabled: Vec<StreamKey> = vec![];
        for key in config.enabled_streams() {
            if capabilities.contains_key(&key) {
                enabled.push(key);
            } else {
                info!(stream = %key, "sensor isn't supported by current device! -- Skipping...");
            }
        }

        if let Some(value) = config.inter_cam_sync_mode().option_value()
            && capabilities.contains_key(&DEPTH)
        {
            device
                .set_inter_cam_sync_mode(value)
                .wrap_err("Failed to set the inter cam sync mode")?;
            info!(value, "inter cam sync mode set");
        }

        // Negotiate profiles.
        let mut profiles: IndexMap<StreamKey, StreamProfile> = IndexMap::new();
        for key in enabled {
            let caps = capabilities.get(&key).map(Vec::as_slice).unwrap_or_default();

            let profile = if key.kind.is_motion() {
                let fps = config.motion_fps(key).unwrap_or_default();
                let profile = resolve_motion(key, fps, caps);
                if profile.is_none() {
                    warn!(stream = %key, fps, "Given stream configuration is not supported by the device!");
                }
                profile
            } else {
                let Some(mut request) = config.request(key) else {
                    continue;
                };
                let profile = resolve_video(key, &mut request, caps);
                if profile.is_none() {
                    warn_unsupported(key, &request);
                } else if let Some(stream) = config.stream_mut(key) {
                    stream.width = request.width;
                    stream.height = request.height;
                    stream.fps = request.fps;
                }
                profile
            };

            if let Some(profile) = profile {
                profiles.insert(key, profile);
            }
        }

        let Some(depth_profile) = profiles.get(&DEPTH) else {
            bail!("the depth stream must be enabled to compute calibration and transforms");
        };
        let depth_intrinsics = depth_profile.intrinsics;
        let calculator = ExtrinsicsCalculator::new(&profiles);

        let image_keys: Vec<StreamKey> = profiles
            .keys()
            .copied()
            .filter(|key| !key.kind.is_motion())
            .collect();

        // Filters.
        let texture_key = {
            let key = config.texture_key();
            (key.kind != StreamKind::Any).then_some(key)
        };
        let texture = match texture_key.and_then(|key| profiles.get(&key)) {
            Some(profile) => match profile.intrinsics {
                Some(intrinsics) => Some(TextureTarget {
                    key: profile.key,
                    intrinsics,
                    depth_to_texture: calculator.extrinsics(DEPTH, profile.key)?,
                }),
                None => None,
            },
            None => None,
        };

        let filter_context = FilterContext {
            depth_scale: device.depth_scale(),
            stereo_baseline: device.stereo_baseline(),
            depth_intrinsics,
            texture,
        };
        let kinds = parse_filters(&config.filters, config.enable_pointcloud)?;
        let filters = FilterChain::from_kinds(&kinds, &filter_context);
        let sync_enabled = config.enable_sync || config.align_depth || !kinds.is_empty();

        // Per-stream publication state.
        let policy = if sync_enabled {
            TimestampPolicy::Synchronized {
                offset: config.time_offset,
            }
        } else {
            TimestampPolicy::Unsynchronized
        };
        let time_base = Arc::new(TimeBase::new(clock.clone(), policy));

        let mut ctx = SessionContext::new(config.frame_ids.clone(), time_base);
        ctx.depth_intrinsics = depth_intrinsics;
        ctx.align_depth = config.align_depth;
        ctx.texture_key = texture_key;

        for (&key, profile) in &profiles {
            let descriptor = registry::describe(key)
                .ok_or_else(|| eyre!("stream {key} has no descriptor"))?;

            let camera_info = if key.kind.is_motion() {
                None
            } else {
                let intrinsics = profile
                    .intrinsics
                    .ok_or_else(|| eyre!("stream {key} has no intrinsics"))?;
                Some(CameraInfo::from_intrinsics(
                    &intrinsics,
                    config.frame_ids.optical(key),
                ))
            };

            ctx.add_stream(key, StreamState::new(descriptor, camera_info));
        }

        if kinds.contains(&FilterKind::Colorizer)
            && let Some(color) = registry::describe(COLOR)
        {
            ctx.declare_colorized_depth(&color);
        }

        if config.align_depth {
            for &key in image_keys.iter().filter(|&&key| key != DEPTH) {
                let (Some(intrinsics), Some(camera_info)) = (
                    profiles[&key].intrinsics,
                    ctx.streams[&key].camera_info.clone(),
                ) else {
                    continue;
                };
                let target = AlignedTarget {
                    intrinsics,
                    depth_to_target: calculator.extrinsics(DEPTH, key)?,
                    camera_info,
                    seq: 0,
                };
                ctx.add_aligned_target(key, target);
            }
        }

        // One-time records.
        let stamp = clock.now();
        let transforms = static_transforms(
            &calculator,
            &config.frame_ids,
            &image_keys,
            config.align_depth,
            stamp,
        )?;
        sink.publish(Output::new(
            Topic::StaticTransforms,
            Payload::Transforms(transforms),
        ))?;

        for &key in image_keys.iter().filter(|&&key| key != DEPTH) {
            let name = registry::describe(key).map(|desc| desc.name).unwrap_or_default();
            let extrinsics = calculator.extrinsics(DEPTH, key)?;
            let msg = ExtrinsicsMsg::new(&extrinsics, &format!("depth_to_{name}_extrinsics"));
            sink.publish(Output::new(Topic::Extrinsics(key), Payload::Extrinsics(msg)))?;
        }

        for (key, frame_id) in [(GYRO, "imu_gyro"), (ACCEL, "imu_accel")] {
            let Some(profile) = profiles.get(&key) else {
                continue;
            };
            match profile.motion_intrinsics {
                Some(intrinsics) => {
                    let msg = ImuInfo::from_intrinsics(&intrinsics, frame_id);
                    sink.publish(Output::new(Topic::ImuInfo(key), Payload::ImuInfo(msg)))?;
                }
                None => warn!(stream = %key, "motion stream has no intrinsics"),
            }
        }

        let syncer = if sync_enabled && !image_keys.is_empty() {
            Some(FrameSyncer::new(image_keys.iter().copied(), &config.sync)?)
        } else {
            None
        };

        let (stats_tx, _) = watch::channel(SessionStats::default());
        let pipeline = Pipeline::new(filters, device.depth_scale());

        info!(
            streams = profiles.len(),
            filters = ?pipeline.filters().names(),
            sync = syncer.is_some(),
            "session is ready"
        );

        Ok(Self {
            config,
            profiles,
            ctx,
            pipeline,
            syncer,
            sink,
            stats: SessionStats::default(),
            stats_tx,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Negotiated profiles of the enabled streams.
    pub fn profiles(&self) -> &IndexMap<StreamKey, StreamProfile> {
        &self.profiles
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The composite-frame synchronizer, when frames are grouped.
    pub fn syncer(&self) -> Option<&FrameSyncer<VideoFrame>> {
        self.syncer.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Observes the session totals as they change.
    pub fn subscribe_stats(&self) -> watch::Receiver<SessionStats> {
        self.stats_tx.subscribe()
    }

    /// Starts the device and returns the channel it delivers into.
    pub fn start(&self, device: &mut dyn Device, capacity: usize) -> Result<Receiver<SensorEvent>> {
        let (tx, rx) = flume::bounded(capacity);
        let profiles: Vec<StreamProfile> = self.profiles.values().cloned().collect();
        device
            .start(&profiles, tx)
            .wrap_err("Failed to start the device")?;
        info!(streams = profiles.len(), "device started");
        Ok(rx)
    }

    /// Processes one delivery from the device.
    pub fn handle(&mut self, event: SensorEvent) {
        self.stats.events += 1;

        let report = match event {
            SensorEvent::Motion(sample) => {
                self.pipeline
                    .process_motion(&mut self.ctx, sample, self.sink.as_ref())
            }
            SensorEvent::Frame(Frame::Single(frame)) if self.syncer.is_some() => {
                self.push_synced(frame)
            }
            SensorEvent::Frame(frame) => {
                self.pipeline
                    .process_frame(&mut self.ctx, frame, self.sink.as_ref())
            }
        };

        self.record(report);
    }

    fn push_synced(&mut self, frame: VideoFrame) -> FrameReport {
        let Some(syncer) = self.syncer.as_mut() else {
            return FrameReport::default();
        };

        let groups = syncer.push(frame.key, frame);
        self.stats.dropped = syncer.dropped();
        self.process_groups(groups)
    }

    fn process_groups(&mut self, groups: Vec<Group<VideoFrame>>) -> FrameReport {
        let mut total = FrameReport::default();

        for group in groups {
            self.stats.composites += 1;
            let frames = CompositeFrame::from_video(group.into_values());
            let report =
                self.pipeline
                    .process_frame(&mut self.ctx, Frame::Composite(frames), self.sink.as_ref());
            total.published += report.published;
            total.skipped += report.skipped;
            total.errors += report.errors;
        }

        total
    }

    /// Emits every composite frame the synchronizer can still form.
    pub fn flush(&mut self) {
        let Some(syncer) = self.syncer.as_mut() else {
            return;
        };

        let groups = syncer.flush();
        self.stats.dropped = syncer.dropped();
        let report = self.process_groups(groups);
        self.record(report);
    }

    /// Consumes deliveries until the device side of the channel closes,
    /// then flushes the synchronizer.
    pub async fn run(&mut self, events: Receiver<SensorEvent>) -> Result<()> {
        let mut stream = events.into_stream();
        while let Some(event) = stream.next().await {
            self.handle(event);
        }

        self.flush();
        info!(stats = ?self.stats, "session finished");
        Ok(())
    }

    /// Stops the device and drains the synchronizer.
    pub fn stop(&mut self, device: &mut dyn Device) -> Result<()> {
        device.stop().wrap_err("Failed to stop the device")?;
        self.flush();
        Ok(())
    }

    fn record(&mut self, report: FrameReport) {
        self.stats.published += report.published;
        self.stats.skipped += report.skipped;
        self.stats.errors += report.errors;
        self.stats_tx.send_replace(self.stats);
    }
}
