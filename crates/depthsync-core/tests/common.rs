use depthsync_core::{
    COLOR, Clock, DEPTH, Device, Format, INFRA1, INFRA2, Intrinsics, Output, OutputSink, Payload,
    SensorEvent, SensorInfo, SessionConfig, StreamConfig, StreamKey, StreamProfile, Topic,
    VideoFrame, extrinsics::Extrinsics,
};
use flume::Sender;
use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;

/// Host clock under test control.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn at(time: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(time.as_nanos() as u64),
        }
    }

    #[allow(dead_code)]
    pub fn advance(&self, delta: Duration) {
        self.nanos
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Records every output and reports subscribers per topic.
#[derive(Debug, Default)]
pub struct RecordingSink {
    all: AtomicBool,
    subscribers: Mutex<HashSet<Topic>>,
    outputs: Mutex<Vec<Output>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribed_to_all() -> Self {
        let sink = Self::default();
        sink.all.store(true, Ordering::SeqCst);
        sink
    }

    pub fn with_subscribers<I>(topics: I) -> Self
    where
        I: IntoIterator<Item = Topic>,
    {
        let sink = Self::default();
        sink.subscribers.lock().unwrap().extend(topics);
        sink
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: Topic) -> Vec<Output> {
        self.outputs()
            .into_iter()
            .filter(|output| output.topic == topic)
            .collect()
    }

    pub fn images(&self, topic: Topic) -> Vec<depthsync_core::messages::Image> {
        self.on_topic(topic)
            .into_iter()
            .filter_map(|output| match output.payload {
                Payload::Image(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.outputs.lock().unwrap().clear();
    }
}

impl OutputSink for RecordingSink {
    fn has_subscribers(&self, topic: &Topic) -> bool {
        self.all.load(Ordering::SeqCst) || self.subscribers.lock().unwrap().contains(topic)
    }

    fn publish(&self, output: Output) -> eyre::Result<()> {
        self.outputs.lock().unwrap().push(output);
        Ok(())
    }
}

pub fn intrinsics() -> Intrinsics {
    Intrinsics::ideal(8.0, WIDTH, HEIGHT)
}

/// A stereo module with depth and both infrared streams, and an RGB
/// camera offset 15 mm from the depth imager.
pub fn sensors() -> Vec<SensorInfo> {
    let intr = intrinsics();
    vec![
        SensorInfo {
            module_name: "Stereo Module".to_string(),
            profiles: vec![
                StreamProfile::video(DEPTH, Format::Z16, WIDTH, HEIGHT, 30).with_intrinsics(intr),
                StreamProfile::video(INFRA1, Format::Y8, WIDTH, HEIGHT, 30).with_intrinsics(intr),
                StreamProfile::video(INFRA2, Format::Y8, WIDTH, HEIGHT, 30)
                    .with_intrinsics(intr)
                    .with_extrinsics_to_depth(Extrinsics::translation(-0.05, 0.0, 0.0)),
            ],
        },
        SensorInfo {
            module_name: "RGB Camera".to_string(),
            profiles: vec![
                StreamProfile::video(COLOR, Format::Rgb8, WIDTH, HEIGHT, 30)
                    .with_intrinsics(intr)
                    .with_extrinsics_to_depth(Extrinsics::translation(0.015, 0.0, 0.0)),
            ],
        },
    ]
}

/// A device that replays a fixed list of events from a worker thread.
#[derive(Debug, Default)]
pub struct MockDevice {
    pub sensors: Vec<SensorInfo>,
    pub script: Vec<SensorEvent>,
    pub started: Vec<StreamKey>,
    pub stopped: bool,
    pub sync_mode: Option<u32>,
    worker: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl MockDevice {
    pub fn new() -> Self {
        Self {
            sensors: sensors(),
            ..Self::default()
        }
    }

    pub fn with_script(mut self, script: Vec<SensorEvent>) -> Self {
        self.script = script;
        self
    }
}

impl Device for MockDevice {
    fn sensors(&self) -> Vec<SensorInfo> {
        self.sensors.clone()
    }

    fn depth_scale(&self) -> f32 {
        0.001
    }

    fn stereo_baseline(&self) -> f32 {
        0.05
    }

    fn set_inter_cam_sync_mode(&mut self, value: u32) -> eyre::Result<()> {
        self.sync_mode = Some(value);
        Ok(())
    }

    fn start(&mut self, profiles: &[StreamProfile], events: Sender<SensorEvent>) -> eyre::Result<()> {
        self.started = profiles.iter().map(|profile| profile.key).collect();
        let script = std::mem::take(&mut self.script);
        self.worker = Some(thread::spawn(move || {
            for event in script {
                if events.send(event).is_err() {
                    return;
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> eyre::Result<()> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.stopped = true;
        Ok(())
    }
}

/// A configuration enabling only the given image streams at the test
/// resolution.
#[allow(dead_code)]
pub fn config_with(streams: &[StreamKey]) -> SessionConfig {
    let stream = |key| {
        if streams.contains(&key) {
            StreamConfig::enabled(WIDTH, HEIGHT, 30)
        } else {
            StreamConfig::disabled()
        }
    };

    SessionConfig {
        depth: stream(DEPTH),
        infra1: stream(INFRA1),
        infra2: stream(INFRA2),
        color: stream(COLOR),
        ..SessionConfig::default()
    }
}

/// A depth frame where every pixel holds `value`.
#[allow(dead_code)]
pub fn depth_frame(timestamp_ms: f64, frame_number: u64, value: u16) -> VideoFrame {
    let depth = vec![value; (WIDTH * HEIGHT) as usize];
    VideoFrame::from_depth(DEPTH, WIDTH, HEIGHT, &depth).with_timestamp(timestamp_ms, frame_number)
}

/// A color frame where every pixel holds `rgb`.
#[allow(dead_code)]
pub fn color_frame(timestamp_ms: f64, frame_number: u64, rgb: [u8; 3]) -> VideoFrame {
    let data = rgb.repeat((WIDTH * HEIGHT) as usize);
    VideoFrame::new(COLOR, Format::Rgb8, WIDTH, HEIGHT, data).with_timestamp(timestamp_ms, frame_number)
}

#[allow(dead_code)]
pub fn infra_frame(key: StreamKey, timestamp_ms: f64, frame_number: u64) -> VideoFrame {
    let data = vec![128; (WIDTH * HEIGHT) as usize];
    VideoFrame::new(key, Format::Y8, WIDTH, HEIGHT, data).with_timestamp(timestamp_ms, frame_number)
}
