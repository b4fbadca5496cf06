//! Runs a session against a synthetic depth + color camera.
//!
//! Usage: `cargo run --example synthetic [config.yaml]`

use depthsync_core::{
    COLOR, ChannelSink, DEPTH, Device, Format, Intrinsics, Payload, SensorEvent, SensorInfo,
    Session, SessionConfig, StreamProfile, SystemClock, Topic, VideoFrame,
    extrinsics::Extrinsics,
};
use eyre::Result;
use flume::Sender;
use std::{sync::Arc, thread, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const NUM_FRAMES: u64 = 30;

struct SyntheticDevice {
    worker: Option<thread::JoinHandle<()>>,
}

impl SyntheticDevice {
    fn intrinsics() -> Intrinsics {
        Intrinsics::ideal(60.0, WIDTH, HEIGHT)
    }
}

impl Device for SyntheticDevice {
    fn sensors(&self) -> Vec<SensorInfo> {
        let intr = Self::intrinsics();
        vec![
            SensorInfo {
                module_name: "Stereo Module".to_string(),
                profiles: vec![
                    StreamProfile::video(DEPTH, Format::Z16, WIDTH, HEIGHT, 30).with_intrinsics(intr),
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

    fn depth_scale(&self) -> f32 {
        0.001
    }

    fn stereo_baseline(&self) -> f32 {
        0.05
    }

    fn set_inter_cam_sync_mode(&mut self, _value: u32) -> Result<()> {
        Ok(())
    }

    fn start(&mut self, profiles: &[StreamProfile], events: Sender<SensorEvent>) -> Result<()> {
        let keys: Vec<_> = profiles.iter().map(|profile| profile.key).collect();

        let worker = thread::spawn(move || {
            for i in 0..NUM_FRAMES {
                let ts = i as f64 * 33.0;
                for &key in &keys {
                    let frame = if key == DEPTH {
                        let depth: Vec<u16> = (0..WIDTH * HEIGHT)
                            .map(|p| 800 + ((p + i as u32) % 400) as u16)
                            .collect();
                        VideoFrame::from_depth(DEPTH, WIDTH, HEIGHT, &depth)
                    } else {
                        let data = (0..WIDTH * HEIGHT * 3).map(|b| (b % 251) as u8).collect();
                        VideoFrame::new(key, Format::Rgb8, WIDTH, HEIGHT, data)
                    };
                    let frame = frame.with_timestamp(ts + 0.5, i);
                    if events.send(frame.into()).is_err() {
                        return;
                    }
                }
                thread::sleep(Duration::from_millis(2));
            }
        });

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(path)?,
        None => {
            let mut config = SessionConfig::default();
            config.infra1.enable = false;
            config.infra2.enable = false;
            config.depth = depthsync_core::StreamConfig::enabled(WIDTH, HEIGHT, 30);
            config.color = depthsync_core::StreamConfig::enabled(WIDTH, HEIGHT, 30);
            config.filters = "spatial,temporal".to_string();
            config.align_depth = true;
            config.enable_pointcloud = true;
            config
        }
    };

    let (sink, outputs) = ChannelSink::unbounded();
    sink.subscribe(Topic::AlignedImage(COLOR));
    sink.subscribe(Topic::PointCloud);
    sink.subscribe(Topic::Counter);

    let mut device = SyntheticDevice { worker: None };
    let mut session = Session::setup(
        config,
        &mut device,
        Arc::new(sink),
        Arc::new(SystemClock::new()),
    )?;

    let events = session.start(&mut device, 64)?;
    session.run(events).await?;
    session.stop(&mut device)?;

    let mut clouds = 0;
    let mut aligned = 0;
    for output in outputs.try_iter() {
        match (output.topic, output.payload) {
            (Topic::PointCloud, Payload::PointCloud(cloud)) => {
                clouds += 1;
                info!(points = cloud.len(), "point cloud");
            }
            (Topic::AlignedImage(_), Payload::Image(_)) => aligned += 1,
            _ => {}
        }
    }

    info!(clouds, aligned, stats = ?session.stats(), "done");
    Ok(())
}
