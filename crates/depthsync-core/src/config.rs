//! Configuration parsing and validation for a camera session.

use crate::{
    profile::StreamRequest,
    types::{ACCEL, COLOR, DEPTH, FISHEYE, GYRO, INFRA1, INFRA2, StreamKey, StreamKind},
};
use eyre::{Result, WrapErr, ensure};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use tracing::warn;

/// Root configuration of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_depth")]
    pub depth: StreamConfig,

    #[serde(default = "default_image")]
    pub infra1: StreamConfig,

    #[serde(default = "default_image")]
    pub infra2: StreamConfig,

    #[serde(default = "default_image")]
    pub color: StreamConfig,

    #[serde(default = "default_disabled")]
    pub fisheye: StreamConfig,

    #[serde(default = "default_gyro_fps")]
    pub gyro_fps: u32,

    #[serde(default = "default_accel_fps")]
    pub accel_fps: u32,

    #[serde(default)]
    pub enable_imu: bool,

    /// Comma-separated filter names, e.g. `disparity,spatial,pointcloud`.
    #[serde(default)]
    pub filters: String,

    #[serde(default)]
    pub align_depth: bool,

    #[serde(default)]
    pub enable_pointcloud: bool,

    #[serde(default = "default_texture_stream")]
    pub pointcloud_texture_stream: TextureStream,

    #[serde(default)]
    pub pointcloud_texture_index: u32,

    #[serde(default)]
    pub enable_sync: bool,

    /// Offset in seconds added to the host clock in synchronized mode.
    #[serde(default)]
    pub time_offset: f64,

    /// One of `default`, `master`, `slave` or `none`, case-insensitive.
    #[serde(default = "default_inter_cam_sync_mode")]
    pub inter_cam_sync_mode: String,

    #[serde(default)]
    pub frame_ids: FrameIds,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            infra1: default_image(),
            infra2: default_image(),
            color: default_image(),
            fisheye: default_disabled(),
            gyro_fps: default_gyro_fps(),
            accel_fps: default_accel_fps(),
            enable_imu: false,
            filters: String::new(),
            align_depth: false,
            enable_pointcloud: false,
            pointcloud_texture_stream: default_texture_stream(),
            pointcloud_texture_index: 0,
            enable_sync: false,
            time_offset: 0.0,
            inter_cam_sync_mode: default_inter_cam_sync_mode(),
            frame_ids: FrameIds::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        let config: SessionConfig = serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sync.buffer_size >= 2,
            "sync.buffer_size must be at least 2"
        );

        ensure!(
            !self.sync.window_size.is_zero(),
            "sync.window_size must be greater than zero"
        );

        ensure!(
            self.enabled_streams().next().is_some(),
            "At least one stream must be enabled"
        );

        ensure!(
            !self.frame_ids.base.is_empty(),
            "frame_ids.base cannot be empty"
        );

        Ok(())
    }

    /// Per-stream configuration of an image stream.
    pub fn stream(&self, key: StreamKey) -> Option<&StreamConfig> {
        match key {
            DEPTH => Some(&self.depth),
            INFRA1 => Some(&self.infra1),
            INFRA2 => Some(&self.infra2),
            COLOR => Some(&self.color),
            FISHEYE => Some(&self.fisheye),
            _ => None,
        }
    }

    pub fn stream_mut(&mut self, key: StreamKey) -> Option<&mut StreamConfig> {
        match key {
            DEPTH => Some(&mut self.depth),
            INFRA1 => Some(&mut self.infra1),
            INFRA2 => Some(&mut self.infra2),
            COLOR => Some(&mut self.color),
            FISHEYE => Some(&mut self.fisheye),
            _ => None,
        }
    }

    pub fn is_enabled(&self, key: StreamKey) -> bool {
        match key {
            GYRO | ACCEL => self.enable_imu,
            _ => self.stream(key).is_some_and(|stream| stream.enable),
        }
    }

    /// Enabled streams in the order sensors are opened.
    pub fn enabled_streams(&self) -> impl Iterator<Item = StreamKey> + '_ {
        [DEPTH, INFRA1, INFRA2, COLOR, FISHEYE, GYRO, ACCEL]
            .into_iter()
            .filter(|&key| self.is_enabled(key))
    }

    /// Requested resolution and rate of an image stream.
    pub fn request(&self, key: StreamKey) -> Option<StreamRequest> {
        self.stream(key).map(|stream| StreamRequest {
            width: stream.width,
            height: stream.height,
            fps: stream.fps,
        })
    }

    /// Requested rate of a motion stream.
    pub fn motion_fps(&self, key: StreamKey) -> Option<u32> {
        match key {
            GYRO => Some(self.gyro_fps),
            ACCEL => Some(self.accel_fps),
            _ => None,
        }
    }

    /// Checks if the point cloud is produced, either because it was
    /// requested or because the filter list names it.
    pub fn pointcloud_enabled(&self) -> bool {
        self.enable_pointcloud || self.filter_names().any(|name| name == "pointcloud")
    }

    /// Filter names, trimmed, without empty entries.
    pub fn filter_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.filters
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Checks if frames go through the composite-frame synchronizer.
    pub fn sync_enabled(&self) -> bool {
        self.enable_sync
            || self.pointcloud_enabled()
            || self.align_depth
            || self.filter_names().next().is_some()
    }

    pub fn texture_key(&self) -> StreamKey {
        StreamKey::new(
            self.pointcloud_texture_stream.kind(),
            self.pointcloud_texture_index,
        )
    }

    /// Parses the inter-camera sync mode. An unknown value falls back to
    /// [InterCamSyncMode::None] with a warning.
    pub fn inter_cam_sync_mode(&self) -> InterCamSyncMode {
        match self.inter_cam_sync_mode.to_lowercase().as_str() {
            "default" => InterCamSyncMode::Default,
            "master" => InterCamSyncMode::Master,
            "slave" => InterCamSyncMode::Slave,
            "none" => InterCamSyncMode::None,
            other => {
                warn!(
                    mode = other,
                    "Invalid inter cam sync mode. Not using inter cam sync mode."
                );
                InterCamSyncMode::None
            }
        }
    }
}

/// Enable flag and requested profile of an image stream. Zero in
/// `width`, `height` or `fps` accepts any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub fps: u32,
}

impl StreamConfig {
    pub fn enabled(width: u32, height: u32, fps: u32) -> Self {
        Self {
            enable: true,
            width,
            height,
            fps,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enable: false,
            ..Self::enabled(0, 0, 0)
        }
    }
}

fn default_depth() -> StreamConfig {
    StreamConfig::enabled(640, 480, 30)
}

fn default_image() -> StreamConfig {
    StreamConfig::enabled(640, 480, 30)
}

fn default_disabled() -> StreamConfig {
    StreamConfig {
        enable: false,
        ..default_image()
    }
}

fn default_gyro_fps() -> u32 {
    400
}

fn default_accel_fps() -> u32 {
    250
}

fn default_texture_stream() -> TextureStream {
    TextureStream::Color
}

fn default_inter_cam_sync_mode() -> String {
    "none".to_string()
}

/// Stream kind sampled for point cloud colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureStream {
    /// No texture: every point is white.
    Any,
    Color,
    Infrared,
    Fisheye,
}

impl TextureStream {
    pub fn kind(&self) -> StreamKind {
        match self {
            TextureStream::Any => StreamKind::Any,
            TextureStream::Color => StreamKind::Color,
            TextureStream::Infrared => StreamKind::Infrared,
            TextureStream::Fisheye => StreamKind::Fisheye,
        }
    }
}

/// Hardware synchronization role of the camera among several cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterCamSyncMode {
    /// Master without trigger output.
    Default,
    /// Master emitting a trigger signal.
    Master,
    /// Listens to an external trigger signal.
    Slave,
    /// Leaves the device setting untouched.
    None,
}

impl InterCamSyncMode {
    /// Value written to the device option, if any.
    pub fn option_value(&self) -> Option<u32> {
        match self {
            InterCamSyncMode::Default => Some(0),
            InterCamSyncMode::Master => Some(1),
            InterCamSyncMode::Slave => Some(2),
            InterCamSyncMode::None => None,
        }
    }
}

/// Coordinate frame identifiers attached to published records.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameIds {
    pub base: String,
    pub depth: String,
    pub infra1: String,
    pub infra2: String,
    pub color: String,
    pub fisheye: String,
    pub imu: String,
    pub depth_optical: String,
    pub infra1_optical: String,
    pub infra2_optical: String,
    pub color_optical: String,
    pub fisheye_optical: String,
    pub gyro_optical: String,
    pub accel_optical: String,
    pub aligned_depth_to_infra1: String,
    pub aligned_depth_to_infra2: String,
    pub aligned_depth_to_color: String,
    pub aligned_depth_to_fisheye: String,
}

impl Default for FrameIds {
    fn default() -> Self {
        Self {
            base: "camera_link".to_string(),
            depth: "camera_depth_frame".to_string(),
            infra1: "camera_infra1_frame".to_string(),
            infra2: "camera_infra2_frame".to_string(),
            color: "camera_color_frame".to_string(),
            fisheye: "camera_fisheye_frame".to_string(),
            imu: "camera_imu_frame".to_string(),
            depth_optical: "camera_depth_optical_frame".to_string(),
            infra1_optical: "camera_infra1_optical_frame".to_string(),
            infra2_optical: "camera_infra2_optical_frame".to_string(),
            color_optical: "camera_color_optical_frame".to_string(),
            fisheye_optical: "camera_fisheye_optical_frame".to_string(),
            gyro_optical: "camera_gyro_optical_frame".to_string(),
            accel_optical: "camera_accel_optical_frame".to_string(),
            aligned_depth_to_infra1: "camera_aligned_depth_to_infra1_frame".to_string(),
            aligned_depth_to_infra2: "camera_aligned_depth_to_infra2_frame".to_string(),
            aligned_depth_to_color: "camera_aligned_depth_to_color_frame".to_string(),
            aligned_depth_to_fisheye: "camera_aligned_depth_to_fisheye_frame".to_string(),
        }
    }
}

impl FrameIds {
    /// Body frame of a stream.
    pub fn frame(&self, key: StreamKey) -> &str {
        match key {
            DEPTH => &self.depth,
            INFRA1 => &self.infra1,
            INFRA2 => &self.infra2,
            COLOR => &self.color,
            FISHEYE => &self.fisheye,
            GYRO | ACCEL => &self.imu,
            _ => &self.base,
        }
    }

    /// Optical frame of a stream.
    pub fn optical(&self, key: StreamKey) -> &str {
        match key {
            DEPTH => &self.depth_optical,
            INFRA1 => &self.infra1_optical,
            INFRA2 => &self.infra2_optical,
            COLOR => &self.color_optical,
            FISHEYE => &self.fisheye_optical,
            GYRO => &self.gyro_optical,
            ACCEL => &self.accel_optical,
            _ => &self.base,
        }
    }

    /// Frame of depth aligned to a target stream.
    pub fn aligned(&self, key: StreamKey) -> Option<&str> {
        match key {
            INFRA1 => Some(&self.aligned_depth_to_infra1),
            INFRA2 => Some(&self.aligned_depth_to_infra2),
            COLOR => Some(&self.aligned_depth_to_color),
            FISHEYE => Some(&self.aligned_depth_to_fisheye),
            _ => None,
        }
    }
}

/// Parameters of the composite-frame synchronizer.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Time span that the grouped frames must fit within.
    #[serde(default = "default_window_size", with = "humantime_serde")]
    pub window_size: Duration,

    /// Maximum frames to buffer per stream.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Policy for handling buffer overflow.
    #[serde(default)]
    pub drop_policy: DropPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            buffer_size: default_buffer_size(),
            drop_policy: DropPolicy::default(),
        }
    }
}

fn default_window_size() -> Duration {
    Duration::from_millis(16)
}

fn default_buffer_size() -> usize {
    4
}

/// Policy for handling buffer overflow when pushing new frames.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Reject new frames when the buffer is full.
    RejectNew,
    /// Drop the oldest frame to make room for the new one.
    #[default]
    DropOldest,
}
