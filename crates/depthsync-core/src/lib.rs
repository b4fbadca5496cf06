//! Time-synchronized processing of multi-sensor depth camera streams.
//!
//! Frames of independently clocked streams (depth, infrared, color,
//! fisheye, gyroscope and accelerometer) are stamped against one time
//! base, optionally grouped into composite frames, run through a chain
//! of post-processing filters and fanned out to an [OutputSink]. Depth
//! can be re-projected into the pixel grid of the other image streams
//! and turned into a colored point cloud. Outputs nobody listens to are
//! never computed.
//!
//! # Usage
//!
//! A filter list is parsed into the order the chain runs filters in.
//! The disparity transform always brackets the other filters.
//!
//! ```rust
//! use depthsync_core::{FilterKind, parse_filters};
//!
//! let kinds = parse_filters("disparity,spatial,pointcloud", false)?;
//! assert_eq!(
//!     kinds,
//!     [
//!         FilterKind::DisparityStart,
//!         FilterKind::Spatial,
//!         FilterKind::PointCloud,
//!         FilterKind::DisparityEnd,
//!     ]
//! );
//! # Ok::<(), eyre::Report>(())
//! ```
//!
//! A full session is set up from a [SessionConfig] and a [Device], then
//! fed with [SensorEvent]s. See `examples/synthetic.rs`.

pub mod align;
pub mod buffer;
pub mod calibration;
mod config;
pub mod dedup;
mod error;
pub mod extrinsics;
pub mod filter;
pub mod frame;
pub mod gate;
pub mod messages;
pub mod pipeline;
pub mod pointcloud;
pub mod profile;
pub mod registry;
mod session;
pub mod syncer;
pub mod time;
mod types;

pub use align::AlignmentEngine;
pub use calibration::{DistortionModel, Intrinsics, MotionIntrinsics};
pub use config::*;
pub use error::FrameSkipped;
pub use extrinsics::{Extrinsics, ExtrinsicsCalculator};
pub use filter::{FilterChain, FilterContext, FilterKind, parse_filters};
pub use frame::{
    CompositeFrame, Frame, FrameMetadata, MotionFrame, PointSet, SensorEvent, SubFrame, TexCoord,
    Vertex, VideoFrame,
};
pub use gate::{ChannelSink, Output, OutputSink, Payload, Topic};
pub use pipeline::{FrameReport, Pipeline, SessionContext};
pub use pointcloud::{PointCloud, PointCloudPoint};
pub use profile::{StreamProfile, StreamRequest};
pub use session::{Device, SensorInfo, Session, SessionStats};
pub use syncer::FrameSyncer;
pub use time::{Clock, SystemClock, TimeBase, TimestampPolicy};
pub use types::*;
