//! Output topics and the sink outputs are handed to.
//!
//! The pipeline asks the sink whether a topic has consumers before it
//! builds anything expensive for it. Transport is out of scope here:
//! [ChannelSink] forwards outputs into a `flume` channel so tests and
//! demos can observe them.

use crate::{
    messages::{CameraInfo, Counter, ExtrinsicsMsg, Image, Imu, ImuInfo, TransformStamped},
    pointcloud::PointCloud,
    registry,
    types::StreamKey,
};
use eyre::{Result, eyre};
use flume::{Receiver, Sender};
use indexmap::IndexSet;
use std::{fmt, sync::RwLock};

/// A named output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Image(StreamKey),
    CameraInfo(StreamKey),
    AlignedImage(StreamKey),
    AlignedInfo(StreamKey),
    PointCloud,
    Imu(StreamKey),
    ImuInfo(StreamKey),
    Extrinsics(StreamKey),
    StaticTransforms,
    Counter,
}

impl Topic {
    /// The topic name relative to the camera namespace.
    pub fn name(&self) -> String {
        let stream_name = |key: &StreamKey| {
            registry::describe(*key)
                .map(|desc| desc.name.to_string())
                .unwrap_or_else(|| format!("{}{}", key.kind, key.index))
        };

        match self {
            Topic::Image(key) => match registry::describe(*key) {
                Some(desc) => registry::image_topic(&desc),
                None => format!("{}/image_raw", stream_name(key)),
            },
            Topic::CameraInfo(key) => format!("{}/camera_info", stream_name(key)),
            Topic::AlignedImage(key) => {
                format!("aligned_depth_to_{}/image_raw", stream_name(key))
            }
            Topic::AlignedInfo(key) => {
                format!("aligned_depth_to_{}/camera_info", stream_name(key))
            }
            Topic::PointCloud => "depth/color/points".to_string(),
            Topic::Imu(key) => format!("{}/sample", stream_name(key)),
            Topic::ImuInfo(key) => format!("{}/imu_info", stream_name(key)),
            Topic::Extrinsics(key) => format!("extrinsics/depth_to_{}", stream_name(key)),
            Topic::StaticTransforms => "tf_static".to_string(),
            Topic::Counter => "depth/counter".to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The record carried by an [Output].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Image(Image),
    CameraInfo(CameraInfo),
    PointCloud(PointCloud),
    Imu(Imu),
    ImuInfo(ImuInfo),
    Extrinsics(ExtrinsicsMsg),
    Transforms(Vec<TransformStamped>),
    Counter(Counter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub topic: Topic,
    pub payload: Payload,
}

impl Output {
    pub fn new(topic: Topic, payload: Payload) -> Self {
        Self { topic, payload }
    }
}

/// Destination of everything a session produces.
pub trait OutputSink: Send + Sync {
    /// Checks if anyone currently consumes `topic`.
    fn has_subscribers(&self, topic: &Topic) -> bool;

    fn publish(&self, output: Output) -> Result<()>;
}

/// Which topics a [ChannelSink] reports as subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Subscribers {
    All,
    Only(IndexSet<Topic>),
}

/// Forwards outputs into a bounded `flume` channel.
///
/// Subscriptions are tracked per topic. A sink created with
/// [ChannelSink::subscribe_all] reports every topic as subscribed.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Output>,
    subscribers: RwLock<Subscribers>,
}

impl ChannelSink {
    /// Creates a sink without subscribers and the receiving end of its
    /// channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Output>) {
        let (tx, rx) = flume::bounded(capacity);
        let sink = Self {
            tx,
            subscribers: RwLock::new(Subscribers::Only(IndexSet::new())),
        };
        (sink, rx)
    }

    /// Creates a sink on an unbounded channel.
    pub fn unbounded() -> (Self, Receiver<Output>) {
        let (tx, rx) = flume::unbounded();
        let sink = Self {
            tx,
            subscribers: RwLock::new(Subscribers::Only(IndexSet::new())),
        };
        (sink, rx)
    }

    pub fn subscribe(&self, topic: Topic) {
        if let Ok(mut guard) = self.subscribers.write() {
            match &mut *guard {
                Subscribers::All => {}
                Subscribers::Only(topics) => {
                    topics.insert(topic);
                }
            }
        }
    }

    pub fn subscribe_all(&self) {
        if let Ok(mut guard) = self.subscribers.write() {
            *guard = Subscribers::All;
        }
    }

    pub fn unsubscribe(&self, topic: &Topic) {
        if let Ok(mut guard) = self.subscribers.write()
            && let Subscribers::Only(topics) = &mut *guard
        {
            topics.shift_remove(topic);
        }
    }
}

impl OutputSink for ChannelSink {
    fn has_subscribers(&self, topic: &Topic) -> bool {
        match self.subscribers.read() {
            Ok(guard) => match &*guard {
                Subscribers::All => true,
                Subscribers::Only(topics) => topics.contains(topic),
            },
            Err(_) => false,
        }
    }

    fn publish(&self, output: Output) -> Result<()> {
        let topic = output.topic;
        self.tx
            .send(output)
            .map_err(|_| eyre!("Failed to publish to topic '{topic}': receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::Header,
        types::{ACCEL, COLOR, DEPTH, INFRA1},
    };
    use std::time::Duration;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Image(DEPTH).name(), "depth/image_rect_raw");
        assert_eq!(Topic::Image(COLOR).name(), "color/image_raw");
        assert_eq!(Topic::CameraInfo(INFRA1).name(), "infra1/camera_info");
        assert_eq!(
            Topic::AlignedImage(COLOR).name(),
            "aligned_depth_to_color/image_raw"
        );
        assert_eq!(Topic::Imu(ACCEL).name(), "accel/sample");
        assert_eq!(Topic::Extrinsics(INFRA1).name(), "extrinsics/depth_to_infra1");
    }

    #[test]
    fn test_subscriptions() {
        let (sink, _rx) = ChannelSink::bounded(4);
        assert!(!sink.has_subscribers(&Topic::PointCloud));

        sink.subscribe(Topic::PointCloud);
        assert!(sink.has_subscribers(&Topic::PointCloud));
        assert!(!sink.has_subscribers(&Topic::Image(DEPTH)));

        sink.unsubscribe(&Topic::PointCloud);
        assert!(!sink.has_subscribers(&Topic::PointCloud));

        sink.subscribe_all();
        assert!(sink.has_subscribers(&Topic::Image(DEPTH)));
    }

    #[test]
    fn test_publish_fails_without_receiver() {
        let (sink, rx) = ChannelSink::bounded(1);
        let counter = Output::new(
            Topic::Counter,
            Payload::Counter(Counter {
                header: Header::new(Duration::ZERO, ""),
                counter: 0,
            }),
        );

        sink.publish(counter.clone()).unwrap();
        assert_eq!(rx.recv().unwrap(), counter);

        drop(rx);
        assert!(sink.publish(counter).is_err());
    }
}
