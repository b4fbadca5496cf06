//! Groups frames of independently clocked streams into composite
//! frames.
//!
//! Each enabled stream owns a buffer of frames with strictly increasing
//! device timestamps. The window opens at the oldest buffered frame.
//! Once any frame newer than the end of the window arrives, nothing can
//! join the window any more: the front frame of every stream inside it is
//! emitted as one group and the commit timestamp advances. A stream
//! without a frame in the window is missing from the group, so a slow or
//! silent stream never holds the others back. Frames at or before the
//! commit timestamp are late and are rejected.

use crate::{
    buffer::Buffer,
    config::{DropPolicy, SyncConfig},
    types::{StreamKey, WithTimestamp},
};
use eyre::{Result, ensure};
use indexmap::IndexMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A group of frames, at most one per stream, in the order streams were
/// registered.
pub type Group<T> = IndexMap<StreamKey, T>;

#[derive(Debug)]
pub struct FrameSyncer<T>
where
    T: WithTimestamp,
{
    /// A list of buffers indexed by stream.
    buffers: IndexMap<StreamKey, Buffer<T>>,

    /// Marks the timestamp where frames before the time point are
    /// emitted.
    commit_ts: Option<Duration>,

    /// The maximum size of each buffer.
    buf_size: usize,

    /// The windows size that a group of frames should reside within.
    window_size: Duration,

    drop_policy: DropPolicy,

    /// Number of frames discarded so far.
    dropped: usize,
}

impl<T> FrameSyncer<T>
where
    T: WithTimestamp,
{
    pub fn new<I>(keys: I, config: &SyncConfig) -> Result<Self>
    where
        I: IntoIterator<Item = StreamKey>,
    {
        let SyncConfig {
            window_size,
            buffer_size: buf_size,
            drop_policy,
        } = *config;

        ensure!(buf_size >= 2, "buffer size must be at least 2");
        ensure!(window_size > Duration::ZERO, "window size must be non-zero");

        let buffers: IndexMap<_, _> = keys
            .into_iter()
            .map(|key| (key, Buffer::with_capacity(buf_size)))
            .collect();
        ensure!(!buffers.is_empty(), "the synchronizer needs at least one stream");

        Ok(Self {
            buffers,
            commit_ts: None,
            buf_size,
            window_size,
            drop_policy,
            dropped: 0,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = StreamKey> + '_ {
        self.buffers.keys().copied()
    }

    pub fn commit_ts(&self) -> Option<Duration> {
        self.commit_ts
    }

    /// Number of frames discarded as late, out of order, unknown or
    /// overflowing since the syncer was created.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Feeds a frame and returns every group whose window has closed.
    pub fn push(&mut self, key: StreamKey, item: T) -> Vec<Group<T>> {
        if self.insert(key, item).is_err() {
            self.dropped += 1;
            return vec![];
        }

        let mut groups = vec![];
        while let Some(group) = self.try_match(false) {
            groups.push(group);
        }
        groups
    }

    /// Drains the buffers at the end of a session, closing every window
    /// that is still open.
    pub fn flush(&mut self) -> Vec<Group<T>> {
        let mut groups = vec![];
        while let Some(group) = self.try_match(true) {
            groups.push(group);
        }
        groups
    }

    /// Inserts a frame into the buffer of its stream.
    fn insert(&mut self, key: StreamKey, item: T) -> Result<(), T> {
        let timestamp = item.timestamp();

        if let Some(commit_ts) = self.commit_ts
            && commit_ts >= timestamp
        {
            debug!(stream = %key, ?timestamp, "drop a late frame");
            return Err(item);
        }

        let Some(buffer) = self.buffers.get_mut(&key) else {
            warn!(stream = %key, "drop a frame of a stream the synchronizer does not track");
            return Err(item);
        };

        if buffer.len() >= self.buf_size {
            match self.drop_policy {
                DropPolicy::RejectNew => {
                    debug!(stream = %key, "buffer is full, reject the new frame");
                    return Err(item);
                }
                DropPolicy::DropOldest => {
                    debug!(stream = %key, "buffer is full, drop the oldest frame");
                    buffer.pop_front();
                    self.dropped += 1;
                }
            }
        }

        buffer.try_push(item).inspect_err(|_| {
            debug!(stream = %key, ?timestamp, "drop an out-of-order frame");
        })
    }

    /// Emits the group in the window opened by the oldest buffered
    /// frame, once a newer frame has closed it or when `force` is set.
    fn try_match(&mut self, force: bool) -> Option<Group<T>> {
        let window_start = self.min_timestamp()?;
        let window_end = window_start.saturating_add(self.window_size);

        if !force && self.max_timestamp()? <= window_end {
            return None;
        }

        let group: Group<T> = self
            .buffers
            .iter_mut()
            .filter_map(|(key, buffer)| {
                let timestamp = buffer.front()?.timestamp();
                if timestamp > window_end {
                    return None;
                }
                buffer.pop_front().map(|item| (*key, item))
            })
            .collect();

        if group.len() < self.buffers.len() {
            debug!(
                size = group.len(),
                streams = self.buffers.len(),
                "emit a partial group"
            );
        }

        self.commit_ts = Some(window_start);
        Some(group)
    }

    /// Gets the oldest buffered timestamp.
    fn min_timestamp(&self) -> Option<Duration> {
        self.buffers
            .values()
            .filter_map(|buffer| Some(buffer.front()?.timestamp()))
            .min()
    }

    /// Gets the newest buffered timestamp.
    fn max_timestamp(&self) -> Option<Duration> {
        self.buffers
            .values()
            .filter_map(|buffer| Some(buffer.back()?.timestamp()))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{COLOR, DEPTH, INFRA1};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Stamp(Duration);

    impl WithTimestamp for Stamp {
        fn timestamp(&self) -> Duration {
            self.0
        }
    }

    fn stamp(ms: u64) -> Stamp {
        Stamp(Duration::from_millis(ms))
    }

    fn config(window_ms: u64, buffer_size: usize) -> SyncConfig {
        SyncConfig {
            window_size: Duration::from_millis(window_ms),
            buffer_size,
            drop_policy: DropPolicy::DropOldest,
        }
    }

    fn timestamps(group: &Group<Stamp>) -> Vec<u64> {
        group.values().map(|s| s.0.as_millis() as u64).collect()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(FrameSyncer::<Stamp>::new([DEPTH], &config(16, 1)).is_err());
        assert!(FrameSyncer::<Stamp>::new([DEPTH], &config(0, 4)).is_err());
        assert!(FrameSyncer::<Stamp>::new([], &config(16, 4)).is_err());
        assert!(FrameSyncer::<Stamp>::new([DEPTH], &config(1, 2)).is_ok());
    }

    #[test]
    fn test_two_streams_grouped_once_window_closes() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(16, 4)).unwrap();

        assert!(syncer.push(DEPTH, stamp(0)).is_empty());
        assert!(syncer.push(COLOR, stamp(2)).is_empty());

        let groups = syncer.push(DEPTH, stamp(33));
        assert_eq!(groups.len(), 1);
        assert_eq!(timestamps(&groups[0]), vec![0, 2]);
        assert_eq!(groups[0].keys().copied().collect::<Vec<_>>(), vec![DEPTH, COLOR]);
        assert_eq!(syncer.commit_ts(), Some(Duration::from_millis(0)));

        assert!(syncer.push(COLOR, stamp(35)).is_empty());

        let groups = syncer.flush();
        assert_eq!(groups.len(), 1);
        assert_eq!(timestamps(&groups[0]), vec![33, 35]);
    }

    #[test]
    fn test_unpaired_frame_goes_out_alone() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(10, 4)).unwrap();

        // Color misses the frame near 33ms.
        let mut groups = vec![];
        for (key, ms) in [
            (DEPTH, 0),
            (COLOR, 1),
            (DEPTH, 33),
            (DEPTH, 66),
            (COLOR, 67),
            (DEPTH, 99),
            (COLOR, 100),
        ] {
            groups.extend(syncer.push(key, stamp(ms)));
        }
        groups.extend(syncer.flush());

        let ts: Vec<_> = groups.iter().map(timestamps).collect();
        assert_eq!(ts, vec![vec![0, 1], vec![33], vec![66, 67], vec![99, 100]]);
        assert_eq!(groups[1].keys().copied().collect::<Vec<_>>(), vec![DEPTH]);
        assert_eq!(syncer.dropped(), 0);
    }

    #[test]
    fn test_slower_stream_does_not_thin_faster_one() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(16, 4)).unwrap();

        let mut groups = vec![];
        for i in 0..60u64 {
            groups.extend(syncer.push(DEPTH, stamp(i * 33)));
            if i % 2 == 0 {
                groups.extend(syncer.push(COLOR, stamp(i * 33 + 1)));
            }
        }
        groups.extend(syncer.flush());

        let depth = groups.iter().filter(|g| g.contains_key(&DEPTH)).count();
        let color = groups.iter().filter(|g| g.contains_key(&COLOR)).count();
        assert_eq!(depth, 60);
        assert_eq!(color, 30);
        assert_eq!(groups.len(), 60);
        assert_eq!(syncer.dropped(), 0);
    }

    #[test]
    fn test_silent_stream_does_not_stall() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(16, 3)).unwrap();

        let mut groups = vec![];
        for i in 0..10 {
            let emitted = syncer.push(DEPTH, stamp(i * 33));
            assert_eq!(emitted.len(), usize::from(i > 0));
            groups.extend(emitted);
        }
        groups.extend(syncer.flush());

        let ts: Vec<u64> = groups.iter().flat_map(timestamps).collect();
        assert_eq!(ts, (0..10).map(|i| i * 33).collect::<Vec<_>>());
        assert!(groups.iter().all(|group| group.len() == 1));
        assert_eq!(syncer.dropped(), 0);
    }

    #[test]
    fn test_late_frame_rejected() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(5, 4)).unwrap();

        syncer.push(DEPTH, stamp(10));
        let groups = syncer.push(DEPTH, stamp(40));
        assert_eq!(groups.len(), 1);

        // At the commit timestamp.
        assert!(syncer.push(COLOR, stamp(10)).is_empty());
        // Out of order with respect to the buffer.
        assert!(syncer.push(DEPTH, stamp(20)).is_empty());
        assert_eq!(syncer.dropped(), 2);
    }

    #[test]
    fn test_unknown_stream_is_dropped() {
        let mut syncer = FrameSyncer::new([DEPTH], &config(16, 4)).unwrap();
        assert!(syncer.push(INFRA1, stamp(10)).is_empty());
        assert_eq!(syncer.dropped(), 1);
    }

    #[test]
    fn test_single_stream_passes_every_frame() {
        let mut syncer = FrameSyncer::new([DEPTH], &config(16, 4)).unwrap();

        let mut emitted = vec![];
        for i in 0..10 {
            emitted.extend(syncer.push(DEPTH, stamp(i * 33)));
        }
        emitted.extend(syncer.flush());

        let ts: Vec<u64> = emitted.iter().flat_map(timestamps).collect();
        assert_eq!(ts, (0..10).map(|i| i * 33).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_oldest_when_buffer_overflows() {
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &config(100, 2)).unwrap();

        for ms in [0, 10, 20] {
            assert!(syncer.push(DEPTH, stamp(ms)).is_empty());
        }
        assert_eq!(syncer.dropped(), 1);

        let ts: Vec<_> = syncer.flush().iter().map(timestamps).collect();
        assert_eq!(ts, vec![vec![10], vec![20]]);
    }

    #[test]
    fn test_reject_new_keeps_oldest() {
        let mut syncer = FrameSyncer::new(
            [DEPTH, COLOR],
            &SyncConfig {
                drop_policy: DropPolicy::RejectNew,
                ..config(100, 2)
            },
        )
        .unwrap();

        syncer.push(DEPTH, stamp(0));
        syncer.push(DEPTH, stamp(10));
        assert!(syncer.push(DEPTH, stamp(20)).is_empty());
        assert_eq!(syncer.dropped(), 1);

        syncer.push(COLOR, stamp(1));
        let ts: Vec<_> = syncer.flush().iter().map(timestamps).collect();
        assert_eq!(ts, vec![vec![0, 1], vec![10]]);
    }
}
