mod common;

use common::{ManualClock, MockDevice, RecordingSink, color_frame, config_with, depth_frame};
use depthsync_core::{
    COLOR, DEPTH, DropPolicy, FrameSyncer, Session, SyncConfig, Topic, VideoFrame,
    syncer::Group,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{sync::Arc, time::Duration};

const WINDOW: Duration = Duration::from_millis(16);

fn sync_config(buffer_size: usize, drop_policy: DropPolicy) -> SyncConfig {
    SyncConfig {
        window_size: WINDOW,
        buffer_size,
        drop_policy,
    }
}

/// Interleaves two jittered 30 Hz streams sharing one frame clock, where
/// each frame is lost with the given probability.
fn jittered_events(rng: &mut StdRng, count: u64, loss: f64) -> Vec<VideoFrame> {
    let mut events = vec![];

    for i in 0..count {
        let base = 100.0 + i as f64 * 33.0;
        let depth_ts = base + rng.random_range(-2.0..2.0);
        let color_ts = base + 5.0 + rng.random_range(-2.0..2.0);

        let mut pair = vec![];
        if !rng.random_bool(loss) {
            pair.push(depth_frame(depth_ts, i, 1000));
        }
        if !rng.random_bool(loss) {
            pair.push(color_frame(color_ts, i, [0, 0, 0]));
        }
        if rng.random_bool(0.5) {
            pair.reverse();
        }
        events.extend(pair);
    }

    events
}

fn check_groups(groups: &[Group<VideoFrame>]) {
    let mut last_min: Option<f64> = None;

    for group in groups {
        let keys: Vec<_> = group.keys().copied().collect();
        assert!(
            keys == [DEPTH, COLOR] || keys == [DEPTH] || keys == [COLOR],
            "unexpected group keys {keys:?}"
        );

        let stamps: Vec<f64> = group.values().map(|frame| frame.timestamp_ms).collect();
        let min = stamps.iter().copied().fold(f64::INFINITY, f64::min);
        let max = stamps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(
            max - min <= WINDOW.as_secs_f64() * 1000.0 + 1e-3,
            "group spans {min}..{max}"
        );

        if let Some(last) = last_min {
            assert!(min > last, "groups out of order: {last} then {min}");
        }
        last_min = Some(min);
    }
}

#[test]
fn test_random_streams_keep_sync_invariants() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let policy = if seed % 2 == 0 {
            DropPolicy::DropOldest
        } else {
            DropPolicy::RejectNew
        };
        let mut syncer = FrameSyncer::new([DEPTH, COLOR], &sync_config(4, policy)).unwrap();

        let events = jittered_events(&mut rng, 200, 0.1);
        let pushed = events.len();

        let mut groups = vec![];
        for frame in events {
            groups.extend(syncer.push(frame.key, frame));
        }
        groups.extend(syncer.flush());

        check_groups(&groups);

        // Every frame is either emitted in a group or counted as dropped.
        let emitted: usize = groups.iter().map(|group| group.len()).sum();
        assert_eq!(emitted + syncer.dropped(), pushed);
        assert!(groups.iter().any(|group| group.len() == 2));
        assert_eq!(syncer.dropped(), 0);
    }
}

#[test]
fn test_random_session_publishes_each_group_once() {
    let mut rng = StdRng::seed_from_u64(42);
    let sink = Arc::new(RecordingSink::with_subscribers([
        Topic::Image(DEPTH),
        Topic::Image(COLOR),
    ]));
    let mut device = MockDevice::new();

    let mut config = config_with(&[DEPTH, COLOR]);
    config.enable_sync = true;
    let clock = Arc::new(ManualClock::at(Duration::from_secs(50)));

    let mut session = Session::setup(config, &mut device, sink.clone(), clock).unwrap();

    let events = jittered_events(&mut rng, 300, 0.05);
    let pushed = events.len();
    for frame in events {
        session.handle(frame.into());
    }
    session.flush();

    let stats = session.stats();
    assert_eq!(stats.events, pushed);
    assert_eq!(stats.errors, 0);

    let depth = sink.images(Topic::Image(DEPTH));
    let color = sink.images(Topic::Image(COLOR));
    assert_eq!(depth.len() + color.len() + stats.dropped, pushed);
    assert!(depth.len().max(color.len()) <= stats.composites);
    assert!(depth.len() + color.len() >= stats.composites);

    // Every published depth frame keeps its own stream sequence.
    assert!(depth.windows(2).all(|pair| pair[0].header.seq < pair[1].header.seq));
}

#[test]
fn test_lossy_stream_never_thins_the_other() {
    for seed in 0..10 {
        let mut rng = StdRng::seed_from_u64(100 + seed);
        let mut syncer =
            FrameSyncer::new([DEPTH, COLOR], &sync_config(4, DropPolicy::DropOldest)).unwrap();

        // Depth is complete, color loses half its frames.
        let events: Vec<_> = jittered_events(&mut rng, 200, 0.0)
            .into_iter()
            .filter(|frame| frame.key == DEPTH || rng.random_bool(0.5))
            .collect();
        let depth_count = events.iter().filter(|frame| frame.key == DEPTH).count();

        let mut groups = vec![];
        for frame in events {
            groups.extend(syncer.push(frame.key, frame));
        }
        groups.extend(syncer.flush());

        check_groups(&groups);
        let depth_emitted = groups.iter().filter(|g| g.contains_key(&DEPTH)).count();
        assert_eq!(depth_emitted, depth_count);
        assert_eq!(syncer.dropped(), 0);

        // A surviving color frame always meets its depth partner.
        assert!(
            groups
                .iter()
                .filter(|group| group.contains_key(&COLOR))
                .all(|group| group.len() == 2)
        );
    }
}
