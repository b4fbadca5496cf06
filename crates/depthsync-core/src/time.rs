//! Conversion of device timestamps into project time.
//!
//! A session owns one [TimeBase]. The first frame seen by any stream
//! anchors a pair of (host time, device time); the anchor is never
//! replaced afterwards. Every later timestamp is derived either from the
//! host clock plus a fixed offset, or by extrapolating the device clock
//! from the anchor.

use crate::types::TimestampDomain;
use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tracing::{info, warn};

/// Source of host time, as a duration since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock time that never goes backwards within a process.
#[derive(Debug, Clone)]
pub struct SystemClock {
    wall: Duration,
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            wall: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.wall + self.start.elapsed()
    }
}

/// The (host time, device time) pair captured on the first frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub process_time: Duration,
    pub device_time_ms: f64,
}

impl Anchor {
    /// Extrapolates a device timestamp from the anchor. Returns `None`
    /// for a timestamp that is not finite or lands out of range.
    pub fn extrapolate(&self, device_time_ms: f64) -> Option<Duration> {
        shift(self.process_time, (device_time_ms - self.device_time_ms) / 1000.0)
    }
}

/// Moves `time` by a signed number of seconds, saturating at zero.
fn shift(time: Duration, seconds: f64) -> Option<Duration> {
    let delta = Duration::try_from_secs_f64(seconds.abs()).ok()?;
    if seconds >= 0.0 {
        time.checked_add(delta)
    } else {
        Some(time.saturating_sub(delta))
    }
}

/// How image frames are stamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimestampPolicy {
    /// Host time at processing plus an offset in seconds.
    Synchronized { offset: f64 },
    /// Anchor host time plus the device time elapsed since the anchor.
    Unsynchronized,
}

pub struct TimeBase {
    clock: Arc<dyn Clock>,
    policy: TimestampPolicy,
    anchor: OnceLock<Anchor>,
}

impl std::fmt::Debug for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeBase")
            .field("policy", &self.policy)
            .field("anchor", &self.anchor.get())
            .finish()
    }
}

impl TimeBase {
    pub fn new(clock: Arc<dyn Clock>, policy: TimestampPolicy) -> Self {
        Self {
            clock,
            policy,
            anchor: OnceLock::new(),
        }
    }

    pub fn policy(&self) -> TimestampPolicy {
        self.policy
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor.get().copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.anchor.get().is_some()
    }

    /// Anchors the time base on the first call and returns the anchor.
    /// Concurrent and later calls observe the same anchor.
    pub fn establish(&self, device_time_ms: f64, domain: TimestampDomain) -> Anchor {
        *self.anchor.get_or_init(|| {
            if domain == TimestampDomain::SystemTime {
                warn!(
                    "Frame metadata isn't available! (frame_timestamp_domain = system_time)"
                );
            }
            let anchor = Anchor {
                process_time: self.clock.now(),
                device_time_ms,
            };
            info!(
                process_time = ?anchor.process_time,
                device_time_ms,
                "time base initialized"
            );
            anchor
        })
    }

    /// Assigns the project time of an image frame, anchoring the time
    /// base if this is the first frame of the session.
    ///
    /// A timestamp that is not finite never anchors the time base and
    /// yields `None`, as does one that cannot be represented.
    pub fn assign(&self, device_time_ms: f64, domain: TimestampDomain) -> Option<Duration> {
        if !device_time_ms.is_finite() {
            return None;
        }
        let anchor = self.establish(device_time_ms, domain);

        match self.policy {
            TimestampPolicy::Synchronized { offset } => shift(self.clock.now(), offset),
            TimestampPolicy::Unsynchronized => anchor.extrapolate(device_time_ms),
        }
    }

    /// Assigns the project time of a motion sample. Returns `None` until
    /// an image frame has anchored the time base, and for timestamps
    /// [Anchor::extrapolate] rejects.
    pub fn assign_motion(&self, device_time_ms: f64) -> Option<Duration> {
        self.anchor.get()?.extrapolate(device_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct FakeClock(AtomicU64);

    impl FakeClock {
        fn set_ms(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_unsynchronized_extrapolates_from_anchor() {
        let clock = Arc::new(FakeClock::default());
        clock.set_ms(1_000_000);
        let base = TimeBase::new(clock.clone(), TimestampPolicy::Unsynchronized);

        let t0 = base.assign(500.0, TimestampDomain::HardwareClock);
        assert_eq!(t0, Some(Duration::from_millis(1_000_000)));

        clock.set_ms(5_000_000);
        let t1 = base.assign(533.0, TimestampDomain::HardwareClock);
        assert_eq!(t1, Some(Duration::from_millis(1_000_033)));
    }

    #[test]
    fn test_synchronized_uses_host_time_plus_offset() {
        let clock = Arc::new(FakeClock::default());
        clock.set_ms(10_000);
        let base = TimeBase::new(clock.clone(), TimestampPolicy::Synchronized { offset: -2.5 });

        assert_eq!(
            base.assign(123.0, TimestampDomain::HardwareClock),
            Some(Duration::from_millis(7_500))
        );

        clock.set_ms(10_040);
        assert_eq!(
            base.assign(0.0, TimestampDomain::HardwareClock),
            Some(Duration::from_millis(7_540))
        );
    }

    #[test]
    fn test_anchor_set_once() {
        let clock = Arc::new(FakeClock::default());
        clock.set_ms(42);
        let base = TimeBase::new(clock.clone(), TimestampPolicy::Unsynchronized);

        let first = base.establish(10.0, TimestampDomain::SystemTime);
        clock.set_ms(99);
        let second = base.establish(20.0, TimestampDomain::HardwareClock);

        assert_eq!(first, second);
        assert_eq!(base.anchor().unwrap().device_time_ms, 10.0);
    }

    #[test]
    fn test_motion_dropped_until_anchored() {
        let clock = Arc::new(FakeClock::default());
        clock.set_ms(1_000);
        let base = TimeBase::new(clock, TimestampPolicy::Synchronized { offset: 0.0 });

        assert!(base.assign_motion(5.0).is_none());
        base.assign(5.0, TimestampDomain::HardwareClock);
        assert_eq!(base.assign_motion(7.0), Some(Duration::from_millis(1_002)));
    }

    #[test]
    fn test_extrapolate_before_anchor() {
        let anchor = Anchor {
            process_time: Duration::from_millis(100),
            device_time_ms: 50.0,
        };
        assert_eq!(anchor.extrapolate(40.0), Some(Duration::from_millis(90)));
        assert_eq!(anchor.extrapolate(-1000.0), Some(Duration::ZERO));
    }

    #[test]
    fn test_non_finite_timestamps_are_rejected() {
        let clock = Arc::new(FakeClock::default());
        clock.set_ms(1_000);
        let base = TimeBase::new(clock, TimestampPolicy::Unsynchronized);

        // A bad first frame does not anchor the time base.
        assert_eq!(base.assign(f64::NAN, TimestampDomain::HardwareClock), None);
        assert!(!base.is_initialized());

        assert!(base.assign(10.0, TimestampDomain::HardwareClock).is_some());
        assert_eq!(base.assign(f64::INFINITY, TimestampDomain::HardwareClock), None);
        assert_eq!(base.assign(1e300, TimestampDomain::HardwareClock), None);
        assert_eq!(base.assign_motion(f64::NAN), None);
        assert_eq!(base.assign_motion(f64::NEG_INFINITY), None);
        assert_eq!(base.assign_motion(20.0), Some(Duration::from_millis(1_010)));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
