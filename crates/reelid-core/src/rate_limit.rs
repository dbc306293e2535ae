use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    time::{Duration, Instant},
};

/// Keys kept before elapsed windows are swept out of the map.
const PRUNE_THRESHOLD: usize = 4096;

/// Returned when a key has no permits left in its current window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("rate limited: {consumed_points} denied request(s), next permit in {ms_before_next}ms")]
pub struct RateLimitRejection {
    /// Denials for this key since its last successful consumption (first denial is 1).
    pub consumed_points: u32,
    /// Milliseconds until the window resets. Always in `1..=duration`.
    pub ms_before_next: u64,
}

impl RateLimitRejection {
    /// Remaining wait rounded to whole seconds, for user-facing notices.
    pub fn seconds_before_next(&self) -> u64 {
        (self.ms_before_next + 500) / 1000
    }
}

#[derive(Clone, Debug)]
struct Window {
    started: Instant,
    consumed: u32,
    denied: u32,
}

/// Fixed-window limiter: at most `points` permits per key per `duration`.
///
/// State is in-memory only and starts empty on every process start.
#[derive(Clone)]
pub struct RateLimiter<K = i64> {
    points: u32,
    duration: Duration,
    windows: HashMap<K, Window>,
}

impl<K> fmt::Debug for RateLimiter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("points", &self.points)
            .field("duration", &self.duration)
            .field("keys", &self.windows.len())
            .finish()
    }
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(points: u32, duration: Duration) -> Self {
        Self {
            points: points.max(1),
            duration: duration.max(Duration::from_millis(1)),
            windows: HashMap::new(),
        }
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn consume(&mut self, key: K) -> Result<(), RateLimitRejection> {
        self.consume_at(key, Instant::now())
    }

    pub fn consume_at(&mut self, key: K, now: Instant) -> Result<(), RateLimitRejection> {
        if self.windows.len() >= PRUNE_THRESHOLD {
            self.prune_at(now);
        }

        let duration = self.duration;
        let window = self.windows.entry(key).or_insert_with(|| Window {
            started: now,
            consumed: 0,
            denied: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= duration {
            window.started = now;
            window.consumed = 0;
            window.denied = 0;
        }

        if window.consumed < self.points {
            window.consumed += 1;
            window.denied = 0;
            return Ok(());
        }

        window.denied = window.denied.saturating_add(1);
        let left = duration.saturating_sub(now.saturating_duration_since(window.started));
        Err(RateLimitRejection {
            consumed_points: window.denied,
            ms_before_next: (left.as_millis() as u64).max(1),
        })
    }

    /// Drop keys whose window has fully elapsed; they would be reset on next use anyway.
    pub fn prune_at(&mut self, now: Instant) {
        let duration = self.duration;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < duration);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
