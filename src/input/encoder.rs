use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Turns continuous gesture deltas (drag pixels, dial radians) into whole
/// encoder steps. The unconsumed remainder carries over to the next delta.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepAccumulator {
    accumulated: f32,
}

impl StepAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.accumulated = 0.0;
    }

    pub fn residual(&self) -> f32 {
        self.accumulated
    }

    /// Add `delta` and return the signed number of steps to emit, capped at
    /// `±max_steps`. Positive is clockwise.
    pub fn feed(&mut self, delta: f32, step_size: f32, max_steps: i32) -> i32 {
        if !step_size.is_finite() || step_size <= 0.0 || max_steps < 1 {
            return 0;
        }
        self.accumulated += delta;
        let steps = (self.accumulated / step_size).trunc() as i32;
        if steps == 0 {
            return 0;
        }
        let steps = steps.clamp(-max_steps, max_steps);
        self.accumulated -= steps as f32 * step_size;
        steps
    }
}

/// Per-key rate limiter: a key may fire at most once per `interval`.
#[derive(Debug)]
pub struct Debouncer<K> {
    interval: Duration,
    last: HashMap<K, Instant>,
}

impl<K: Eq + Hash> Debouncer<K> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// Record and allow the event unless the same key fired within the interval.
    pub fn allow(&mut self, key: K, now: Instant) -> bool {
        if let Some(prev) = self.last.get(&key) {
            if now.saturating_duration_since(*prev) < self.interval {
                return false;
            }
        }
        self.last.insert(key, now);
        true
    }
}
