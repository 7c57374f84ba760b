//! Named interval timers checked once per tick
//!
//! Loops pass the tick's `now` in, so tests drive time with synthetic
//! instants instead of sleeping.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Timer {
    interval: Duration,
    next_fire: Instant,
}

#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    timers: HashMap<K, Timer>,
}

impl<K: Copy + Eq + Hash> Scheduler<K> {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }

    /// Arms (or re-arms) `key` to fire first at `now + first_delay`, then every `interval`.
    pub fn arm(&mut self, key: K, now: Instant, first_delay: Duration, interval: Duration) {
        self.timers.insert(
            key,
            Timer {
                interval,
                next_fire: now + first_delay,
            },
        );
    }

    pub fn disarm(&mut self, key: K) -> bool {
        self.timers.remove(&key).is_some()
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.timers.contains_key(&key)
    }

    /// Returns every timer due at `now` and reschedules each one interval from `now`.
    ///
    /// A timer fires at most once per call however late the tick is.
    pub fn fired(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        for (key, timer) in self.timers.iter_mut() {
            if now >= timer.next_fire {
                timer.next_fire = now + timer.interval;
                due.push(*key);
            }
        }
        due
    }

    /// Convenience for loops that check timers in a fixed order.
    pub fn take(&mut self, key: K, now: Instant) -> bool {
        match self.timers.get_mut(&key) {
            Some(timer) if now >= timer.next_fire => {
                timer.next_fire = now + timer.interval;
                true
            }
            _ => false,
        }
    }
}

impl<K: Copy + Eq + Hash> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}
