use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Per-key leading + trailing rate limiter. The clock is passed in.
///
/// A value offered once the interval has elapsed since the key's last send
/// goes out immediately. Otherwise it replaces whatever was pending and
/// goes out once, at the end of the window.
#[derive(Debug)]
pub struct RateLimiter<K, V> {
    interval: Duration,
    last_sent: HashMap<K, Instant>,
    pending: HashMap<K, V>,
}

impl<K, V> RateLimiter<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Returns the value when it should be sent now.
    pub fn offer(&mut self, key: K, value: V, now: Instant) -> Option<V> {
        match self.last_sent.get(&key) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => {
                self.pending.insert(key, value);
                None
            }
            _ => {
                self.pending.remove(&key);
                self.last_sent.insert(key, now);
                Some(value)
            }
        }
    }

    /// When the earliest pending value becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .keys()
            .filter_map(|key| self.last_sent.get(key))
            .map(|last| *last + self.interval)
            .min()
    }

    /// Pending values whose window has closed, marked as sent at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .pending
            .keys()
            .filter(|key| match self.last_sent.get(*key) {
                Some(last) => *last + self.interval <= now,
                None => true,
            })
            .cloned()
            .collect();

        due.into_iter()
            .filter_map(|key| {
                let value = self.pending.remove(&key)?;
                self.last_sent.insert(key.clone(), now);
                Some((key, value))
            })
            .collect()
    }

    /// Pull the pending value for `key` ahead of its window, marked as sent
    /// at `now`.
    pub fn take(&mut self, key: &K, now: Instant) -> Option<V> {
        let value = self.pending.remove(key)?;
        self.last_sent.insert(key.clone(), now);
        Some(value)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
