//! Per-client rate limiting
//!
//! Sliding window: each client may submit `quota` jobs within any `window`.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub struct RateLimiter {
    quota: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self {
            quota,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one unit of `client`'s quota.
    ///
    /// Returns how long to wait before the next attempt can succeed when the
    /// quota is exhausted.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let mut hits = self.hits.lock();
        let recent = hits.entry(client.to_string()).or_default();

        while let Some(oldest) = recent.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() >= self.quota {
            let retry_after = recent
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        recent.push_back(now);
        Ok(())
    }

    /// Drops clients with no submissions inside the window
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, recent| {
            recent
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });
        before - hits.len()
    }
}
