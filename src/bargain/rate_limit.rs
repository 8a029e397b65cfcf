//! Single-shot submission throttle: one attempt per key per window.
//!
//! Best-effort and in-process only; the real once-per-user guarantee is the
//! unique constraint on the attempts table.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct RateLimiter {
    window: Duration,
    last_seen: RwLock<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    /// Records the attempt and reports whether it is allowed. A denied
    /// attempt does not refresh the window.
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();

        {
            let map = self.last_seen.read().await;
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.window {
                    return false;
                }
            }
        }

        let mut map = self.last_seen.write().await;
        // Re-check under the write lock; two concurrent requests may both
        // pass the read-lock check.
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        map.insert(key.to_string(), now);

        // Drop stale entries so the map stays bounded.
        map.retain(|_, last| now.duration_since(*last) < self.window);

        true
    }
}
