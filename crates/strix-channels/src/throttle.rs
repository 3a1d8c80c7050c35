//! Per-sender message throttling
//!
//! One student pasting their homework line by line can starve the backend
//! for the whole class. Each sender gets a sliding window of timestamps;
//! messages beyond the burst allowance inside the window are dropped.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window throttle keyed by sender. Cloning shares the window state.
#[derive(Clone)]
pub struct Throttle {
    history: Arc<DashMap<String, VecDeque<Instant>>>,
    /// Messages allowed per sender inside one window.
    burst: usize,
    window: Duration,
}

impl Throttle {
    pub fn new(burst: usize, window: Duration) -> Self {
        Self {
            history: Arc::new(DashMap::new()),
            burst,
            window,
        }
    }

    /// Record an attempt from `sender`. `false` means drop the message.
    pub fn allow(&self, sender: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.history.entry(sender.to_string()).or_default();
        let hits = entry.value_mut();

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) < self.window {
                break;
            }
            hits.pop_front();
        }

        if hits.len() >= self.burst {
            debug!(
                "throttling '{sender}': {} messages inside {:?} (burst {})",
                hits.len(),
                self.window,
                self.burst
            );
            return false;
        }
        hits.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_burst() {
        let throttle = Throttle::new(3, Duration::from_secs(60));
        assert!(throttle.allow("alice"));
        assert!(throttle.allow("alice"));
        assert!(throttle.allow("alice"));
        assert!(!throttle.allow("alice"));
    }

    #[test]
    fn senders_have_independent_windows() {
        let throttle = Throttle::new(1, Duration::from_secs(60));
        assert!(throttle.allow("alice"));
        assert!(!throttle.allow("alice"));
        assert!(throttle.allow("bob"));
    }

    #[test]
    fn old_messages_age_out() {
        let throttle = Throttle::new(2, Duration::from_millis(50));
        assert!(throttle.allow("alice"));
        assert!(throttle.allow("alice"));
        assert!(!throttle.allow("alice"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.allow("alice"));
    }

    #[test]
    fn clones_share_the_same_windows() {
        let throttle = Throttle::new(2, Duration::from_secs(60));
        let other = throttle.clone();
        assert!(throttle.allow("alice"));
        assert!(other.allow("alice"));
        assert!(!throttle.allow("alice"));
    }

    #[test]
    fn a_zero_burst_drops_everything() {
        let throttle = Throttle::new(0, Duration::from_secs(60));
        assert!(!throttle.allow("alice"));
    }
}
