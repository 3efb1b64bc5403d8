//! Process-wide triage activity clock.
//!
//! The only ambient state the engine keeps is "when did triage last run",
//! used to gate keep-alive traffic and shared-pool staleness. It is a plain
//! monotonic clock read behind an `Arc`, injected wherever needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Keep-alive and staleness cutoff: a pool untouched this long is rotated out
/// on next use rather than kept warm in the background.
pub(crate) const ACTIVITY_IDLE_LIMIT: Duration = Duration::from_secs(5 * 60);

/// Shared monotonic record of the last triage activity.
#[derive(Clone)]
pub struct TriageActivity {
    inner: Arc<ActivityInner>,
}

struct ActivityInner {
    epoch: Instant,
    /// Milliseconds since `epoch` of the last mark, offset by 1; 0 means never.
    last_mark: AtomicU64,
}

impl TriageActivity {
    /// New clock with no recorded activity.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                epoch: Instant::now(),
                last_mark: AtomicU64::new(0),
            }),
        }
    }

    /// Record that triage work is happening now.
    pub fn mark(&self) {
        let ms = self.inner.epoch.elapsed().as_millis() as u64;
        self.inner.last_mark.store(ms + 1, Ordering::Relaxed);
    }

    /// Time since the last mark, or None if triage never ran.
    pub fn idle_duration(&self) -> Option<Duration> {
        let raw = self.inner.last_mark.load(Ordering::Relaxed);
        if raw == 0 {
            return None;
        }
        let elapsed = self.inner.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(elapsed.saturating_sub(raw - 1)))
    }

    /// Whether triage has been quiet for longer than `limit` (a never-marked
    /// clock counts as quiet).
    pub fn idle_longer_than(&self, limit: Duration) -> bool {
        self.idle_duration().is_none_or(|idle| idle > limit)
    }
}

impl Default for TriageActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_clock_is_idle() {
        let activity = TriageActivity::new();
        assert!(activity.idle_duration().is_none());
        assert!(activity.idle_longer_than(Duration::ZERO));
    }

    #[test]
    fn mark_resets_idle_time() {
        let activity = TriageActivity::new();
        activity.mark();
        let idle = activity.idle_duration().unwrap();
        assert!(idle < Duration::from_secs(1));
        assert!(!activity.idle_longer_than(Duration::from_secs(60)));
    }

    #[test]
    fn clones_share_the_clock() {
        let a = TriageActivity::new();
        let b = a.clone();
        b.mark();
        assert!(a.idle_duration().is_some());
    }
}
