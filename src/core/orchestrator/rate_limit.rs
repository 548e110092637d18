//! Central request pacing shared by every worker.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::backoff::{cancelled, is_cancelled};

/// Hands out evenly spaced call slots, independent of worker count
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `None` or zero disables limiting
    pub fn per_minute(requests: Option<u32>) -> Self {
        let interval = requests
            .filter(|&r| r > 0)
            .map(|r| Duration::from_secs(60) / r);
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self::per_minute(None)
    }

    /// Wait for the next slot. Returns false if cancelled first.
    pub async fn acquire(&self, cancel: &mut watch::Receiver<bool>) -> bool {
        if is_cancelled(cancel) {
            return false;
        }
        let Some(interval) = self.interval else {
            return true;
        };

        let slot = {
            let mut next = self.next_slot.lock();
            let slot = (*next).max(Instant::now());
            *next = slot + interval;
            slot
        };

        tokio::select! {
            _ = tokio::time::sleep_until(slot) => true,
            _ = cancelled(cancel) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slots_are_spaced_by_the_interval() {
        // 1200/min is one slot every 50ms
        let limiter = RateLimiter::per_minute(Some(1200));
        let (_tx, mut rx) = watch::channel(false);

        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.acquire(&mut rx).await);
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unlimited_never_waits_but_honours_cancellation() {
        let limiter = RateLimiter::unlimited();
        let (tx, mut rx) = watch::channel(false);
        assert!(limiter.acquire(&mut rx).await);
        tx.send(true).unwrap();
        assert!(!limiter.acquire(&mut rx).await);
    }
}
