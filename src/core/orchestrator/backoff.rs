//! Retry delays and cancellation-aware sleeping.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;

/// Exponential backoff with jitter, capped, honouring server retry hints
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`. Half of the exponential step is
    /// fixed and half is jitter derived from `seed`, so concurrent jobs spread
    /// out while a given job retries reproducibly.
    pub fn delay(&self, attempt: u32, seed: &str, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let step = self.base.saturating_mul(factor).min(self.max);

        let half = step / 2;
        let spread = step.saturating_sub(half).as_millis() as u64;
        let jitter = if spread == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(jitter_seed(seed, attempt) % (spread + 1))
        };

        let backoff = half + jitter;
        match retry_after {
            Some(hint) => hint.max(backoff),
            None => backoff,
        }
    }
}

fn jitter_seed(seed: &str, attempt: u32) -> u64 {
    let digest = Sha256::new()
        .chain_update(seed.as_bytes())
        .chain_update(attempt.to_le_bytes())
        .finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolves once cancellation is signalled; never, if the sender is gone
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `duration`; false when cancellation cut the sleep short
pub async fn sleep_unless_cancelled(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if is_cancelled(cancel) {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancelled(cancel) => false,
    }
}
