// ===============================
// src/retry.rs
// ===============================
//
// Retry policy eksplisit untuk panggilan venue:
// - delay = base_delay * 2^attempt (attempt dimulai dari 0)
// - setiap attempt yang gagal di-log (warn), habis retry di-log (error)
// - hasil akhir Option: None = "unavailable", bukan panic / error propagate
//
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::metrics::{VENUE_RETRIES, VENUE_UNAVAILABLE};
use crate::venue::VenueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Delay sebelum attempt berikutnya, setelah attempt ke-`attempt` (0-based) gagal.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Jalankan `op` sampai berhasil atau attempt habis.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        for attempt in 0..self.max_attempts {
            match f().await {
                Ok(v) => return Some(v),
                Err(e) => {
                    VENUE_RETRIES.with_label_values(&[op]).inc();
                    if attempt + 1 == self.max_attempts {
                        warn!(op, attempt = attempt + 1, err = %e, "venue call failed");
                        break;
                    }
                    let delay = self.delay_for(attempt);
                    warn!(op, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, err = %e, "venue call failed, backing off");
                    sleep(delay).await;
                }
            }
        }
        VENUE_UNAVAILABLE.with_label_values(&[op]).inc();
        error!(op, max_attempts = self.max_attempts, "max retries reached, venue unavailable");
        None
    }
}
