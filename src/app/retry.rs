use log::debug;
use std::{future::Future, time::Duration};
use tokio::time::{sleep, Instant};

/// Bounded polling for eventually consistent remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }

    /// Run `probe` until it reports `true` or the ceiling passes.
    ///
    /// Returns `Ok(false)` on timeout. A probe error ends polling at once.
    pub async fn poll<F, Fut, E>(&self, what: &str, mut probe: F) -> Result<bool, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            if probe().await? {
                return Ok(true);
            }
            if started.elapsed() >= self.ceiling {
                debug!("gave up waiting for {what} after {attempt} attempts");
                return Ok(false);
            }
            debug!("waiting for {what} (attempt {attempt})");
            attempt += 1;
            sleep(self.interval).await;
        }
    }
}
