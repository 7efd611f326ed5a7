//! Retry driver with a linear backoff ramp.
//!
//! The delay between attempts grows linearly with the attempt number
//! (base, 2x base, 3x base). Each attempt is bounded by its own timeout.

use std::{future::Future, time::Duration};

use tracing::{info, warn};

use crate::{
    config::RetryConfig,
    error::{BackendError, BackendResult},
};

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Delay before retrying after `attempt` failed attempts: `base * attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Drive up to `max_attempts` attempts of a fallible operation, each
    /// bounded by the per-attempt timeout, logging every failure. Returns the
    /// last error after exhausting all attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut last_err = BackendError::ConnectionFailed(format!("{}: no attempts made", what));

        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        what, attempt, self.max_attempts, e
                    );
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        "{} attempt {}/{} timed out after {:?}",
                        what, attempt, self.max_attempts, self.attempt_timeout
                    );
                    last_err = BackendError::Timeout(format!(
                        "{} timed out after {:?}",
                        what, self.attempt_timeout
                    ));
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(last_err)
    }
}
