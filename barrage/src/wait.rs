//! Backoff-aware wait primitive driving periodic data-source refresh.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("backoff and interval values cannot be greater than the max wait value")]
    InvalidBounds,
    #[error("maximum wait limit passed")]
    MaxWaitExceeded,
}

/// Suspends the owning task for a growing interval.
///
/// Every call to [`Wait::wait`] after the first grows the interval by `backoff`.
/// Once the interval exceeds `max_wait` the primitive is exhausted: `wait`
/// returns `false` and [`Wait::error`] reports [`WaitError::MaxWaitExceeded`].
///
/// ```rust
/// # use std::time::Duration;
/// # use barrage::wait::Wait;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut wait = Wait::new(
///     Duration::from_millis(1),
///     Duration::from_millis(1),
///     Duration::from_millis(3),
/// )
/// .unwrap();
/// let mut rounds = 0;
/// while wait.wait().await {
///     rounds += 1;
/// }
/// assert_eq!(rounds, 3);
/// # }
/// ```
#[derive(Debug)]
pub struct Wait {
    interval: Duration,
    backoff: Duration,
    max_wait: Duration,
    iterations: u64,
    error: Option<WaitError>,
    stop: Option<Receiver<bool>>,
}

impl Wait {
    pub fn new(interval: Duration, backoff: Duration, max_wait: Duration) -> Result<Self, WaitError> {
        if interval > max_wait || backoff > max_wait {
            return Err(WaitError::InvalidBounds);
        }
        Ok(Self {
            interval,
            backoff,
            max_wait,
            iterations: 0,
            error: None,
            stop: None,
        })
    }

    /// A fixed cadence with no backoff that never runs out.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            backoff: Duration::ZERO,
            max_wait: Duration::MAX,
            iterations: 0,
            error: None,
            stop: None,
        }
    }

    /// Attach a stop signal. Once the channel holds `true`, pending and future
    /// waits return `false` immediately.
    pub fn with_stop(mut self, stop: Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Wait for the current interval. Returns `false` when exhausted or stopped.
    pub async fn wait(&mut self) -> bool {
        if self.iterations > 0 {
            self.interval = self.interval.saturating_add(self.backoff);
        }

        if self.interval > self.max_wait {
            self.error = Some(WaitError::MaxWaitExceeded);
            return false;
        }

        if let Some(stop) = self.stop.as_mut() {
            if *stop.borrow() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                // A dropped sender can never stop us, so only a real `true` counts.
                Ok(_) = stop.wait_for(|stopped| *stopped) => return false,
            }
        } else {
            tokio::time::sleep(self.interval).await;
        }

        self.error = None;
        self.iterations += 1;
        true
    }

    /// The error recorded by the last call to [`Wait::wait`], if any.
    pub fn error(&self) -> Option<WaitError> {
        self.error
    }

    /// Number of completed waits.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Current interval, including the accumulated backoff.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
