//! Randomized backoff between automation attempts.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::ValidationError;

/// Smallest accepted interval, in seconds.
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Inclusive range of seconds to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffInterval {
    min: u64,
    max: u64,
}

impl BackoffInterval {
    /// Build an interval without the operator-facing floor check.
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: u64, max: u64) -> Self {
        if min > max {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    /// Parse operator input: `N` or `N-M`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let input = input.trim();
        let (min, max) = match input.split_once('-') {
            Some((low, high)) => (parse_token(low)?, parse_token(high)?),
            None => {
                let value = parse_token(input)?;
                (value, value)
            }
        };

        let interval = Self::new(min, max);
        if interval.min < MIN_INTERVAL_SECS {
            return Err(ValidationError::IntervalBelowFloor {
                min: interval.min,
                floor: MIN_INTERVAL_SECS,
            });
        }
        Ok(interval)
    }

    pub fn min_secs(&self) -> u64 {
        self.min
    }

    pub fn max_secs(&self) -> u64 {
        self.max
    }

    /// Pick a wait uniformly from `[min, max]` seconds.
    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let secs = if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs(secs)
    }

    /// Sleep for a sampled interval unless cancelled first.
    ///
    /// Returns `false` when the token fired before the timer.
    pub async fn wait(&self, token: &CancellationToken) -> bool {
        let pause = self.sample();
        tracing::info!(seconds = pause.as_secs(), "Waiting before next attempt");
        sleep_or_cancel(pause, token).await
    }
}

impl fmt::Display for BackoffInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}s", self.min)
        } else {
            write!(f, "{}-{}s (random)", self.min, self.max)
        }
    }
}

/// Race a timer against cancellation. `true` means the full duration elapsed.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn parse_token(raw: &str) -> Result<u64, ValidationError> {
    let token = raw.trim();
    let invalid = || ValidationError::InvalidInterval {
        token: token.to_string(),
    };
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    token.parse().map_err(|_| invalid())
}
