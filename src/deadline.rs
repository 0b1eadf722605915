//! Run-wide time budget and cooperative cancellation.
//!
//! A [`Deadline`] is created when an acquisition starts and handed to every
//! network-bound stage. Stages ask it for the remaining time to configure
//! request and process timeouts, and [`DeadlineReader`] aborts long body
//! transfers as soon as the budget is spent instead of finishing and
//! discarding the result.

use std::io::{self, Read};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Stand-in expiry for budgets too large to represent as an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The run's time budget elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {}s exceeded", .limit.as_secs())]
pub struct DeadlineExceeded {
    /// The configured budget.
    pub limit: Duration,
}

/// A fixed point in time after which network work must stop.
///
/// # Examples
///
/// ```
/// use modpull::deadline::Deadline;
/// use std::time::Duration;
///
/// let deadline = Deadline::after(Duration::from_secs(60));
/// assert!(deadline.remaining().is_ok());
///
/// let spent = Deadline::after(Duration::ZERO);
/// assert!(spent.remaining().is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start a budget of `limit` from now.
    #[must_use]
    pub fn after(limit: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(limit)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self { expires_at, limit }
    }

    /// Return the configured budget.
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }

    /// Return the time left before expiry.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineExceeded`] once no time remains.
    pub fn remaining(&self) -> Result<Duration, DeadlineExceeded> {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(DeadlineExceeded { limit: self.limit })
        } else {
            Ok(left)
        }
    }

    /// Return true once the budget is spent.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_err()
    }
}

/// A reader that fails with [`io::ErrorKind::TimedOut`] once the deadline
/// has passed.
///
/// The check runs before every read, so a transfer stops within one read
/// call of the deadline.
#[derive(Debug)]
pub struct DeadlineReader<R> {
    inner: R,
    deadline: Deadline,
}

impl<R> DeadlineReader<R> {
    /// Wrap `inner` so reads observe `deadline`.
    #[must_use]
    pub const fn new(inner: R, deadline: Deadline) -> Self {
        Self { inner, deadline }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Err(exceeded) = self.deadline.remaining() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, exceeded));
        }
        self.inner.read(buf)
    }
}

/// Return true when `err` was produced by an expired [`DeadlineReader`].
#[must_use]
pub fn is_deadline_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
        && err
            .get_ref()
            .is_some_and(|inner| inner.is::<DeadlineExceeded>())
}
