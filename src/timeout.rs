//! Per-phase deadlines and their composition.

use std::time::{Duration, Instant};

use crate::error::{Error, Result, TimeoutPhase};

/// Deadlines applied to the phases of a request.
///
/// Each I/O step is bounded by the most specific applicable deadline: the
/// per-phase value, clamped by whatever remains of `request_timeout`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    /// Time allowed to establish the TCP connection.
    pub sock_connect: Duration,
    /// Time allowed for a single read from the transport.
    pub sock_read: Duration,
    /// Time allowed to obtain a pool slot. `None` waits forever.
    pub pool_acquire: Option<Duration>,
    /// Time allowed for the whole exchange. `None` is unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        Timeouts {
            sock_connect: Duration::from_secs(5),
            sock_read: Duration::from_secs(30),
            pool_acquire: None,
            request_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl Timeouts {
    /// The overall deadline for one request, if bounded.
    pub(crate) fn request_deadline(&self) -> Option<Instant> {
        self.request_timeout.map(|t| Instant::now() + t)
    }
}

/// A point in time a request must not run past, threaded through the engine.
///
/// `None` means the request is unbounded and only per-phase limits apply.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(pub(crate) Option<Instant>);

impl Deadline {
    /// Clamp a per-phase budget by the time remaining on the deadline.
    ///
    /// Errors with `Timeout(Request)` once the deadline has already passed.
    pub(crate) fn clamp(&self, phase_budget: Duration) -> Result<Duration> {
        match self.0 {
            None => Ok(phase_budget),
            Some(at) => {
                let remaining = at
                    .checked_duration_since(Instant::now())
                    .ok_or_else(|| Error::timeout(TimeoutPhase::Request))?;
                Ok(phase_budget.min(remaining))
            }
        }
    }

    /// Like [`clamp`](Self::clamp) for steps that have no budget of their own.
    pub(crate) fn remaining(&self) -> Result<Option<Duration>> {
        match self.0 {
            None => Ok(None),
            Some(at) => at
                .checked_duration_since(Instant::now())
                .map(Some)
                .ok_or_else(|| Error::timeout(TimeoutPhase::Request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_prefers_the_tighter_bound() {
        let deadline = Deadline(Some(Instant::now() + Duration::from_secs(1)));
        let d = deadline.clamp(Duration::from_secs(30)).unwrap();
        assert!(d <= Duration::from_secs(1));

        let d = deadline.clamp(Duration::from_millis(10)).unwrap();
        assert_eq!(d, Duration::from_millis(10));
    }

    #[test]
    fn clamp_errors_after_deadline() {
        let deadline = Deadline(Some(Instant::now() - Duration::from_millis(1)));
        let err = deadline.clamp(Duration::from_secs(30)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn unbounded_deadline_passes_budgets_through() {
        let deadline = Deadline(None);
        assert_eq!(
            deadline.clamp(Duration::from_secs(30)).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(deadline.remaining().unwrap(), None);
    }
}
