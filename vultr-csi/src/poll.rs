//! Bounded polling of the provider's asynchronous state.
//!
//! Create, attach and detach are accepted by the provider immediately and
//! completed later. The controller confirms them by re-reading the volume
//! with exponential backoff until a deadline derived from the request, and
//! stops early when the server begins shutting down.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::metrics;

/// Maximum delay between two polls
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Backoff multiplier (exponential factor)
const BACKOFF_MULTIPLIER: u32 = 2;

/// Header carrying the caller's deadline on gRPC requests
const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

#[derive(Error, Debug)]
pub enum PollError {
    #[error("{operation} did not complete within {waited:?}")]
    DeadlineExceeded { operation: String, waited: Duration },

    #[error("{operation} cancelled by shutdown")]
    Cancelled { operation: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<PollError> for Status {
    fn from(err: PollError) -> Self {
        match err {
            PollError::DeadlineExceeded { .. } => Status::unavailable(err.to_string()),
            PollError::Cancelled { .. } => Status::aborted(err.to_string()),
            PollError::Backend(e) => e.into(),
        }
    }
}

/// Deadline and cancellation shared by every poll made on behalf of one request.
#[derive(Debug, Clone)]
pub struct PollBudget {
    deadline: Instant,
    interval: Duration,
    shutdown: CancellationToken,
}

impl PollBudget {
    pub fn new(deadline: Instant, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            deadline,
            interval,
            shutdown,
        }
    }

    /// Budget for a request: the configured timeout, shortened to the
    /// caller's own `grpc-timeout` when that is tighter.
    pub fn for_request(
        metadata: &MetadataMap,
        timeout: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let timeout = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map_or(timeout, |caller| caller.min(timeout));
        Self::new(Instant::now() + timeout, interval, shutdown)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Re-run `check` until it yields a value, the deadline passes, or the
    /// server shuts down.
    ///
    /// `check` returns `Ok(None)` while the operation is still in progress.
    /// Transient backend errors count as "still in progress"; any other
    /// backend error ends the poll.
    pub async fn poll_until<T, F, Fut>(
        &self,
        operation: &str,
        mut check: F,
    ) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, BackendError>>,
    {
        let started = Instant::now();
        let mut backoff = self.interval;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics::record_poll_attempt(operation);

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    return Err(PollError::Cancelled { operation: operation.to_string() });
                }
                r = tokio::time::timeout_at(self.deadline, check()) => r,
            };

            match outcome {
                Ok(Ok(Some(value))) => {
                    debug!(operation = operation, attempts = attempt, "Poll completed");
                    return Ok(value);
                }
                Ok(Ok(None)) => {
                    debug!(operation = operation, attempt = attempt, "Not ready yet");
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!(operation = operation, attempt = attempt, error = %e, "Transient error while polling");
                }
                Ok(Err(e)) => return Err(PollError::Backend(e)),
                // The check itself ran into the deadline
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= self.deadline {
                warn!(operation = operation, attempts = attempt, "Poll deadline exceeded");
                return Err(PollError::DeadlineExceeded {
                    operation: operation.to_string(),
                    waited: now - started,
                });
            }

            let wake = (now + backoff).min(self.deadline);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    return Err(PollError::Cancelled { operation: operation.to_string() });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            // Exponential backoff with cap
            backoff = (backoff * BACKOFF_MULTIPLIER).min(MAX_BACKOFF);
        }
    }
}

/// Parse a `grpc-timeout` header value (`<digits><unit>`, unit one of
/// `H M S m u n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}
