//! Retry policy for upstream attempts.
//!
//! A request is re-attempted only when the failure happened before any
//! response byte reached the caller, the failure class is transient, and the
//! attempt budget (`retry_times + 1` total tries) is not spent. Attempts are
//! strictly sequential and immediate; there is no backoff delay.

use axum::http::StatusCode;

use crate::error::Error;

/// Failure classes the policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connect refused/reset/timed out, or no response headers in time.
    Unavailable,
    /// Upstream answered with a 5xx status.
    ServerError,
    /// Upstream stopped sending body bytes for longer than the read timeout.
    Stalled,
    /// No free pool slot within the connect timeout.
    PoolExhausted,
    /// Malformed or unparseable upstream response.
    Protocol,
    /// Anything else (local errors); never retried.
    Other,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::Unavailable | FailureKind::ServerError | FailureKind::Stalled
        )
    }
}

impl From<&Error> for FailureKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::UpstreamUnavailable { .. } => FailureKind::Unavailable,
            Error::UpstreamStalled { .. } => FailureKind::Stalled,
            Error::PoolExhausted { .. } => FailureKind::PoolExhausted,
            Error::UpstreamProtocol(_) => FailureKind::Protocol,
            _ => FailureKind::Other,
        }
    }
}

/// Whether an upstream status should be treated as a retryable failure.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Bounded, immediate retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    retry_times: u32,
}

impl RetryPolicy {
    pub fn new(retry_times: u32) -> Self {
        Self { retry_times }
    }

    /// Total number of tries a request may make.
    pub fn max_attempts(&self) -> u32 {
        self.retry_times.saturating_add(1)
    }

    /// Decide whether attempt `attempt` (0-based) may be followed by another.
    pub fn should_retry(&self, attempt: u32, kind: FailureKind, bytes_sent: bool) -> bool {
        if bytes_sent {
            return false;
        }
        attempt < self.retry_times && kind.is_transient()
    }
}

/// A failed attempt as reported to [`retry_attempts`].
///
/// `outcome` is what the request resolves to if the policy declines to retry:
/// an error, or (for an upstream 5xx) the upstream response to pass through.
pub struct AttemptFailure<T> {
    pub kind: FailureKind,
    pub bytes_sent: bool,
    pub outcome: Result<T, Error>,
}

impl<T> AttemptFailure<T> {
    /// A failure that happened before anything was relayed to the caller.
    pub fn error(err: Error) -> Self {
        Self {
            kind: FailureKind::from(&err),
            bytes_sent: false,
            outcome: Err(err),
        }
    }

    /// An upstream 5xx whose response is returned if retries run out.
    pub fn server_error(response: T) -> Self {
        Self {
            kind: FailureKind::ServerError,
            bytes_sent: false,
            outcome: Ok(response),
        }
    }
}

impl<T> From<Error> for AttemptFailure<T> {
    fn from(err: Error) -> Self {
        AttemptFailure::error(err)
    }
}

/// Run `send` for attempt 0, 1, ... until it succeeds or the policy stops it.
pub async fn retry_attempts<T, F, Fut>(policy: &RetryPolicy, mut send: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, AttemptFailure<T>>>,
{
    let mut attempt = 0u32;
    loop {
        match send(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if policy.should_retry(attempt, failure.kind, failure.bytes_sent) {
                    tracing::warn!(
                        attempt,
                        kind = ?failure.kind,
                        max_attempts = policy.max_attempts(),
                        "Upstream attempt failed, retrying"
                    );
                    attempt += 1;
                    continue;
                }

                if failure.kind.is_transient() && !failure.bytes_sent {
                    tracing::error!(
                        attempts = attempt + 1,
                        kind = ?failure.kind,
                        "Upstream retries exhausted"
                    );
                }
                return failure.outcome;
            }
        }
    }
}
