//! Error taxonomy for gateway calls.
//!
//! Failures are classified into [`FailureKind`] at the point the HTTP status
//! or transport error is first observed, never reconstructed later from
//! message text. The dispatcher absorbs every transient kind internally;
//! only malformed-input conditions propagate as `Err` to callers.

use thiserror::Error;

/// Classification of a single failed attempt.
///
/// Drives three decisions: whether the breaker should trip, whether the
/// credential (rather than the endpoint) should rotate, and what label the
/// offline payload carries when the whole policy is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Attempt exceeded its bounded timeout.
    Timeout,
    /// Endpoint answered with a non-2xx status outside the rate-limit set.
    Http(u16),
    /// 429 or quota-exhaustion status: the key is the problem, not the host.
    RateLimited,
    /// Local fast-fail, no network attempt was made.
    CircuitOpen,
    /// Transport-level failure before any status was received.
    Connection,
    /// Response body did not parse as a completion payload.
    MalformedResponse,
}

impl FailureKind {
    /// Classifies an HTTP status code.
    ///
    /// 429 is rate limiting; 402 and 403 are how the hosted service reports
    /// quota exhaustion on otherwise valid keys.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 402 | 403 => Self::RateLimited,
            _ => Self::Http(status),
        }
    }

    /// Whether this failure should rotate the credential and retry the same
    /// endpoint, instead of moving on to the next endpoint.
    #[must_use]
    pub fn is_rate_limit(self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Whether this failure counts against the endpoint's circuit breaker.
    ///
    /// Rate limiting is a credential problem and circuit-open is a local
    /// decision; neither is evidence the endpoint itself is unhealthy.
    #[must_use]
    pub fn should_trip_breaker(self) -> bool {
        !matches!(self, Self::RateLimited | Self::CircuitOpen)
    }

    /// Static label used in logs and in the offline payload's metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Http(_) => "http_error",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Connection => "connection",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(status) => write!(f, "http_error({status})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Errors surfaced by the gateway.
///
/// Only `MissingCredential`, `InvalidRequest`, and `InvalidCredentialSet`
/// ever reach callers of `Dispatcher::send`; the rest exist for the probe
/// surface and for internal bookkeeping of the attempt loop.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// No usable credential could be resolved for the request.
    #[error("no usable credential: {0}")]
    MissingCredential(String),

    /// Request failed structural validation before any network attempt.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A pool replacement contained zero valid credentials.
    #[error("credential set contains no valid entries")]
    InvalidCredentialSet,

    /// Attempt exceeded the configured timeout.
    #[error("request timeout")]
    Timeout,

    /// Non-2xx status from the endpoint.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure from the underlying HTTP client.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Circuit breaker rejected the attempt locally.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Response was not a parseable completion payload.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Every endpoint and retry in the policy has been exhausted.
    #[error("all endpoints exhausted")]
    AllEndpointsExhausted,
}

impl GatewayError {
    /// The attempt-level classification of this error, if it has one.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout => Some(FailureKind::Timeout),
            Self::Http { status, .. } => Some(FailureKind::from_status(*status)),
            Self::Connection(_) => Some(FailureKind::Connection),
            Self::CircuitOpen => Some(FailureKind::CircuitOpen),
            Self::MalformedResponse(_) => Some(FailureKind::MalformedResponse),
            _ => None,
        }
    }

    /// Whether callers should see this as a hard error rather than a
    /// degradable failure.
    #[must_use]
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential(_) | Self::InvalidRequest(_) | Self::InvalidCredentialSet
        )
    }
}
