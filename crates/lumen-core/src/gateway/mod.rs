//! Resilient access to multi-endpoint LLM gateways.
//!
//! This module is the heart of the crate: everything needed to turn "send
//! this request" into "a structured reply or a well-defined degraded
//! response", against a remote service the client does not control.
//!
//! - Credential rotation and usage-weighted key selection ([`keypool`],
//!   [`usage`])
//! - Per-endpoint circuit breaking with adaptive thresholds and
//!   time/success healing ([`circuit_breaker`], [`registry`])
//! - Ordered proxy-then-direct fallback with bounded retries
//!   ([`dispatcher`])
//! - Diagnostic reachability probing, isolated from breaker state
//!   ([`probe`])
//!
//! # Request Flow
//!
//! ```text
//! caller
//!   │
//!   ▼
//! Dispatcher::send ──► KeyPool (explicit > least-used > rotation)
//!   │
//!   ▼
//! for endpoint in [proxy, direct...]:
//!   CircuitBreakerRegistry::may_attempt ── open ──► next endpoint
//!   │
//!   ▼
//! HttpClient::post_chat (bounded timeout)
//!   ├─ success ──► record_success + UsageTracker ──► return
//!   ├─ rate limited ──► rotate credential, retry same endpoint once
//!   └─ failure ──► record_failure ──► next endpoint
//!   │
//!   ▼ (all endpoints failed)
//! backoff, repeat up to max_retries, then synthesize offline reply
//! ```

pub mod circuit_breaker;
pub mod dispatcher;
pub mod errors;
pub mod http_client;
pub mod keypool;
pub mod probe;
pub mod registry;
pub mod usage;

pub use circuit_breaker::{BreakerSnapshot, BreakerTuning, CircuitBreaker};
pub use dispatcher::{Dispatcher, SendOptions, STANDARD_CLASS};
pub use errors::{FailureKind, GatewayError};
pub use http_client::HttpClient;
pub use keypool::{Credential, CredentialRule, KeyPool, KeyUsage};
pub use probe::{ConnectionProbe, ProbeResult, ProbeSummary};
pub use registry::{BreakerPolicy, CircuitBreakerRegistry};
pub use usage::{UsageSnapshot, UsageTracker};
