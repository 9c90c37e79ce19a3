//! Per-endpoint circuit breaker with adaptive reset and two-sided healing.
//!
//! Unlike the textbook three-state breaker there is no half-open state:
//! expiry of the reset window performs a *soft heal* back to closed that
//! retains the failure count, so one probe attempt is allowed without
//! forgetting past instability. A failed probe re-trips immediately (the
//! retained count is still at or past threshold) and lengthens the next
//! reset window; sustained success performs a full reset.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Timing and healing policy shared by every breaker in a registry.
///
/// `success_threshold` is configurable rather than hardcoded: two
/// consecutive successes fully clearing failure history can mask a flapping
/// endpoint, and operators may want a stricter setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerTuning {
    /// Reset window when the failure count sits exactly at threshold, seconds.
    pub reset_base_secs: u64,
    /// Ceiling on the reset window, seconds.
    pub reset_cap_secs: u64,
    /// Consecutive successes required for a full reset.
    pub success_threshold: u32,
}

impl Default for BreakerTuning {
    fn default() -> Self {
        Self { reset_base_secs: 30, reset_cap_secs: 300, success_threshold: 2 }
    }
}

impl BreakerTuning {
    /// Reset window for a breaker that opened with `failure_count` failures
    /// against `threshold`.
    ///
    /// Grows by 1.5x for every failure accumulated past the threshold
    /// (failures survive soft heals, so repeated open/probe/fail cycles
    /// lengthen the window), capped at `reset_cap_secs`.
    #[must_use]
    pub fn reset_timeout(&self, failure_count: u32, threshold: u32) -> Duration {
        let excess = failure_count.saturating_sub(threshold);
        let secs = (self.reset_base_secs as f64) * 1.5_f64.powi(excess.min(16) as i32);
        Duration::from_secs_f64(secs.min(self.reset_cap_secs as f64))
    }
}

/// All mutable state under a single lock so transitions are atomic.
#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    is_open: bool,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    consecutive_successes: u32,
    total_attempts: u64,
    /// Threshold resolved from the most recent request class seen.
    threshold: u32,
    /// Request-class hint behind `threshold`, kept for diagnostics.
    class: String,
}

/// Read-only view of a breaker for stats surfaces and tests.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
    pub consecutive_successes: u32,
    pub total_attempts: u64,
    pub threshold: u32,
    pub class: String,
    pub last_failure_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
}

/// Circuit breaker guarding a single endpoint.
pub struct CircuitBreaker {
    inner: RwLock<BreakerState>,
    tuning: Arc<BreakerTuning>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(tuning: Arc<BreakerTuning>, initial_threshold: u32) -> Self {
        Self {
            inner: RwLock::new(BreakerState {
                failure_count: 0,
                is_open: false,
                last_failure_at: None,
                last_success_at: None,
                consecutive_successes: 0,
                total_attempts: 0,
                threshold: initial_threshold,
                class: "standard".to_string(),
            }),
            tuning,
        }
    }

    /// Whether an attempt may proceed.
    ///
    /// While open, every check re-evaluates the reset window; expiry
    /// transitions back to closed (soft heal, failure count retained).
    /// Double-checked locking: the read path covers the common closed case,
    /// the write lock is only taken when a transition is due.
    pub async fn may_attempt(&self) -> bool {
        {
            let state = self.inner.read().await;
            if !state.is_open {
                return true;
            }
            let Some(failed_at) = state.last_failure_at else {
                return false;
            };
            let window = self.tuning.reset_timeout(state.failure_count, state.threshold);
            if failed_at.elapsed() <= window {
                return false;
            }
            // Window expired, fall through to the write lock.
        }

        let mut state = self.inner.write().await;
        if !state.is_open {
            return true;
        }
        let Some(failed_at) = state.last_failure_at else {
            return false;
        };
        let window = self.tuning.reset_timeout(state.failure_count, state.threshold);
        if failed_at.elapsed() > window {
            state.is_open = false;
            state.consecutive_successes = 0;
            tracing::info!(
                failures = state.failure_count,
                window_secs = window.as_secs(),
                "circuit breaker soft-healed after reset window"
            );
            true
        } else {
            false
        }
    }

    /// Records a successful attempt.
    ///
    /// Reaching the configured success threshold performs a full reset even
    /// if the breaker was still nominally open from a stale failure window.
    pub async fn record_success(&self) {
        let mut state = self.inner.write().await;
        state.total_attempts += 1;
        state.last_success_at = Some(Instant::now());
        state.consecutive_successes += 1;

        if state.consecutive_successes >= self.tuning.success_threshold {
            if state.failure_count > 0 || state.is_open {
                tracing::info!(
                    successes = state.consecutive_successes,
                    "circuit breaker fully reset after sustained success"
                );
            }
            state.failure_count = 0;
            state.is_open = false;
        }
    }

    /// Records a failed attempt under the threshold resolved for `class`.
    pub async fn record_failure(&self, threshold: u32, class: &str) {
        let mut state = self.inner.write().await;
        state.total_attempts += 1;
        state.failure_count += 1;
        state.consecutive_successes = 0;
        state.last_failure_at = Some(Instant::now());
        state.threshold = threshold;
        if state.class != class {
            state.class = class.to_string();
        }

        if state.failure_count >= threshold && !state.is_open {
            state.is_open = true;
            tracing::warn!(
                failures = state.failure_count,
                threshold,
                class,
                "circuit breaker opened"
            );
        }
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.is_open
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.read().await.failure_count
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.inner.read().await;
        BreakerSnapshot {
            is_open: state.is_open,
            failure_count: state.failure_count,
            consecutive_successes: state.consecutive_successes,
            total_attempts: state.total_attempts,
            threshold: state.threshold,
            class: state.class.clone(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
        }
    }
}
