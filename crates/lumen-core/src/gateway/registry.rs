//! Registry of per-endpoint circuit breakers.
//!
//! Breakers are created lazily on first use and live for the process
//! lifetime. The map is held in an [`ArcSwap`] so the hot path (looking up
//! a breaker per attempt) is lock-free, and [`force_reset_all`] can replace
//! the whole map in one atomic swap.
//!
//! [`force_reset_all`]: CircuitBreakerRegistry::force_reset_all

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use super::circuit_breaker::{BreakerSnapshot, BreakerTuning, CircuitBreaker};

/// Failure-threshold policy keyed by request class.
///
/// A request class is a caller-supplied label selecting breaker
/// sensitivity. Classes listed in `complex_classes` trip later (documents
/// routed through heavyweight OCR models fail transiently more often), and
/// `overrides` pins an exact threshold per class when neither bucket fits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    pub default_threshold: u32,
    pub complex_threshold: u32,
    pub complex_classes: Vec<String>,
    pub overrides: HashMap<String, u32>,
    pub tuning: BreakerTuning,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            default_threshold: 3,
            complex_threshold: 4,
            complex_classes: vec!["complex-document".to_string()],
            overrides: HashMap::new(),
            tuning: BreakerTuning::default(),
        }
    }
}

impl BreakerPolicy {
    /// Resolves the failure threshold for a request class.
    #[must_use]
    pub fn threshold_for(&self, class: &str) -> u32 {
        if let Some(&t) = self.overrides.get(class) {
            return t;
        }
        if self.complex_classes.iter().any(|c| c == class) {
            self.complex_threshold
        } else {
            self.default_threshold
        }
    }
}

/// Owns one [`CircuitBreaker`] per endpoint.
pub struct CircuitBreakerRegistry {
    breakers: ArcSwap<HashMap<Arc<str>, Arc<CircuitBreaker>>>,
    policy: BreakerPolicy,
    tuning: Arc<BreakerTuning>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(policy: BreakerPolicy) -> Self {
        let tuning = Arc::new(policy.tuning.clone());
        Self { breakers: ArcSwap::from_pointee(HashMap::new()), policy, tuning }
    }

    #[must_use]
    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Returns the breaker for `endpoint`, creating it on first use.
    ///
    /// Insertion goes through read-copy-update; the loop re-reads after the
    /// swap because a concurrent `force_reset_all` may have replaced the map
    /// between our update and the load.
    fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        loop {
            if let Some(breaker) = self.breakers.load().get(endpoint) {
                return Arc::clone(breaker);
            }
            self.breakers.rcu(|current| {
                if current.contains_key(endpoint) {
                    Arc::clone(current)
                } else {
                    let mut next = (**current).clone();
                    next.insert(
                        Arc::from(endpoint),
                        Arc::new(CircuitBreaker::new(
                            Arc::clone(&self.tuning),
                            self.policy.default_threshold,
                        )),
                    );
                    Arc::new(next)
                }
            });
        }
    }

    /// Whether an attempt against `endpoint` may proceed right now.
    ///
    /// An endpoint with no recorded history is always allowed; the check
    /// itself may soft-heal an open breaker whose reset window has expired.
    pub async fn may_attempt(&self, endpoint: &str) -> bool {
        let breaker = self.breakers.load().get(endpoint).map(Arc::clone);
        match breaker {
            Some(breaker) => breaker.may_attempt().await,
            None => true,
        }
    }

    pub async fn record_success(&self, endpoint: &str) {
        self.breaker_for(endpoint).record_success().await;
    }

    pub async fn record_failure(&self, endpoint: &str, class: &str) {
        let threshold = self.policy.threshold_for(class);
        self.breaker_for(endpoint).record_failure(threshold, class).await;
    }

    /// Clears every breaker in one atomic swap.
    ///
    /// The operator-facing escape hatch: new breakers are created lazily
    /// with a clean history on the next attempt.
    pub fn force_reset_all(&self) {
        let dropped = self.breakers.load().len();
        self.breakers.store(Arc::new(HashMap::new()));
        tracing::info!(breakers = dropped, "all circuit breakers force-reset");
    }

    /// Point-in-time view of every breaker, for diagnostics surfaces.
    pub async fn snapshot(&self) -> Vec<(String, BreakerSnapshot)> {
        let map = self.breakers.load_full();
        let mut out = Vec::with_capacity(map.len());
        for (endpoint, breaker) in map.iter() {
            out.push((endpoint.to_string(), breaker.snapshot().await));
        }
        out
    }
}
