//! Per-credential usage and response-quality accounting.
//!
//! Token counts flow back into the [`KeyPool`] so least-used selection
//! stays accurate; truncation counts are kept here as a quality signal for
//! diagnostics. All counters are additive; there are no error conditions.

use std::sync::Arc;

use dashmap::DashMap;

use super::keypool::{Credential, KeyPool};

#[derive(Debug, Default, Clone, Copy)]
struct QualityCounters {
    tokens: u64,
    responses: u64,
    truncated: u64,
}

/// Point-in-time usage view for one credential.
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    /// Masked credential id, safe for logs and UIs.
    pub id: String,
    pub tokens: u64,
    pub responses: u64,
    pub truncated: u64,
}

/// Tracks consumption and quality per credential.
pub struct UsageTracker {
    pool: Arc<KeyPool>,
    counters: DashMap<Arc<str>, QualityCounters>,
}

impl UsageTracker {
    #[must_use]
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool, counters: DashMap::new() }
    }

    /// Records token consumption for a successful call.
    pub async fn record(&self, credential: &Credential, tokens: u64) {
        self.pool.record_usage(credential, tokens).await;
        let mut entry = self.counters.entry(Arc::from(credential.secret())).or_default();
        entry.tokens += tokens;
        entry.responses += 1;
    }

    /// Records whether the response came back truncated at the token limit.
    pub fn record_quality(&self, credential: &Credential, was_truncated: bool) {
        let mut entry = self.counters.entry(Arc::from(credential.secret())).or_default();
        entry.truncated += u64::from(was_truncated);
    }

    /// Snapshot of every credential seen so far.
    #[must_use]
    pub fn stats(&self) -> Vec<UsageSnapshot> {
        self.counters
            .iter()
            .map(|entry| {
                let c = *entry.value();
                UsageSnapshot {
                    id: Credential::new(Arc::clone(entry.key())).id(),
                    tokens: c.tokens,
                    responses: c.responses,
                    truncated: c.truncated,
                }
            })
            .collect()
    }
}
