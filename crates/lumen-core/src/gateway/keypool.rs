//! Credential pool with rotation and usage-weighted selection.
//!
//! Keys rotate round-robin to spread rate limits; the dispatcher switches
//! to least-used selection when a key hits its quota. Only credentials
//! passing the validity rule are ever handed out. An empty or fully
//! invalid pool re-seeds itself from the built-in shared set so the client
//! keeps working out of the box.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::errors::GatewayError;

/// Shared low-quota keys accepted by the proxy tier. Used only when the
/// configured pool is empty or entirely invalid.
const DEFAULT_POOL: &[&str] = &[
    "sk-lumen-shared-41c8f0b2d97e6a53",
    "sk-lumen-shared-8a02e6c1f4b97d38",
    "sk-lumen-shared-c59d3e7a1f80b642",
];

/// Validity rule a credential must pass to be eligible for selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialRule {
    pub min_length: usize,
    pub required_prefix: String,
}

impl Default for CredentialRule {
    fn default() -> Self {
        Self { min_length: 20, required_prefix: "sk-".to_string() }
    }
}

impl CredentialRule {
    #[must_use]
    pub fn is_valid(&self, secret: &str) -> bool {
        !secret.is_empty()
            && secret.len() >= self.min_length
            && secret.starts_with(&self.required_prefix)
    }
}

/// An opaque API key. Cheap to clone; the secret is only exposed through
/// [`secret`](Credential::secret), and logging goes through the masked
/// [`id`](Credential::id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    secret: Arc<str>,
}

impl Credential {
    #[must_use]
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self { secret: secret.into() }
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Masked identifier safe for logs: prefix plus the last four characters.
    #[must_use]
    pub fn id(&self) -> String {
        let s: &str = &self.secret;
        if s.len() <= 8 {
            return "sk-****".to_string();
        }
        format!("{}****{}", &s[..4], &s[s.len() - 4..])
    }
}

struct PoolEntry {
    credential: Credential,
    cumulative_tokens: u64,
    last_used_at: Option<Instant>,
}

impl PoolEntry {
    fn new(secret: &str) -> Self {
        Self { credential: Credential::new(secret), cumulative_tokens: 0, last_used_at: None }
    }
}

/// Per-key usage counters exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct KeyUsage {
    pub id: String,
    pub cumulative_tokens: u64,
    pub last_used_at: Option<Instant>,
}

/// The credential pool.
pub struct KeyPool {
    entries: RwLock<Vec<PoolEntry>>,
    rule: CredentialRule,
    cursor: AtomicUsize,
}

impl KeyPool {
    #[must_use]
    pub fn new(keys: Vec<String>, rule: CredentialRule) -> Self {
        let entries = keys.iter().map(|k| PoolEntry::new(k)).collect();
        Self { entries: RwLock::new(entries), rule, cursor: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn rule(&self) -> &CredentialRule {
        &self.rule
    }

    /// Selects the next credential round-robin, skipping invalid entries.
    ///
    /// An empty or fully invalid pool is re-seeded from the built-in
    /// default set first. Returns `None` only when even the defaults fail
    /// the configured rule.
    pub async fn select_key(&self) -> Option<Credential> {
        self.ensure_usable().await;

        let entries = self.entries.read().await;
        let valid: Vec<&PoolEntry> =
            entries.iter().filter(|e| self.rule.is_valid(e.credential.secret())).collect();
        if valid.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % valid.len();
        tracing::debug!(key = %valid[index].credential.id(), pool = valid.len(), "selected credential");
        Some(valid[index].credential.clone())
    }

    /// Selects the valid credential with the smallest cumulative token count.
    ///
    /// Ties break by pool order. Falls back to round-robin selection when
    /// no usage has been recorded yet.
    pub async fn least_used_key(&self) -> Option<Credential> {
        {
            let entries = self.entries.read().await;
            let mut best: Option<&PoolEntry> = None;
            let mut any_usage = false;
            for entry in entries.iter().filter(|e| self.rule.is_valid(e.credential.secret())) {
                any_usage |= entry.cumulative_tokens > 0;
                // Strict comparison keeps the first entry on ties.
                if best.is_none_or(|b| entry.cumulative_tokens < b.cumulative_tokens) {
                    best = Some(entry);
                }
            }
            if any_usage {
                if let Some(entry) = best {
                    tracing::debug!(
                        key = %entry.credential.id(),
                        tokens = entry.cumulative_tokens,
                        "selected least-used credential"
                    );
                    return Some(entry.credential.clone());
                }
            }
        }
        self.select_key().await
    }

    /// Adds `tokens` to the credential's cumulative counter. Monotonic;
    /// unknown credentials are ignored.
    pub async fn record_usage(&self, credential: &Credential, tokens: u64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) =
            entries.iter_mut().find(|e| e.credential.secret() == credential.secret())
        {
            entry.cumulative_tokens += tokens;
            entry.last_used_at = Some(Instant::now());
        }
    }

    /// Replaces the pool wholesale, resetting usage counters.
    ///
    /// Rejected with [`GatewayError::InvalidCredentialSet`] when no entry
    /// passes the validity rule; the existing pool is left untouched.
    pub async fn replace_pool(&self, keys: Vec<String>) -> Result<(), GatewayError> {
        if !keys.iter().any(|k| self.rule.is_valid(k)) {
            return Err(GatewayError::InvalidCredentialSet);
        }
        let mut entries = self.entries.write().await;
        *entries = keys.iter().map(|k| PoolEntry::new(k)).collect();
        self.cursor.store(0, Ordering::Relaxed);
        tracing::info!(keys = entries.len(), "credential pool replaced");
        Ok(())
    }

    /// Per-key usage counters, pool order preserved.
    pub async fn usage(&self) -> Vec<KeyUsage> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|e| KeyUsage {
                id: e.credential.id(),
                cumulative_tokens: e.cumulative_tokens,
                last_used_at: e.last_used_at,
            })
            .collect()
    }

    /// Re-seeds from the built-in set when nothing in the pool is usable.
    async fn ensure_usable(&self) {
        {
            let entries = self.entries.read().await;
            if entries.iter().any(|e| self.rule.is_valid(e.credential.secret())) {
                return;
            }
        }
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| self.rule.is_valid(e.credential.secret())) {
            return;
        }
        tracing::warn!("credential pool empty or invalid, seeding built-in defaults");
        *entries = DEFAULT_POOL.iter().map(|k| PoolEntry::new(k)).collect();
        self.cursor.store(0, Ordering::Relaxed);
    }
}
