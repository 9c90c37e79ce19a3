//! The resilient dispatch driver.
//!
//! One logical request walks an ordered candidate list (proxy first, then
//! directs), consulting each endpoint's circuit breaker, with an outer
//! bounded-backoff retry loop around the whole pass. Rate limiting rotates
//! the credential and retries the same endpoint once, because a quota
//! problem says nothing about endpoint health. When the full policy is
//! exhausted the caller still gets an `Ok`: a synthesized offline reply
//! that is shape-identical to a real one, marked by the `offline` flag.
//!
//! Only malformed input (`MissingCredential`, `InvalidRequest`) surfaces
//! as `Err`; transport and availability failures never do.
//!
//! Cancellation: dropping the `send` future cancels the in-flight attempt.
//! Breaker and usage updates happen strictly after an attempt completes
//! inside the same task, so a cancelled attempt records nothing.

use std::sync::Arc;

use super::errors::{FailureKind, GatewayError};
use super::http_client::HttpClient;
use super::keypool::{Credential, KeyPool};
use super::probe::ConnectionProbe;
use super::registry::CircuitBreakerRegistry;
use super::usage::UsageTracker;
use crate::config::{EndpointConfig, GatewayConfig, RetryPolicy};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, DegradedMetadata,
    UsagePayload,
};

/// Default request class when the caller supplies none.
pub const STANDARD_CLASS: &str = "standard";

const OFFLINE_APOLOGY: &str = "The assistant is temporarily unreachable. Your request was not \
     processed; please check connectivity or try again in a few moments.";

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Breaker-sensitivity label; defaults to `"standard"`.
    pub request_class: Option<String>,
    /// Explicit credential, taking precedence over pool selection.
    pub credential: Option<Credential>,
}

/// Long-lived dispatch service owning the shared mutable state: the
/// breaker registry, the credential pool, and the usage table.
pub struct Dispatcher {
    endpoints: Vec<EndpointConfig>,
    key_pool: Arc<KeyPool>,
    registry: Arc<CircuitBreakerRegistry>,
    usage: Arc<UsageTracker>,
    http: Arc<HttpClient>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoints", &self.endpoints)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds the dispatcher from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when the configuration
    /// fails validation, or a connection error if the HTTP client cannot
    /// be constructed.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate().map_err(GatewayError::InvalidRequest)?;

        let http = Arc::new(HttpClient::new(config.http.clone())?);
        let key_pool =
            Arc::new(KeyPool::new(config.key_pool.keys.clone(), config.key_pool.rule.clone()));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&key_pool)));
        let registry = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));

        Ok(Self {
            endpoints: config.endpoints.candidates(),
            key_pool,
            registry,
            usage,
            http,
            retry: config.retry.clone(),
        })
    }

    #[must_use]
    pub fn key_pool(&self) -> &Arc<KeyPool> {
        &self.key_pool
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// A probe sharing this dispatcher's HTTP client.
    #[must_use]
    pub fn probe(&self) -> ConnectionProbe {
        ConnectionProbe::new(Arc::clone(&self.http))
    }

    /// Sends a request with default options.
    pub async fn send(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        self.send_with_options(request, SendOptions::default()).await
    }

    /// Sends a request through the full fallback policy.
    ///
    /// # Errors
    ///
    /// Only for caller-fault conditions: a malformed request or no
    /// resolvable credential. Remote failures degrade to an offline reply.
    pub async fn send_with_options(
        &self,
        request: &ChatCompletionRequest,
        options: SendOptions,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        if let Some(reason) = request.validation_error() {
            return Err(GatewayError::InvalidRequest(reason.to_string()));
        }

        let mut credential = self.resolve_credential(options.credential).await?;
        let class = options.request_class.as_deref().unwrap_or(STANDARD_CLASS);

        let body = bytes::Bytes::from(
            serde_json::to_vec(request)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?,
        );

        let mut last_failure: Option<FailureKind> = None;
        let mut endpoints_tried: Vec<String> = Vec::new();

        // One initial pass plus `max_retries` backed-off repeats.
        for pass in 0..=self.retry.max_retries {
            if pass > 0 {
                let delay = self.retry.backoff_for(pass);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::debug!(pass, delay_ms, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            for endpoint in &self.endpoints {
                if !endpoints_tried.contains(&endpoint.name) {
                    endpoints_tried.push(endpoint.name.clone());
                }
                match self.try_endpoint(endpoint, &mut credential, &body, class).await {
                    Ok(response) => return Ok(response),
                    Err(kind) => {
                        last_failure = Some(kind);
                    }
                }
            }
        }

        let failure = last_failure.unwrap_or(FailureKind::Connection);
        tracing::warn!(
            failure = %failure,
            endpoints = endpoints_tried.len(),
            retries = self.retry.max_retries,
            "all endpoints exhausted, returning offline response"
        );
        Ok(Self::offline_response(request, failure, endpoints_tried))
    }

    /// Explicit credential wins, then least-used, then rotation (the pool
    /// falls back internally).
    async fn resolve_credential(
        &self,
        explicit: Option<Credential>,
    ) -> Result<Credential, GatewayError> {
        if let Some(credential) = explicit {
            if !self.key_pool.rule().is_valid(credential.secret()) {
                return Err(GatewayError::MissingCredential(format!(
                    "explicit credential {} fails the validity rule",
                    credential.id()
                )));
            }
            return Ok(credential);
        }
        self.key_pool.least_used_key().await.ok_or_else(|| {
            GatewayError::MissingCredential("no valid credential in pool".to_string())
        })
    }

    /// One endpoint attempt, including the rate-limit credential rotation.
    ///
    /// Returns the failure classification on the way out so the outer loop
    /// can carry the last one into the offline payload.
    async fn try_endpoint(
        &self,
        endpoint: &EndpointConfig,
        credential: &mut Credential,
        body: &bytes::Bytes,
        class: &str,
    ) -> Result<ChatCompletionResponse, FailureKind> {
        if !self.registry.may_attempt(&endpoint.url).await {
            tracing::debug!(endpoint = %endpoint.name, "skipping endpoint, breaker open");
            return Err(FailureKind::CircuitOpen);
        }

        let timeout = self.http.config().request_timeout();
        match self.http.post_chat(&endpoint.url, credential, body.clone(), timeout).await {
            Ok(response) => {
                self.on_success(endpoint, credential, &response).await;
                Ok(response)
            }
            Err(error) => {
                let kind = error.failure_kind().unwrap_or(FailureKind::Connection);
                tracing::debug!(endpoint = %endpoint.name, failure = %kind, "attempt failed");

                if kind.is_rate_limit() {
                    return self.retry_rate_limited(endpoint, credential, body, class).await;
                }

                if kind.should_trip_breaker() {
                    self.registry.record_failure(&endpoint.url, class).await;
                }
                Err(kind)
            }
        }
    }

    /// Quota problems are credential problems: swap to the least-used key
    /// and give the same endpoint one more chance before moving on.
    async fn retry_rate_limited(
        &self,
        endpoint: &EndpointConfig,
        credential: &mut Credential,
        body: &bytes::Bytes,
        class: &str,
    ) -> Result<ChatCompletionResponse, FailureKind> {
        if let Some(fresh) = self.key_pool.least_used_key().await {
            if fresh.secret() != credential.secret() {
                tracing::info!(
                    endpoint = %endpoint.name,
                    from = %credential.id(),
                    to = %fresh.id(),
                    "rate limited, rotating credential"
                );
                *credential = fresh;
            }
        }

        let timeout = self.http.config().request_timeout();
        match self.http.post_chat(&endpoint.url, credential, body.clone(), timeout).await {
            Ok(response) => {
                self.on_success(endpoint, credential, &response).await;
                Ok(response)
            }
            Err(error) => {
                let kind = error.failure_kind().unwrap_or(FailureKind::Connection);
                if kind.should_trip_breaker() {
                    self.registry.record_failure(&endpoint.url, class).await;
                }
                Err(kind)
            }
        }
    }

    async fn on_success(
        &self,
        endpoint: &EndpointConfig,
        credential: &Credential,
        response: &ChatCompletionResponse,
    ) {
        self.registry.record_success(&endpoint.url).await;
        if let Some(usage) = &response.usage {
            self.usage.record(credential, usage.total_tokens).await;
        }
        self.usage.record_quality(credential, response.is_truncated());
        tracing::debug!(endpoint = %endpoint.name, key = %credential.id(), "request served");
    }

    /// Synthesizes the degraded-mode reply: same shape as a success, with
    /// the marker set and the final failure's classification attached.
    fn offline_response(
        request: &ChatCompletionRequest,
        failure: FailureKind,
        endpoints_tried: Vec<String>,
    ) -> ChatCompletionResponse {
        let created = chrono::Utc::now();
        ChatCompletionResponse {
            id: format!("offline-{}", created.timestamp_millis()),
            object: "chat.completion".to_string(),
            created: created.timestamp(),
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(OFFLINE_APOLOGY),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(UsagePayload::default()),
            offline: true,
            degraded: Some(DegradedMetadata { failure: failure.to_string(), endpoints_tried }),
        }
    }
}
