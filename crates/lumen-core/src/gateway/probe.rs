//! Diagnostic endpoint probing.
//!
//! Probes answer "which of my candidate endpoints can I actually reach
//! right now?" for pre-flight checks and support tooling. A probe is not
//! part of the production request path and never mutates circuit breaker
//! state: a failed probe is not evidence worth tripping a breaker over,
//! and an open breaker must not hide a recovered endpoint from diagnostics.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use super::http_client::HttpClient;
use super::keypool::Credential;
use crate::config::EndpointConfig;

/// Outcome of probing one endpoint.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// The host answered something within the timeout.
    pub reachable: bool,
    /// Confirmed by an authenticated API call, not just a TCP-level answer.
    pub api_ok: bool,
    pub latency: Duration,
    pub message: String,
}

/// Aggregated failure when no candidate endpoint is reachable.
#[derive(Debug, Clone)]
pub struct ProbeSummary {
    /// Per-endpoint outcomes in priority order.
    pub results: Vec<(String, ProbeResult)>,
}

impl std::fmt::Display for ProbeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no endpoint reachable ({} probed)", self.results.len())?;
        for (name, result) in &self.results {
            write!(f, "; {name}: {}", result.message)?;
        }
        Ok(())
    }
}

/// Probes candidate endpoints independently of the dispatcher.
pub struct ConnectionProbe {
    http: Arc<HttpClient>,
}

impl ConnectionProbe {
    #[must_use]
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Probes a single endpoint.
    ///
    /// First attempts the authenticated model listing; if that fails,
    /// falls back to a bare connectivity check that only proves the host
    /// answers. The distinction is carried in `api_ok` and the message.
    pub async fn probe(
        &self,
        endpoint: &EndpointConfig,
        credential: &Credential,
        timeout: Duration,
    ) -> ProbeResult {
        let started = Instant::now();

        let api_error = match self.http.get_models(&endpoint.url, credential, timeout).await {
            Ok(()) => {
                let latency = started.elapsed();
                #[allow(clippy::cast_possible_truncation)]
                let latency_ms = latency.as_millis() as u64;
                tracing::debug!(endpoint = %endpoint.name, latency_ms, "probe: api reachable");
                return ProbeResult {
                    reachable: true,
                    api_ok: true,
                    latency,
                    message: format!("API reachable via {}", endpoint.name),
                };
            }
            Err(e) => e,
        };

        match self.http.bare_connectivity(&endpoint.url, timeout).await {
            Ok(()) => {
                let latency = started.elapsed();
                tracing::debug!(endpoint = %endpoint.name, error = %api_error, "probe: host answers but api check failed");
                ProbeResult {
                    reachable: true,
                    api_ok: false,
                    latency,
                    message: format!(
                        "host {} answers, but the API check failed ({api_error}); \
                         the service may not be functional",
                        endpoint.name
                    ),
                }
            }
            Err(bare_error) => {
                let latency = started.elapsed();
                tracing::debug!(endpoint = %endpoint.name, error = %bare_error, "probe: unreachable");
                ProbeResult {
                    reachable: false,
                    api_ok: false,
                    latency,
                    message: format!("{} unreachable: {bare_error}", endpoint.name),
                }
            }
        }
    }

    /// Probes all candidates concurrently and returns the first success in
    /// priority order (the slice's order: proxy before directs).
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeSummary`] naming every failure when nothing is
    /// reachable.
    pub async fn probe_all(
        &self,
        endpoints: &[EndpointConfig],
        credential: &Credential,
    ) -> Result<(EndpointConfig, ProbeResult), ProbeSummary> {
        let timeout = self.http.config().probe_timeout();
        let probes = endpoints.iter().map(|ep| self.probe(ep, credential, timeout));
        let results = join_all(probes).await;

        for (endpoint, result) in endpoints.iter().zip(&results) {
            if result.reachable {
                return Ok((endpoint.clone(), result.clone()));
            }
        }

        Err(ProbeSummary {
            results: endpoints
                .iter()
                .map(|ep| ep.name.clone())
                .zip(results)
                .collect(),
        })
    }
}
