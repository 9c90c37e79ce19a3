//! End-to-end dispatcher tests against mock endpoints.
//!
//! Each test builds a dispatcher over a mix of mock LLM servers,
//! connection-refused ports, and unresponsive hosts, then asserts on the
//! returned payload and the breaker/usage state left behind.

use crate::mock_infrastructure::{test_config, unresponsive_endpoint, LlmMockBuilder};
use lumen_core::config::KeyPoolConfig;
use lumen_core::gateway::{Credential, CredentialRule, Dispatcher, SendOptions};
use lumen_core::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use std::collections::BTreeSet;
use std::time::Duration;

const KEY_1: &str = "sk-test-0000000000000001";
const KEY_2: &str = "sk-test-0000000000000002";

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new("mock-model", vec![ChatMessage::user("analyze this deal")])
}

fn snapshot_for(
    snapshot: &[(String, lumen_core::gateway::BreakerSnapshot)],
    url: &str,
) -> lumen_core::gateway::BreakerSnapshot {
    snapshot
        .iter()
        .find(|(endpoint, _)| endpoint == url)
        .unwrap_or_else(|| panic!("no breaker entry for {url}"))
        .1
        .clone()
}

#[tokio::test]
async fn test_success_on_first_endpoint_records_usage() {
    let mut server = LlmMockBuilder::new().await;
    let mock = server.mock_completion("structured reply", 42).await;

    let dispatcher = Dispatcher::new(test_config(None, &[&server.url()], &[KEY_1])).unwrap();
    let response = dispatcher.send(&request()).await.unwrap();

    assert!(!response.offline);
    assert_eq!(response.content().as_deref(), Some("structured reply"));
    mock.assert_async().await;

    // Success recorded against the breaker, tokens against the key.
    let snap = snapshot_for(&dispatcher.registry().snapshot().await, &server.url());
    assert_eq!(snap.failure_count, 0);
    assert_eq!(snap.total_attempts, 1);

    let usage = dispatcher.key_pool().usage().await;
    assert_eq!(usage.iter().map(|u| u.cumulative_tokens).sum::<u64>(), 42);
}

#[tokio::test]
async fn test_failover_proxy_error_then_timeout_then_success() {
    let mut proxy = LlmMockBuilder::new().await;
    let _proxy_mock = proxy.mock_status(500, "internal error").await;
    let dead = unresponsive_endpoint().await;
    let mut fallback = LlmMockBuilder::new().await;
    let _fallback_mock = fallback.mock_completion("from the second direct", 18).await;

    let dispatcher = Dispatcher::new(test_config(
        Some(&proxy.url()),
        &[&dead, &fallback.url()],
        &[KEY_1],
    ))
    .unwrap();

    let response = dispatcher.send(&request()).await.unwrap();
    assert!(!response.offline);
    assert_eq!(response.content().as_deref(), Some("from the second direct"));

    // One success and two failures in the registry, each on its own entry.
    let snapshot = dispatcher.registry().snapshot().await;
    assert_eq!(snapshot_for(&snapshot, &proxy.url()).failure_count, 1);
    assert_eq!(snapshot_for(&snapshot, &dead).failure_count, 1);
    let winner = snapshot_for(&snapshot, &fallback.url());
    assert_eq!(winner.failure_count, 0);
    assert_eq!(winner.total_attempts, 1);
}

#[tokio::test]
async fn test_rate_limit_rotates_credential_on_same_endpoint() {
    let mut server = LlmMockBuilder::new().await;
    let limited = server.mock_rate_limited_for_key(KEY_1).await;
    let served = server.mock_completion_for_key(KEY_2, "served by second key", 40).await;

    let dispatcher =
        Dispatcher::new(test_config(None, &[&server.url()], &[KEY_1, KEY_2])).unwrap();
    let response = dispatcher.send(&request()).await.unwrap();

    assert!(!response.offline);
    assert_eq!(response.content().as_deref(), Some("served by second key"));
    limited.assert_async().await;
    served.assert_async().await;

    // Rate limiting is a credential problem: the endpoint's breaker saw no failure.
    let snap = snapshot_for(&dispatcher.registry().snapshot().await, &server.url());
    assert_eq!(snap.failure_count, 0);

    // Tokens were booked on the key that actually served the call.
    let stats = dispatcher.usage().stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].tokens, 40);
}

#[tokio::test]
async fn test_open_breaker_skips_endpoint_without_network_attempt() {
    let mut first = LlmMockBuilder::new().await;
    let _first_mock = first.mock_completion("from the tripped endpoint", 10).await;
    let mut second = LlmMockBuilder::new().await;
    let _second_mock = second.mock_completion("from the healthy endpoint", 10).await;

    let dispatcher =
        Dispatcher::new(test_config(None, &[&first.url(), &second.url()], &[KEY_1])).unwrap();

    // Trip the first endpoint's breaker up front.
    for _ in 0..3 {
        dispatcher.registry().record_failure(&first.url(), "standard").await;
    }

    let response = dispatcher.send(&request()).await.unwrap();
    assert_eq!(response.content().as_deref(), Some("from the healthy endpoint"));

    // The skip is local: no additional failure was recorded against it.
    let snap = snapshot_for(&dispatcher.registry().snapshot().await, &first.url());
    assert_eq!(snap.failure_count, 3);
    assert!(snap.is_open);
}

#[tokio::test]
async fn test_exhaustion_returns_offline_with_success_shape() {
    let dispatcher = Dispatcher::new(test_config(
        Some("http://127.0.0.1:1"),
        &["http://127.0.0.1:2"],
        &[KEY_1],
    ))
    .unwrap();

    let offline = dispatcher.send(&request()).await.unwrap();
    assert!(offline.offline);
    let degraded = offline.degraded.as_ref().unwrap();
    assert_eq!(degraded.endpoints_tried, vec!["proxy", "direct-0"]);
    assert!(!degraded.failure.is_empty());

    // Same key set as a genuine reply.
    let mut server = LlmMockBuilder::new().await;
    let _live_mock = server.mock_completion("real", 5).await;
    let live = Dispatcher::new(test_config(None, &[&server.url()], &[KEY_1])).unwrap();
    let success = live.send(&request()).await.unwrap();

    assert_eq!(object_keys(&offline), object_keys(&success));
    assert!(!success.offline);
}

#[tokio::test]
async fn test_outer_retry_passes_endpoint_again_after_backoff() {
    let mut server = LlmMockBuilder::new().await;
    // One initial pass plus one retry pass: exactly two hits.
    let mock = server.mock_status_n(500, "still broken", 2).await;

    let mut config = test_config(None, &[&server.url()], &[KEY_1]);
    config.retry.max_retries = 1;

    let dispatcher = Dispatcher::new(config).unwrap();
    let response = dispatcher.send(&request()).await.unwrap();

    assert!(response.offline);
    assert_eq!(response.degraded.unwrap().failure, "http_error(500)");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cancellation_mid_attempt_records_nothing() {
    let dead = unresponsive_endpoint().await;
    let mut config = test_config(None, &[&dead], &[KEY_1]);
    config.http.request_timeout_secs = 30;

    let dispatcher = Dispatcher::new(config).unwrap();
    let request = request();
    let send = dispatcher.send(&request);

    tokio::select! {
        _ = send => panic!("unresponsive endpoint should not produce a reply"),
        () = tokio::time::sleep(Duration::from_millis(200)) => {}
    }

    // The dropped attempt never reached outcome recording.
    assert!(dispatcher.registry().snapshot().await.is_empty());
}

#[tokio::test]
async fn test_truncated_reply_recorded_as_quality_signal() {
    let mut server = LlmMockBuilder::new().await;
    let _mock = server.mock_truncated_completion("cut off mid-sent", 120).await;

    let dispatcher = Dispatcher::new(test_config(None, &[&server.url()], &[KEY_1])).unwrap();
    let response = dispatcher.send(&request()).await.unwrap();

    assert!(response.is_truncated());
    let stats = dispatcher.usage().stats();
    assert_eq!(stats[0].truncated, 1);
}

#[tokio::test]
async fn test_unresolvable_credential_fails_before_any_attempt() {
    let mut server = LlmMockBuilder::new().await;
    let _untouched = server.mock_status_n(500, "must never be called", 0).await;

    let mut config = test_config(None, &[&server.url()], &[]);
    // A rule the built-in default seed cannot satisfy either.
    config.key_pool = KeyPoolConfig {
        keys: vec![],
        rule: CredentialRule { min_length: 30, required_prefix: "corp-".to_string() },
    };

    let dispatcher = Dispatcher::new(config).unwrap();
    let err = dispatcher.send(&request()).await.unwrap_err();
    assert!(matches!(err, lumen_core::gateway::GatewayError::MissingCredential(_)));
}

#[tokio::test]
async fn test_explicit_credential_takes_precedence() {
    let mut server = LlmMockBuilder::new().await;
    let served = server.mock_completion_for_key(KEY_2, "explicit key used", 7).await;

    // Pool only knows KEY_1; the caller pins KEY_2 explicitly.
    let dispatcher = Dispatcher::new(test_config(None, &[&server.url()], &[KEY_1])).unwrap();
    let response = dispatcher
        .send_with_options(
            &request(),
            SendOptions { credential: Some(Credential::new(KEY_2)), request_class: None },
        )
        .await
        .unwrap();

    assert_eq!(response.content().as_deref(), Some("explicit key used"));
    served.assert_async().await;
}

#[tokio::test]
async fn test_probe_does_not_touch_breaker_state() {
    let dispatcher = Dispatcher::new(test_config(
        None,
        &["http://127.0.0.1:1", "http://127.0.0.1:2"],
        &[KEY_1],
    ))
    .unwrap();

    let probe = dispatcher.probe();
    let endpoints = test_config(None, &["http://127.0.0.1:1", "http://127.0.0.1:2"], &[KEY_1])
        .endpoints
        .candidates();
    let summary = probe
        .probe_all(&endpoints, &Credential::new(KEY_1))
        .await
        .unwrap_err();

    assert_eq!(summary.results.len(), 2);
    assert!(dispatcher.registry().snapshot().await.is_empty());
}

fn object_keys(response: &ChatCompletionResponse) -> BTreeSet<String> {
    serde_json::to_value(response)
        .unwrap()
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect()
}
