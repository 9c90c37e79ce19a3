//! Registry-level breaker timing tests under a paused tokio clock.
//!
//! These drive the auto-heal and success-healing transitions with
//! simulated time instead of real sleeps.

use lumen_core::gateway::{BreakerPolicy, CircuitBreakerRegistry};
use std::time::Duration;

const ENDPOINT: &str = "https://api.example.com/v1";

async fn fail_times(registry: &CircuitBreakerRegistry, class: &str, times: u32) {
    for _ in 0..times {
        registry.record_failure(ENDPOINT, class).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_threshold_trip_and_timed_heal() {
    let registry = CircuitBreakerRegistry::new(BreakerPolicy::default());

    fail_times(&registry, "standard", 3).await;
    assert!(!registry.may_attempt(ENDPOINT).await, "open after the third failure");

    // At exactly the threshold the reset window is the 30s base.
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!registry.may_attempt(ENDPOINT).await);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(registry.may_attempt(ENDPOINT).await, "soft heal after the window");

    // Healed, not forgiven: the failure history is retained.
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot[0].1.failure_count, 3);
    assert!(!snapshot[0].1.is_open);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_after_heal_reopens_immediately() {
    let registry = CircuitBreakerRegistry::new(BreakerPolicy::default());

    fail_times(&registry, "standard", 3).await;
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(registry.may_attempt(ENDPOINT).await);

    // The probe attempt fails: retained history re-trips on the spot.
    registry.record_failure(ENDPOINT, "standard").await;
    assert!(!registry.may_attempt(ENDPOINT).await);

    // And the window grew: 45s now, not 30s.
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!registry.may_attempt(ENDPOINT).await);
    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(registry.may_attempt(ENDPOINT).await);
}

#[tokio::test(start_paused = true)]
async fn test_two_successes_reset_regardless_of_elapsed_time() {
    let registry = CircuitBreakerRegistry::new(BreakerPolicy::default());

    fail_times(&registry, "standard", 3).await;
    assert!(!registry.may_attempt(ENDPOINT).await);

    // No time passes at all; successes alone heal fully.
    registry.record_success(ENDPOINT).await;
    registry.record_success(ENDPOINT).await;

    assert!(registry.may_attempt(ENDPOINT).await);
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot[0].1.failure_count, 0);
    assert!(!snapshot[0].1.is_open);
}

#[tokio::test(start_paused = true)]
async fn test_complex_class_needs_four_failures() {
    let registry = CircuitBreakerRegistry::new(BreakerPolicy::default());

    fail_times(&registry, "complex-document", 3).await;
    assert!(registry.may_attempt(ENDPOINT).await, "complex classes trip at 4");

    fail_times(&registry, "complex-document", 1).await;
    assert!(!registry.may_attempt(ENDPOINT).await);

    // Window at threshold is still the base; failure_count == threshold == 4.
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(registry.may_attempt(ENDPOINT).await);
}

#[tokio::test(start_paused = true)]
async fn test_single_success_does_not_clear_history() {
    let registry = CircuitBreakerRegistry::new(BreakerPolicy::default());

    fail_times(&registry, "standard", 2).await;
    registry.record_success(ENDPOINT).await;

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot[0].1.failure_count, 2);
    assert_eq!(snapshot[0].1.consecutive_successes, 1);

    // One more failure reaches the threshold: the success did not decay it.
    registry.record_failure(ENDPOINT, "standard").await;
    assert!(!registry.may_attempt(ENDPOINT).await);
}
