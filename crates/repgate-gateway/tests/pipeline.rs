//! End-to-end request pipeline with a wired response cache

use repgate_cache::{CacheParams, CacheTtl};
use repgate_common::ManualClock;
use repgate_gateway::{
    AdmissionStrategy, Gateway, GatewayConfig, GatewayError, GatewayRequest, RejectReason, Tier, TierConfig,
    TierTable,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sentiment {
    entity: String,
    score: f64,
}

fn request(path: &str, token: &str) -> GatewayRequest {
    GatewayRequest::new("GET", path).with_header("X-API-Key", token)
}

#[tokio::test]
async fn test_from_config_wires_every_component() {
    let clock = ManualClock::at(1_700_000_000.0);
    let gateway = Gateway::from_config(&GatewayConfig::default(), clock.clone())
        .await
        .unwrap();

    let token = gateway.credentials().issue("12", Tier::Basic, Some("dashboard"));
    let response = gateway.process(&request("/api/v1/entities/3", &token)).unwrap();

    assert_eq!(response.target, "entity-service");
    assert_eq!(response.admission.remaining_hour, Some(999));
    assert_eq!(response.admission.remaining_minute, Some(99));
    assert_eq!(response.admission_stats.tiers[&Tier::Basic].allowed, 1);
    assert!(response.cache_stats.is_some());
    assert!(response
        .headers
        .contains(&("X-RateLimit-Limit".to_string(), "1000".to_string())));
}

#[tokio::test]
async fn test_admitted_handler_uses_cache() {
    let clock = ManualClock::at(0.0);
    let gateway = Gateway::from_config(&GatewayConfig::default(), clock.clone())
        .await
        .unwrap();
    let token = gateway.credentials().issue("1", Tier::Enterprise, None);
    let cache = gateway.cache().unwrap().clone();
    let computed = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        gateway.process(&request("/api/v1/analytics", &token)).unwrap();

        let params = CacheParams::new().with("days", 7);
        let computed = computed.clone();
        let value: Sentiment = cache
            .get_or_compute("sentiment", "acme", &params, CacheTtl::default(), || async move {
                computed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Sentiment {
                    entity: "acme".into(),
                    score: 0.8,
                })
            })
            .await
            .unwrap();
        assert_eq!(value.score, 0.8);
    }

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.l1_hits, 2);

    cache.invalidate_namespace("sentiment").await;
    assert!(cache
        .get("sentiment", "acme", &CacheParams::new().with("days", 7))
        .await
        .is_none());
}

#[tokio::test]
async fn test_rejection_recovers_after_window() {
    let clock = ManualClock::at(0.0);
    let config = GatewayConfig {
        tiers: TierTable::default().with(Tier::Free, TierConfig::new(100, 10, 20, AdmissionStrategy::SlidingWindow)),
        cache: None,
        ..Default::default()
    };
    let gateway = Gateway::from_config(&config, clock.clone()).await.unwrap();
    let token = gateway.credentials().issue("2", Tier::Free, None);

    for _ in 0..10 {
        gateway.process(&request("/api/v1/mentions", &token)).unwrap();
        clock.advance_secs(0.05);
    }

    let err = gateway.process(&request("/api/v1/mentions", &token)).unwrap_err();
    assert_eq!(err.status_code(), 429);
    match &err {
        GatewayError::AdmissionRejected(decision) => {
            assert_eq!(decision.reason, Some(RejectReason::MinuteLimit));
            assert_eq!(decision.tier, Tier::Free);
        }
        other => panic!("unexpected {:?}", other),
    }

    clock.advance_secs(61.0);
    assert!(gateway.process(&request("/api/v1/mentions", &token)).is_ok());
}

#[tokio::test]
async fn test_invalid_config_refused() {
    let config = GatewayConfig {
        tiers: TierTable::default().with(
            Tier::Professional,
            TierConfig::new(10_000, 500, 499, AdmissionStrategy::TokenBucket),
        ),
        ..Default::default()
    };
    assert!(Gateway::from_config(&config, ManualClock::at(0.0)).await.is_err());
}

#[tokio::test]
async fn test_revocation_and_bearer() {
    let gateway = Gateway::from_config(&GatewayConfig::default(), ManualClock::at(0.0))
        .await
        .unwrap();
    let token = gateway.credentials().issue("4", Tier::Professional, None);

    let bearer = GatewayRequest::new("DELETE", "/api/v1/entities/9")
        .with_header("Authorization", format!("Bearer {}", token));
    assert_eq!(gateway.process(&bearer).unwrap().target, "entity-service");

    gateway.credentials().revoke(&token);
    let err = gateway.process(&bearer).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidCredential));
    assert_eq!(err.status_code(), 401);
}
