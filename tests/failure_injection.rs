//! Failure injection tests against a local mock upstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use upstream_guard::resilience::{CircuitState, ResilienceError};
use upstream_guard::upstream::{RequestOptions, UpstreamError, UpstreamRegistry};

mod common;

#[derive(Debug, Deserialize, PartialEq)]
struct Artist {
    id: String,
    name: String,
}

#[tokio::test]
async fn test_retry_on_transient_not_found() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                (404, "{}".into())
            } else {
                (200, r#"{"id":"0TnOYISbd1XYRBk9myaseg","name":"Pitbull"}"#.into())
            }
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("spotify", addr, 3, 5)).unwrap();
    let spotify = registry.get("spotify").unwrap();

    let artist: Artist = spotify
        .get_json("artists/0TnOYISbd1XYRBk9myaseg", &RequestOptions::new())
        .await
        .expect("should succeed after retries");

    assert_eq!(artist.name, "Pitbull");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_not_found_returned_after_retries() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (404, r#"{"error":"not found"}"#.into())
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("youtube", addr, 2, 5)).unwrap();
    let youtube = registry.get("youtube").unwrap();

    let response = youtube
        .get("videos", &RequestOptions::new().query("id", "missing"))
        .await
        .expect("404 is returned, not raised");

    assert_eq!(response.status(), 404);
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    assert_eq!(youtube.guard().breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (500, "{}".into())
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("node-proxy", addr, 3, 5)).unwrap();
    let proxy = registry.get("node-proxy").unwrap();

    let response = proxy.get("recommendations", &RequestOptions::new()).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_json_error_status_counts_as_failure() {
    let addr = common::start_programmable_backend(|| async { (503, "{}".to_string()) }).await;

    let registry = UpstreamRegistry::from_config(&common::config_for("spotify", addr, 0, 1)).unwrap();
    let spotify = registry.get("spotify").unwrap();

    let err = spotify
        .get_json::<Artist>("artists/x", &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResilienceError::Upstream(UpstreamError::Status { status: 503, .. })
    ));
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn test_breaker_opens_on_connection_failures() {
    let addr = common::closed_port().await;
    let registry = UpstreamRegistry::from_config(&common::config_for("spotify", addr, 1, 2)).unwrap();
    let spotify = registry.get("spotify").unwrap();

    for _ in 0..2 {
        let err = spotify.get("me", &RequestOptions::new()).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Upstream(UpstreamError::Http(_))));
    }
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Open);

    let err = spotify.get("me", &RequestOptions::new()).await.unwrap_err();
    assert!(err.is_circuit_open());

    let fallback_calls = AtomicU32::new(0);
    let cached: Vec<Artist> = spotify
        .get_json_or_else("me/top/artists", &RequestOptions::new(), || async {
            fallback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        })
        .await
        .unwrap();
    assert!(cached.is_empty());
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let h = healthy.clone();
    let addr = common::start_programmable_backend(move || {
        let h = h.clone();
        async move {
            if h.load(Ordering::SeqCst) {
                (200, r#"{"id":"1","name":"ABBA"}"#.into())
            } else {
                (502, "{}".into())
            }
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("spotify", addr, 0, 2)).unwrap();
    let spotify = registry.get("spotify").unwrap();

    for _ in 0..2 {
        assert!(spotify
            .get_json::<Artist>("artists/1", &RequestOptions::new())
            .await
            .is_err());
    }
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Open);

    healthy.store(true, Ordering::SeqCst);
    let err = spotify
        .get_json::<Artist>("artists/1", &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_circuit_open(), "still cooling down");

    tokio::time::sleep(Duration::from_millis(250)).await;

    let artist: Artist = spotify
        .get_json("artists/1", &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(
        artist,
        Artist {
            id: "1".into(),
            name: "ABBA".into()
        }
    );
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Closed);
    assert_eq!(spotify.guard().breaker().failure_count(), 0);
}

#[tokio::test]
async fn test_json_not_found_after_retries_keeps_breaker_closed() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (404, r#"{"error":"not found"}"#.into())
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("spotify", addr, 1, 1)).unwrap();
    let spotify = registry.get("spotify").unwrap();

    for _ in 0..2 {
        let err = spotify
            .get_json::<Artist>("artists/missing", &RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResilienceError::Upstream(UpstreamError::Status { status: 404, .. })
        ));
    }
    assert_eq!(call_count.load(Ordering::SeqCst), 4);
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Closed);
    assert_eq!(spotify.guard().breaker().failure_count(), 0);
}

#[tokio::test]
async fn test_json_soft_failure_status_opens_breaker() {
    let addr = common::start_programmable_backend(|| async { (404, "{}".to_string()) }).await;

    let mut config = common::config_for("spotify", addr, 1, 1);
    config.circuit_breaker.soft_failure_statuses = vec![404];
    let registry = UpstreamRegistry::from_config(&config).unwrap();
    let spotify = registry.get("spotify").unwrap();

    let fallback: Vec<Artist> = spotify
        .get_json_or_else("me/top/artists", &RequestOptions::new(), || async { Ok(Vec::new()) })
        .await
        .unwrap();
    assert!(fallback.is_empty());
    assert_eq!(spotify.guard().breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn test_invalid_header_is_not_retried_or_counted() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (200, "{}".into())
        }
    })
    .await;

    let registry = UpstreamRegistry::from_config(&common::config_for("youtube", addr, 3, 1)).unwrap();
    let youtube = registry.get("youtube").unwrap();
    let options = RequestOptions::new().header("x-bad header", "1");

    let err = youtube.get("videos", &options).await.unwrap_err();
    assert!(matches!(err, ResilienceError::Upstream(UpstreamError::Http(ref e)) if e.is_builder()));

    let err = youtube
        .get_json::<Artist>("videos", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::Upstream(UpstreamError::Http(ref e)) if e.is_builder()));

    assert_eq!(call_count.load(Ordering::SeqCst), 0);
    assert_eq!(youtube.guard().breaker().failure_count(), 0);
    assert_eq!(youtube.guard().breaker().state(), CircuitState::Closed);
}
