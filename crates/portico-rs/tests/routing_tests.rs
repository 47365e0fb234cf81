//! End-to-end routing engine tests against live local upstreams.

mod common;

use actix_web::body::to_bytes;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use common::TestUpstream;
use portico_rs::models::settings::{
    BackendConfig, CircuitBreakerSettings, CompositeRoute, CompositeStrategy, DryRunSettings,
    GatewaySettings, PathRewritingConfig, RouteConfig,
};
use portico_rs::routes::metrics::MetricsCollector;
use portico_rs::services::routing::RoutingEngine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

fn engine(settings: GatewaySettings) -> RoutingEngine {
    RoutingEngine::new(settings, reqwest::Client::new(), MetricsCollector::default())
        .expect("engine builds")
}

async fn send(engine: &RoutingEngine, req: TestRequest) -> (u16, Bytes) {
    let req = req.to_http_request();
    let response = engine.handle(&req, Bytes::new()).await;
    let status = response.status().as_u16();
    let body = to_bytes(response.into_body()).await.expect("body");
    (status, body)
}

fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[actix_web::test]
async fn default_routing_forwards_verbatim() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        default_backend: "api".to_string(),
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, body) = send(&engine, TestRequest::get().uri("/anything?x=1")).await;

    assert_eq!(status, 200);
    let body = json_body(&body);
    assert_eq!(body["path"], "/anything");
    assert_eq!(body["query"], "x=1");
    assert_eq!(upstream.hits(), 1);
}

#[actix_web::test]
async fn path_rewrite_reaches_the_internal_path() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        backend_configs: HashMap::from([(
            "api".to_string(),
            BackendConfig {
                path_rewriting: Some(PathRewritingConfig {
                    strip_base_path: "/api/v1".to_string(),
                    base_path_rewrite: "/internal/api".to_string(),
                    endpoint_rewrites: vec![],
                }),
                ..Default::default()
            },
        )]),
        default_backend: "api".to_string(),
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, body) = send(&engine, TestRequest::get().uri("/api/v1/users/42")).await;

    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["path"], "/internal/api/users/42");
}

#[actix_web::test]
async fn reserved_paths_return_404_regardless_of_default_backend() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        default_backend: "api".to_string(),
        ..Default::default()
    };
    let engine = engine(settings);

    for path in ["/health", "/health/", "/metrics", "/metrics/health", "/debug/info"] {
        let (status, _) = send(&engine, TestRequest::get().uri(path)).await;
        assert_eq!(status, 404, "path {} must not be proxied", path);
    }

    // Tenants do not change reserved paths.
    let (status, _) = send(
        &engine,
        TestRequest::get().uri("/health").insert_header(("X-Tenant-ID", "acme")),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(upstream.hits(), 0);
}

#[actix_web::test]
async fn missing_tenant_header_is_rejected_before_any_upstream_call() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        default_backend: "api".to_string(),
        require_tenant_id: true,
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, body) = send(&engine, TestRequest::get().uri("/anything")).await;

    assert_eq!(status, 400);
    assert_eq!(std::str::from_utf8(&body).unwrap(), "Header X-Tenant-ID is required");
    assert_eq!(upstream.hits(), 0);

    let (status, _) = send(
        &engine,
        TestRequest::get().uri("/anything").insert_header(("X-Tenant-ID", "acme")),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(upstream.hits(), 1);
}

#[actix_web::test]
async fn unknown_route_without_default_backend_is_404() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        routes: HashMap::from([("/known".to_string(), "api".to_string())]),
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, _) = send(&engine, TestRequest::get().uri("/unknown")).await;
    assert_eq!(status, 404);
}

#[actix_web::test]
async fn disabled_feature_flag_routes_to_the_alternative_backend() {
    let new_backend = TestUpstream::start(200, r#"{"which":"new"}"#);
    let old_backend = TestUpstream::start(200, r#"{"which":"old"}"#);

    let mut settings = GatewaySettings {
        backend_services: HashMap::from([
            ("new".to_string(), new_backend.url().to_string()),
            ("old".to_string(), old_backend.url().to_string()),
        ]),
        routes: HashMap::from([("/x".to_string(), "new".to_string())]),
        route_configs: HashMap::from([(
            "/x".to_string(),
            RouteConfig {
                feature_flag_id: "f".to_string(),
                alternative_backend: "old".to_string(),
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    settings.feature_flags.enabled = true;
    settings.feature_flags.flags.insert("f".to_string(), false);

    let engine = engine(settings);
    let (status, body) = send(&engine, TestRequest::get().uri("/x")).await;

    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["which"], "old");
    assert_eq!(old_backend.hits(), 1);
    assert_eq!(new_backend.hits(), 0);
}

#[actix_web::test]
async fn enabled_and_unknown_flags_keep_the_primary_backend() {
    let new_backend = TestUpstream::start(200, r#"{"which":"new"}"#);
    let old_backend = TestUpstream::start(200, r#"{"which":"old"}"#);

    let mut settings = GatewaySettings {
        backend_services: HashMap::from([
            ("new".to_string(), new_backend.url().to_string()),
            ("old".to_string(), old_backend.url().to_string()),
        ]),
        routes: HashMap::from([("/x".to_string(), "new".to_string())]),
        route_configs: HashMap::from([(
            "/x".to_string(),
            RouteConfig {
                feature_flag_id: "missing-flag".to_string(),
                alternative_backend: "old".to_string(),
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    settings.feature_flags.enabled = true;

    // An unknown flag defaults to enabled.
    let engine = engine(settings);
    let (_, body) = send(&engine, TestRequest::get().uri("/x")).await;
    assert_eq!(json_body(&body)["which"], "new");
    assert_eq!(old_backend.hits(), 0);
}

#[actix_web::test]
async fn circuit_opens_after_threshold_and_fails_fast() {
    let upstream = TestUpstream::start(500, r#"{"error":"boom"}"#);
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        default_backend: "api".to_string(),
        circuit_breaker: CircuitBreakerSettings {
            enabled: true,
            failure_threshold: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = engine(settings);

    // Three 500s pass through and trip the breaker.
    for _ in 0..3 {
        let (status, _) = send(&engine, TestRequest::get().uri("/anything")).await;
        assert_eq!(status, 500);
    }
    assert_eq!(upstream.hits(), 3);

    // The fourth request fails fast with the circuit-open body.
    let (status, body) = send(&engine, TestRequest::get().uri("/anything")).await;
    assert_eq!(status, 503);
    assert_eq!(
        json_body(&body),
        json!({"error": "Service temporarily unavailable", "code": "CIRCUIT_OPEN"})
    );
    assert_eq!(upstream.hits(), 3, "no upstream call while open");
}

#[actix_web::test]
async fn composite_merge_combines_backend_objects() {
    let users = TestUpstream::start(200, r#"{"a":1}"#);
    let profiles = TestUpstream::start(200, r#"{"b":2}"#);

    let settings = GatewaySettings {
        backend_services: HashMap::from([
            ("u".to_string(), users.url().to_string()),
            ("p".to_string(), profiles.url().to_string()),
        ]),
        composite_routes: HashMap::from([(
            "/combined".to_string(),
            CompositeRoute {
                backends: vec!["u".to_string(), "p".to_string()],
                strategy: CompositeStrategy::Merge,
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, body) = send(&engine, TestRequest::get().uri("/combined")).await;

    assert_eq!(status, 200);
    assert_eq!(json_body(&body), json!({"a": 1, "b": 2}));
    assert_eq!(users.hits(), 1);
    assert_eq!(profiles.hits(), 1);
}

#[actix_web::test]
async fn dry_run_returns_the_primary_response() {
    let primary = TestUpstream::start(200, r#"{"v":1}"#);
    let secondary = TestUpstream::start(200, r#"{"v":2}"#);

    let settings = GatewaySettings {
        backend_services: HashMap::from([
            ("new".to_string(), primary.url().to_string()),
            ("old".to_string(), secondary.url().to_string()),
        ]),
        routes: HashMap::from([("/d".to_string(), "new".to_string())]),
        route_configs: HashMap::from([(
            "/d".to_string(),
            RouteConfig {
                dry_run: true,
                dry_run_backend: "old".to_string(),
                ..Default::default()
            },
        )]),
        dry_run: DryRunSettings { enabled: true, ..Default::default() },
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, body) = send(&engine, TestRequest::get().uri("/d")).await;

    assert_eq!(status, 200);
    assert_eq!(json_body(&body), json!({"v": 1}));

    // Both legs were dispatched; the comparison runs in the background.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(primary.hits(), 1);
    assert_eq!(secondary.hits(), 1);
}

#[actix_web::test]
async fn tenant_override_switches_the_default_backend() {
    let backend_a = TestUpstream::start(200, r#"{"which":"a"}"#);
    let backend_b = TestUpstream::start(200, r#"{"which":"b"}"#);

    let settings = GatewaySettings {
        backend_services: HashMap::from([
            ("a".to_string(), backend_a.url().to_string()),
            ("b".to_string(), backend_b.url().to_string()),
        ]),
        default_backend: "a".to_string(),
        ..Default::default()
    };
    let engine = engine(settings);

    let overlay = GatewaySettings { default_backend: "b".to_string(), ..Default::default() };
    engine.register_tenant("t1", overlay).expect("tenant registers");

    let (_, body) = send(&engine, TestRequest::get().uri("/anything")).await;
    assert_eq!(json_body(&body)["which"], "a");

    let (_, body) = send(
        &engine,
        TestRequest::get().uri("/anything").insert_header(("X-Tenant-ID", "t1")),
    )
    .await;
    assert_eq!(json_body(&body)["which"], "b");

    // Unregistered tenants fall back to the global configuration.
    let (_, body) = send(
        &engine,
        TestRequest::get().uri("/anything").insert_header(("X-Tenant-ID", "nobody")),
    )
    .await;
    assert_eq!(json_body(&body)["which"], "a");
}

#[actix_web::test]
async fn exact_routes_win_over_glob_and_composite() {
    let exact = TestUpstream::start(200, r#"{"which":"exact"}"#);
    let glob = TestUpstream::start(200, r#"{"which":"glob"}"#);
    let composite = TestUpstream::start(200, r#"{"which":"composite"}"#);

    let settings = GatewaySettings {
        backend_services: HashMap::from([
            ("exact".to_string(), exact.url().to_string()),
            ("glob".to_string(), glob.url().to_string()),
            ("comp".to_string(), composite.url().to_string()),
        ]),
        routes: HashMap::from([
            ("/api/users".to_string(), "exact".to_string()),
            ("/api/*".to_string(), "glob".to_string()),
        ]),
        composite_routes: HashMap::from([(
            "/api/users".to_string(),
            CompositeRoute {
                backends: vec!["comp".to_string()],
                strategy: CompositeStrategy::Select,
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    let engine = engine(settings);

    let (_, body) = send(&engine, TestRequest::get().uri("/api/users")).await;
    assert_eq!(json_body(&body)["which"], "exact");

    let (_, body) = send(&engine, TestRequest::get().uri("/api/orders")).await;
    assert_eq!(json_body(&body)["which"], "glob");
    assert_eq!(composite.hits(), 0);
}

#[actix_web::test]
async fn cached_get_responses_are_served_without_a_second_upstream_call() {
    let upstream = TestUpstream::start_echo();
    let settings = GatewaySettings {
        backend_services: HashMap::from([("api".to_string(), upstream.url().to_string())]),
        default_backend: "api".to_string(),
        cache_enabled: true,
        cache_ttl: 60,
        ..Default::default()
    };
    let engine = engine(settings);

    let (status, first) = send(&engine, TestRequest::get().uri("/cached?q=1")).await;
    assert_eq!(status, 200);
    let (_, second) = send(&engine, TestRequest::get().uri("/cached?q=1")).await;

    assert_eq!(first, second);
    assert_eq!(upstream.hits(), 1);

    // A different fingerprint goes upstream again.
    let _ = send(&engine, TestRequest::get().uri("/cached?q=2")).await;
    assert_eq!(upstream.hits(), 2);
}
