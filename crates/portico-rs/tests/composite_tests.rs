//! Composite combiner tests: merge, select, append, and partial results.

use actix_web::body::to_bytes;
use actix_web::web::Bytes;
use portico_rs::models::error::GatewayError;
use portico_rs::services::composite::{
    append_responses, merge_responses, select_response, BackendResult,
};
use portico_rs::services::proxy::CapturedResponse;
use serde_json::{json, Value};

fn ok_leg(backend: &str, status: u16, body: &str) -> BackendResult {
    BackendResult {
        backend: backend.to_string(),
        result: Ok(CapturedResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
        }),
    }
}

fn failed_leg(backend: &str) -> BackendResult {
    BackendResult {
        backend: backend.to_string(),
        result: Err(GatewayError::Upstream {
            backend: backend.to_string(),
            message: "connection refused".to_string(),
        }),
    }
}

async fn body_json(response: actix_web::HttpResponse) -> Value {
    let bytes = to_bytes(response.into_body()).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[actix_web::test]
async fn merge_unions_top_level_keys() {
    let results = vec![ok_leg("users", 200, r#"{"a":1}"#), ok_leg("profiles", 200, r#"{"b":2}"#)];

    let response = merge_responses(&results);
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(body_json(response).await, json!({"a": 1, "b": 2}));
}

#[actix_web::test]
async fn merge_conflicts_last_write_wins_in_list_order() {
    let results = vec![
        ok_leg("first", 200, r#"{"k":"from-first","only_first":1}"#),
        ok_leg("second", 200, r#"{"k":"from-second"}"#),
    ];

    let body = body_json(merge_responses(&results)).await;
    assert_eq!(body["k"], "from-second");
    assert_eq!(body["only_first"], 1);
}

#[actix_web::test]
async fn merge_is_deterministic_for_the_same_inputs() {
    let make = || {
        vec![
            ok_leg("users", 200, r#"{"a":1,"shared":"u"}"#),
            ok_leg("profiles", 200, r#"{"b":2,"shared":"p"}"#),
        ]
    };

    let first = body_json(merge_responses(&make())).await;
    let second = body_json(merge_responses(&make())).await;
    assert_eq!(first, second);
    assert_eq!(first["shared"], "p");
}

#[actix_web::test]
async fn merge_marks_failed_legs() {
    let results = vec![
        ok_leg("users", 200, r#"{"a":1}"#),
        ok_leg("billing", 503, r#"{"error":"down"}"#),
        failed_leg("audit"),
    ];

    let body = body_json(merge_responses(&results)).await;
    assert_eq!(body["a"], 1);
    assert_eq!(body["billing"], json!({"error": true, "statusCode": 503}));
    assert_eq!(body["audit"], json!({"error": true, "statusCode": 502}));
}

#[actix_web::test]
async fn merge_skips_non_object_json() {
    let results =
        vec![ok_leg("users", 200, r#"{"a":1}"#), ok_leg("list", 200, r#"[1,2,3]"#)];

    let body = body_json(merge_responses(&results)).await;
    assert_eq!(body, json!({"a": 1}));
}

#[actix_web::test]
async fn select_returns_first_success() {
    let results = vec![
        ok_leg("down", 500, r#"{"error":"boom"}"#),
        ok_leg("up", 200, r#"{"ok":true}"#),
        ok_leg("other", 200, r#"{"other":true}"#),
    ];

    let response = select_response(&results);
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(body_json(response).await, json!({"ok": true}));
}

#[actix_web::test]
async fn select_falls_back_to_last_response() {
    let results =
        vec![ok_leg("a", 500, r#"{"error":"a"}"#), ok_leg("b", 404, r#"{"error":"b"}"#)];

    let response = select_response(&results);
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(body_json(response).await, json!({"error": "b"}));
}

#[actix_web::test]
async fn append_concatenates_arrays_in_list_order() {
    let results = vec![
        ok_leg("first", 200, r#"[1,2]"#),
        failed_leg("broken"),
        ok_leg("second", 200, r#"[3]"#),
    ];

    let response = append_responses(&results);
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(body_json(response).await, json!([1, 2, 3]));
}

#[actix_web::test]
async fn append_skips_non_array_legs() {
    let results =
        vec![ok_leg("arr", 200, r#"[1]"#), ok_leg("obj", 200, r#"{"not":"array"}"#)];

    assert_eq!(body_json(append_responses(&results)).await, json!([1]));
}
