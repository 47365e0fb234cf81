//! Composite routes: concurrent fan-out with strategy-based combination.
//!
//! A composite route dispatches the inbound request to every backend in its
//! list concurrently, waits for all legs (bounded by the stricter of the
//! per-route and global timeouts), and combines the buffered responses with
//! the route's strategy. Legs are collected in completion order but always
//! combined in backend-list order, so combination is deterministic.

use crate::models::error::GatewayError;
use crate::models::settings::{CompositeRoute, CompositeStrategy};
use crate::services::proxy::{BackendProxy, CapturedResponse, RequestParts};
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use ahash::HashMap as AHashMap;
use futures::future::join_all;
use log::warn;
use serde_json::{json, Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Byte cap on buffered composite leg bodies.
const MAX_COMPOSITE_BODY: usize = 4 * 1024 * 1024;

/// One leg of a composite dispatch, in backend-list order.
#[derive(Debug)]
pub struct BackendResult {
    pub backend: String,
    pub result: Result<CapturedResponse, GatewayError>,
}

/// Transformer invoked for `custom`-strategy routes, registered per route
/// pattern at endpoint registration.
pub type CompositeTransformer =
    Arc<dyn Fn(&[BackendResult]) -> Result<HttpResponse, GatewayError> + Send + Sync>;

/// Fan-out dispatcher and combiner for composite routes.
pub struct CompositeHandler {
    transformers: RwLock<AHashMap<String, CompositeTransformer>>,
}

impl Default for CompositeHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeHandler {
    pub fn new() -> Self {
        Self { transformers: RwLock::new(AHashMap::default()) }
    }

    /// Registers the transformer for a `custom`-strategy route pattern.
    pub fn register_transformer(&self, pattern: &str, transformer: CompositeTransformer) {
        self.transformers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pattern.to_string(), transformer);
    }

    /// Dispatches one request to every backend of the route and combines the
    /// responses.
    ///
    /// Every leg gets the same method, rewritten path, query, and body. The
    /// per-leg deadline is the stricter of the route timeout and
    /// `request_timeout`. A failed leg reaches the combiner as an error
    /// entry; the strategy decides the partial-result policy.
    pub async fn handle(
        &self,
        pattern: &str,
        route: &CompositeRoute,
        parts: &RequestParts,
        body: Bytes,
        proxies: Vec<(String, Option<Arc<BackendProxy>>)>,
        request_timeout: Duration,
    ) -> HttpResponse {
        let leg_timeout = if route.timeout > 0 {
            request_timeout.min(Duration::from_secs(route.timeout))
        } else {
            request_timeout
        };

        let legs = proxies.into_iter().map(|(backend, proxy)| {
            let parts = parts.clone();
            let body = body.clone();
            async move {
                let result = match proxy {
                    Some(proxy) => match proxy.forward(&parts, body, leg_timeout).await {
                        Ok(response) => {
                            CapturedResponse::capture(&backend, response, MAX_COMPOSITE_BODY).await
                        }
                        Err(e) => Err(e),
                    },
                    None => Err(GatewayError::BackendNotFound { backend: backend.clone() }),
                };
                BackendResult { backend, result }
            }
        });

        // join_all returns results in backend-list order regardless of
        // completion order.
        let results = join_all(legs).await;

        match route.strategy {
            CompositeStrategy::Merge => merge_responses(&results),
            CompositeStrategy::Select => select_response(&results),
            CompositeStrategy::Append => append_responses(&results),
            CompositeStrategy::Custom => self.custom_response(pattern, &results),
        }
    }

    fn custom_response(&self, pattern: &str, results: &[BackendResult]) -> HttpResponse {
        let transformer = {
            let map = self.transformers.read().unwrap_or_else(|e| e.into_inner());
            map.get(pattern).cloned()
        };
        match transformer {
            Some(transformer) => transformer(results).unwrap_or_else(|e| {
                use actix_web::error::ResponseError;
                e.error_response()
            }),
            None => {
                warn!("composite route '{}' has no registered transformer", pattern);
                HttpResponse::InternalServerError().json(json!({
                    "error": "No transformer registered for composite route",
                    "type": "config"
                }))
            }
        }
    }
}

/// `merge`: union the top-level keys of every successful JSON object
/// response in backend-list order, last-write-wins. Failed legs contribute
/// `{"<backend>": {"error": true, "statusCode": N}}`; non-object bodies are
/// skipped with a warning.
pub fn merge_responses(results: &[BackendResult]) -> HttpResponse {
    let mut merged = Map::new();

    for leg in results {
        match &leg.result {
            Ok(captured) if captured.is_success() => {
                match serde_json::from_slice::<Value>(&captured.body) {
                    Ok(Value::Object(object)) => {
                        for (key, value) in object {
                            merged.insert(key, value);
                        }
                    }
                    Ok(_) => {
                        warn!("composite merge: backend '{}' returned non-object JSON, skipped", leg.backend);
                    }
                    Err(e) => {
                        warn!("composite merge: backend '{}' returned invalid JSON, skipped: {}", leg.backend, e);
                    }
                }
            }
            Ok(captured) => {
                merged.insert(
                    leg.backend.clone(),
                    json!({"error": true, "statusCode": captured.status}),
                );
            }
            Err(e) => {
                merged.insert(
                    leg.backend.clone(),
                    json!({"error": true, "statusCode": error_status(e)}),
                );
            }
        }
    }

    HttpResponse::Ok().json(Value::Object(merged))
}

/// `select`: the first leg with status < 400, else the last leg verbatim.
pub fn select_response(results: &[BackendResult]) -> HttpResponse {
    for leg in results {
        if let Ok(captured) = &leg.result {
            if captured.is_success() {
                return captured.to_http_response();
            }
        }
    }

    match results.last() {
        Some(BackendResult { result: Ok(captured), .. }) => captured.to_http_response(),
        Some(BackendResult { result: Err(e), .. }) => {
            use actix_web::error::ResponseError;
            e.error_response()
        }
        None => HttpResponse::BadGateway().json(json!({
            "error": "Composite route produced no responses",
            "type": "upstream"
        })),
    }
}

/// `append`: concatenate the top-level JSON arrays of successful legs in
/// backend-list order; failed or non-array legs are skipped with a warning.
pub fn append_responses(results: &[BackendResult]) -> HttpResponse {
    let mut combined = Vec::new();

    for leg in results {
        match &leg.result {
            Ok(captured) if captured.is_success() => {
                match serde_json::from_slice::<Value>(&captured.body) {
                    Ok(Value::Array(items)) => combined.extend(items),
                    Ok(_) => {
                        warn!("composite append: backend '{}' returned non-array JSON, skipped", leg.backend);
                    }
                    Err(e) => {
                        warn!("composite append: backend '{}' returned invalid JSON, skipped: {}", leg.backend, e);
                    }
                }
            }
            Ok(captured) => {
                warn!("composite append: backend '{}' returned status {}, skipped", leg.backend, captured.status);
            }
            Err(e) => {
                warn!("composite append: backend '{}' failed, skipped: {}", leg.backend, e);
            }
        }
    }

    HttpResponse::Ok().json(Value::Array(combined))
}

fn error_status(error: &GatewayError) -> u16 {
    match error {
        GatewayError::UpstreamTimeout { .. } => 504,
        GatewayError::CircuitOpen { .. } => 503,
        _ => 502,
    }
}
