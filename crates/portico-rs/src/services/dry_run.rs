//! Dry-run dual dispatch and response comparison.
//!
//! A dry-run route sends the same request to two backends, answers the
//! client from the configured leg, and diffs the pair (status, headers,
//! body) in a background task. The comparison never affects the
//! client-facing response: leg errors become fields of the comparison
//! record, the background task is panic-guarded, detached from the client
//! connection, and bounded by twice the request timeout.

use crate::models::settings::DryRunSettings;
use crate::services::proxy::{BackendProxy, CapturedResponse, RequestParts};
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use futures::future::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Value shown for a header present on only one side of a diff.
const MISSING: &str = "<missing>";

/// One leg's outcome, kept cloneable so the response path and the comparison
/// task can share it.
#[derive(Debug, Clone)]
pub struct Leg {
    pub backend: String,
    pub result: Result<CapturedResponse, LegFailure>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LegFailure {
    pub timeout: bool,
    pub message: String,
}

/// Per-leg summary embedded in a comparison record.
#[derive(Debug, Serialize)]
pub struct ResponseInfo {
    pub backend: String,
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Difference between the two legs for one header.
#[derive(Debug, Serialize, PartialEq)]
pub struct HeaderDiff {
    pub primary: String,
    pub secondary: String,
}

/// Result of comparing the two legs of a dry-run dispatch.
#[derive(Debug, Serialize)]
pub struct ComparisonResult {
    pub id: String,
    pub path: String,
    pub tenant: Option<String>,
    pub status_match: bool,
    pub headers_match: bool,
    pub body_match: bool,
    pub header_differences: HashMap<String, HeaderDiff>,
    pub primary: ResponseInfo,
    pub secondary: ResponseInfo,
}

impl ComparisonResult {
    pub fn matches(&self) -> bool {
        self.status_match && self.headers_match && self.body_match
    }
}

/// Dual-dispatch comparator.
pub struct DryRunHandler {
    settings: DryRunSettings,
    request_timeout: Duration,
}

impl DryRunHandler {
    pub fn new(settings: DryRunSettings, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self { settings, request_timeout })
    }

    /// Dispatches the request to both backends concurrently, answers the
    /// client from the configured leg, and spawns the comparison.
    ///
    /// The request body is already fully buffered by the server; it is
    /// capped at `max_response_size` before fan-out so both legs replay the
    /// same bytes.
    pub async fn handle(
        self: &Arc<Self>,
        parts: RequestParts,
        body: Bytes,
        primary: Arc<BackendProxy>,
        secondary: Arc<BackendProxy>,
    ) -> HttpResponse {
        let max_size = self.settings.max_response_size();
        let body = if body.len() > max_size { body.slice(..max_size) } else { body };

        let primary_leg =
            dispatch_leg(primary, parts.clone(), body.clone(), self.request_timeout, max_size)
                .boxed()
                .shared();
        let secondary_leg =
            dispatch_leg(secondary, parts.clone(), body, self.request_timeout, max_size)
                .boxed()
                .shared();

        // Both legs run to completion regardless of the client connection;
        // the comparison needs the slower one too.
        tokio::spawn(primary_leg.clone().map(|_| ()));
        tokio::spawn(secondary_leg.clone().map(|_| ()));

        let selected = if self.settings.return_secondary() {
            secondary_leg.clone().await
        } else {
            primary_leg.clone().await
        };

        self.spawn_comparison(parts, primary_leg, secondary_leg);

        match selected.result {
            Ok(captured) => captured.to_http_response(),
            Err(failure) if failure.timeout => HttpResponse::GatewayTimeout().json(json!({
                "error": format!("Upstream request to {} timed out", selected.backend),
                "type": "timeout"
            })),
            Err(failure) => HttpResponse::BadGateway().json(json!({
                "error": format!("Upstream service error: {}", failure.message),
                "type": "upstream"
            })),
        }
    }

    /// Spawns the detached comparison task: panic-guarded, bounded by twice
    /// the request timeout, never holding the client connection.
    fn spawn_comparison<F>(self: &Arc<Self>, parts: RequestParts, primary: F, secondary: F)
    where
        F: std::future::Future<Output = Leg> + Send + 'static,
    {
        let handler = Arc::clone(self);
        let ceiling = self.request_timeout * 2;

        tokio::spawn(async move {
            let compare = async move {
                let (primary, secondary) = futures::join!(primary, secondary);
                let result = handler.compare(&parts, &primary, &secondary);
                handler.log_result(&result);
            };
            let guarded = AssertUnwindSafe(tokio::time::timeout(ceiling, compare)).catch_unwind();
            match guarded.await {
                Err(_) => error!("dry-run comparison task panicked"),
                Ok(Err(_)) => warn!("dry-run comparison abandoned after {:?}", ceiling),
                Ok(Ok(())) => {}
            }
        });
    }

    /// Compares the two legs: status equality, header equality under the
    /// ignore/compare sets, byte-equal bodies.
    pub fn compare(&self, parts: &RequestParts, primary: &Leg, secondary: &Leg) -> ComparisonResult {
        let (primary_resp, secondary_resp) = (primary.result.as_ref().ok(), secondary.result.as_ref().ok());

        let status_match = match (primary_resp, secondary_resp) {
            (Some(p), Some(s)) => p.status == s.status,
            _ => false,
        };

        let (headers_match, header_differences) = match (primary_resp, secondary_resp) {
            (Some(p), Some(s)) => self.diff_headers(p, s),
            _ => (false, HashMap::new()),
        };

        let body_match = match (primary_resp, secondary_resp) {
            (Some(p), Some(s)) => p.body == s.body,
            _ => false,
        };

        ComparisonResult {
            id: Uuid::new_v4().to_string(),
            path: parts.path.clone(),
            tenant: parts.tenant.clone(),
            status_match,
            headers_match,
            body_match,
            header_differences,
            primary: self.response_info(primary),
            secondary: self.response_info(secondary),
        }
    }

    fn response_info(&self, leg: &Leg) -> ResponseInfo {
        match &leg.result {
            Ok(captured) => ResponseInfo {
                backend: leg.backend.clone(),
                status: Some(captured.status),
                duration_ms: leg.duration_ms,
                error: None,
                body: self
                    .settings
                    .log_responses
                    .then(|| String::from_utf8_lossy(&captured.body).into_owned()),
            },
            Err(failure) => ResponseInfo {
                backend: leg.backend.clone(),
                status: None,
                duration_ms: leg.duration_ms,
                error: Some(failure.message.clone()),
                body: None,
            },
        }
    }

    /// Header comparison after dropping `ignore_headers` and, when
    /// `compare_headers` is non-empty, restricting to that set. Multi-valued
    /// headers compare as comma-joined strings.
    fn diff_headers(
        &self,
        primary: &CapturedResponse,
        secondary: &CapturedResponse,
    ) -> (bool, HashMap<String, HeaderDiff>) {
        let ignore: Vec<String> = self
            .settings
            .ignore_headers()
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        let compare: Vec<String> = self
            .settings
            .compare_headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let relevant = |name: &str| -> bool {
            let name = name.to_ascii_lowercase();
            if ignore.contains(&name) {
                return false;
            }
            compare.is_empty() || compare.contains(&name)
        };

        let collect = |resp: &CapturedResponse| -> BTreeMap<String, String> {
            let mut map: BTreeMap<String, String> = BTreeMap::new();
            for (name, value) in &resp.headers {
                if !relevant(name) {
                    continue;
                }
                map.entry(name.to_ascii_lowercase())
                    .and_modify(|v| {
                        v.push_str(", ");
                        v.push_str(value);
                    })
                    .or_insert_with(|| value.clone());
            }
            map
        };

        let primary_headers = collect(primary);
        let secondary_headers = collect(secondary);

        let mut differences = HashMap::new();
        for name in primary_headers.keys().chain(secondary_headers.keys()) {
            if differences.contains_key(name) {
                continue;
            }
            let p = primary_headers.get(name);
            let s = secondary_headers.get(name);
            if p != s {
                differences.insert(
                    name.clone(),
                    HeaderDiff {
                        primary: p.cloned().unwrap_or_else(|| MISSING.to_string()),
                        secondary: s.cloned().unwrap_or_else(|| MISSING.to_string()),
                    },
                );
            }
        }

        (differences.is_empty(), differences)
    }

    fn log_result(&self, result: &ComparisonResult) {
        let record = serde_json::to_string(result)
            .unwrap_or_else(|e| format!("{{\"error\":\"failed to serialize comparison: {}\"}}", e));
        if result.matches() {
            info!("dry-run comparison matched: {}", record);
        } else {
            warn!(
                "dry-run comparison mismatch (status_match={} headers_match={} body_match={}): {}",
                result.status_match, result.headers_match, result.body_match, record
            );
        }
    }
}

/// Runs one leg: forwards through the proxy and buffers the response.
async fn dispatch_leg(
    proxy: Arc<BackendProxy>,
    parts: RequestParts,
    body: Bytes,
    timeout: Duration,
    max_size: usize,
) -> Leg {
    let started = Instant::now();
    let backend = proxy.id().to_string();

    let result = match proxy.forward(&parts, body, timeout).await {
        Ok(response) => CapturedResponse::capture(&backend, response, max_size)
            .await
            .map_err(|e| LegFailure { timeout: false, message: e.to_string() }),
        Err(e) => {
            let timed_out =
                matches!(e, crate::models::error::GatewayError::UpstreamTimeout { .. });
            Err(LegFailure { timeout: timed_out, message: e.to_string() })
        }
    };

    Leg { backend, result, duration_ms: started.elapsed().as_millis() as u64 }
}
