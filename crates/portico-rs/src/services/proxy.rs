//! Per-backend reverse-proxy pipeline.
//!
//! A [`BackendProxy`] owns everything needed to forward a request to one
//! upstream: the parsed base URL and the backend's rewrite configuration,
//! plus a clone of the gateway's shared pooled HTTP client. The director
//! steps run on every outbound request: path rewriting (strip prefix,
//! prepend prefix, first matching glob rule), query merging, Host-header
//! handling, and set/remove header rules — with a matched per-endpoint
//! override fully superseding the backend-level rule of the same kind.

use crate::models::error::GatewayError;
use crate::models::settings::{BackendConfig, EndpointConfig, HostnameHandling};
use crate::utils::{path, pattern};
use actix_web::http::StatusCode as ActixStatusCode;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::{Client, Method, Url};
use std::time::Duration;

/// Hop-by-hop and proxy-management headers never forwarded upstream.
const SKIP_REQUEST_HEADERS: &[&str] = &["host", "connection", "upgrade", "proxy-connection", "keep-alive", "te", "trailer"];

/// Headers stripped from upstream responses; the server recomputes framing.
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length"];

/// The outbound-relevant pieces of an inbound request, extracted once and
/// shared by every dispatch leg (plain, dry-run, composite).
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub original_host: Option<String>,
    pub tenant: Option<String>,
}

impl RequestParts {
    /// Extracts and converts the inbound request, filtering hop-by-hop
    /// headers. Invalid header names or values are silently skipped.
    pub fn from_request(req: &HttpRequest, tenant: Option<String>) -> Self {
        let mut headers = HeaderMap::with_capacity(req.headers().len());
        for (key, value) in req.headers() {
            let key_str = key.as_str();
            if SKIP_REQUEST_HEADERS.iter().any(|skip| key_str.eq_ignore_ascii_case(skip)) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_ref()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }

        let original_host = req
            .headers()
            .get(actix_web::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            method: convert_method(req.method()),
            path: req.path().to_string(),
            query: req.query_string().to_string(),
            headers,
            original_host,
            tenant,
        }
    }
}

fn convert_method(method: &actix_web::http::Method) -> Method {
    match *method {
        actix_web::http::Method::GET => Method::GET,
        actix_web::http::Method::POST => Method::POST,
        actix_web::http::Method::PUT => Method::PUT,
        actix_web::http::Method::DELETE => Method::DELETE,
        actix_web::http::Method::HEAD => Method::HEAD,
        actix_web::http::Method::OPTIONS => Method::OPTIONS,
        actix_web::http::Method::CONNECT => Method::CONNECT,
        actix_web::http::Method::PATCH => Method::PATCH,
        actix_web::http::Method::TRACE => Method::TRACE,
        _ => Method::GET,
    }
}

/// A fully-buffered upstream response, used by the composite combiner, the
/// dry-run comparator, and the response cache.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Buffers an upstream response, reading the body chunkwise and stopping
    /// at `max_size` bytes so an oversized upstream cannot exhaust memory.
    pub async fn capture(
        backend: &str,
        response: reqwest::Response,
        max_size: usize,
    ) -> Result<Self, GatewayError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Upstream {
                backend: backend.to_string(),
                message: format!("failed to read response body: {}", e),
            })?;
            let remaining = max_size - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Self { status, headers, body: Bytes::from(body) })
    }

    /// Rebuilds a client-facing response from the captured data.
    pub fn to_http_response(&self) -> HttpResponse {
        let status =
            ActixStatusCode::from_u16(self.status).unwrap_or(ActixStatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        for (key, value) in &self.headers {
            if SKIP_RESPONSE_HEADERS.iter().any(|skip| key.eq_ignore_ascii_case(skip)) {
                continue;
            }
            builder.insert_header((key.as_str(), value.as_str()));
        }
        builder.body(self.body.clone())
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Streams an upstream response straight through to the client without
/// buffering the body.
pub fn stream_response(upstream: reqwest::Response) -> HttpResponse {
    let status =
        ActixStatusCode::from_u16(upstream.status().as_u16()).unwrap_or(ActixStatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (key, value) in upstream.headers() {
        if SKIP_RESPONSE_HEADERS.iter().any(|skip| key.as_str().eq_ignore_ascii_case(skip)) {
            continue;
        }
        if let Ok(header_value) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
        {
            builder.insert_header((key.as_str(), header_value));
        }
    }
    builder.streaming(upstream.bytes_stream())
}

/// Upstream forwarder for a single backend.
///
/// Proxies are built at module init (and per tenant registration when a
/// tenant overrides a backend) and are immutable afterwards; the routing
/// engine re-resolves which proxy serves a request on every call, so
/// tenant-specific rewrites never leak across tenants.
#[derive(Debug, Clone)]
pub struct BackendProxy {
    id: String,
    base_url: Url,
    config: BackendConfig,
    client: Client,
}

impl BackendProxy {
    /// Builds a proxy for a backend id from its effective configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the base URL does not parse.
    pub fn new(
        id: &str,
        url: &str,
        config: BackendConfig,
        client: Client,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(url).map_err(|e| {
            GatewayError::Config(format!("backend '{}': invalid base URL '{}': {}", id, url, e))
        })?;
        Ok(Self { id: id.to_string(), base_url, config, client })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Applies the director's path steps and selects the per-endpoint
    /// override, returning the rewritten path and the matched endpoint.
    ///
    /// Endpoint overrides are matched against the stripped request path, in
    /// configuration order. A matched endpoint that carries its own
    /// path-rewriting block fully supersedes the backend-level block, so the
    /// rewrite restarts from the original path using the endpoint's rules.
    pub fn rewrite_path(&self, request_path: &str) -> (String, Option<&EndpointConfig>) {
        let backend_rules = self.config.path_rewriting.as_ref();

        let stripped = match backend_rules {
            Some(rules) => path::strip_base_path(request_path, &rules.strip_base_path),
            None => request_path.to_string(),
        };

        let endpoint = self
            .config
            .endpoints
            .iter()
            .find(|ep| pattern::glob_match(&ep.pattern, &stripped));

        let rules = endpoint
            .and_then(|ep| ep.path_rewriting.as_ref())
            .or(backend_rules);

        let Some(rules) = rules else {
            return (stripped, endpoint);
        };

        let mut rewritten = path::strip_base_path(request_path, &rules.strip_base_path);
        rewritten = path::prepend_base_path(&rewritten, &rules.base_path_rewrite);
        for rule in &rules.endpoint_rewrites {
            if let Some(out) = pattern::rewrite(&rule.pattern, &rule.replacement, &rewritten) {
                rewritten = out;
                break;
            }
        }

        (rewritten, endpoint)
    }

    /// Builds the upstream URL: base scheme/host, base path joined with the
    /// rewritten path, base query merged with the request query.
    pub fn target_url(&self, rewritten_path: &str, request_query: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        if base_path.is_empty() {
            url.set_path(rewritten_path);
        } else {
            url.set_path(&format!("{}{}", base_path, rewritten_path));
        }
        url.set_query(path::merge_query(self.base_url.query(), request_query).as_deref());
        url
    }

    /// Applies Host-header handling and set/remove header rules. A matched
    /// endpoint's header block fully supersedes the backend-level block.
    pub fn shape_headers(
        &self,
        endpoint: Option<&EndpointConfig>,
        headers: &mut HeaderMap,
        original_host: Option<&str>,
    ) {
        let rules = endpoint
            .and_then(|ep| ep.header_rewriting.as_ref())
            .or(self.config.header_rewriting.as_ref());

        let handling = rules.map(|r| r.hostname_handling).unwrap_or_default();
        match handling {
            HostnameHandling::PreserveOriginal => {
                if let Some(host) = original_host {
                    if let Ok(value) = HeaderValue::from_str(host) {
                        headers.insert(HOST, value);
                    }
                }
            }
            // reqwest derives Host from the target URL when unset.
            HostnameHandling::UseBackend => {
                headers.remove(HOST);
            }
            HostnameHandling::UseCustom => {
                if let Some(rules) = rules {
                    if let Ok(value) = HeaderValue::from_str(&rules.custom_hostname) {
                        headers.insert(HOST, value);
                    }
                }
            }
        }

        if let Some(rules) = rules {
            for (name, value) in &rules.set_headers {
                if let (Ok(name), Ok(value)) =
                    (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
                {
                    headers.insert(name, value);
                }
            }
            for name in &rules.remove_headers {
                if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                    headers.remove(name);
                }
            }
        }
    }

    /// Runs the full director pipeline and dispatches the request upstream.
    ///
    /// The returned response has not been read; callers stream it through or
    /// capture it. Transport errors map to 502, deadline expiry to 504.
    pub async fn forward(
        &self,
        parts: &RequestParts,
        body: Bytes,
        timeout: Duration,
    ) -> Result<reqwest::Response, GatewayError> {
        let (rewritten, endpoint) = self.rewrite_path(&parts.path);
        let url = self.target_url(&rewritten, &parts.query);

        let mut headers = parts.headers.clone();
        self.shape_headers(endpoint, &mut headers, parts.original_host.as_deref());

        debug!("forwarding {} {} to {}", parts.method, parts.path, url);

        let mut request = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers)
            .timeout(timeout);
        if !body.is_empty() {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&self.id, e, timeout))
    }
}
