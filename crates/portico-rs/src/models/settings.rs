//! Configuration tree for the portico gateway.
//!
//! The whole gateway is driven by one [`GatewaySettings`] value. Tenant
//! overlays deserialize into the *same* type; a field the tenant left out
//! shows up as its zero value, which is exactly what the merge rules in
//! [`crate::config::merge`] key on. Process-level defaults (request timeout,
//! tenant header name, metric endpoint, ...) are therefore *not* baked into
//! `serde` defaults — they are applied by the effective accessors
//! ([`GatewaySettings::tenant_header`], [`GatewaySettings::request_timeout`],
//! and friends) so that a merged tree stays distinguishable from an explicit
//! setting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default tenant header consulted when `tenant_id_header` is unset.
pub const DEFAULT_TENANT_HEADER: &str = "X-Tenant-ID";

/// Default metrics exposition endpoint when `metrics_endpoint` is unset.
pub const DEFAULT_METRICS_ENDPOINT: &str = "/metrics";

/// Per-route behaviour overrides keyed by route pattern.
///
/// A route config gates a route behind a feature flag, redirects it to an
/// alternative backend when the flag is off, or turns the route into a
/// dry-run pair that dispatches to two backends and compares the responses.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RouteConfig {
    /// Feature flag consulted before routing. Empty means "always on".
    #[serde(default)]
    pub feature_flag_id: String,

    /// Backend used when the feature flag evaluates to false.
    #[serde(default)]
    pub alternative_backend: String,

    /// When true the request is dispatched to both the primary and the
    /// comparison backend and the responses are diffed asynchronously.
    #[serde(default)]
    pub dry_run: bool,

    /// Comparison backend for dry-run routes. Empty selects the "other"
    /// backend of the flag decision.
    #[serde(default)]
    pub dry_run_backend: String,

    /// Per-route timeout in seconds. Zero inherits the global request timeout.
    #[serde(default)]
    pub timeout: u64,
}

/// A single glob rewrite rule: `pattern` → `replacement`.
///
/// Wildcard tails carry over: pattern `/legacy/*` with replacement `/v2/*`
/// maps `/legacy/users/1` to `/v2/users/1`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

/// Path rewriting applied by a backend's director before dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PathRewritingConfig {
    /// Prefix removed from the request path when present.
    #[serde(default)]
    pub strip_base_path: String,

    /// Prefix prepended after stripping.
    #[serde(default)]
    pub base_path_rewrite: String,

    /// Ordered glob rewrite rules; the first matching rule wins.
    #[serde(default)]
    pub endpoint_rewrites: Vec<RewriteRule>,
}

/// How the upstream `Host` header is derived.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HostnameHandling {
    /// Forward the client's original Host header (default).
    #[default]
    PreserveOriginal,
    /// Use the backend base URL's host.
    UseBackend,
    /// Use `custom_hostname` verbatim.
    UseCustom,
}

/// Header rewriting applied by a backend's director before dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HeaderRewritingConfig {
    #[serde(default)]
    pub hostname_handling: HostnameHandling,

    /// Hostname used with [`HostnameHandling::UseCustom`].
    #[serde(default)]
    pub custom_hostname: String,

    /// Headers set (overwriting) on the outbound request.
    #[serde(default)]
    pub set_headers: HashMap<String, String>,

    /// Headers removed from the outbound request.
    #[serde(default)]
    pub remove_headers: Vec<String>,
}

/// Per-endpoint override inside a backend config.
///
/// Endpoint overrides are kept as an ordered list so "scanned in
/// configuration order, first match wins" is deterministic. A matched
/// endpoint's path/header rules fully supersede the backend-level rules of
/// the same kind for that request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EndpointConfig {
    /// Stable key for logs and debug snapshots.
    #[serde(default)]
    pub name: String,

    /// Glob pattern matched against the rewritten request path.
    pub pattern: String,

    #[serde(default)]
    pub path_rewriting: Option<PathRewritingConfig>,

    #[serde(default)]
    pub header_rewriting: Option<HeaderRewritingConfig>,
}

/// Full backend description, extending the bare `backend_services` URL map.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BackendConfig {
    /// Upstream base URL. May be empty in the global config when a tenant
    /// supplies the URL for this backend id.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub path_rewriting: Option<PathRewritingConfig>,

    #[serde(default)]
    pub header_rewriting: Option<HeaderRewritingConfig>,

    /// Ordered per-endpoint overrides.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Feature flag gating this backend wherever it is routed to.
    #[serde(default)]
    pub feature_flag_id: String,

    /// Backend used when `feature_flag_id` evaluates to false.
    #[serde(default)]
    pub alternative_backend: String,
}

/// Strategy used by a composite route to combine backend responses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    /// Union the top-level keys of every successful JSON object response,
    /// last-write-wins in backend-list order.
    #[default]
    Merge,
    /// Return the first response with status < 400, else the last response.
    Select,
    /// Concatenate the top-level JSON arrays in backend-list order.
    Append,
    /// Invoke a transformer registered for this route pattern.
    Custom,
}

/// A route whose handling fans out to several backends.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CompositeRoute {
    /// Backend ids contacted concurrently, in combination order.
    #[serde(default)]
    pub backends: Vec<String>,

    #[serde(default)]
    pub strategy: CompositeStrategy,

    /// Feature flag gating the fan-out. When false the request is routed to
    /// `alternative_backend` as a plain single-backend request.
    #[serde(default)]
    pub feature_flag_id: String,

    #[serde(default)]
    pub alternative_backend: String,

    /// Per-route timeout in seconds; the stricter of this and the global
    /// request timeout bounds every leg. Zero inherits the global timeout.
    #[serde(default)]
    pub timeout: u64,
}

/// Circuit breaker thresholds, globally or per backend.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CircuitBreakerSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive failures that open the circuit. Zero inherits 5.
    #[serde(default)]
    pub failure_threshold: u64,

    /// Consecutive half-open successes that close the circuit. Zero inherits 2.
    #[serde(default)]
    pub success_threshold: u64,

    /// Seconds an open circuit waits before admitting half-open probes.
    /// Zero inherits 30.
    #[serde(default)]
    pub open_timeout: u64,

    /// Concurrent requests admitted while half-open. Zero inherits 1.
    #[serde(default)]
    pub half_open_allowed_requests: u32,

    /// Size of the sliding outcome window. Zero disables rate-based opening.
    #[serde(default)]
    pub window_size: usize,

    /// Minimum success rate over a full window; below it the circuit opens.
    /// Zero disables rate-based opening.
    #[serde(default)]
    pub success_rate_threshold: f64,
}

impl CircuitBreakerSettings {
    pub fn failure_threshold(&self) -> u64 {
        if self.failure_threshold == 0 { 5 } else { self.failure_threshold }
    }

    pub fn success_threshold(&self) -> u64 {
        if self.success_threshold == 0 { 2 } else { self.success_threshold }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(if self.open_timeout == 0 { 30 } else { self.open_timeout })
    }

    pub fn half_open_allowed_requests(&self) -> u32 {
        if self.half_open_allowed_requests == 0 { 1 } else { self.half_open_allowed_requests }
    }
}

/// Per-backend health check overrides.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PerBackendHealthCheck {
    /// Probe interval in seconds. Zero inherits the global interval.
    #[serde(default)]
    pub interval: u64,

    /// Probe timeout in seconds. Zero inherits the global timeout.
    #[serde(default)]
    pub timeout: u64,

    /// Statuses counted as healthy. Empty inherits the global set.
    #[serde(default)]
    pub expected_status_codes: Vec<u16>,
}

/// Health checker configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HealthCheckSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Probe interval in seconds. Zero inherits 30.
    #[serde(default)]
    pub interval: u64,

    /// Per-probe timeout in seconds. Zero inherits 5.
    #[serde(default)]
    pub timeout: u64,

    /// Statuses counted as healthy. Empty inherits `[200]`.
    #[serde(default)]
    pub expected_status_codes: Vec<u16>,

    /// Per-backend probe URL overrides: a path is joined onto the backend
    /// base URL, an absolute URL is probed as-is. A backend without an entry
    /// is probed at its base URL.
    #[serde(default)]
    pub health_endpoints: HashMap<String, String>,

    /// Seconds of recent live traffic that suppress a probe. Zero inherits 60.
    #[serde(default)]
    pub recent_request_threshold: u64,

    #[serde(default)]
    pub per_backend: HashMap<String, PerBackendHealthCheck>,
}

impl HealthCheckSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(if self.interval == 0 { 30 } else { self.interval })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(if self.timeout == 0 { 5 } else { self.timeout })
    }

    pub fn expected_status_codes(&self) -> Vec<u16> {
        if self.expected_status_codes.is_empty() {
            vec![200]
        } else {
            self.expected_status_codes.clone()
        }
    }

    pub fn recent_request_threshold(&self) -> Duration {
        Duration::from_secs(if self.recent_request_threshold == 0 {
            60
        } else {
            self.recent_request_threshold
        })
    }
}

/// Dry-run comparator configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DryRunSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Capture response payloads in comparison log records.
    #[serde(default)]
    pub log_responses: bool,

    /// Byte cap on buffered request and response bodies. Zero inherits 1 MiB.
    #[serde(default)]
    pub max_response_size: usize,

    /// When non-empty, header comparison is restricted to this set.
    #[serde(default)]
    pub compare_headers: Vec<String>,

    /// Headers excluded from comparison. Empty inherits
    /// `Date`, `X-Request-ID`, `X-Trace-ID`.
    #[serde(default)]
    pub ignore_headers: Vec<String>,

    /// Which leg answers the client: `primary` (default) or `secondary`.
    #[serde(default)]
    pub default_response_backend: String,
}

impl DryRunSettings {
    pub fn max_response_size(&self) -> usize {
        if self.max_response_size == 0 { 1024 * 1024 } else { self.max_response_size }
    }

    pub fn ignore_headers(&self) -> Vec<String> {
        if self.ignore_headers.is_empty() {
            vec!["Date".to_string(), "X-Request-ID".to_string(), "X-Trace-ID".to_string()]
        } else {
            self.ignore_headers.clone()
        }
    }

    pub fn return_secondary(&self) -> bool {
        self.default_response_backend.eq_ignore_ascii_case("secondary")
    }
}

/// Built-in feature flag configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureFlagSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Flag id → value. Tenant maps override the global map per flag id.
    #[serde(default)]
    pub flags: HashMap<String, bool>,
}

/// The complete gateway configuration tree.
///
/// Global and tenant configurations are both represented by this type; see
/// the module docs for the zero-value convention and
/// [`crate::config::merge::merge_tenant`] for the precedence rules.
///
/// # Configuration file format
///
/// ```json
/// {
///   "backend_services": { "api": "http://api.internal:8080" },
///   "routes": { "/api/*": "api" },
///   "default_backend": "api",
///   "tenant_id_header": "X-Tenant-ID",
///   "circuit_breaker": { "enabled": true, "failure_threshold": 3 },
///   "health_check": { "enabled": true, "interval": 15 }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GatewaySettings {
    /// Backend id → base URL.
    #[serde(default)]
    pub backend_services: HashMap<String, String>,

    /// Route pattern → backend id.
    #[serde(default)]
    pub routes: HashMap<String, String>,

    /// Route pattern → per-route behaviour overrides.
    #[serde(default)]
    pub route_configs: HashMap<String, RouteConfig>,

    /// Backend id serving the catch-all.
    #[serde(default)]
    pub default_backend: String,

    /// Backend id → full backend description.
    #[serde(default)]
    pub backend_configs: HashMap<String, BackendConfig>,

    /// Route pattern → composite fan-out definition.
    #[serde(default)]
    pub composite_routes: HashMap<String, CompositeRoute>,

    /// Header carrying the tenant id. Empty inherits `X-Tenant-ID`.
    #[serde(default)]
    pub tenant_id_header: String,

    /// Reject requests without a tenant header with 400.
    #[serde(default)]
    pub require_tenant_id: bool,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Backend id → breaker threshold overrides.
    #[serde(default)]
    pub backend_circuit_breakers: HashMap<String, CircuitBreakerSettings>,

    #[serde(default)]
    pub health_check: HealthCheckSettings,

    #[serde(default)]
    pub dry_run: DryRunSettings,

    #[serde(default)]
    pub feature_flags: FeatureFlagSettings,

    /// Enable the response cache for GET requests.
    #[serde(default)]
    pub cache_enabled: bool,

    /// Cache entry TTL in seconds. Zero inherits 60 when caching is enabled.
    #[serde(default)]
    pub cache_ttl: u64,

    /// Upstream request timeout in seconds. Zero inherits 10.
    #[serde(default)]
    pub request_timeout: u64,

    #[serde(default)]
    pub metrics_enabled: bool,

    /// Metrics exposition path. Empty inherits `/metrics`.
    #[serde(default)]
    pub metrics_endpoint: String,

    /// Expose `/debug/*` JSON snapshots of internal state.
    #[serde(default)]
    pub debug_endpoints: bool,
}

impl GatewaySettings {
    /// Effective tenant header name.
    pub fn tenant_header(&self) -> &str {
        if self.tenant_id_header.is_empty() {
            DEFAULT_TENANT_HEADER
        } else {
            &self.tenant_id_header
        }
    }

    /// Effective upstream request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(if self.request_timeout == 0 { 10 } else { self.request_timeout })
    }

    /// Effective cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(if self.cache_ttl == 0 { 60 } else { self.cache_ttl })
    }

    /// Effective metrics exposition path.
    pub fn metrics_endpoint(&self) -> &str {
        if self.metrics_endpoint.is_empty() {
            DEFAULT_METRICS_ENDPOINT
        } else {
            &self.metrics_endpoint
        }
    }

    /// The effective base URL for a backend id: the `backend_configs` URL
    /// when non-empty, else the `backend_services` entry.
    pub fn backend_url(&self, id: &str) -> Option<&str> {
        if let Some(cfg) = self.backend_configs.get(id) {
            if !cfg.url.is_empty() {
                return Some(&cfg.url);
            }
        }
        self.backend_services.get(id).map(String::as_str).filter(|u| !u.is_empty())
    }

    /// All backend ids known to this configuration, from either map.
    pub fn backend_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .backend_services
            .keys()
            .chain(self.backend_configs.keys())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Breaker settings for a backend: the per-backend override when present,
    /// else the global block.
    pub fn breaker_settings(&self, id: &str) -> &CircuitBreakerSettings {
        self.backend_circuit_breakers.get(id).unwrap_or(&self.circuit_breaker)
    }
}
