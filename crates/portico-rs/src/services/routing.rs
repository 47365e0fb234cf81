//! The routing engine: tenant resolution, route lookup, flag gating, and
//! dispatch.
//!
//! Every inbound request lands here from the catch-all handler. The engine
//! excludes reserved ingress paths, resolves the tenant and its merged
//! configuration, finds the route (exact route > glob route > composite >
//! default backend), applies the route's feature-flag and dry-run settings,
//! and dispatches through the backend's breaker-wrapped proxy, the composite
//! handler, or the dry-run comparator. Outbound traffic is reported to the
//! health checker so live requests suppress redundant probes.

use crate::config::merge::merge_tenant;
use crate::config::validation::ConfigValidator;
use crate::models::error::GatewayError;
use crate::models::settings::{CompositeRoute, GatewaySettings, RouteConfig};
use crate::routes::metrics::MetricsCollector;
use crate::services::cache::{CacheLookup, ResponseCache};
use crate::services::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitSnapshot, CircuitState,
};
use crate::services::composite::{CompositeHandler, CompositeTransformer};
use crate::services::dry_run::DryRunHandler;
use crate::services::flags::FeatureFlagEvaluator;
use crate::services::health::HealthChecker;
use crate::services::proxy::{stream_response, BackendProxy, CapturedResponse, RequestParts};
use crate::utils::pattern;
use actix_web::error::ResponseError;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use ahash::HashMap as AHashMap;
use log::{debug, info, warn};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Byte cap on responses buffered for the cache.
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;

/// Outcome of route lookup against an effective configuration.
enum RouteTarget {
    Backend { backend: String, pattern: Option<String> },
    Composite { pattern: String, route: CompositeRoute },
}

/// Central request dispatcher.
///
/// Built once at module init from the global configuration; tenant overlays
/// are merged in as tenants register. Proxy and breaker maps are effectively
/// read-only after start — tenant registration and removal are the only
/// writers, each under the module-level write lock of the respective map.
pub struct RoutingEngine {
    global: Arc<GatewaySettings>,
    /// Merged effective configurations, one per registered tenant.
    merged: RwLock<AHashMap<String, Arc<GatewaySettings>>>,
    /// Proxies built from the global configuration, keyed by backend id.
    proxies: RwLock<AHashMap<String, Arc<BackendProxy>>>,
    /// Tenant-specific proxies for backends a tenant overrides, keyed by
    /// (tenant id, backend id).
    tenant_proxies: RwLock<AHashMap<(String, String), Arc<BackendProxy>>>,
    /// One breaker per backend id.
    breakers: RwLock<AHashMap<String, Arc<CircuitBreaker>>>,
    composite: CompositeHandler,
    dry_run: Option<Arc<DryRunHandler>>,
    flags: RwLock<Option<Arc<dyn FeatureFlagEvaluator>>>,
    health: RwLock<Option<Arc<HealthChecker>>>,
    cache: Option<ResponseCache>,
    metrics: MetricsCollector,
    client: Client,
}

impl RoutingEngine {
    /// Builds the engine from a validated global configuration: proxies for
    /// every backend with a non-empty URL, breakers where enabled, the
    /// composite handler, the dry-run comparator, and the response cache.
    pub fn new(
        global: GatewaySettings,
        client: Client,
        metrics: MetricsCollector,
    ) -> Result<Self, GatewayError> {
        let mut proxies = AHashMap::default();
        for id in global.backend_ids() {
            if let Some(url) = global.backend_url(&id) {
                let config = global.backend_configs.get(&id).cloned().unwrap_or_default();
                let proxy = BackendProxy::new(&id, url, config, client.clone())?;
                proxies.insert(id.clone(), Arc::new(proxy));
            }
        }

        let dry_run = global
            .dry_run
            .enabled
            .then(|| DryRunHandler::new(global.dry_run.clone(), global.request_timeout()));

        let cache = global.cache_enabled.then(|| ResponseCache::new(global.cache_ttl()));

        let engine = Self {
            global: Arc::new(global),
            merged: RwLock::new(AHashMap::default()),
            proxies: RwLock::new(proxies),
            tenant_proxies: RwLock::new(AHashMap::default()),
            breakers: RwLock::new(AHashMap::default()),
            composite: CompositeHandler::new(),
            dry_run,
            flags: RwLock::new(None),
            health: RwLock::new(None),
            cache,
            metrics,
            client,
        };

        for id in engine.global.backend_ids() {
            if engine.global.breaker_settings(&id).enabled {
                engine.breaker(&id, &engine.global);
            }
        }

        Ok(engine)
    }

    pub fn global_config(&self) -> Arc<GatewaySettings> {
        Arc::clone(&self.global)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Installs a feature flag evaluator. The engine falls back to the
    /// merged flag maps (and finally to "enabled") when none is installed.
    pub fn set_flag_evaluator(&self, evaluator: Arc<dyn FeatureFlagEvaluator>) {
        *self.flags.write().unwrap_or_else(|e| e.into_inner()) = Some(evaluator);
    }

    pub fn flag_evaluator(&self) -> Option<Arc<dyn FeatureFlagEvaluator>> {
        self.flags.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_health_checker(&self, checker: Arc<HealthChecker>) {
        *self.health.write().unwrap_or_else(|e| e.into_inner()) = Some(checker);
    }

    /// Registers the transformer for a `custom`-strategy composite route.
    pub fn register_transformer(&self, pattern: &str, transformer: CompositeTransformer) {
        self.composite.register_transformer(pattern, transformer);
    }

    /// Merges and installs a tenant overlay, building proxies for every
    /// backend the tenant overrides or adds.
    pub fn register_tenant(
        &self,
        tenant: &str,
        overlay: GatewaySettings,
    ) -> Result<(), GatewayError> {
        let effective = merge_tenant(&self.global, &overlay);

        let result = ConfigValidator::validate(&effective);
        if !result.is_valid() {
            return Err(GatewayError::Config(format!(
                "tenant '{}' configuration invalid: {}",
                tenant,
                result.errors.join("; ")
            )));
        }

        {
            let mut tenant_proxies =
                self.tenant_proxies.write().unwrap_or_else(|e| e.into_inner());
            for id in effective.backend_ids() {
                let Some(url) = effective.backend_url(&id) else { continue };
                let config = effective.backend_configs.get(&id).cloned().unwrap_or_default();

                let differs = match self.proxies.read().unwrap_or_else(|e| e.into_inner()).get(&id)
                {
                    Some(existing) => {
                        existing.base_url().as_str().trim_end_matches('/')
                            != url.trim_end_matches('/')
                            || self.global.backend_configs.get(&id) != effective.backend_configs.get(&id)
                    }
                    None => true,
                };
                if differs {
                    let proxy = BackendProxy::new(&id, url, config, self.client.clone())?;
                    tenant_proxies.insert((tenant.to_string(), id.clone()), Arc::new(proxy));
                }

                if effective.breaker_settings(&id).enabled {
                    self.breaker(&id, &effective);
                }
            }
        }

        self.merged
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant.to_string(), Arc::new(effective));

        info!("tenant '{}' registered", tenant);
        Ok(())
    }

    /// Drops a tenant's merged configuration and proxies.
    pub fn remove_tenant(&self, tenant: &str) {
        self.merged.write().unwrap_or_else(|e| e.into_inner()).remove(tenant);
        self.tenant_proxies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(t, _), _| t != tenant);
        info!("tenant '{}' removed", tenant);
    }

    pub fn tenants(&self) -> Vec<String> {
        let merged = self.merged.read().unwrap_or_else(|e| e.into_inner());
        merged.keys().cloned().collect()
    }

    /// The effective configuration for a request: the tenant's merged tree
    /// when the tenant is registered, else the global tree.
    pub fn effective_config(&self, tenant: Option<&str>) -> Arc<GatewaySettings> {
        if let Some(tenant) = tenant {
            let merged = self.merged.read().unwrap_or_else(|e| e.into_inner());
            if let Some(effective) = merged.get(tenant) {
                return Arc::clone(effective);
            }
        }
        Arc::clone(&self.global)
    }

    /// Snapshot of every breaker, keyed by backend id.
    pub fn breaker_snapshots(&self) -> HashMap<String, CircuitSnapshot> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers.iter().map(|(id, b)| (id.clone(), b.snapshot())).collect()
    }

    /// Resets every breaker and clears the response cache. Used by stop.
    pub fn reset(&self) {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        for breaker in breakers.values() {
            breaker.reset();
        }
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Backend id → effective URL for every globally-known backend, the map
    /// the health checker probes.
    pub fn backend_urls(&self) -> HashMap<String, String> {
        self.global
            .backend_ids()
            .into_iter()
            .filter_map(|id| self.global.backend_url(&id).map(|u| (id, u.to_string())))
            .collect()
    }

    /// Handles one inbound request end to end. Always produces a response;
    /// error kinds map to their HTTP statuses via `ResponseError`.
    pub async fn handle(&self, req: &HttpRequest, body: Bytes) -> HttpResponse {
        let started = Instant::now();
        self.metrics.begin_request();

        let response = match self.handle_inner(req, body).await {
            Ok(response) => response,
            Err(error) => {
                self.record_error(&error);
                error.error_response()
            }
        };

        self.metrics.record_request(response.status().as_u16(), started.elapsed());
        self.metrics.end_request();
        response
    }

    async fn handle_inner(
        &self,
        req: &HttpRequest,
        body: Bytes,
    ) -> Result<HttpResponse, GatewayError> {
        let path = req.path().to_string();

        // Reserved ingress paths are never proxied, regardless of tenant or
        // default backend; the router serves them with explicit handlers, so
        // reaching the catch-all means 404.
        if self.is_reserved(&path) {
            return Err(GatewayError::RouteNotFound { path });
        }

        let header_name = self.global.tenant_header().to_string();
        let tenant = req
            .headers()
            .get(header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if self.global.require_tenant_id && tenant.is_none() {
            return Err(GatewayError::TenantMissing { header: header_name });
        }

        let effective = self.effective_config(tenant.as_deref());
        let parts = RequestParts::from_request(req, tenant.clone());

        match self.lookup_route(&effective, &path) {
            Some(RouteTarget::Backend { backend, pattern }) => {
                let route_config = pattern
                    .as_deref()
                    .and_then(|p| effective.route_configs.get(p))
                    .cloned();
                self.dispatch_backend(&effective, &parts, body, backend, route_config).await
            }
            Some(RouteTarget::Composite { pattern: route_pattern, route }) => {
                self.dispatch_composite(&effective, &parts, body, &route_pattern, route).await
            }
            None => Err(GatewayError::RouteNotFound { path }),
        }
    }

    /// Reserved ingress paths: the gateway's own health endpoints, the
    /// metrics endpoint and its health subpath, and the debug scope.
    pub fn is_reserved(&self, path: &str) -> bool {
        if path == "/health" || path == "/health/" {
            return true;
        }
        let metrics_endpoint = self.global.metrics_endpoint();
        path == metrics_endpoint
            || path == format!("{}/health", metrics_endpoint)
            || path == "/debug"
            || path.starts_with("/debug/")
    }

    /// Route lookup order: exact route, longest-matching glob route, exact
    /// composite, longest-matching glob composite, default backend.
    fn lookup_route(&self, effective: &GatewaySettings, path: &str) -> Option<RouteTarget> {
        if let Some(backend) = effective.routes.get(path) {
            return Some(RouteTarget::Backend {
                backend: backend.clone(),
                pattern: Some(path.to_string()),
            });
        }

        if let Some((matched, backend)) = Self::best_glob(&effective.routes, path) {
            return Some(RouteTarget::Backend { backend: backend.clone(), pattern: Some(matched) });
        }

        if let Some(route) = effective.composite_routes.get(path) {
            return Some(RouteTarget::Composite {
                pattern: path.to_string(),
                route: route.clone(),
            });
        }

        if let Some((matched, route)) = Self::best_glob(&effective.composite_routes, path) {
            return Some(RouteTarget::Composite { pattern: matched, route: route.clone() });
        }

        if !effective.default_backend.is_empty() {
            return Some(RouteTarget::Backend {
                backend: effective.default_backend.clone(),
                pattern: None,
            });
        }

        None
    }

    /// The longest (most specific) glob pattern matching the path.
    fn best_glob<'a, V>(map: &'a HashMap<String, V>, path: &str) -> Option<(String, &'a V)> {
        map.iter()
            .filter(|(p, _)| pattern::is_wildcard(p) && pattern::glob_match(p, path))
            .max_by_key(|(p, _)| p.len())
            .map(|(p, v)| (p.clone(), v))
    }

    /// Evaluates a feature flag with default "enabled": an installed
    /// evaluator wins; otherwise the merged flag map decides when the flag
    /// subsystem is enabled; otherwise the flag is on.
    fn flag_enabled(
        &self,
        effective: &GatewaySettings,
        flag_id: &str,
        tenant: Option<&str>,
        path: &str,
    ) -> bool {
        if flag_id.is_empty() {
            return true;
        }
        if let Some(evaluator) = self.flag_evaluator() {
            return evaluator.evaluate_with_default(flag_id, tenant, path, true);
        }
        if effective.feature_flags.enabled {
            return effective.feature_flags.flags.get(flag_id).copied().unwrap_or(true);
        }
        true
    }

    /// Applies route- and backend-level flag gating, dry-run selection, the
    /// response cache, and finally the breaker-wrapped proxy dispatch.
    async fn dispatch_backend(
        &self,
        effective: &Arc<GatewaySettings>,
        parts: &RequestParts,
        body: Bytes,
        routed_backend: String,
        route_config: Option<RouteConfig>,
    ) -> Result<HttpResponse, GatewayError> {
        let tenant = parts.tenant.as_deref();
        let mut backend = routed_backend.clone();
        let mut flag_redirected = false;

        if let Some(rc) = &route_config {
            if !rc.feature_flag_id.is_empty()
                && !self.flag_enabled(effective, &rc.feature_flag_id, tenant, &parts.path)
            {
                backend = if !rc.alternative_backend.is_empty() {
                    rc.alternative_backend.clone()
                } else if !effective.default_backend.is_empty()
                    && effective.default_backend != backend
                {
                    effective.default_backend.clone()
                } else {
                    return Err(GatewayError::NoAlternative { flag: rc.feature_flag_id.clone() });
                };
                flag_redirected = true;
                debug!(
                    "feature flag '{}' off, redirecting {} to backend '{}'",
                    rc.feature_flag_id, parts.path, backend
                );
            }
        }

        // Backend-level gating mirrors the route-level rule, one level deep.
        if let Some(bc) = effective.backend_configs.get(&backend) {
            if !bc.feature_flag_id.is_empty()
                && !self.flag_enabled(effective, &bc.feature_flag_id, tenant, &parts.path)
            {
                if !bc.alternative_backend.is_empty() {
                    backend = bc.alternative_backend.clone();
                } else {
                    return Err(GatewayError::NoAlternative { flag: bc.feature_flag_id.clone() });
                }
            }
        }

        if let Some(rc) = &route_config {
            if rc.dry_run {
                if let Some(response) = self
                    .try_dry_run(effective, parts, &body, rc, &routed_backend, &backend, flag_redirected)
                    .await
                {
                    return Ok(response);
                }
                // Dry-run unavailable: fall back to direct dispatch.
            }
        }

        self.dispatch_single(effective, parts, body, &backend).await
    }

    /// Dry-run selection: the flag decision picks the return backend; the
    /// comparison backend is the configured one or the opposite side of the
    /// flag decision. Returns None when no usable pair exists.
    #[allow(clippy::too_many_arguments)]
    async fn try_dry_run(
        &self,
        effective: &Arc<GatewaySettings>,
        parts: &RequestParts,
        body: &Bytes,
        rc: &RouteConfig,
        routed_backend: &str,
        return_backend: &str,
        flag_redirected: bool,
    ) -> Option<HttpResponse> {
        let handler = self.dry_run.as_ref()?;

        let compare_backend = if !rc.dry_run_backend.is_empty() {
            rc.dry_run_backend.clone()
        } else if flag_redirected {
            routed_backend.to_string()
        } else if !rc.alternative_backend.is_empty() {
            rc.alternative_backend.clone()
        } else {
            warn!("dry-run route {} has no comparison backend, dispatching directly", parts.path);
            return None;
        };

        if compare_backend == return_backend {
            warn!(
                "dry-run route {} compares backend '{}' against itself, dispatching directly",
                parts.path, return_backend
            );
            return None;
        }

        let tenant = parts.tenant.as_deref();
        let primary = self.proxy_for(tenant, return_backend)?;
        let secondary = self.proxy_for(tenant, &compare_backend)?;

        self.record_backend_request(return_backend);
        self.record_backend_request(&compare_backend);
        self.metrics.dry_run_requests.fetch_add(1, Ordering::Relaxed);

        Some(handler.handle(parts.clone(), body.clone(), primary, secondary).await)
    }

    /// Composite dispatch with its own flag gate: a disabled flag falls back
    /// to the alternative backend as a plain single-backend route.
    async fn dispatch_composite(
        &self,
        effective: &Arc<GatewaySettings>,
        parts: &RequestParts,
        body: Bytes,
        route_pattern: &str,
        route: CompositeRoute,
    ) -> Result<HttpResponse, GatewayError> {
        let tenant = parts.tenant.as_deref();

        if !route.feature_flag_id.is_empty()
            && !self.flag_enabled(effective, &route.feature_flag_id, tenant, &parts.path)
        {
            let backend = if !route.alternative_backend.is_empty() {
                route.alternative_backend.clone()
            } else if !effective.default_backend.is_empty() {
                effective.default_backend.clone()
            } else {
                return Err(GatewayError::NoAlternative { flag: route.feature_flag_id.clone() });
            };
            return self.dispatch_single(effective, parts, body, &backend).await;
        }

        let proxies: Vec<(String, Option<Arc<BackendProxy>>)> = route
            .backends
            .iter()
            .map(|id| {
                let proxy = self.proxy_for(tenant, id);
                if proxy.is_some() {
                    self.record_backend_request(id);
                }
                (id.clone(), proxy)
            })
            .collect();

        self.metrics.composite_requests.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .composite
            .handle(route_pattern, &route, parts, body, proxies, effective.request_timeout())
            .await)
    }

    /// Single-backend dispatch, consulting the response cache for GETs.
    async fn dispatch_single(
        &self,
        effective: &Arc<GatewaySettings>,
        parts: &RequestParts,
        body: Bytes,
        backend: &str,
    ) -> Result<HttpResponse, GatewayError> {
        let cache = self
            .cache
            .as_ref()
            .filter(|_| effective.cache_enabled && parts.method == reqwest::Method::GET);

        if let Some(cache) = cache {
            let key = ResponseCache::fingerprint(
                parts.method.as_str(),
                &parts.path,
                &parts.query,
                parts.tenant.as_deref(),
            );

            match cache.lookup(&key).await {
                CacheLookup::Hit(captured) => {
                    self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(captured.to_http_response());
                }
                CacheLookup::Miss(guard) => {
                    self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
                    let response = self.forward_backend(effective, parts, body, backend).await?;
                    let captured =
                        CapturedResponse::capture(backend, response, MAX_CACHED_BODY).await?;
                    if captured.is_success() {
                        guard.insert(captured.clone());
                    }
                    return Ok(captured.to_http_response());
                }
            }
        }

        let response = self.forward_backend(effective, parts, body, backend).await?;
        Ok(stream_response(response))
    }

    /// The breaker-wrapped proxy call.
    async fn forward_backend(
        &self,
        effective: &Arc<GatewaySettings>,
        parts: &RequestParts,
        body: Bytes,
        backend: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let tenant = parts.tenant.as_deref();
        let proxy = self
            .proxy_for(tenant, backend)
            .ok_or_else(|| GatewayError::BackendNotFound { backend: backend.to_string() })?;

        self.record_backend_request(backend);

        let timeout = effective.request_timeout();
        let call = proxy.forward(parts, body, timeout);

        if effective.breaker_settings(backend).enabled {
            let breaker = self.breaker(backend, effective);
            match breaker.execute(call).await {
                Ok(response) => Ok(response),
                Err(CircuitBreakerError::CircuitOpen) => {
                    self.metrics.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
                    Err(GatewayError::CircuitOpen { backend: backend.to_string() })
                }
                Err(CircuitBreakerError::CallFailed(error)) => Err(error),
            }
        } else {
            call.await
        }
    }

    /// The proxy serving (tenant, backend): the tenant-specific proxy when
    /// the tenant overrides the backend, else the global proxy.
    pub fn proxy_for(&self, tenant: Option<&str>, backend: &str) -> Option<Arc<BackendProxy>> {
        if let Some(tenant) = tenant {
            let tenant_proxies = self.tenant_proxies.read().unwrap_or_else(|e| e.into_inner());
            if let Some(proxy) = tenant_proxies.get(&(tenant.to_string(), backend.to_string())) {
                return Some(Arc::clone(proxy));
            }
        }
        let proxies = self.proxies.read().unwrap_or_else(|e| e.into_inner());
        proxies.get(backend).cloned()
    }

    /// The breaker for a backend id, created on first use with the effective
    /// per-backend settings and a metrics transition listener.
    fn breaker(&self, backend: &str, effective: &GatewaySettings) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(backend) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(breaker) = breakers.get(backend) {
            return Arc::clone(breaker);
        }

        let transitions = Arc::clone(&self.metrics.breaker_transitions);
        let listener: crate::services::circuit_breaker::TransitionListener =
            Arc::new(move |_backend, _from, _to: CircuitState| {
                transitions.fetch_add(1, Ordering::Relaxed);
            });
        let breaker = CircuitBreaker::with_listener(
            backend.to_string(),
            effective.breaker_settings(backend).clone(),
            Some(listener),
        );
        breakers.insert(backend.to_string(), Arc::clone(&breaker));
        breaker
    }

    fn record_backend_request(&self, backend: &str) {
        let health = self.health.read().unwrap_or_else(|e| e.into_inner());
        if let Some(checker) = health.as_ref() {
            checker.record_request(backend);
        }
    }

    fn record_error(&self, error: &GatewayError) {
        match error {
            GatewayError::UpstreamTimeout { .. } => {
                self.metrics.timeout_errors.fetch_add(1, Ordering::Relaxed);
            }
            GatewayError::Upstream { .. } => {
                self.metrics.connection_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}
