//! Module lifecycle: register-config → init → start → (run) → stop.
//!
//! [`ReverseProxyModule`] owns every runtime part of the gateway — the
//! routing engine with its proxies and breakers, the health checker, the
//! dry-run comparator, the flag evaluator — and sequences their lifetimes.
//! `stop` is idempotent and safe to call after a failed init. Tenant
//! registration is deferred: the callback only records the id, and the
//! merged configuration is loaded during `start` (or on a later
//! registration while running) to avoid lock inversion with the tenant
//! registry.

use crate::config::validation::ConfigValidator;
use crate::models::error::GatewayError;
use crate::models::settings::GatewaySettings;
use crate::routes::metrics::MetricsCollector;
use crate::services::composite::CompositeTransformer;
use crate::services::flags::{ConfigFlagEvaluator, FeatureFlagEvaluator};
use crate::services::health::HealthChecker;
use crate::services::routing::RoutingEngine;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use log::{error, info, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Supplies raw tenant configuration overlays, read once per tenant
/// registration. Implemented by the tenant registry integration.
pub trait TenantConfigProvider: Send + Sync {
    fn tenant_config(&self, tenant_id: &str) -> Option<GatewaySettings>;
}

/// The reverse-proxy module.
///
/// # Lifecycle
///
/// ```text
/// new(settings) → init() → start() → ... → stop()
/// ```
///
/// * `init` validates the configuration and builds the routing engine
///   (proxies for every backend with a non-empty URL, breakers where
///   enabled, dry-run comparator and response cache when configured), the
///   health checker, and the built-in flag evaluator when feature flags are
///   enabled and no evaluator was injected.
/// * `start` loads pending tenant configurations and starts the health
///   checker; route registration happens through [`crate::routes::configure`].
/// * `stop` stops the health checker, resets breakers, clears the response
///   cache, and drops the engine (and with it every proxy). Idempotent.
pub struct ReverseProxyModule {
    settings: GatewaySettings,
    engine: RwLock<Option<Arc<RoutingEngine>>>,
    health: RwLock<Option<Arc<HealthChecker>>>,
    metrics: MetricsCollector,
    /// Tenant ids recorded before start; configs are loaded in `start`.
    pending_tenants: Mutex<Vec<String>>,
    tenant_provider: RwLock<Option<Arc<dyn TenantConfigProvider>>>,
    /// An evaluator injected before init takes precedence over the built-in.
    injected_flags: RwLock<Option<Arc<dyn FeatureFlagEvaluator>>>,
    /// The built-in evaluator, published only after init completes.
    builtin_flags: RwLock<Option<Arc<ConfigFlagEvaluator>>>,
    /// Transformers registered before init, installed on the engine at init.
    pending_transformers: Mutex<Vec<(String, CompositeTransformer)>>,
    started: AtomicBool,
}

impl ReverseProxyModule {
    /// Registers the configuration. Nothing is validated or built yet.
    pub fn new(settings: GatewaySettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            engine: RwLock::new(None),
            health: RwLock::new(None),
            metrics: MetricsCollector::default(),
            pending_tenants: Mutex::new(Vec::new()),
            tenant_provider: RwLock::new(None),
            injected_flags: RwLock::new(None),
            builtin_flags: RwLock::new(None),
            pending_transformers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Injects an external feature flag evaluator. Call before `init`.
    pub fn set_flag_evaluator(&self, evaluator: Arc<dyn FeatureFlagEvaluator>) {
        *self.injected_flags.write().unwrap_or_else(|e| e.into_inner()) = Some(evaluator);
    }

    /// Installs the tenant registry integration. Call before `start`.
    pub fn set_tenant_config_provider(&self, provider: Arc<dyn TenantConfigProvider>) {
        *self.tenant_provider.write().unwrap_or_else(|e| e.into_inner()) = Some(provider);
    }

    /// Registers a transformer for a `custom`-strategy composite route.
    pub fn register_transformer(&self, pattern: &str, transformer: CompositeTransformer) {
        if let Some(engine) = self.engine() {
            engine.register_transformer(pattern, transformer);
        } else {
            self.pending_transformers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((pattern.to_string(), transformer));
        }
    }

    /// Validates the configuration and builds every subsystem.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] when validation fails or the shared HTTP
    /// client cannot be built. `stop` is safe to call afterwards.
    pub fn init(&self) -> Result<(), GatewayError> {
        let result = ConfigValidator::validate(&self.settings);
        if !result.is_valid() {
            return Err(GatewayError::Config(format!(
                "configuration invalid: {}",
                result.errors.join("; ")
            )));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        let engine = Arc::new(RoutingEngine::new(
            self.settings.clone(),
            client.clone(),
            self.metrics.clone(),
        )?);

        for (pattern, transformer) in
            self.pending_transformers.lock().unwrap_or_else(|e| e.into_inner()).drain(..)
        {
            engine.register_transformer(&pattern, transformer);
        }

        if let Some(evaluator) = self.injected_flags.read().unwrap_or_else(|e| e.into_inner()).clone()
        {
            engine.set_flag_evaluator(evaluator);
        } else if self.settings.feature_flags.enabled {
            let builtin = Arc::new(ConfigFlagEvaluator::new(
                self.settings.feature_flags.flags.clone(),
                Default::default(),
            ));
            engine.set_flag_evaluator(builtin.clone());
            // Published for discovery only now that init is completing, so a
            // consumer can never observe a half-built evaluator.
            *self.builtin_flags.write().unwrap_or_else(|e| e.into_inner()) = Some(builtin);
        }

        if self.settings.health_check.enabled {
            let checker = HealthChecker::new(
                self.settings.health_check.clone(),
                engine.backend_urls(),
                client,
            );
            let breaker_engine = Arc::clone(&engine);
            checker.set_circuit_breaker_provider(Arc::new(move || {
                breaker_engine.breaker_snapshots()
            }));
            engine.set_health_checker(Arc::clone(&checker));
            *self.health.write().unwrap_or_else(|e| e.into_inner()) = Some(checker);
        }

        *self.engine.write().unwrap_or_else(|e| e.into_inner()) = Some(engine);
        info!("reverse proxy module initialized");
        Ok(())
    }

    /// Loads pending tenants and starts the health checker.
    pub fn start(&self) -> Result<(), GatewayError> {
        let engine = self
            .engine()
            .ok_or_else(|| GatewayError::Config("start called before init".to_string()))?;

        let pending: Vec<String> =
            self.pending_tenants.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for tenant in pending {
            self.load_tenant(&engine, &tenant);
        }

        if let Some(checker) = self.health.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            checker.start();
        }

        self.started.store(true, Ordering::Release);
        info!("reverse proxy module started");
        Ok(())
    }

    /// Stops the health checker, resets breakers, clears the cache, and
    /// drops the engine. Idempotent; safe after a failed init.
    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);

        if let Some(checker) = self.health.write().unwrap_or_else(|e| e.into_inner()).take() {
            checker.stop();
        }

        if let Some(engine) = self.engine.write().unwrap_or_else(|e| e.into_inner()).take() {
            engine.reset();
        }

        info!("reverse proxy module stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Records a tenant registration. Before start only the id is stored;
    /// while running the merged configuration is loaded immediately.
    pub fn on_tenant_registered(&self, tenant_id: &str) {
        if self.is_started() {
            if let Some(engine) = self.engine() {
                self.load_tenant(&engine, tenant_id);
            }
            return;
        }
        let mut pending = self.pending_tenants.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.iter().any(|t| t == tenant_id) {
            pending.push(tenant_id.to_string());
        }
    }

    /// Drops a tenant's configuration and proxies.
    pub fn on_tenant_removed(&self, tenant_id: &str) {
        self.pending_tenants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| t != tenant_id);
        if let Some(engine) = self.engine() {
            engine.remove_tenant(tenant_id);
        }
    }

    fn load_tenant(&self, engine: &Arc<RoutingEngine>, tenant_id: &str) {
        let overlay = {
            let provider = self.tenant_provider.read().unwrap_or_else(|e| e.into_inner());
            provider.as_ref().and_then(|p| p.tenant_config(tenant_id))
        };

        let Some(overlay) = overlay else {
            warn!("no configuration available for tenant '{}', using global", tenant_id);
            return;
        };

        if let Some(builtin) = self.builtin_flags.read().unwrap_or_else(|e| e.into_inner()).as_ref()
        {
            builtin.set_tenant_flags(
                tenant_id.to_string(),
                overlay.feature_flags.flags.clone(),
            );
        }

        if let Err(e) = engine.register_tenant(tenant_id, overlay) {
            error!("failed to register tenant '{}': {}", tenant_id, e);
        }
    }

    /// Handles one proxied request. The catch-all route handler delegates
    /// here.
    pub async fn handle(&self, req: &HttpRequest, body: Bytes) -> HttpResponse {
        match self.engine() {
            Some(engine) => engine.handle(req, body).await,
            None => {
                use actix_web::error::ResponseError;
                GatewayError::Config("module not initialized".to_string()).error_response()
            }
        }
    }

    pub fn engine(&self) -> Option<Arc<RoutingEngine>> {
        self.engine.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn health_checker(&self) -> Option<Arc<HealthChecker>> {
        self.health.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The flag evaluator in use: the injected one, else the built-in
    /// published at init.
    pub fn flag_evaluator(&self) -> Option<Arc<dyn FeatureFlagEvaluator>> {
        if let Some(evaluator) =
            self.injected_flags.read().unwrap_or_else(|e| e.into_inner()).clone()
        {
            return Some(evaluator);
        }
        self.builtin_flags
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .map(|b| b as Arc<dyn FeatureFlagEvaluator>)
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}
