//! Debug introspection endpoints: JSON snapshots of internal state.
//!
//! Registered under `/debug/*` when `debug_endpoints` is enabled. The scope
//! is reserved from proxying whether or not it is registered.

use crate::module::ReverseProxyModule;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// `/debug/info` — module-level summary.
pub async fn info(module: web::Data<Arc<ReverseProxyModule>>) -> Result<HttpResponse> {
    let settings = module.settings();
    let tenants = module.engine().map(|e| e.tenants()).unwrap_or_default();

    Ok(HttpResponse::Ok().json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "started": module.is_started(),
        "default_backend": settings.default_backend,
        "backends": settings.backend_ids(),
        "routes": settings.routes.len(),
        "composite_routes": settings.composite_routes.len(),
        "tenants": tenants,
        "circuit_breaker_enabled": settings.circuit_breaker.enabled,
        "health_check_enabled": settings.health_check.enabled,
        "dry_run_enabled": settings.dry_run.enabled,
        "cache_enabled": settings.cache_enabled,
    })))
}

/// `/debug/backends` — backend ids, URLs, and route tables.
pub async fn backends(module: web::Data<Arc<ReverseProxyModule>>) -> Result<HttpResponse> {
    let settings = module.settings();
    let backends: Vec<_> = settings
        .backend_ids()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "url": settings.backend_url(&id),
                "endpoints": settings
                    .backend_configs
                    .get(&id)
                    .map(|c| c.endpoints.len())
                    .unwrap_or(0),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "backends": backends,
        "routes": settings.routes,
        "composite_routes": settings.composite_routes,
        "default_backend": settings.default_backend,
    })))
}

/// `/debug/flags` — flags visible to the requesting tenant.
pub async fn flags(
    req: HttpRequest,
    module: web::Data<Arc<ReverseProxyModule>>,
) -> Result<HttpResponse> {
    let header = module.settings().tenant_header().to_string();
    let tenant = req.headers().get(header.as_str()).and_then(|v| v.to_str().ok());

    let flags = module
        .engine()
        .map(|engine| engine.effective_config(tenant).feature_flags.flags.clone())
        .unwrap_or_default();

    Ok(HttpResponse::Ok().json(json!({
        "enabled": module.settings().feature_flags.enabled,
        "tenant": tenant,
        "flags": flags,
    })))
}

/// `/debug/circuit-breakers` — breaker snapshots keyed by backend id.
pub async fn circuit_breakers(module: web::Data<Arc<ReverseProxyModule>>) -> Result<HttpResponse> {
    let snapshots = module.engine().map(|e| e.breaker_snapshots()).unwrap_or_default();
    Ok(HttpResponse::Ok().json(snapshots))
}

/// `/debug/health-checks` — health checker snapshot.
pub async fn health_checks(module: web::Data<Arc<ReverseProxyModule>>) -> Result<HttpResponse> {
    match module.health_checker() {
        Some(checker) => Ok(HttpResponse::Ok().json(json!({
            "running": checker.is_running(),
            "backends": checker.snapshot(),
            "circuit_breakers": checker.circuit_breakers(),
        }))),
        None => Ok(HttpResponse::Ok().json(json!({ "running": false }))),
    }
}
