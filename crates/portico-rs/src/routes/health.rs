use crate::module::ReverseProxyModule;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// Gateway health endpoint, reserved from proxying.
///
/// Reports the gateway's own liveness plus a per-backend summary from the
/// health checker when it is running.
pub async fn health_check(module: web::Data<Arc<ReverseProxyModule>>) -> Result<HttpResponse> {
    let backends = module
        .health_checker()
        .map(|checker| {
            let snapshot = checker.snapshot();
            json!({
                "checker_running": checker.is_running(),
                "total": snapshot.len(),
                "healthy": snapshot.values().filter(|s| s.healthy).count(),
                "backends": snapshot,
            })
        })
        .unwrap_or_else(|| json!({ "checker_running": false }));

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "started": module.is_started(),
        "health_checks": backends,
    })))
}
