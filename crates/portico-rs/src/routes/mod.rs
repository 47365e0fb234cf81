pub mod debug;
pub mod health;
pub mod metrics;
pub mod proxy;

use crate::module::ReverseProxyModule;
use actix_web::web;
use std::sync::Arc;

/// Registers every gateway route on an actix app: the reserved health and
/// metrics endpoints, the debug scope when enabled, and the proxy catch-all.
///
/// # Examples
///
/// ```no_run
/// use actix_web::{App, web};
/// use portico_rs::models::settings::GatewaySettings;
/// use portico_rs::module::ReverseProxyModule;
/// use portico_rs::routes::configure;
///
/// let module = ReverseProxyModule::new(GatewaySettings::default());
/// module.init().unwrap();
/// module.start().unwrap();
///
/// let app = App::new().configure(|cfg| configure(cfg, module.clone()));
/// ```
pub fn configure(cfg: &mut web::ServiceConfig, module: Arc<ReverseProxyModule>) {
    let settings = module.settings();
    let metrics_endpoint = settings.metrics_endpoint().to_string();
    let metrics_enabled = settings.metrics_enabled;
    let debug_enabled = settings.debug_endpoints;
    let metrics = module.metrics().clone();

    cfg.app_data(web::Data::new(Arc::clone(&module)))
        .app_data(web::Data::new(metrics))
        .route("/health", web::get().to(health::health_check))
        .route("/health/", web::get().to(health::health_check));

    if metrics_enabled {
        cfg.route(&metrics_endpoint, web::get().to(metrics::metrics_handler)).route(
            &format!("{}/health", metrics_endpoint),
            web::get().to(metrics::metrics_health_handler),
        );
    }

    if debug_enabled {
        cfg.service(
            web::scope("/debug")
                .route("/info", web::get().to(debug::info))
                .route("/backends", web::get().to(debug::backends))
                .route("/flags", web::get().to(debug::flags))
                .route("/circuit-breakers", web::get().to(debug::circuit_breakers))
                .route("/health-checks", web::get().to(debug::health_checks)),
        );
    }

    cfg.default_service(web::route().to(proxy::proxy_entry));
}
