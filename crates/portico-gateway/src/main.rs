//! Portico gateway server.
//!
//! Binary entry point: loads and validates the configuration, drives the
//! module lifecycle, and runs the actix server with the gateway's route set.

use portico_rs::config::settings::load_settings;
use portico_rs::config::validation::ConfigValidator;
use portico_rs::logs::logger::configure_logger;
use portico_rs::module::ReverseProxyModule;
use portico_rs::routes::configure;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{error, info};
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Portico gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate(&settings);
    if !validation.is_valid() {
        error!("Configuration validation failed:");
        for error in &validation.errors {
            error!("  - {}", error);
        }
        std::process::exit(1);
    }
    info!(
        "Configuration validated with {} warnings",
        validation.warnings.len()
    );

    let module = ReverseProxyModule::new(settings);
    if let Err(e) = module.init() {
        error!("Module init failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = module.start() {
        error!("Module start failed: {}", e);
        std::process::exit(1);
    }

    let host = std::env::var("PORTICO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORTICO_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    info!("Starting server on {}:{}", host, port);

    let app_module = module.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new(r#"%a "%r" %s %b "%{User-Agent}i" %T"#))
            .configure(|cfg| configure(cfg, app_module.clone()))
    })
    .bind((host.as_str(), port))?
    .run();

    info!("Server started successfully");

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => error!("Server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping server...");
        }
    }

    module.stop();
    Ok(())
}
