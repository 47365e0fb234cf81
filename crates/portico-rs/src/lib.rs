//! # Portico
//!
//! A multi-tenant reverse proxy and API gateway library built with Rust and
//! Actix Web. Portico accepts HTTP requests on a single ingress, decides per
//! request which upstream backend(s) should serve it — optionally fanning
//! out to several backends and combining their responses — and protects
//! itself and the backends with circuit breakers, health checks, timeouts,
//! and feature-flagged routing with optional dry-run comparison.
//!
//! ## Quick start
//!
//! ```no_run
//! use actix_web::{App, HttpServer};
//! use portico_rs::config::settings::load_settings;
//! use portico_rs::module::ReverseProxyModule;
//! use portico_rs::routes::configure;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let settings = load_settings().expect("failed to load configuration");
//!
//!     let module = ReverseProxyModule::new(settings);
//!     module.init().expect("module init failed");
//!     module.start().expect("module start failed");
//!
//!     let app_module = module.clone();
//!     HttpServer::new(move || {
//!         App::new().configure(|cfg| configure(cfg, app_module.clone()))
//!     })
//!     .bind(("0.0.0.0", 8080))?
//!     .run()
//!     .await
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! Client → catch-all handler → Routing Engine
//!            ├── reserved path?            → 404
//!            ├── tenant header             → merged tenant config
//!            ├── route lookup              → route / composite / default
//!            ├── feature flag gate         → primary or alternative backend
//!            └── dispatch
//!                 ├── Backend Proxy (circuit-breaker wrapped)
//!                 ├── Composite Handler (fan-out + merge/select/append/custom)
//!                 └── Dry-Run Comparator (dual dispatch + async diff)
//! ```
//!
//! ## Module organization
//!
//! - [`models`] - configuration tree and error types
//! - [`config`] - loading, tenant merging, validation
//! - [`services`] - proxies, breakers, health checks, flags, dry-run,
//!   composite fan-out, response cache, and the routing engine
//! - [`module`] - lifecycle (init/start/stop, tenant callbacks)
//! - [`routes`] - actix handlers and route registration
//! - [`logs`] - logger configuration
//! - [`utils`] - glob pattern matching and path helpers

pub mod config;
pub mod logs;
pub mod models;
pub mod module;
pub mod routes;
pub mod services;
pub mod utils;
