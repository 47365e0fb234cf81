//! Gateway error kinds and their HTTP mapping.
//!
//! Every failure a request can hit on its way through the gateway is one of
//! these variants; the `ResponseError` impl turns each into the client-facing
//! status and body. Errors inside a single upstream leg never abort the
//! request pipeline — they surface as one of these responses.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The configured tenant header is required but absent.
    #[error("Header {header} is required")]
    TenantMissing { header: String },

    /// No route or default backend matched the request path.
    #[error("No matching route found for path: {path}")]
    RouteNotFound { path: String },

    /// A route referenced a backend id with no usable proxy.
    #[error("No backend found for route: {backend}")]
    BackendNotFound { backend: String },

    /// The backend's circuit breaker is open; no upstream call was made.
    #[error("Service temporarily unavailable")]
    CircuitOpen { backend: String },

    /// Transport-level upstream failure (connect, TLS, body read).
    #[error("Upstream service error: {message}")]
    Upstream { backend: String, message: String },

    /// The upstream call exceeded its deadline.
    #[error("Upstream request to {backend} timed out after {timeout:?}")]
    UpstreamTimeout { backend: String, timeout: Duration },

    /// A feature flag gated the route off and no alternative backend exists.
    #[error("No backend available: feature flag disabled route")]
    NoAlternative { flag: String },

    /// Invalid configuration reached the request path.
    #[error("Invalid route configuration: {0}")]
    Config(String),
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::TenantMissing { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BackendNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::NoAlternative { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // Plain-text body; clients match on the literal message.
            GatewayError::TenantMissing { header } => {
                HttpResponse::BadRequest().body(format!("Header {} is required", header))
            }
            GatewayError::CircuitOpen { .. } => HttpResponse::ServiceUnavailable().json(json!({
                "error": "Service temporarily unavailable",
                "code": "CIRCUIT_OPEN"
            })),
            GatewayError::RouteNotFound { path } => HttpResponse::NotFound().json(json!({
                "error": self.to_string(),
                "path": path,
                "type": "route_not_found"
            })),
            GatewayError::BackendNotFound { .. } => {
                HttpResponse::InternalServerError().json(json!({
                    "error": self.to_string(),
                    "type": "backend_not_found"
                }))
            }
            GatewayError::Upstream { .. } => HttpResponse::BadGateway().json(json!({
                "error": self.to_string(),
                "type": "upstream"
            })),
            GatewayError::UpstreamTimeout { .. } => HttpResponse::GatewayTimeout().json(json!({
                "error": self.to_string(),
                "type": "timeout"
            })),
            GatewayError::NoAlternative { flag } => HttpResponse::ServiceUnavailable().json(json!({
                "error": self.to_string(),
                "flag": flag,
                "type": "flag_disabled"
            })),
            GatewayError::Config(_) => HttpResponse::InternalServerError().json(json!({
                "error": self.to_string(),
                "type": "config"
            })),
        }
    }
}

impl GatewayError {
    /// Classifies a reqwest transport error against a backend, distinguishing
    /// deadline expiry from other transport failures.
    pub fn from_reqwest(backend: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout { backend: backend.to_string(), timeout }
        } else {
            GatewayError::Upstream { backend: backend.to_string(), message: err.to_string() }
        }
    }
}
