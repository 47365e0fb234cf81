//! Configuration validation with detailed error reporting.
//!
//! Validation runs once at module init; errors abort startup, warnings are
//! logged and startup continues. Checks cover referential integrity between
//! the route/backend maps, URL parseability, tenant-header consistency, and
//! composite/dry-run backend references.

use crate::models::settings::{CompositeStrategy, GatewaySettings};
use log::warn;

/// Result of configuration validation containing errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Critical errors that prevent configuration use
    pub errors: Vec<String>,
    /// Non-critical issues that should be addressed
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Gateway configuration validator.
///
/// # Examples
///
/// ```
/// use portico_rs::config::validation::ConfigValidator;
/// use portico_rs::models::settings::GatewaySettings;
///
/// let mut settings = GatewaySettings::default();
/// settings.backend_services.insert("api".to_string(), "http://api.internal".to_string());
/// settings.default_backend = "api".to_string();
///
/// let result = ConfigValidator::validate(&settings);
/// assert!(result.is_valid());
/// ```
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a (global or merged) configuration tree.
    pub fn validate(settings: &GatewaySettings) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_backends(settings, &mut result);
        Self::validate_routes(settings, &mut result);
        Self::validate_composites(settings, &mut result);
        Self::validate_tenancy(settings, &mut result);
        Self::validate_dry_run(settings, &mut result);

        for warning in &result.warnings {
            warn!("config: {}", warning);
        }

        result
    }

    fn validate_backends(settings: &GatewaySettings, result: &mut ValidationResult) {
        for id in settings.backend_ids() {
            match settings.backend_url(&id) {
                Some(url) => {
                    if let Err(e) = reqwest::Url::parse(url) {
                        result.add_error(format!("backend '{}': invalid base URL '{}': {}", id, url, e));
                    }
                }
                // Permitted: a tenant may supply the URL for this id.
                None => result.add_warning(format!(
                    "backend '{}' has no URL in the global config; requests will fail unless a tenant supplies one",
                    id
                )),
            }
        }

        for (id, cfg) in &settings.backend_configs {
            for (i, ep) in cfg.endpoints.iter().enumerate() {
                if ep.pattern.is_empty() {
                    result.add_error(format!("backend '{}': endpoint override #{} has an empty pattern", id, i));
                }
            }
        }
    }

    fn validate_routes(settings: &GatewaySettings, result: &mut ValidationResult) {
        if !settings.default_backend.is_empty()
            && !settings.backend_services.contains_key(&settings.default_backend)
            && !settings.backend_configs.contains_key(&settings.default_backend)
        {
            result.add_error(format!(
                "default backend '{}' does not appear in the backend map",
                settings.default_backend
            ));
        }

        for (pattern, backend) in &settings.routes {
            if settings.backend_url(backend).is_none()
                && !settings.backend_services.contains_key(backend)
                && !settings.backend_configs.contains_key(backend)
            {
                result.add_error(format!(
                    "route '{}' references unknown backend '{}'",
                    pattern, backend
                ));
            }
        }

        for (pattern, rc) in &settings.route_configs {
            if !rc.alternative_backend.is_empty()
                && !settings.backend_services.contains_key(&rc.alternative_backend)
                && !settings.backend_configs.contains_key(&rc.alternative_backend)
            {
                result.add_error(format!(
                    "route config '{}' references unknown alternative backend '{}'",
                    pattern, rc.alternative_backend
                ));
            }
        }
    }

    fn validate_composites(settings: &GatewaySettings, result: &mut ValidationResult) {
        for (pattern, route) in &settings.composite_routes {
            if route.backends.is_empty() {
                result.add_error(format!("composite route '{}' has no backends", pattern));
            }
            for backend in &route.backends {
                if !settings.backend_services.contains_key(backend)
                    && !settings.backend_configs.contains_key(backend)
                {
                    result.add_error(format!(
                        "composite route '{}' references unknown backend '{}'",
                        pattern, backend
                    ));
                }
            }
            if route.strategy == CompositeStrategy::Custom {
                result.add_warning(format!(
                    "composite route '{}' uses a custom strategy; a transformer must be registered before start",
                    pattern
                ));
            }
        }
    }

    fn validate_tenancy(settings: &GatewaySettings, result: &mut ValidationResult) {
        // tenant_header() falls back to X-Tenant-ID, so the only way to end
        // up headerless is an explicit all-whitespace name.
        if settings.require_tenant_id && settings.tenant_header().trim().is_empty() {
            result.add_error(
                "require_tenant_id is set but the tenant header name is empty".to_string(),
            );
        }
    }

    fn validate_dry_run(settings: &GatewaySettings, result: &mut ValidationResult) {
        for (pattern, rc) in &settings.route_configs {
            if rc.dry_run && !rc.dry_run_backend.is_empty() {
                if !settings.backend_services.contains_key(&rc.dry_run_backend)
                    && !settings.backend_configs.contains_key(&rc.dry_run_backend)
                {
                    result.add_error(format!(
                        "route config '{}' references unknown dry-run backend '{}'",
                        pattern, rc.dry_run_backend
                    ));
                }
            }
        }

        if settings.dry_run.enabled {
            let choice = &settings.dry_run.default_response_backend;
            if !choice.is_empty()
                && !choice.eq_ignore_ascii_case("primary")
                && !choice.eq_ignore_ascii_case("secondary")
            {
                result.add_error(format!(
                    "dry_run.default_response_backend must be 'primary' or 'secondary', got '{}'",
                    choice
                ));
            }
        }
    }
}
