//! Tenant-aware feature flag evaluation.
//!
//! The routing engine consults a [`FeatureFlagEvaluator`] before applying a
//! gated route. The built-in [`ConfigFlagEvaluator`] reads the configuration
//! tree (tenant flag map over global flag map); external evaluators can be
//! injected on the module before init and take precedence.

use ahash::HashMap as AHashMap;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FlagError {
    /// No flag with this id exists for the tenant or globally.
    #[error("feature flag not found: {flag}")]
    NotFound { flag: String },
    /// An external evaluator declined to decide. Treated as not-found.
    #[error("no decision for feature flag: {flag}")]
    NoDecision { flag: String },
    /// The evaluator failed.
    #[error("feature flag evaluation failed: {0}")]
    Evaluation(String),
}

/// Boolean, tenant-scoped flag lookup.
///
/// Implementations must be cheap and non-blocking; the routing engine calls
/// this on the request path.
pub trait FeatureFlagEvaluator: Send + Sync {
    /// Evaluates a flag for a tenant. The request path is passed through for
    /// evaluators that segment on request attributes.
    fn evaluate(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        request_path: &str,
    ) -> Result<bool, FlagError>;

    /// Evaluates with a fallback: any error, including not-found and
    /// no-decision, yields the default.
    fn evaluate_with_default(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        request_path: &str,
        default: bool,
    ) -> bool {
        self.evaluate(flag_id, tenant_id, request_path).unwrap_or(default)
    }
}

/// Built-in evaluator backed by the configuration tree.
///
/// The tenant's flag map overrides the global map per flag id; a flag absent
/// from both yields [`FlagError::NotFound`].
///
/// # Examples
///
/// ```
/// use portico_rs::services::flags::{ConfigFlagEvaluator, FeatureFlagEvaluator};
/// use std::collections::HashMap;
///
/// let global = HashMap::from([("beta-ui".to_string(), false)]);
/// let mut tenants = HashMap::new();
/// tenants.insert("acme".to_string(), HashMap::from([("beta-ui".to_string(), true)]));
///
/// let flags = ConfigFlagEvaluator::new(global, tenants);
/// assert_eq!(flags.evaluate("beta-ui", None, "/"), Ok(false));
/// assert_eq!(flags.evaluate("beta-ui", Some("acme"), "/"), Ok(true));
/// assert!(flags.evaluate("missing", None, "/").is_err());
/// ```
pub struct ConfigFlagEvaluator {
    global: AHashMap<String, bool>,
    tenants: RwLock<AHashMap<String, AHashMap<String, bool>>>,
}

impl ConfigFlagEvaluator {
    pub fn new(
        global: HashMap<String, bool>,
        tenants: HashMap<String, HashMap<String, bool>>,
    ) -> Self {
        Self {
            global: global.into_iter().collect(),
            tenants: RwLock::new(
                tenants
                    .into_iter()
                    .map(|(t, flags)| (t, flags.into_iter().collect()))
                    .collect(),
            ),
        }
    }

    /// Replaces a tenant's flag map, used when a tenant registers after init.
    pub fn set_tenant_flags(&self, tenant: String, flags: HashMap<String, bool>) {
        self.tenants
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant, flags.into_iter().collect());
    }

    /// All flags visible to a tenant, tenant entries winning. Used by the
    /// debug endpoints.
    pub fn visible_flags(&self, tenant_id: Option<&str>) -> HashMap<String, bool> {
        let mut flags: HashMap<String, bool> =
            self.global.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let tenants = self.tenants.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tenant) = tenant_id.and_then(|t| tenants.get(t)) {
            for (k, v) in tenant {
                flags.insert(k.clone(), *v);
            }
        }
        flags
    }
}

impl FeatureFlagEvaluator for ConfigFlagEvaluator {
    fn evaluate(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        _request_path: &str,
    ) -> Result<bool, FlagError> {
        let tenants = self.tenants.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tenant) = tenant_id.and_then(|t| tenants.get(t)) {
            if let Some(value) = tenant.get(flag_id) {
                return Ok(*value);
            }
        }
        self.global
            .get(flag_id)
            .copied()
            .ok_or_else(|| FlagError::NotFound { flag: flag_id.to_string() })
    }
}
