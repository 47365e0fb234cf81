//! Tenant configuration merging.
//!
//! A tenant overlay is a [`GatewaySettings`] value holding only the fields
//! the tenant cares about; everything else is the type's zero value. The
//! merge produces a fully-resolved effective tree from (global, tenant) with
//! later-wins precedence: process defaults < global < tenant (< per-backend
//! and per-endpoint overrides, applied by the proxy director at request
//! time).
//!
//! Field semantics:
//! - maps union, same-key tenant entries replace global entries;
//! - scalars take the tenant value only when non-empty / non-zero;
//! - booleans OR, except the circuit-breaker block which the tenant replaces
//!   wholesale only when the tenant enables it.
//!
//! The merge is pure copy-on-merge and idempotent:
//! `merge_tenant(g, &merge_tenant(g, t)) == merge_tenant(g, t)`.

use crate::models::settings::GatewaySettings;
use std::collections::HashMap;
use std::hash::Hash;

fn union<K: Eq + Hash + Clone, V: Clone>(
    global: &HashMap<K, V>,
    tenant: &HashMap<K, V>,
) -> HashMap<K, V> {
    let mut merged = global.clone();
    for (k, v) in tenant {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

fn pick_string(global: &str, tenant: &str) -> String {
    if tenant.is_empty() { global.to_string() } else { tenant.to_string() }
}

fn pick_u64(global: u64, tenant: u64) -> u64 {
    if tenant == 0 { global } else { tenant }
}

/// Merges a tenant overlay onto the global configuration, producing the
/// effective configuration for that tenant.
pub fn merge_tenant(global: &GatewaySettings, tenant: &GatewaySettings) -> GatewaySettings {
    let mut merged = GatewaySettings {
        backend_services: union(&global.backend_services, &tenant.backend_services),
        routes: union(&global.routes, &tenant.routes),
        route_configs: union(&global.route_configs, &tenant.route_configs),
        default_backend: pick_string(&global.default_backend, &tenant.default_backend),
        backend_configs: union(&global.backend_configs, &tenant.backend_configs),
        composite_routes: union(&global.composite_routes, &tenant.composite_routes),
        tenant_id_header: pick_string(&global.tenant_id_header, &tenant.tenant_id_header),
        require_tenant_id: global.require_tenant_id || tenant.require_tenant_id,

        // The breaker block is all-or-nothing: a tenant that enables breakers
        // brings its own thresholds, otherwise the global block stands.
        circuit_breaker: if tenant.circuit_breaker.enabled {
            tenant.circuit_breaker.clone()
        } else {
            global.circuit_breaker.clone()
        },
        backend_circuit_breakers: union(
            &global.backend_circuit_breakers,
            &tenant.backend_circuit_breakers,
        ),

        health_check: if tenant.health_check.enabled {
            tenant.health_check.clone()
        } else {
            global.health_check.clone()
        },
        dry_run: if tenant.dry_run.enabled {
            tenant.dry_run.clone()
        } else {
            global.dry_run.clone()
        },
        feature_flags: crate::models::settings::FeatureFlagSettings {
            enabled: global.feature_flags.enabled || tenant.feature_flags.enabled,
            flags: union(&global.feature_flags.flags, &tenant.feature_flags.flags),
        },

        cache_enabled: global.cache_enabled || tenant.cache_enabled,
        cache_ttl: pick_u64(global.cache_ttl, tenant.cache_ttl),
        request_timeout: pick_u64(global.request_timeout, tenant.request_timeout),
        metrics_enabled: global.metrics_enabled || tenant.metrics_enabled,
        metrics_endpoint: pick_string(&global.metrics_endpoint, &tenant.metrics_endpoint),
        debug_endpoints: global.debug_endpoints || tenant.debug_endpoints,
    };

    // A global backend id may carry an empty URL as a placeholder for
    // tenant-supplied URLs; the union above already lets the tenant entry
    // replace it. The reverse also holds: a tenant entry with an empty URL
    // must not erase a usable global URL.
    for (id, url) in &global.backend_services {
        if !url.is_empty() {
            merged
                .backend_services
                .entry(id.clone())
                .and_modify(|u| {
                    if u.is_empty() {
                        *u = url.clone();
                    }
                });
        }
    }

    merged
}
