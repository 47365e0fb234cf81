//! Configuration loader tests.
//!
//! These tests manipulate `PORTICO_CONFIG_PATH` and run in their own test
//! binary so they cannot race other suites; within the file they run
//! sequentially under a lock.

use portico_rs::config::settings::load_settings;
use std::fs;
use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_config_file<F: FnOnce()>(contents: &str, f: F) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let file = tempfile::Builder::new()
        .prefix("portico-config-")
        .suffix(".json")
        .tempfile_in(".")
        .expect("temp config in working directory");
    fs::write(file.path(), contents).expect("write config");
    std::env::set_var("PORTICO_CONFIG_PATH", file.path());
    f();
    std::env::remove_var("PORTICO_CONFIG_PATH");
}

#[test]
fn loads_a_valid_config() {
    let config = r#"{
        "backend_services": { "api": "http://api.internal:8080" },
        "routes": { "/api/*": "api" },
        "default_backend": "api",
        "request_timeout": 15,
        "circuit_breaker": { "enabled": true, "failure_threshold": 3 }
    }"#;

    with_config_file(config, || {
        let settings = load_settings().expect("loads");
        assert_eq!(settings.backend_services["api"], "http://api.internal:8080");
        assert_eq!(settings.default_backend, "api");
        assert_eq!(settings.request_timeout, 15);
        assert!(settings.circuit_breaker.enabled);
        assert_eq!(settings.circuit_breaker.failure_threshold, 3);
    });
}

#[test]
fn omitted_sections_take_zero_values() {
    with_config_file(r#"{ "default_backend": "api" }"#, || {
        let settings = load_settings().expect("loads");
        assert!(!settings.circuit_breaker.enabled);
        assert!(!settings.health_check.enabled);
        assert!(settings.routes.is_empty());
        assert_eq!(settings.request_timeout, 0);
        // The effective accessor applies the process default.
        assert_eq!(settings.request_timeout().as_secs(), 10);
    });
}

#[test]
fn invalid_json_is_an_error() {
    with_config_file("{ not json", || {
        let error = load_settings().expect_err("must fail");
        assert!(error.to_string().contains("Invalid JSON"));
    });
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    std::env::set_var("PORTICO_CONFIG_PATH", "./does-not-exist.json");
    assert!(load_settings().is_err());
    std::env::remove_var("PORTICO_CONFIG_PATH");
}

#[test]
fn nested_blocks_deserialize() {
    let config = r#"{
        "backend_services": { "api": "http://api.internal:8080" },
        "backend_configs": {
            "api": {
                "path_rewriting": {
                    "strip_base_path": "/api/v1",
                    "base_path_rewrite": "/internal",
                    "endpoint_rewrites": [
                        { "pattern": "/legacy/*", "replacement": "/v2/*" }
                    ]
                },
                "header_rewriting": {
                    "hostname_handling": "use_custom",
                    "custom_hostname": "internal.example.com",
                    "set_headers": { "X-Gateway": "portico" },
                    "remove_headers": ["X-Secret"]
                },
                "endpoints": [
                    { "name": "orders", "pattern": "/orders/*" }
                ]
            }
        },
        "composite_routes": {
            "/combined": { "backends": ["api"], "strategy": "merge", "timeout": 5 }
        },
        "dry_run": { "enabled": true, "ignore_headers": ["X-Custom"] },
        "feature_flags": { "enabled": true, "flags": { "beta": true } }
    }"#;

    with_config_file(config, || {
        let settings = load_settings().expect("loads");

        let backend = &settings.backend_configs["api"];
        let rewriting = backend.path_rewriting.as_ref().expect("path rewriting");
        assert_eq!(rewriting.strip_base_path, "/api/v1");
        assert_eq!(rewriting.endpoint_rewrites[0].pattern, "/legacy/*");
        assert_eq!(backend.endpoints[0].name, "orders");

        let headers = backend.header_rewriting.as_ref().expect("header rewriting");
        assert_eq!(headers.custom_hostname, "internal.example.com");
        assert_eq!(headers.set_headers["X-Gateway"], "portico");

        let composite = &settings.composite_routes["/combined"];
        assert_eq!(composite.timeout, 5);

        assert!(settings.dry_run.enabled);
        assert_eq!(settings.dry_run.ignore_headers, vec!["X-Custom"]);
        assert_eq!(settings.feature_flags.flags["beta"], true);
    });
}
