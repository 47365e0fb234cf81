//! Director tests: path rewriting, endpoint overrides, query merging, and
//! header shaping.

use portico_rs::models::settings::{
    BackendConfig, EndpointConfig, HeaderRewritingConfig, HostnameHandling, PathRewritingConfig,
    RewriteRule,
};
use portico_rs::services::proxy::{BackendProxy, RequestParts};
use reqwest::header::{HeaderMap, HeaderValue, HOST};
use reqwest::Client;
use std::collections::HashMap;

fn proxy(url: &str, config: BackendConfig) -> BackendProxy {
    BackendProxy::new("api", url, config, Client::new()).expect("valid proxy")
}

#[test]
fn strip_and_prepend_rewrite_the_path() {
    let config = BackendConfig {
        path_rewriting: Some(PathRewritingConfig {
            strip_base_path: "/api/v1".to_string(),
            base_path_rewrite: "/internal/api".to_string(),
            endpoint_rewrites: vec![],
        }),
        ..Default::default()
    };
    let proxy = proxy("http://upstream:8080", config);

    let (rewritten, endpoint) = proxy.rewrite_path("/api/v1/users/42");
    assert_eq!(rewritten, "/internal/api/users/42");
    assert!(endpoint.is_none());
}

#[test]
fn first_matching_endpoint_rewrite_rule_wins() {
    let config = BackendConfig {
        path_rewriting: Some(PathRewritingConfig {
            strip_base_path: String::new(),
            base_path_rewrite: String::new(),
            endpoint_rewrites: vec![
                RewriteRule { pattern: "/users/*".to_string(), replacement: "/v2/users/*".to_string() },
                RewriteRule { pattern: "/users/admin".to_string(), replacement: "/never".to_string() },
            ],
        }),
        ..Default::default()
    };
    let proxy = proxy("http://upstream:8080", config);

    let (rewritten, _) = proxy.rewrite_path("/users/admin");
    assert_eq!(rewritten, "/v2/users/admin");
}

#[test]
fn matched_endpoint_path_rules_supersede_backend_rules() {
    let config = BackendConfig {
        path_rewriting: Some(PathRewritingConfig {
            strip_base_path: "/api".to_string(),
            base_path_rewrite: "/backend-level".to_string(),
            endpoint_rewrites: vec![],
        }),
        endpoints: vec![EndpointConfig {
            name: "orders".to_string(),
            pattern: "/orders/*".to_string(),
            path_rewriting: Some(PathRewritingConfig {
                strip_base_path: "/api".to_string(),
                base_path_rewrite: "/endpoint-level".to_string(),
                endpoint_rewrites: vec![],
            }),
            header_rewriting: None,
        }],
        ..Default::default()
    };
    let proxy = proxy("http://upstream:8080", config);

    // The endpoint pattern matches the stripped path; its block replaces the
    // backend-level one entirely.
    let (rewritten, endpoint) = proxy.rewrite_path("/api/orders/7");
    assert_eq!(rewritten, "/endpoint-level/orders/7");
    assert_eq!(endpoint.unwrap().name, "orders");

    // Unmatched paths keep the backend-level rewrite.
    let (rewritten, endpoint) = proxy.rewrite_path("/api/users/7");
    assert_eq!(rewritten, "/backend-level/users/7");
    assert!(endpoint.is_none());
}

#[test]
fn endpoints_are_scanned_in_configuration_order() {
    let config = BackendConfig {
        endpoints: vec![
            EndpointConfig {
                name: "first".to_string(),
                pattern: "/users/*".to_string(),
                path_rewriting: None,
                header_rewriting: None,
            },
            EndpointConfig {
                name: "second".to_string(),
                pattern: "/users/42".to_string(),
                path_rewriting: None,
                header_rewriting: None,
            },
        ],
        ..Default::default()
    };
    let proxy = proxy("http://upstream:8080", config);

    let (_, endpoint) = proxy.rewrite_path("/users/42");
    assert_eq!(endpoint.unwrap().name, "first");
}

#[test]
fn target_url_merges_base_and_request_query() {
    let proxy = proxy("http://upstream:8080/base?token=abc", BackendConfig::default());

    let url = proxy.target_url("/users", "page=2");
    assert_eq!(url.as_str(), "http://upstream:8080/base/users?token=abc&page=2");

    let url = proxy.target_url("/users", "");
    assert_eq!(url.as_str(), "http://upstream:8080/base/users?token=abc");
}

#[test]
fn target_url_without_base_path_or_query() {
    let proxy = proxy("http://upstream:8080", BackendConfig::default());

    let url = proxy.target_url("/users/42", "active=true");
    assert_eq!(url.as_str(), "http://upstream:8080/users/42?active=true");
}

#[test]
fn set_and_remove_headers_apply() {
    let config = BackendConfig {
        header_rewriting: Some(HeaderRewritingConfig {
            hostname_handling: HostnameHandling::UseBackend,
            custom_hostname: String::new(),
            set_headers: HashMap::from([(
                "X-Forwarded-By".to_string(),
                "portico".to_string(),
            )]),
            remove_headers: vec!["X-Secret".to_string()],
        }),
        ..Default::default()
    };
    let proxy = proxy("http://upstream:8080", config);

    let mut headers = HeaderMap::new();
    headers.insert("x-secret", HeaderValue::from_static("leak"));
    headers.insert("x-keep", HeaderValue::from_static("yes"));

    proxy.shape_headers(None, &mut headers, Some("client.example.com"));

    assert_eq!(headers.get("x-forwarded-by").unwrap(), "portico");
    assert!(headers.get("x-secret").is_none());
    assert_eq!(headers.get("x-keep").unwrap(), "yes");
    // use_backend leaves Host derivation to the upstream URL.
    assert!(headers.get(HOST).is_none());
}

#[test]
fn hostname_handling_modes() {
    // preserve_original keeps the client's Host.
    let proxy_preserve = proxy("http://upstream:8080", BackendConfig::default());
    let mut headers = HeaderMap::new();
    proxy_preserve.shape_headers(None, &mut headers, Some("client.example.com"));
    assert_eq!(headers.get(HOST).unwrap(), "client.example.com");

    // use_custom sets the configured name.
    let config = BackendConfig {
        header_rewriting: Some(HeaderRewritingConfig {
            hostname_handling: HostnameHandling::UseCustom,
            custom_hostname: "internal.example.com".to_string(),
            set_headers: HashMap::new(),
            remove_headers: vec![],
        }),
        ..Default::default()
    };
    let proxy_custom = proxy("http://upstream:8080", config);
    let mut headers = HeaderMap::new();
    proxy_custom.shape_headers(None, &mut headers, Some("client.example.com"));
    assert_eq!(headers.get(HOST).unwrap(), "internal.example.com");
}

#[test]
fn endpoint_header_rules_supersede_backend_rules() {
    let config = BackendConfig {
        header_rewriting: Some(HeaderRewritingConfig {
            hostname_handling: HostnameHandling::PreserveOriginal,
            custom_hostname: String::new(),
            set_headers: HashMap::from([("X-Level".to_string(), "backend".to_string())]),
            remove_headers: vec![],
        }),
        ..Default::default()
    };
    let endpoint = EndpointConfig {
        name: "special".to_string(),
        pattern: "/special/*".to_string(),
        path_rewriting: None,
        header_rewriting: Some(HeaderRewritingConfig {
            hostname_handling: HostnameHandling::PreserveOriginal,
            custom_hostname: String::new(),
            set_headers: HashMap::from([("X-Level".to_string(), "endpoint".to_string())]),
            remove_headers: vec![],
        }),
    };
    let proxy = proxy("http://upstream:8080", config);

    let mut headers = HeaderMap::new();
    proxy.shape_headers(Some(&endpoint), &mut headers, None);
    assert_eq!(headers.get("x-level").unwrap(), "endpoint");
}

#[actix_web::test]
async fn request_parts_filter_hop_by_hop_headers() {
    let req = actix_web::test::TestRequest::get()
        .uri("/api/users?active=true")
        .insert_header(("Host", "gateway.example.com"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("Authorization", "Bearer token"))
        .insert_header(("X-Tenant-ID", "acme"))
        .to_http_request();

    let parts = RequestParts::from_request(&req, Some("acme".to_string()));

    assert_eq!(parts.path, "/api/users");
    assert_eq!(parts.query, "active=true");
    assert_eq!(parts.original_host.as_deref(), Some("gateway.example.com"));
    assert!(parts.headers.get("connection").is_none());
    assert!(parts.headers.get("host").is_none());
    assert_eq!(parts.headers.get("authorization").unwrap(), "Bearer token");
    assert_eq!(parts.tenant.as_deref(), Some("acme"));
}
