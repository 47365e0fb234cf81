/// Strips a base-path prefix from a request path, keeping a leading slash.
pub fn strip_base_path(path: &str, base: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Prepends a rewrite prefix to a path, collapsing duplicate slashes at the join.
pub fn prepend_base_path(path: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    let prefix = prefix.trim_end_matches('/');
    if path == "/" {
        return prefix.to_string();
    }
    format!("{}{}", prefix, path)
}

/// Joins the upstream base-URL query with the request query, `&`-separated.
pub fn merge_query(base_query: Option<&str>, request_query: &str) -> Option<String> {
    match (base_query.filter(|q| !q.is_empty()), request_query) {
        (Some(base), "") => Some(base.to_string()),
        (Some(base), req) => Some(format!("{}&{}", base, req)),
        (None, "") => None,
        (None, req) => Some(req.to_string()),
    }
}
