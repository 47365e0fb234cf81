//! Glob-style URL pattern matching and rewriting.
//!
//! Route patterns, endpoint-override patterns, and endpoint rewrite rules all
//! use the same small glob dialect: literal path segments plus `*`, which
//! matches any run of characters including `/`. A trailing `/*` therefore
//! behaves as a catch-all prefix match (`/api/*` matches `/api/users/42`).
//!
//! Patterns are compiled to anchored regexes once and cached per pattern so
//! request-path matching never recompiles.

use ahash::HashMap as AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::sync::RwLock;

static COMPILED: Lazy<RwLock<AHashMap<String, Arc<Regex>>>> =
    Lazy::new(|| RwLock::new(AHashMap::default()));

/// Converts a glob pattern into an anchored regex pattern string.
///
/// Every character except `*` is matched literally (regex metacharacters are
/// escaped); each `*` becomes a capture group `(.*)` so rewrites can splice
/// the matched tail into a replacement.
fn glob_to_regex(pattern: &str) -> String {
    let mut regex_pattern = String::with_capacity(pattern.len() * 2);
    regex_pattern.push('^');

    for ch in pattern.chars() {
        match ch {
            '*' => regex_pattern.push_str("(.*)"),
            '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' | '{' | '}' => {
                regex_pattern.push('\\');
                regex_pattern.push(ch);
            }
            _ => regex_pattern.push(ch),
        }
    }

    regex_pattern.push('$');
    regex_pattern
}

/// Returns the compiled regex for a glob pattern, compiling and caching it on
/// first use. Invalid patterns cannot occur: every glob translates to a valid
/// escaped regex.
fn compiled(pattern: &str) -> Arc<Regex> {
    if let Some(re) = COMPILED.read().unwrap_or_else(|e| e.into_inner()).get(pattern) {
        return re.clone();
    }

    let re = Arc::new(
        Regex::new(&glob_to_regex(pattern)).expect("escaped glob pattern is always a valid regex"),
    );
    COMPILED
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(pattern.to_string(), re.clone());
    re
}

/// Tests whether a request path matches a glob pattern.
///
/// # Examples
///
/// ```
/// use portico_rs::utils::pattern::glob_match;
///
/// assert!(glob_match("/api/users/*", "/api/users/42"));
/// assert!(glob_match("/api/*/detail", "/api/orders/detail"));
/// assert!(!glob_match("/api/users/*", "/api/orders/42"));
/// ```
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == path;
    }
    compiled(pattern).is_match(path)
}

/// Returns true when the pattern contains a wildcard and is therefore not an
/// exact-match route.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Applies a glob rewrite rule to a path.
///
/// When `pattern` matches `path`, the wildcard captures are spliced into
/// `replacement` in order, one per `*` in the replacement; surplus captures
/// are dropped and a replacement without wildcards is returned verbatim.
/// Returns `None` when the pattern does not match.
///
/// # Examples
///
/// ```
/// use portico_rs::utils::pattern::rewrite;
///
/// assert_eq!(
///     rewrite("/legacy/*", "/v2/*", "/legacy/users/42"),
///     Some("/v2/users/42".to_string())
/// );
/// assert_eq!(rewrite("/ping", "/healthz", "/ping"), Some("/healthz".to_string()));
/// assert_eq!(rewrite("/legacy/*", "/v2/*", "/other"), None);
/// ```
pub fn rewrite(pattern: &str, replacement: &str, path: &str) -> Option<String> {
    if !pattern.contains('*') {
        return (pattern == path).then(|| replacement.to_string());
    }

    let re = compiled(pattern);
    let captures = re.captures(path)?;

    let mut result = String::with_capacity(replacement.len() + path.len());
    let mut capture_index = 1;
    for ch in replacement.chars() {
        if ch == '*' {
            if let Some(m) = captures.get(capture_index) {
                result.push_str(m.as_str());
                capture_index += 1;
            }
        } else {
            result.push(ch);
        }
    }

    Some(result)
}
