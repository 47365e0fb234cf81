//! Feature flag evaluator tests.

use portico_rs::services::flags::{ConfigFlagEvaluator, FeatureFlagEvaluator, FlagError};
use std::collections::HashMap;

fn evaluator() -> ConfigFlagEvaluator {
    ConfigFlagEvaluator::new(
        HashMap::from([("beta-ui".to_string(), false), ("new-search".to_string(), true)]),
        HashMap::from([(
            "acme".to_string(),
            HashMap::from([("beta-ui".to_string(), true)]),
        )]),
    )
}

#[test]
fn global_flags_resolve() {
    let flags = evaluator();
    assert_eq!(flags.evaluate("beta-ui", None, "/"), Ok(false));
    assert_eq!(flags.evaluate("new-search", None, "/"), Ok(true));
}

#[test]
fn tenant_flags_override_global() {
    let flags = evaluator();
    assert_eq!(flags.evaluate("beta-ui", Some("acme"), "/"), Ok(true));
    // A tenant without an entry falls through to the global map.
    assert_eq!(flags.evaluate("beta-ui", Some("globex"), "/"), Ok(false));
    assert_eq!(flags.evaluate("new-search", Some("acme"), "/"), Ok(true));
}

#[test]
fn missing_flags_are_not_found() {
    let flags = evaluator();
    assert_eq!(
        flags.evaluate("missing", None, "/"),
        Err(FlagError::NotFound { flag: "missing".to_string() })
    );
}

#[test]
fn evaluate_with_default_swallows_errors() {
    let flags = evaluator();
    assert!(flags.evaluate_with_default("missing", None, "/", true));
    assert!(!flags.evaluate_with_default("missing", None, "/", false));
    assert!(!flags.evaluate_with_default("beta-ui", None, "/", true));
}

#[test]
fn tenant_flags_can_be_installed_later() {
    let flags = evaluator();
    flags.set_tenant_flags(
        "globex".to_string(),
        HashMap::from([("new-search".to_string(), false)]),
    );
    assert_eq!(flags.evaluate("new-search", Some("globex"), "/"), Ok(false));
}

#[test]
fn visible_flags_merge_tenant_over_global() {
    let flags = evaluator();
    let visible = flags.visible_flags(Some("acme"));
    assert_eq!(visible["beta-ui"], true);
    assert_eq!(visible["new-search"], true);
    assert_eq!(flags.visible_flags(None)["beta-ui"], false);
}

struct NoDecisionEvaluator;

impl FeatureFlagEvaluator for NoDecisionEvaluator {
    fn evaluate(
        &self,
        flag_id: &str,
        _tenant_id: Option<&str>,
        _request_path: &str,
    ) -> Result<bool, FlagError> {
        Err(FlagError::NoDecision { flag: flag_id.to_string() })
    }
}

#[test]
fn no_decision_falls_back_to_the_default() {
    let external = NoDecisionEvaluator;
    assert!(external.evaluate_with_default("anything", Some("acme"), "/", true));
    assert!(!external.evaluate_with_default("anything", Some("acme"), "/", false));
}
