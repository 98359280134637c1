use std::sync::Arc;

use assert_json_diff::{assert_json_eq, assert_json_include};
use serde_json::json;

use flag_toolbar::config::FlexBool;
use flag_toolbar::config::DEFAULT_TEST_CONFIG;
use flag_toolbar::server::definitions::{ClientFeaturesResponse, EvaluatedToggle};
use flag_toolbar::server::{apply_toolbar_overrides, apply_toolbar_overrides_to_toggles};
use flag_toolbar::state::models::{FlagOverride, Variant};
use flag_toolbar::storage::cookie::{CookieJar, CookieStore, MemoryCookieJar, TOOLBAR_COOKIE_NAME};
use flag_toolbar::toolbar::Toolbar;

/// A toolbar mirroring into a cookie jar, plus the `Cookie` header a browser
/// would send back with it.
fn browser_session(overrides: &[(&str, FlagOverride)]) -> String {
    let mut config = DEFAULT_TEST_CONFIG.clone();
    config.enable_cookie_sync = FlexBool(true);
    let jar = Arc::new(MemoryCookieJar::new());
    let mirror: Arc<dyn CookieJar> = jar.clone();

    let toolbar = Toolbar::init(&config, Some(mirror));
    for (name, flag_override) in overrides {
        toolbar
            .engine()
            .set_flag_override(name, Some(flag_override.clone()));
    }

    let cookie = jar.get(TOOLBAR_COOKIE_NAME).unwrap();
    format!("other=1; {}={}", TOOLBAR_COOKIE_NAME, cookie.value)
}

#[test]
fn it_applies_browser_overrides_to_definitions() {
    let header = browser_session(&[
        ("checkout", FlagOverride::flag(true)),
        ("banner", FlagOverride::variant("green")),
        ("new-nav", FlagOverride::flag(false)),
    ]);
    let request_cookies = MemoryCookieJar::from_cookie_header(&header);

    let definitions: ClientFeaturesResponse = serde_json::from_value(json!({
        "version": 2,
        "features": [
            {"name": "checkout", "enabled": false, "strategies": [], "impressionData": true},
            {"name": "banner", "enabled": true,
             "strategies": [{"name": "default", "parameters": {}}],
             "variants": [{"name": "blue", "weight": 1000, "weightType": "variable"}]},
            {"name": "untouched", "enabled": true,
             "strategies": [{"name": "userWithId", "parameters": {"userIds": "1"}}]}
        ]
    }))
    .unwrap();

    let result = apply_toolbar_overrides(&definitions, &request_cookies);

    assert_json_include!(
        actual: serde_json::to_value(&result).unwrap(),
        expected: json!({
            "version": 2,
            "features": [
                {"name": "checkout", "enabled": true, "impressionData": true,
                 "strategies": [{"name": "default", "parameters": {}}]},
                {"name": "banner", "enabled": true,
                 "variants": [
                    {"name": "blue", "weight": 0, "weightType": "fix"},
                    {"name": "green", "weight": 1000, "weightType": "fix"}
                 ]},
                {"name": "untouched", "enabled": true,
                 "strategies": [{"name": "userWithId", "parameters": {"userIds": "1"}}]},
                {"name": "new-nav", "enabled": false, "strategies": []}
            ]
        })
    );
}

#[test]
fn it_applies_browser_overrides_to_toggles() {
    let header = browser_session(&[("checkout", FlagOverride::flag(false))]);
    let request_cookies = MemoryCookieJar::from_cookie_header(&header);
    let toggles = vec![
        EvaluatedToggle::new("checkout", true, Variant::new("blue", true)),
        EvaluatedToggle::new("other", true, Variant::disabled()),
    ];

    let result = apply_toolbar_overrides_to_toggles(&toggles, &request_cookies);

    assert_json_eq!(
        serde_json::to_value(&result).unwrap(),
        json!([
            {"name": "checkout", "enabled": false, "impressionData": false,
             "variant": {"name": "disabled", "enabled": false, "feature_enabled": false}},
            {"name": "other", "enabled": true, "impressionData": false,
             "variant": {"name": "disabled", "enabled": false}}
        ])
    );
}

#[test]
fn it_ignores_requests_without_a_toolbar_cookie() {
    let request_cookies = MemoryCookieJar::from_cookie_header("session=abc");
    let definitions: ClientFeaturesResponse =
        serde_json::from_value(json!({"features": [{"name": "checkout", "enabled": false}]}))
            .unwrap();

    assert_eq!(
        apply_toolbar_overrides(&definitions, &request_cookies),
        definitions
    );
}
