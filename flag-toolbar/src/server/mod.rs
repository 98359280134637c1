pub mod definitions;

use std::collections::HashSet;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::SnapshotError;
use crate::metrics_consts::{SERVER_OVERRIDES_APPLIED_COUNTER, SNAPSHOT_PARSE_ERRORS_COUNTER};
use crate::server::definitions::{
    ClientFeaturesResponse, EvaluatedToggle, FeatureDefinition, StrategyDefinition,
    VariantDefinition, FULL_VARIANT_WEIGHT,
};
use crate::state::models::{FlagOverride, FlagValue, ToolbarState, Variant};
use crate::state::resolution::resolve_override;
use crate::storage::cookie::{decode_cookie_value, CookieStore, TOOLBAR_COOKIE_NAME};

const FIXED_WEIGHT_TYPE: &str = "fix";
const DEFAULT_STICKINESS: &str = "default";

/// Percent-decodes and parses a snapshot as stored in the toolbar cookie.
pub fn decode_snapshot(raw: &str) -> Result<ToolbarState, SnapshotError> {
    let decoded = decode_cookie_value(raw)?;
    Ok(serde_json::from_str(&decoded)?)
}

/// Like [`decode_snapshot`], but an unreadable snapshot is logged and
/// treated as absent.
pub fn parse_snapshot(raw: &str) -> Option<ToolbarState> {
    match decode_snapshot(raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable toolbar snapshot");
            counter!(SNAPSHOT_PARSE_ERRORS_COUNTER).increment(1);
            None
        }
    }
}

pub fn get_toolbar_state_from_cookies(store: &dyn CookieStore) -> Option<ToolbarState> {
    let cookie = store.get(TOOLBAR_COOKIE_NAME)?;
    parse_snapshot(&cookie.value)
}

/// Bakes the snapshot's overrides into a definitions payload, before any
/// evaluation happens. The input is left untouched.
///
/// Overridden flags the payload doesn't know are appended as minimal
/// definitions, in snapshot order.
pub fn apply_overrides_to_definitions(
    definitions: &ClientFeaturesResponse,
    snapshot: Option<&ToolbarState>,
) -> ClientFeaturesResponse {
    let mut result = definitions.clone();
    let Some(snapshot) = snapshot else {
        return result;
    };

    let mut applied = 0u64;
    for feature in result.features.iter_mut() {
        if let Some(flag_override) = snapshot
            .flags
            .get(&feature.name)
            .and_then(|meta| meta.flag_override.as_ref())
        {
            override_definition(feature, flag_override);
            applied += 1;
        }
    }

    let known: HashSet<String> = result.features.iter().map(|f| f.name.clone()).collect();
    for (name, flag_override) in snapshot.overrides() {
        if known.contains(name) {
            continue;
        }
        debug!(flag = %name, "synthesizing definition for overridden flag");
        let mut feature = FeatureDefinition::minimal(name.clone());
        override_definition(&mut feature, flag_override);
        result.features.push(feature);
        applied += 1;
    }

    counter!(SERVER_OVERRIDES_APPLIED_COUNTER, "payload" => "definitions").increment(applied);
    result
}

fn override_definition(feature: &mut FeatureDefinition, flag_override: &FlagOverride) {
    match flag_override {
        FlagOverride::Flag { value: true } => {
            feature.enabled = true;
            feature.strategies = vec![StrategyDefinition::always_on()];
        }
        FlagOverride::Flag { value: false } => {
            feature.enabled = false;
            feature.strategies = Vec::new();
        }
        FlagOverride::Variant { variant_key } => {
            // Newer payloads carry variants on strategies rather than on the
            // feature; either source is rewritten and set on both.
            let current = feature.variants.clone().or_else(|| {
                feature
                    .strategies
                    .iter()
                    .find_map(|strategy| strategy.variants.clone())
            });
            let variants = pin_variant(current.unwrap_or_default(), variant_key);

            let mut strategy = StrategyDefinition::always_on();
            strategy.variants = Some(variants.clone());

            feature.enabled = true;
            feature.strategies = vec![strategy];
            feature.variants = Some(variants);
        }
    }
}

/// Gives `target` the full weight and every other variant none.
fn pin_variant(mut variants: Vec<VariantDefinition>, target: &str) -> Vec<VariantDefinition> {
    if !variants.iter().any(|variant| variant.name == target) {
        let mut pinned = VariantDefinition::new(target, 0);
        pinned.stickiness = Some(DEFAULT_STICKINESS.to_string());
        variants.push(pinned);
    }

    for variant in variants.iter_mut() {
        variant.weight = if variant.name == target {
            FULL_VARIANT_WEIGHT
        } else {
            0
        };
        variant.weight_type = Some(FIXED_WEIGHT_TYPE.to_string());
    }
    variants
}

/// Bakes the snapshot's overrides into already-evaluated toggles. The input
/// is left untouched; overridden flags missing from it are appended.
pub fn apply_overrides_to_evaluated_toggles(
    toggles: &[EvaluatedToggle],
    snapshot: Option<&ToolbarState>,
) -> Vec<EvaluatedToggle> {
    let mut result = toggles.to_vec();
    let Some(snapshot) = snapshot else {
        return result;
    };

    let mut applied = 0u64;
    for toggle in result.iter_mut() {
        if let Some(flag_override) = snapshot
            .flags
            .get(&toggle.name)
            .and_then(|meta| meta.flag_override.as_ref())
        {
            override_toggle(toggle, flag_override);
            applied += 1;
        }
    }

    let known: HashSet<String> = result.iter().map(|t| t.name.clone()).collect();
    for (name, flag_override) in snapshot.overrides() {
        if known.contains(name) {
            continue;
        }
        let mut toggle = EvaluatedToggle::new(name.clone(), false, Variant::disabled());
        override_toggle(&mut toggle, flag_override);
        result.push(toggle);
        applied += 1;
    }

    counter!(SERVER_OVERRIDES_APPLIED_COUNTER, "payload" => "toggles").increment(applied);
    result
}

fn override_toggle(toggle: &mut EvaluatedToggle, flag_override: &FlagOverride) {
    let default_value = FlagValue::Variant(toggle.variant.clone());
    let effective = resolve_override(&default_value, Some(flag_override));
    toggle.enabled = effective.is_enabled();
    toggle.variant = effective.into_variant(&default_value);

    // Keep whichever spelling the flag service used.
    match toggle.variant.extra.get_mut("featureEnabled") {
        Some(feature_enabled) => *feature_enabled = Value::Bool(toggle.enabled),
        None => toggle.variant.feature_enabled = Some(toggle.enabled),
    }
}

/// Reads the snapshot from the toolbar cookie and applies it to
/// `definitions`.
pub fn apply_toolbar_overrides(
    definitions: &ClientFeaturesResponse,
    cookies: &dyn CookieStore,
) -> ClientFeaturesResponse {
    let snapshot = get_toolbar_state_from_cookies(cookies);
    apply_overrides_to_definitions(definitions, snapshot.as_ref())
}

/// Reads the snapshot from the toolbar cookie and applies it to `toggles`.
pub fn apply_toolbar_overrides_to_toggles(
    toggles: &[EvaluatedToggle],
    cookies: &dyn CookieStore,
) -> Vec<EvaluatedToggle> {
    let snapshot = get_toolbar_state_from_cookies(cookies);
    apply_overrides_to_evaluated_toggles(toggles, snapshot.as_ref())
}
