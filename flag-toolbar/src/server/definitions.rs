use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::models::Variant;

pub const DEFAULT_STRATEGY_NAME: &str = "default";
pub const FULL_VARIANT_WEIGHT: u32 = 1000;

/// Body of a client features endpoint: `{version, features: [...], ...}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClientFeaturesResponse {
    #[serde(default)]
    pub features: Vec<FeatureDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeatureDefinition {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategies: Vec<StrategyDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<VariantDefinition>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeatureDefinition {
    /// The smallest definition a flag service would send for `name`.
    pub fn minimal(name: impl Into<String>) -> Self {
        FeatureDefinition {
            name: name.into(),
            enabled: false,
            strategies: Vec::new(),
            variants: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<VariantDefinition>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StrategyDefinition {
    /// Always-on strategy with no parameters or constraints.
    pub fn always_on() -> Self {
        StrategyDefinition {
            name: DEFAULT_STRATEGY_NAME.to_string(),
            parameters: Map::new(),
            constraints: None,
            variants: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDefinition {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        VariantDefinition {
            name: name.into(),
            weight,
            weight_type: None,
            stickiness: None,
            payload: None,
            extra: Map::new(),
        }
    }
}

/// One entry of a frontend/proxy evaluation response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedToggle {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "Variant::disabled")]
    pub variant: Variant,
    #[serde(default)]
    pub impression_data: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EvaluatedToggle {
    pub fn new(name: impl Into<String>, enabled: bool, variant: Variant) -> Self {
        EvaluatedToggle {
            name: name.into(),
            enabled,
            variant,
            impression_data: false,
            extra: Map::new(),
        }
    }
}

/// Body of a frontend evaluation endpoint: `{toggles: [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EvaluatedTogglesResponse {
    #[serde(default)]
    pub toggles: Vec<EvaluatedToggle>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_are_preserved() {
        let raw = json!({
            "version": 2,
            "features": [{
                "name": "checkout",
                "enabled": true,
                "impressionData": false,
                "strategies": [{
                    "name": "flexibleRollout",
                    "parameters": {"rollout": "50", "groupId": "checkout"},
                    "constraints": [],
                    "segments": [1]
                }],
                "variants": [{
                    "name": "blue",
                    "weight": 500,
                    "weightType": "variable",
                    "stickiness": "default",
                    "overrides": []
                }]
            }]
        });

        let parsed: ClientFeaturesResponse = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.extra["version"], json!(2));
        assert_eq!(
            parsed.features[0].variants.as_ref().unwrap()[0]
                .weight_type
                .as_deref(),
            Some("variable")
        );

        assert_json_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_toggle_variant_fields_are_preserved() {
        let raw = json!({
            "toggles": [{
                "name": "banner",
                "enabled": true,
                "impressionData": false,
                "variant": {
                    "name": "blue",
                    "enabled": true,
                    "featureEnabled": true,
                    "extraField": 1,
                    "payload": {"type": "string", "value": "sky"}
                }
            }]
        });

        let parsed: EvaluatedTogglesResponse = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.toggles[0].variant.extra["extraField"], json!(1));

        assert_json_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_toggle_without_variant_gets_disabled_variant() {
        let toggle: EvaluatedToggle =
            serde_json::from_value(json!({"name": "checkout", "enabled": true})).unwrap();
        assert_eq!(toggle.variant, Variant::disabled());
        assert!(!toggle.impression_data);
    }
}
