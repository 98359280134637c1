use std::collections::HashMap;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Flag,
    Variant,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Flag => "flag",
            FlagType::Variant => "variant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VariantPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Variant {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<VariantPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_enabled: Option<bool>,
    /// Fields this crate doesn't model, kept as received (including a
    /// camelCase `featureEnabled`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Variant {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Variant {
            name: name.into(),
            enabled,
            payload: None,
            feature_enabled: None,
            extra: Map::new(),
        }
    }

    /// The variant evaluators hand out when a flag is off or has no variants.
    pub fn disabled() -> Self {
        Variant::new("disabled", false)
    }
}

/// A value a flag evaluation can produce: a boolean for plain flags, a
/// variant for multivariate flags, or nothing when never evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Variant(Variant),
    #[default]
    Null,
}

impl FlagValue {
    pub fn is_enabled(&self) -> bool {
        match self {
            FlagValue::Bool(enabled) => *enabled,
            FlagValue::Variant(variant) => variant.enabled,
            FlagValue::Null => false,
        }
    }

    pub fn as_variant(&self) -> Option<&Variant> {
        match self {
            FlagValue::Variant(variant) => Some(variant),
            _ => None,
        }
    }

    /// Shapes the value for a `get_variant` caller. A boolean forced on keeps
    /// the evaluator's variant; anything else that isn't a variant collapses
    /// to the disabled variant.
    pub fn into_variant(self, default_value: &FlagValue) -> Variant {
        match self {
            FlagValue::Variant(variant) => variant,
            FlagValue::Bool(true) => default_value
                .as_variant()
                .cloned()
                .unwrap_or_else(Variant::disabled),
            FlagValue::Bool(false) | FlagValue::Null => Variant::disabled(),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<Variant> for FlagValue {
    fn from(value: Variant) -> Self {
        FlagValue::Variant(value)
    }
}

/// A locally forced result for one flag. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlagOverride {
    Flag {
        value: bool,
    },
    Variant {
        #[serde(rename = "variantKey")]
        variant_key: String,
    },
}

impl FlagOverride {
    pub fn flag(value: bool) -> Self {
        FlagOverride::Flag { value }
    }

    pub fn variant(variant_key: impl Into<String>) -> Self {
        FlagOverride::Variant {
            variant_key: variant_key.into(),
        }
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagOverride::Flag { .. } => FlagType::Flag,
            FlagOverride::Variant { .. } => FlagType::Variant,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Context {
    /// Overlays `overrides` on top of `self`. Known fields are replaced when
    /// the override carries them, properties merge key by key.
    pub fn merged_with(&self, overrides: &Context) -> Context {
        let mut properties = self.properties.clone();
        properties.extend(
            overrides
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Context {
            user_id: overrides.user_id.clone().or_else(|| self.user_id.clone()),
            session_id: overrides
                .session_id
                .clone()
                .or_else(|| self.session_id.clone()),
            remote_address: overrides
                .remote_address
                .clone()
                .or_else(|| self.remote_address.clone()),
            environment: overrides
                .environment
                .clone()
                .or_else(|| self.environment.clone()),
            app_name: overrides.app_name.clone().or_else(|| self.app_name.clone()),
            properties,
        }
    }

    pub fn remove(&mut self, field: &ContextField) {
        match field {
            ContextField::UserId => self.user_id = None,
            ContextField::SessionId => self.session_id = None,
            ContextField::RemoteAddress => self.remote_address = None,
            ContextField::Environment => self.environment = None,
            ContextField::AppName => self.app_name = None,
            ContextField::Properties => self.properties.clear(),
            ContextField::Property(key) => {
                self.properties.remove(key);
            }
        }
    }

    /// Drops the fields evaluators only accept at construction time.
    pub fn without_static_fields(mut self) -> Context {
        self.app_name = None;
        self.environment = None;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Context::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextField {
    UserId,
    SessionId,
    RemoteAddress,
    Environment,
    AppName,
    Properties,
    Property(String),
}

impl FromStr for ContextField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "userId" => Ok(ContextField::UserId),
            "sessionId" => Ok(ContextField::SessionId),
            "remoteAddress" => Ok(ContextField::RemoteAddress),
            "environment" => Ok(ContextField::Environment),
            "appName" => Ok(ContextField::AppName),
            "properties" => Ok(ContextField::Properties),
            other => match other.strip_prefix("properties.") {
                Some(key) if !key.is_empty() => Ok(ContextField::Property(key.to_string())),
                _ => Err(ConfigError::UnknownContextField(other.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagMetadata {
    pub flag_type: FlagType,
    #[serde(default)]
    pub last_default_value: FlagValue,
    #[serde(default)]
    pub last_effective_value: FlagValue,
    #[serde(default)]
    pub last_context: Option<Context>,
    #[serde(default, rename = "override")]
    pub flag_override: Option<FlagOverride>,
}

impl FlagMetadata {
    pub fn new(flag_type: FlagType) -> Self {
        FlagMetadata {
            flag_type,
            last_default_value: FlagValue::Null,
            last_effective_value: FlagValue::Null,
            last_context: None,
            flag_override: None,
        }
    }
}

/// Everything the toolbar persists. Flag order is first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolbarState {
    #[serde(default)]
    pub flags: IndexMap<String, FlagMetadata>,
    #[serde(default)]
    pub context_overrides: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<bool>,
}

impl ToolbarState {
    /// Flags carrying an override, in first-seen order.
    pub fn overrides(&self) -> impl Iterator<Item = (&String, &FlagOverride)> {
        self.flags
            .iter()
            .filter_map(|(name, meta)| meta.flag_override.as_ref().map(|o| (name, o)))
    }
}
