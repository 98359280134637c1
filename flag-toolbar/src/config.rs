use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;

use envconfig::Envconfig;
use once_cell::sync::Lazy;

use crate::errors::ConfigError;
use crate::state::engine::EngineOptions;
use crate::storage::{StorageMode, DEFAULT_STORAGE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(ConfigError::InvalidBool(s.to_string())),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Which payload the binary reads on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A client features response, overridden before evaluation.
    Definitions,
    /// An evaluated toggles response, overridden after evaluation.
    Toggles,
}

impl FromStr for PayloadKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "definitions" | "features" => Ok(PayloadKind::Definitions),
            "toggles" => Ok(PayloadKind::Toggles),
            other => Err(ConfigError::UnknownPayloadKind(other.to_string())),
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Definitions => write!(f, "definitions"),
            PayloadKind::Toggles => write!(f, "toggles"),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "TOOLBAR_STORAGE_MODE", default = "local")]
    pub storage_mode: StorageMode,

    #[envconfig(from = "TOOLBAR_STORAGE_KEY", default = "unleash-toolbar-state")]
    pub storage_key: String,

    #[envconfig(from = "TOOLBAR_SORT_ALPHABETICALLY", default = "false")]
    pub sort_alphabetically: FlexBool,

    #[envconfig(from = "TOOLBAR_ENABLE_COOKIE_SYNC", default = "false")]
    pub enable_cookie_sync: FlexBool,

    #[envconfig(from = "TOOLBAR_STATE_DIR", default = ".unleash-toolbar")]
    pub state_dir: String,

    /// Raw request `Cookie` header to take the snapshot from.
    #[envconfig(from = "TOOLBAR_COOKIE")]
    pub cookie: Option<String>,

    #[envconfig(from = "TOOLBAR_PAYLOAD", default = "definitions")]
    pub payload: PayloadKind,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            storage_mode: StorageMode::Memory,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            sort_alphabetically: FlexBool(false),
            enable_cookie_sync: FlexBool(false),
            state_dir: std::env::temp_dir()
                .join("unleash-toolbar-test")
                .to_string_lossy()
                .into_owned(),
            cookie: None,
            payload: PayloadKind::Definitions,
            debug: FlexBool(false),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            sort_alphabetically: *self.sort_alphabetically,
        }
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test_case("true", true)]
    #[test_case("1", true)]
    #[test_case(" Yes ", true)]
    #[test_case("on", true)]
    #[test_case("false", false)]
    #[test_case("0", false)]
    #[test_case("off", false)]
    #[test_case("", false)]
    fn test_flex_bool(raw: &str, expected: bool) {
        assert_eq!(raw.parse::<FlexBool>().map(bool::from), Ok(expected));
    }

    #[test]
    fn test_flex_bool_rejects_garbage() {
        assert_eq!(
            "maybe".parse::<FlexBool>(),
            Err(ConfigError::InvalidBool("maybe".to_string()))
        );
    }

    #[test]
    fn test_payload_kind() {
        assert_eq!("toggles".parse::<PayloadKind>(), Ok(PayloadKind::Toggles));
        assert_eq!(
            "Definitions".parse::<PayloadKind>(),
            Ok(PayloadKind::Definitions)
        );
        assert!("yaml".parse::<PayloadKind>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.storage_mode, StorageMode::Local);
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert!(!*config.sort_alphabetically);
        assert!(!*config.enable_cookie_sync);
        assert_eq!(config.state_dir(), PathBuf::from(".unleash-toolbar"));
        assert_eq!(config.cookie, None);
        assert_eq!(config.payload, PayloadKind::Definitions);
        assert!(!*config.debug);
    }

    #[test]
    fn test_config_from_values() {
        let values: HashMap<String, String> = [
            ("TOOLBAR_STORAGE_MODE", "tab"),
            ("TOOLBAR_SORT_ALPHABETICALLY", "yes"),
            ("TOOLBAR_COOKIE", "a=1"),
            ("TOOLBAR_PAYLOAD", "toggles"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::init_from_hashmap(&values).unwrap();
        assert_eq!(config.storage_mode, StorageMode::Session);
        assert!(config.engine_options().sort_alphabetically);
        assert_eq!(config.cookie.as_deref(), Some("a=1"));
        assert_eq!(config.payload, PayloadKind::Toggles);
    }

    #[test]
    fn test_unknown_storage_mode_is_rejected() {
        let values = HashMap::from([("TOOLBAR_STORAGE_MODE".to_string(), "disk".to_string())]);
        assert!(Config::init_from_hashmap(&values).is_err());
    }

    #[test]
    fn test_default_test_config_static() {
        let config = &*DEFAULT_TEST_CONFIG;
        assert_eq!(config.storage_mode, StorageMode::Memory);
        assert!(!*config.enable_cookie_sync);
    }
}
