pub mod cookie;
pub mod file;
pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::errors::{ConfigError, StorageError};
use crate::metrics_consts::STORAGE_ERRORS_COUNTER;
use crate::state::models::ToolbarState;
use crate::storage::cookie::{encode_cookie_value, CookieJar, CookieOptions, TOOLBAR_COOKIE_NAME};
use crate::storage::file::FileStorage;
use crate::storage::memory::MemoryStorage;

pub const DEFAULT_STORAGE_KEY: &str = "unleash-toolbar-state";

/// Where the snapshot lives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Nothing is persisted.
    Memory,
    /// Survives reloads for the lifetime of one session (tab or process).
    Session,
    /// Survives restarts.
    Local,
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "none" => Ok(StorageMode::Memory),
            "session" | "tab" => Ok(StorageMode::Session),
            "local" | "durable" => Ok(StorageMode::Local),
            other => Err(ConfigError::UnknownStorageMode(other.to_string())),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::Session => write!(f, "session"),
            StorageMode::Local => write!(f, "local"),
        }
    }
}

pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// The two persistent backends a mode can select from.
#[derive(Clone)]
pub struct StorageBackends {
    pub session: Arc<dyn StorageBackend>,
    pub local: Arc<dyn StorageBackend>,
}

impl StorageBackends {
    pub fn new(session: Arc<dyn StorageBackend>, local: Arc<dyn StorageBackend>) -> Self {
        StorageBackends { session, local }
    }

    /// In-process session storage plus files under `state_dir`.
    pub fn with_state_dir(state_dir: impl Into<std::path::PathBuf>) -> Self {
        StorageBackends {
            session: Arc::new(MemoryStorage::new()),
            local: Arc::new(FileStorage::new(state_dir)),
        }
    }
}

/// Best-effort persistence of the toolbar snapshot.
///
/// Nothing here returns an error to the caller: unreadable snapshots load as
/// `None` and failed writes are logged and dropped.
pub struct StateStorage {
    mode: StorageMode,
    key: String,
    backend: Option<Arc<dyn StorageBackend>>,
    mirror: Option<Arc<dyn CookieJar>>,
}

impl StateStorage {
    pub fn new(mode: StorageMode, key: impl Into<String>, backends: &StorageBackends) -> Self {
        let backend = match mode {
            StorageMode::Memory => None,
            StorageMode::Session => Some(backends.session.clone()),
            StorageMode::Local => Some(backends.local.clone()),
        };

        StateStorage {
            mode,
            key: key.into(),
            backend,
            mirror: None,
        }
    }

    pub fn in_memory() -> Self {
        StateStorage {
            mode: StorageMode::Memory,
            key: DEFAULT_STORAGE_KEY.to_string(),
            backend: None,
            mirror: None,
        }
    }

    /// Also writes every snapshot to the toolbar cookie so a server can
    /// apply the same overrides.
    pub fn with_cookie_mirror(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.mirror = Some(jar);
        self
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Option<ToolbarState> {
        let backend = self.backend.as_ref()?;

        let raw = match backend.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    key = %self.key,
                    error = %e,
                    "failed to read toolbar state"
                );
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "load").increment(1);
                return None;
            }
        };

        match serde_json::from_str::<ToolbarState>(&raw) {
            Ok(state) => {
                debug!(mode = %self.mode, flags = state.flags.len(), "loaded toolbar state");
                Some(state)
            }
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    key = %self.key,
                    error = %e,
                    "discarding unreadable toolbar state"
                );
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "load").increment(1);
                None
            }
        }
    }

    pub fn save(&self, state: &ToolbarState) {
        if self.backend.is_none() && self.mirror.is_none() {
            return;
        }

        let serialized = match serde_json::to_string(state) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(error = %e, "failed to serialize toolbar state");
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "save").increment(1);
                return;
            }
        };

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set_item(&self.key, &serialized) {
                warn!(
                    mode = %self.mode,
                    key = %self.key,
                    error = %e,
                    "failed to save toolbar state"
                );
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "save").increment(1);
            }
        }

        if let Some(jar) = &self.mirror {
            let encoded = encode_cookie_value(&serialized);
            if let Err(e) = jar.set(TOOLBAR_COOKIE_NAME, &encoded, &CookieOptions::default()) {
                warn!(error = %e, "failed to mirror toolbar state into cookie");
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "mirror").increment(1);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove_item(&self.key) {
                warn!(
                    mode = %self.mode,
                    key = %self.key,
                    error = %e,
                    "failed to clear toolbar state"
                );
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "clear").increment(1);
            }
        }

        if let Some(jar) = &self.mirror {
            if let Err(e) = jar.remove(TOOLBAR_COOKIE_NAME) {
                warn!(error = %e, "failed to remove toolbar cookie");
                counter!(STORAGE_ERRORS_COUNTER, "operation" => "clear").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::{FlagMetadata, FlagType};
    use crate::storage::cookie::{decode_cookie_value, CookieStore, MemoryCookieJar};
    use crate::test_utils::FailingStorage;

    fn sample_state() -> ToolbarState {
        let mut state = ToolbarState::default();
        state
            .flags
            .insert("checkout".to_string(), FlagMetadata::new(FlagType::Flag));
        state
    }

    fn backends() -> (MemoryStorage, MemoryStorage, StorageBackends) {
        let session = MemoryStorage::new();
        let local = MemoryStorage::new();
        let backends = StorageBackends::new(Arc::new(session.clone()), Arc::new(local.clone()));
        (session, local, backends)
    }

    #[test]
    fn test_session_mode_writes_only_session_backend() {
        let (session, local, backends) = backends();
        let storage = StateStorage::new(StorageMode::Session, DEFAULT_STORAGE_KEY, &backends);

        storage.save(&sample_state());

        assert!(session.get_item(DEFAULT_STORAGE_KEY).unwrap().is_some());
        assert!(local.get_item(DEFAULT_STORAGE_KEY).unwrap().is_none());
        assert_eq!(storage.load(), Some(sample_state()));
    }

    #[test]
    fn test_local_mode_writes_only_local_backend() {
        let (session, local, backends) = backends();
        let storage = StateStorage::new(StorageMode::Local, DEFAULT_STORAGE_KEY, &backends);

        storage.save(&sample_state());

        assert!(local.get_item(DEFAULT_STORAGE_KEY).unwrap().is_some());
        assert!(session.get_item(DEFAULT_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_memory_mode_touches_nothing() {
        let (session, local, backends) = backends();
        let storage = StateStorage::new(StorageMode::Memory, DEFAULT_STORAGE_KEY, &backends);

        storage.save(&sample_state());

        assert!(session.is_empty());
        assert!(local.is_empty());
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn test_corrupt_snapshot_loads_as_none() {
        let (session, _, backends) = backends();
        session.set_item("custom-key", "{not json").unwrap();
        let storage = StateStorage::new(StorageMode::Session, "custom-key", &backends);

        assert_eq!(storage.load(), None);
    }

    #[test]
    fn test_backend_failures_are_swallowed() {
        let failing: Arc<dyn StorageBackend> = Arc::new(FailingStorage);
        let backends = StorageBackends::new(failing.clone(), failing);
        let storage = StateStorage::new(StorageMode::Local, DEFAULT_STORAGE_KEY, &backends);

        storage.save(&sample_state());
        storage.clear();
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn test_cookie_mirror_follows_saves_and_clears() {
        let (_, _, backends) = backends();
        let jar = Arc::new(MemoryCookieJar::new());
        let mirror: Arc<dyn CookieJar> = jar.clone();
        let storage = StateStorage::new(StorageMode::Session, DEFAULT_STORAGE_KEY, &backends)
            .with_cookie_mirror(mirror);

        storage.save(&sample_state());
        let cookie = jar.get(TOOLBAR_COOKIE_NAME).expect("cookie should be mirrored");
        let decoded = decode_cookie_value(&cookie.value).unwrap();
        let restored: ToolbarState = serde_json::from_str(&decoded).unwrap();
        assert_eq!(restored, sample_state());
        assert_eq!(
            jar.options(TOOLBAR_COOKIE_NAME).unwrap().max_age,
            chrono::Duration::days(7)
        );

        storage.clear();
        assert!(jar.get(TOOLBAR_COOKIE_NAME).is_none());
    }

    #[test]
    fn test_storage_mode_parsing() {
        assert_eq!("none".parse::<StorageMode>(), Ok(StorageMode::Memory));
        assert_eq!("Tab".parse::<StorageMode>(), Ok(StorageMode::Session));
        assert_eq!("durable".parse::<StorageMode>(), Ok(StorageMode::Local));
        assert_eq!(
            "disk".parse::<StorageMode>(),
            Err(ConfigError::UnknownStorageMode("disk".to_string()))
        );
    }
}
