use std::sync::Arc;

use tracing::{info, warn};

use crate::client::wrapper::OverrideClient;
use crate::client::FlagClient;
use crate::config::Config;
use crate::state::engine::{EngineOptions, OverrideEngine};
use crate::storage::cookie::CookieJar;
use crate::storage::{StateStorage, StorageBackends};

/// Start-up bundle: one engine, shared by every client it wraps.
#[derive(Clone)]
pub struct Toolbar {
    engine: Arc<OverrideEngine>,
}

impl Toolbar {
    /// Builds storage and engine from `config`. The cookie jar is only used
    /// when cookie sync is enabled.
    pub fn init(config: &Config, cookie_jar: Option<Arc<dyn CookieJar>>) -> Self {
        let backends = StorageBackends::with_state_dir(config.state_dir());
        let mut storage = StateStorage::new(config.storage_mode, &config.storage_key, &backends);

        match (*config.enable_cookie_sync, cookie_jar) {
            (true, Some(jar)) => storage = storage.with_cookie_mirror(jar),
            (true, None) => {
                warn!("cookie sync enabled but no cookie jar was provided")
            }
            (false, _) => {}
        }

        info!(
            storage_mode = %config.storage_mode,
            storage_key = %config.storage_key,
            cookie_sync = *config.enable_cookie_sync,
            "initializing toolbar"
        );

        Toolbar::from_storage(storage, config.engine_options())
    }

    pub fn from_storage(storage: StateStorage, options: EngineOptions) -> Self {
        Toolbar {
            engine: Arc::new(OverrideEngine::new(storage, options)),
        }
    }

    /// Wraps `client` so its evaluations go through the toolbar. Wrapping an
    /// already wrapped client returns the existing wrapper.
    pub fn wrap_client(&self, client: Arc<dyn FlagClient>) -> Arc<OverrideClient> {
        OverrideClient::wrap(client, self.engine.clone())
    }

    pub fn engine(&self) -> &Arc<OverrideEngine> {
        &self.engine
    }
}
