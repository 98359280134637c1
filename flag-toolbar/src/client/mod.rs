pub mod wrapper;

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::wrapper::OverrideClient;
use crate::errors::ClientError;
use crate::state::models::{Context, Variant};

/// Native notifications an evaluation client can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    Ready,
    Update,
    Error,
    Synchronized,
    Impression,
}

pub type ClientCallback = Arc<dyn Fn() + Send + Sync>;

/// The surface of a feature-flag evaluation client that the toolbar
/// intercepts.
///
/// Context support is optional: clients without it keep the default
/// `get_context`/`update_context` implementations.
#[async_trait]
pub trait FlagClient: Send + Sync {
    fn is_enabled(&self, name: &str) -> bool;

    fn get_variant(&self, name: &str) -> Variant;

    fn get_context(&self) -> Option<Context> {
        None
    }

    async fn update_context(&self, _context: Context) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("update_context"))
    }

    fn on(&self, event: ClientEvent, callback: ClientCallback);

    async fn start(&self) -> Result<(), ClientError>;

    /// Lets wrapping detect an already-wrapped client. Only
    /// [`OverrideClient`] returns `Some`.
    fn as_override_client(self: Arc<Self>) -> Option<Arc<OverrideClient>> {
        None
    }
}
