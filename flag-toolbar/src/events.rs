use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use metrics::counter;
use serde::Serialize;

use crate::metrics_consts::LISTENER_ERRORS_COUNTER;
use crate::state::models::{Context, FlagOverride};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolbarEvent {
    FlagOverrideChanged {
        name: String,
        #[serde(rename = "override")]
        flag_override: Option<FlagOverride>,
        timestamp: i64,
    },
    ContextOverrideChanged {
        #[serde(rename = "contextOverrides")]
        context_overrides: Context,
    },
    SdkUpdated {
        timestamp: i64,
    },
}

impl ToolbarEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolbarEvent::FlagOverrideChanged { .. } => "flag_override_changed",
            ToolbarEvent::ContextOverrideChanged { .. } => "context_override_changed",
            ToolbarEvent::SdkUpdated { .. } => "sdk_updated",
        }
    }
}

pub type Listener = Arc<dyn Fn(&ToolbarEvent) + Send + Sync>;

type ListenerSet = Mutex<Vec<Listener>>;

fn lock_listeners(listeners: &ListenerSet) -> MutexGuard<'_, Vec<Listener>> {
    match listeners.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Synchronous fan-out to every registered listener.
///
/// Listeners run in registration order on the emitting thread. A panicking
/// listener is logged and skipped; the rest still see the event.
#[derive(Default)]
pub struct EventBroadcaster {
    listeners: Arc<ListenerSet>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. Subscribing the same `Arc` twice keeps a single
    /// registration.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let mut listeners = lock_listeners(&self.listeners);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener.clone());
        }

        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            listener,
        }
    }

    pub fn emit(&self, event: &ToolbarEvent) {
        // Snapshot so listeners may subscribe or unsubscribe while we deliver.
        let listeners = lock_listeners(&self.listeners).clone();

        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                tracing::error!(
                    event = event.kind(),
                    error = %panic_message(payload.as_ref()),
                    "toolbar listener panicked"
                );
                counter!(LISTENER_ERRORS_COUNTER, "source" => "toolbar").increment(1);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        lock_listeners(&self.listeners).len()
    }
}

/// Handle returned by [`EventBroadcaster::subscribe`]. Dropping it keeps the
/// listener registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    listeners: Weak<ListenerSet>,
    listener: Listener,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock_listeners(&listeners).retain(|l| !Arc::ptr_eq(l, &self.listener));
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
