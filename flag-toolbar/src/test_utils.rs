use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::client::{ClientCallback, ClientEvent, FlagClient};
use crate::errors::{ClientError, StorageError};
use crate::events::{Listener, ToolbarEvent};
use crate::state::engine::OverrideEngine;
use crate::state::models::{Context, Variant};
use crate::storage::StorageBackend;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockClientCall {
    IsEnabled(String),
    GetVariant(String),
    UpdateContext(Context),
    Start,
}

struct MockState {
    flags: HashMap<String, bool>,
    variants: HashMap<String, Variant>,
    context: Option<Context>,
    update_context_ret: Result<(), ClientError>,
    listeners: HashMap<ClientEvent, Vec<ClientCallback>>,
    panicking: HashSet<String>,
    calls: Vec<MockClientCall>,
}

/// Scriptable [`FlagClient`]. Clones share state, so a test can keep a
/// handle while the toolbar owns another.
#[derive(Clone)]
pub struct MockFlagClient {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFlagClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFlagClient {
    /// A client without context support.
    pub fn new() -> Self {
        MockFlagClient {
            state: Arc::new(Mutex::new(MockState {
                flags: HashMap::new(),
                variants: HashMap::new(),
                context: None,
                update_context_ret: Ok(()),
                listeners: HashMap::new(),
                panicking: HashSet::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// A client that supports context and starts out with `context`.
    pub fn with_context(context: Context) -> Self {
        let client = MockFlagClient::new();
        lock(&client.state).context = Some(context);
        client
    }

    pub fn with_flag(self, name: &str, enabled: bool) -> Self {
        self.set_flag(name, enabled);
        self
    }

    pub fn with_variant(self, name: &str, variant: Variant) -> Self {
        self.set_variant(name, variant);
        self
    }

    pub fn set_flag(&self, name: &str, enabled: bool) {
        lock(&self.state).flags.insert(name.to_string(), enabled);
    }

    pub fn set_variant(&self, name: &str, variant: Variant) {
        lock(&self.state).variants.insert(name.to_string(), variant);
    }

    /// What the next `update_context` calls resolve to.
    pub fn set_update_context_ret(&self, ret: Result<(), ClientError>) {
        lock(&self.state).update_context_ret = ret;
    }

    pub fn panic_on(&self, name: &str) {
        lock(&self.state).panicking.insert(name.to_string());
    }

    /// Fires every callback registered for `event`, like the real client
    /// would after fetching new toggles.
    pub fn emit(&self, event: ClientEvent) {
        let callbacks = lock(&self.state)
            .listeners
            .get(&event)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    pub fn get_calls(&self) -> Vec<MockClientCall> {
        lock(&self.state).calls.clone()
    }

    pub fn context_updates(&self) -> Vec<Context> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                MockClientCall::UpdateContext(context) => Some(context.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn listener_count(&self, event: ClientEvent) -> usize {
        lock(&self.state)
            .listeners
            .get(&event)
            .map_or(0, Vec::len)
    }

    fn record(&self, name: &str, call: MockClientCall) {
        let should_panic = {
            let mut state = lock(&self.state);
            state.calls.push(call);
            state.panicking.contains(name)
        };
        if should_panic {
            panic!("mock client failed to evaluate {name}");
        }
    }
}

#[async_trait]
impl FlagClient for MockFlagClient {
    fn is_enabled(&self, name: &str) -> bool {
        self.record(name, MockClientCall::IsEnabled(name.to_string()));
        lock(&self.state).flags.get(name).copied().unwrap_or(false)
    }

    fn get_variant(&self, name: &str) -> Variant {
        self.record(name, MockClientCall::GetVariant(name.to_string()));
        lock(&self.state)
            .variants
            .get(name)
            .cloned()
            .unwrap_or_else(Variant::disabled)
    }

    fn get_context(&self) -> Option<Context> {
        lock(&self.state).context.clone()
    }

    async fn update_context(&self, context: Context) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        if state.context.is_none() {
            return Err(ClientError::Unsupported("update_context"));
        }
        state
            .calls
            .push(MockClientCall::UpdateContext(context.clone()));
        let ret = state.update_context_ret.clone();
        if ret.is_ok() {
            state.context = Some(context);
        }
        ret
    }

    fn on(&self, event: ClientEvent, callback: ClientCallback) {
        lock(&self.state)
            .listeners
            .entry(event)
            .or_default()
            .push(callback);
    }

    async fn start(&self) -> Result<(), ClientError> {
        lock(&self.state).calls.push(MockClientCall::Start);
        Ok(())
    }
}

/// Collects every event an engine emits.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ToolbarEvent>>>,
}

impl EventRecorder {
    pub fn attach(engine: &OverrideEngine) -> Self {
        let recorder = EventRecorder::default();
        let events = recorder.events.clone();
        let listener: Listener = Arc::new(move |event: &ToolbarEvent| {
            lock(&events).push(event.clone());
        });
        engine.subscribe(listener);
        recorder
    }

    pub fn events(&self) -> Vec<ToolbarEvent> {
        lock(&self.events).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(ToolbarEvent::kind).collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

/// Backend that rejects every operation, like storage disabled by the host.
pub struct FailingStorage;

impl StorageBackend for FailingStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::QuotaExceeded)
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// An update callback and the number of times it ran.
pub fn counting_callback() -> (ClientCallback, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let callback: ClientCallback = Arc::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    (callback, calls)
}

/// Lets tasks spawned on the current runtime run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
