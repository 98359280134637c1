use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use metrics::counter;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::client::{ClientCallback, ClientEvent, FlagClient};
use crate::errors::ClientError;
use crate::events::{panic_message, Listener, Subscription, ToolbarEvent};
use crate::metrics_consts::{
    CONTEXT_PUSH_ERRORS_COUNTER, FLAG_EVALUATIONS_COUNTER, LISTENER_ERRORS_COUNTER,
};
use crate::state::engine::{Evaluation, OverrideEngine};
use crate::state::models::{Context, FlagType, FlagValue, Variant};
use crate::state::resolution::resolve_override;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A [`FlagClient`] that answers with toolbar overrides applied.
///
/// Every evaluation asks the wrapped client first, resolves the override on
/// top, and records both values in the engine. Update callbacks registered
/// through [`FlagClient::on`] fire for wrapped-client updates and for toolbar
/// changes alike.
pub struct OverrideClient {
    inner: Arc<dyn FlagClient>,
    engine: Arc<OverrideEngine>,
    /// Context the wrapped client had when it was wrapped. Context overrides
    /// are always re-applied on top of this, never on top of the live
    /// context, which may carry earlier overrides.
    base_context: Context,
    update_listeners: Mutex<Vec<ClientCallback>>,
    runtime: Option<Handle>,
    subscription: Mutex<Option<Subscription>>,
}

impl OverrideClient {
    /// Wraps `client`. Wrapping an `OverrideClient` returns it unchanged.
    pub fn wrap(client: Arc<dyn FlagClient>, engine: Arc<OverrideEngine>) -> Arc<OverrideClient> {
        if let Some(existing) = Arc::clone(&client).as_override_client() {
            return existing;
        }

        let base_context = client.get_context().unwrap_or_default();
        let wrapped = Arc::new(OverrideClient {
            inner: client,
            engine,
            base_context,
            update_listeners: Mutex::new(Vec::new()),
            runtime: Handle::try_current().ok(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&wrapped);
        let on_client_update: ClientCallback = Arc::new(move || {
            if let Some(client) = weak.upgrade() {
                client.handle_client_update();
            }
        });
        wrapped.inner.on(ClientEvent::Update, on_client_update);

        let weak = Arc::downgrade(&wrapped);
        let on_toolbar_event: Listener = Arc::new(move |event: &ToolbarEvent| {
            if let Some(client) = weak.upgrade() {
                client.handle_toolbar_event(event);
            }
        });
        let subscription = wrapped.engine.subscribe(on_toolbar_event);
        *lock(&wrapped.subscription) = Some(subscription);

        wrapped
    }

    /// The wrapped client, for anything the toolbar doesn't intercept.
    pub fn inner(&self) -> &Arc<dyn FlagClient> {
        &self.inner
    }

    pub fn engine(&self) -> &Arc<OverrideEngine> {
        &self.engine
    }

    pub fn base_context(&self) -> &Context {
        &self.base_context
    }

    fn evaluate_inner(&self, name: &str, flag_type: FlagType) -> FlagValue {
        match flag_type {
            FlagType::Flag => FlagValue::Bool(self.inner.is_enabled(name)),
            FlagType::Variant => FlagValue::Variant(self.inner.get_variant(name)),
        }
    }

    fn evaluate(&self, name: &str, flag_type: FlagType) -> Evaluation {
        let live_context = self.inner.get_context().unwrap_or_default();
        let context = self.engine.get_merged_context(&live_context);

        let default_value = self.evaluate_inner(name, flag_type);
        let flag_override = self.engine.get_flag_override(name);
        let effective_value = resolve_override(&default_value, flag_override.as_ref());

        counter!(FLAG_EVALUATIONS_COUNTER, "flag_type" => flag_type.as_str()).increment(1);
        self.engine.record_evaluation(
            name,
            flag_type,
            default_value.clone(),
            effective_value.clone(),
            Some(context),
        );

        Evaluation {
            default_value,
            effective_value,
        }
    }

    fn re_evaluate(&self) {
        self.engine.re_evaluate_all_flags(|name, flag_type| {
            let default_value = self.evaluate_inner(name, flag_type);
            let flag_override = self.engine.get_flag_override(name);
            let effective_value = resolve_override(&default_value, flag_override.as_ref());
            Ok(Evaluation {
                default_value,
                effective_value,
            })
        });
    }

    fn notify_update_listeners(&self) {
        let listeners = lock(&self.update_listeners).clone();

        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener())) {
                error!(
                    error = %panic_message(payload.as_ref()),
                    "update listener panicked"
                );
                counter!(LISTENER_ERRORS_COUNTER, "source" => "client").increment(1);
            }
        }
    }

    fn handle_client_update(&self) {
        self.re_evaluate();
        self.notify_update_listeners();
    }

    fn handle_toolbar_event(self: &Arc<Self>, event: &ToolbarEvent) {
        match event {
            ToolbarEvent::FlagOverrideChanged { .. } => self.notify_update_listeners(),
            ToolbarEvent::ContextOverrideChanged { .. } => self.spawn_context_push(),
            ToolbarEvent::SdkUpdated { .. } => {}
        }
    }

    fn spawn_context_push(self: &Arc<Self>) {
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            warn!("no tokio runtime, context overrides were not pushed to the wrapped client");
            return;
        };

        let client = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = client.push_context_overrides().await {
                error!(
                    error = %e,
                    "failed to push context overrides, flags keep their last known values"
                );
                counter!(CONTEXT_PUSH_ERRORS_COUNTER).increment(1);
            }
        });
    }

    /// Pushes the base context with the current overrides to the wrapped
    /// client, then re-evaluates every known flag and fires update listeners.
    ///
    /// Fields the wrapped client only takes at construction time (app name,
    /// environment) are left out. On failure nothing is re-evaluated.
    pub async fn push_context_overrides(&self) -> Result<(), ClientError> {
        let context = self
            .engine
            .get_merged_context(&self.base_context)
            .without_static_fields();

        match self.inner.update_context(context).await {
            Ok(()) => {}
            Err(ClientError::Unsupported(_)) => {
                debug!("wrapped client has no context support, re-evaluating only");
            }
            Err(e) => return Err(e),
        }

        self.re_evaluate();
        self.notify_update_listeners();
        Ok(())
    }
}

#[async_trait]
impl FlagClient for OverrideClient {
    fn is_enabled(&self, name: &str) -> bool {
        self.evaluate(name, FlagType::Flag)
            .effective_value
            .is_enabled()
    }

    fn get_variant(&self, name: &str) -> Variant {
        let evaluation = self.evaluate(name, FlagType::Variant);
        evaluation
            .effective_value
            .into_variant(&evaluation.default_value)
    }

    fn get_context(&self) -> Option<Context> {
        self.inner
            .get_context()
            .map(|context| self.engine.get_merged_context(&context))
    }

    /// Forwarded as is. Context overrides are tracked separately and survive.
    async fn update_context(&self, context: Context) -> Result<(), ClientError> {
        self.inner.update_context(context).await
    }

    fn on(&self, event: ClientEvent, callback: ClientCallback) {
        match event {
            // Replayed by the wrapper after each re-evaluation, so they are not
            // handed to the wrapped client.
            ClientEvent::Update => {
                let mut listeners = lock(&self.update_listeners);
                if !listeners.iter().any(|l| Arc::ptr_eq(l, &callback)) {
                    listeners.push(callback);
                }
            }
            _ => self.inner.on(event, callback),
        }
    }

    async fn start(&self) -> Result<(), ClientError> {
        self.inner.start().await
    }

    fn as_override_client(self: Arc<Self>) -> Option<Arc<OverrideClient>> {
        Some(self)
    }
}

impl Drop for OverrideClient {
    fn drop(&mut self) {
        let subscription = match self.subscription.get_mut() {
            Ok(subscription) => subscription.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}
