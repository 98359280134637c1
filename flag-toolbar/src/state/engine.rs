use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use metrics::counter;
use tracing::{debug, warn};

use crate::errors::EvaluationError;
use crate::events::{panic_message, EventBroadcaster, Listener, Subscription, ToolbarEvent};
use crate::metrics_consts::{
    CONTEXT_OVERRIDE_CHANGES_COUNTER, FLAG_REEVALUATION_ERRORS_COUNTER, OVERRIDE_CHANGES_COUNTER,
};
use crate::state::models::{
    Context, ContextField, FlagMetadata, FlagOverride, FlagType, FlagValue, ToolbarState,
};
use crate::state::resolution::resolve_override;
use crate::storage::StateStorage;

/// Fresh default and effective values for one flag, produced during a
/// re-evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub default_value: FlagValue,
    pub effective_value: FlagValue,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// List flags alphabetically instead of first-seen order.
    pub sort_alphabetically: bool,
}

/// Owner of the toolbar state.
///
/// Every mutation happens under one lock, is persisted, and only then
/// announced. Listeners run after the lock is released, so they are free to
/// call back into the engine.
pub struct OverrideEngine {
    state: Mutex<ToolbarState>,
    storage: StateStorage,
    events: EventBroadcaster,
    options: EngineOptions,
}

impl OverrideEngine {
    pub fn new(storage: StateStorage, options: EngineOptions) -> Self {
        let state = storage.load().unwrap_or_default();

        OverrideEngine {
            state: Mutex::new(state),
            storage,
            events: EventBroadcaster::new(),
            options,
        }
    }

    pub fn in_memory() -> Self {
        OverrideEngine::new(StateStorage::in_memory(), EngineOptions::default())
    }

    fn lock_state(&self) -> MutexGuard<'_, ToolbarState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Records what the evaluator returned for `name`.
    ///
    /// An existing override is kept verbatim. Only the first sighting of a
    /// flag is announced; routine re-evaluations stay quiet.
    pub fn record_evaluation(
        &self,
        name: &str,
        flag_type: FlagType,
        default_value: FlagValue,
        effective_value: FlagValue,
        context: Option<Context>,
    ) {
        let is_new = {
            let mut state = self.lock_state();
            let is_new = match state.flags.get_mut(name) {
                Some(meta) => {
                    meta.last_default_value = default_value;
                    meta.last_effective_value = effective_value;
                    meta.last_context = context;
                    false
                }
                None => {
                    state.flags.insert(
                        name.to_string(),
                        FlagMetadata {
                            flag_type,
                            last_default_value: default_value,
                            last_effective_value: effective_value,
                            last_context: context,
                            flag_override: None,
                        },
                    );
                    true
                }
            };
            self.storage.save(&state);
            is_new
        };

        if is_new {
            debug!(flag = name, ?flag_type, "first evaluation of flag");
            self.events.emit(&ToolbarEvent::SdkUpdated {
                timestamp: Self::now(),
            });
        }
    }

    /// Sets (or with `None`, clears) the override for `name` and recomputes
    /// its effective value. Unknown flags are created on the spot, typed after
    /// the override.
    pub fn set_flag_override(&self, name: &str, flag_override: Option<FlagOverride>) {
        {
            let mut state = self.lock_state();
            let meta = state.flags.entry(name.to_string()).or_insert_with(|| {
                let flag_type = flag_override
                    .as_ref()
                    .map(FlagOverride::flag_type)
                    .unwrap_or(FlagType::Flag);
                FlagMetadata::new(flag_type)
            });
            meta.last_effective_value =
                resolve_override(&meta.last_default_value, flag_override.as_ref());
            meta.flag_override = flag_override.clone();
            self.storage.save(&state);
        }

        counter!(OVERRIDE_CHANGES_COUNTER, "cleared" => flag_override.is_none().to_string())
            .increment(1);
        self.events.emit(&ToolbarEvent::FlagOverrideChanged {
            name: name.to_string(),
            flag_override,
            timestamp: Self::now(),
        });
    }

    pub fn get_flag_override(&self, name: &str) -> Option<FlagOverride> {
        self.lock_state()
            .flags
            .get(name)
            .and_then(|meta| meta.flag_override.clone())
    }

    pub fn get_flag_metadata(&self, name: &str) -> Option<FlagMetadata> {
        self.lock_state().flags.get(name).cloned()
    }

    /// Merges `partial` into the context overrides. Fields it carries replace
    /// the current ones; properties are merged key by key.
    pub fn set_context_override(&self, partial: Context) {
        let context_overrides = {
            let mut state = self.lock_state();
            state.context_overrides = state.context_overrides.merged_with(&partial);
            self.storage.save(&state);
            state.context_overrides.clone()
        };

        counter!(CONTEXT_OVERRIDE_CHANGES_COUNTER).increment(1);
        self.events
            .emit(&ToolbarEvent::ContextOverrideChanged { context_overrides });
    }

    pub fn remove_context_override(&self, field: &ContextField) {
        let context_overrides = {
            let mut state = self.lock_state();
            state.context_overrides.remove(field);
            self.storage.save(&state);
            state.context_overrides.clone()
        };

        counter!(CONTEXT_OVERRIDE_CHANGES_COUNTER).increment(1);
        self.events
            .emit(&ToolbarEvent::ContextOverrideChanged { context_overrides });
    }

    pub fn get_context_overrides(&self) -> Context {
        self.lock_state().context_overrides.clone()
    }

    /// `base` with the context overrides laid on top. No side effects.
    pub fn get_merged_context(&self, base: &Context) -> Context {
        base.merged_with(&self.lock_state().context_overrides)
    }

    /// Clears every flag override, emitting one event per flag that had one.
    pub fn reset_overrides(&self) {
        let cleared: Vec<String> = {
            let mut state = self.lock_state();
            let mut cleared = Vec::new();
            for (name, meta) in state.flags.iter_mut() {
                if meta.flag_override.take().is_some() {
                    meta.last_effective_value = meta.last_default_value.clone();
                    cleared.push(name.clone());
                }
            }
            if !cleared.is_empty() {
                self.storage.save(&state);
            }
            cleared
        };

        for name in cleared {
            counter!(OVERRIDE_CHANGES_COUNTER, "cleared" => "true").increment(1);
            self.events.emit(&ToolbarEvent::FlagOverrideChanged {
                name,
                flag_override: None,
                timestamp: Self::now(),
            });
        }
    }

    pub fn reset_context_overrides(&self) {
        {
            let mut state = self.lock_state();
            state.context_overrides = Context::default();
            self.storage.save(&state);
        }

        counter!(CONTEXT_OVERRIDE_CHANGES_COUNTER).increment(1);
        self.events.emit(&ToolbarEvent::ContextOverrideChanged {
            context_overrides: Context::default(),
        });
    }

    /// Forgets every flag and context override. Visibility is kept.
    pub fn reset_all(&self) {
        {
            let mut state = self.lock_state();
            state.flags.clear();
            state.context_overrides = Context::default();
            self.storage.save(&state);
        }

        self.events.emit(&ToolbarEvent::SdkUpdated {
            timestamp: Self::now(),
        });
    }

    /// Runs `evaluator` for every known flag and stores the results.
    ///
    /// The evaluator runs without the state lock held. A flag whose evaluation
    /// fails or panics keeps its previous values. One `sdk_updated` event is
    /// emitted once the pass is done.
    pub fn re_evaluate_all_flags<F>(&self, mut evaluator: F)
    where
        F: FnMut(&str, FlagType) -> Result<Evaluation, EvaluationError>,
    {
        let known: Vec<(String, FlagType)> = self
            .lock_state()
            .flags
            .iter()
            .map(|(name, meta)| (name.clone(), meta.flag_type))
            .collect();

        let mut results = Vec::with_capacity(known.len());
        for (name, flag_type) in known {
            let outcome = catch_unwind(AssertUnwindSafe(|| evaluator(&name, flag_type)))
                .unwrap_or_else(|payload| {
                    Err(EvaluationError::Panicked(
                        name.clone(),
                        panic_message(payload.as_ref()),
                    ))
                });

            match outcome {
                Ok(evaluation) => results.push((name, evaluation)),
                Err(e) => {
                    warn!(flag = %name, error = %e, "keeping stale values for flag");
                    counter!(FLAG_REEVALUATION_ERRORS_COUNTER).increment(1);
                }
            }
        }

        {
            let mut state = self.lock_state();
            for (name, evaluation) in results {
                if let Some(meta) = state.flags.get_mut(&name) {
                    // The override may have changed while the lock was released;
                    // resolve against the one stored now.
                    meta.last_effective_value =
                        resolve_override(&evaluation.default_value, meta.flag_override.as_ref());
                    meta.last_default_value = evaluation.default_value;
                }
            }
            self.storage.save(&state);
        }

        self.events.emit(&ToolbarEvent::SdkUpdated {
            timestamp: Self::now(),
        });
    }

    /// An independent copy of the whole state.
    pub fn get_state(&self) -> ToolbarState {
        self.lock_state().clone()
    }

    pub fn subscribe(&self, listener: Listener) -> Subscription {
        self.events.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    pub fn get_flag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_state().flags.keys().cloned().collect();
        if self.options.sort_alphabetically {
            names.sort();
        }
        names
    }

    pub fn set_visibility(&self, visible: bool) {
        let mut state = self.lock_state();
        state.is_visible = Some(visible);
        self.storage.save(&state);
    }

    /// `None` until the visibility has been set once.
    pub fn get_visibility(&self) -> Option<bool> {
        self.lock_state().is_visible
    }

    /// Wipes the persisted snapshot (and the cookie mirror); in-memory state
    /// is left alone.
    pub fn clear_persistence(&self) {
        self.storage.clear();
    }

    pub fn storage(&self) -> &StateStorage {
        &self.storage
    }
}
