//! Per-identity conversation state machines.
//!
//! A [`ConversationHandler`] resolves the sender's current state, picks the
//! handlers declared for it and binds a [`PersistenceContext`] onto the update
//! while they run. Transitions are explicit `set_state` calls from steps; the
//! arrival in a new state may trigger the handlers declared under
//! `"<state>:enter"` within the same dispatch.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::errors::DispatchError;
use crate::handlers::Handler;
use crate::mux::Processor;
use crate::persistence::{ConversationPersistence, PersistenceContext, PersistenceKey};
use crate::update::Update;

/// Suffix marking the state-entry hooks of a state.
pub const ENTER_STATE_SUFFIX: &str = ":enter";
/// Upper bound on state-entry hooks chained by a single dispatch.
pub const MAX_ENTER_HOOK_CHAIN: usize = 16;

pub struct ConversationHandler {
    conversation_id: String,
    persistence: Arc<dyn ConversationPersistence>,
    states: HashMap<String, Vec<Handler>>,
    defaults: Vec<Handler>,
}

impl std::fmt::Debug for ConversationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut states: Vec<&str> = self.states.keys().map(String::as_str).collect();
        states.sort_unstable();
        f.debug_struct("ConversationHandler")
            .field("conversation_id", &self.conversation_id)
            .field("states", &states)
            .field("defaults", &self.defaults.len())
            .finish_non_exhaustive()
    }
}

impl ConversationHandler {
    pub fn new(
        conversation_id: impl Into<String>,
        persistence: Arc<dyn ConversationPersistence>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            persistence,
            states: HashMap::new(),
            defaults: Vec::new(),
        }
    }

    /// Declares handlers for `state`; `""` is the at-rest state.
    pub fn state(
        mut self,
        state: impl Into<String>,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> Self {
        self.states.entry(state.into()).or_default().extend(handlers);
        self
    }

    /// Declares handlers run right after a step moves the conversation into `state`.
    pub fn on_enter(self, state: &str, handlers: impl IntoIterator<Item = Handler>) -> Self {
        self.state(format!("{state}{ENTER_STATE_SUFFIX}"), handlers)
    }

    /// Fallback handlers tried after the state's own handlers, except at rest.
    pub fn defaults(mut self, handlers: impl IntoIterator<Item = Handler>) -> Self {
        self.defaults.extend(handlers);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Identity of the update's sender in its chat, if both are known.
    pub fn persistence_key(&self, update: &Update) -> Option<PersistenceKey> {
        let chat_id = update.effective_chat()?.id;
        let user_id = update.effective_user()?.id;
        Some(PersistenceKey::new(
            self.conversation_id.clone(),
            user_id,
            chat_id,
        ))
    }

    fn candidates<'a>(&'a self, state: &str) -> impl Iterator<Item = &'a Handler> + 'a {
        let declared = self.states.get(state).map(Vec::as_slice).unwrap_or_default();
        let defaults: &[Handler] = if state.is_empty() {
            &[]
        } else {
            &self.defaults
        };
        declared.iter().chain(defaults)
    }

    fn run_enter_hooks(&self, update: &mut Update, from: String) -> Result<(), DispatchError> {
        let mut current = from;
        let mut entered = 0_usize;
        while let Some(next) = update.persistence_mut()?.take_transition() {
            if next == current {
                break;
            }
            let Some(hooks) = self.states.get(&format!("{next}{ENTER_STATE_SUFFIX}")) else {
                break;
            };
            if entered == MAX_ENTER_HOOK_CHAIN {
                return Err(DispatchError::EnterHookChainExceeded {
                    conversation_id: self.conversation_id.clone(),
                    limit: MAX_ENTER_HOOK_CHAIN,
                });
            }
            entered += 1;
            tracing::debug!(
                conversation_id = %self.conversation_id,
                state = %next,
                "running state-entry hooks"
            );
            current = next;
            let Some(hook) = hooks.iter().find(|hook| hook.accepts(update)) else {
                break;
            };
            update.clear_consumed();
            hook.run_steps(update)?;
        }
        Ok(())
    }
}

impl Processor for ConversationHandler {
    #[tracing::instrument(
        name = "telemux.conversation",
        skip(self, update),
        fields(conversation_id = %self.conversation_id, update_id = update.raw.update_id)
    )]
    fn process(&self, update: &mut Update) -> Result<bool, DispatchError> {
        let Some(key) = self.persistence_key(update) else {
            tracing::debug!("update has no sender or chat; conversation skipped");
            return Ok(false);
        };
        let state = self.persistence.get_state(&key)?;
        let context = PersistenceContext::new(Arc::clone(&self.persistence), key);
        let mut bound = BoundUpdate::bind(update, context);

        let Some(handler) = self.candidates(&state).find(|handler| handler.accepts(&bound)) else {
            return Ok(false);
        };
        tracing::debug!(state = %state, "conversation handler matched");
        handler.run_steps(&mut bound)?;
        self.run_enter_hooks(&mut bound, state)?;
        Ok(true)
    }
}

/// Keeps a persistence context attached for exactly one dispatch, even when a
/// step faults or panics.
struct BoundUpdate<'u> {
    update: &'u mut Update,
}

impl<'u> BoundUpdate<'u> {
    fn bind(update: &'u mut Update, context: PersistenceContext) -> Self {
        update.bind_persistence(context);
        Self { update }
    }
}

impl Deref for BoundUpdate<'_> {
    type Target = Update;

    fn deref(&self) -> &Update {
        self.update
    }
}

impl DerefMut for BoundUpdate<'_> {
    fn deref_mut(&mut self) -> &mut Update {
        self.update
    }
}

impl Drop for BoundUpdate<'_> {
    fn drop(&mut self) {
        self.update.unbind_persistence();
    }
}
