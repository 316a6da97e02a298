//! Conversation persistence contract and the volatile in-memory backend.
//!
//! State and data are scoped by [`PersistenceKey`]: the same user in two chats,
//! or in two conversations of one chat, never shares either. Unknown keys read
//! back as the empty state and an empty data map.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::errors::PersistenceError;

/// Values accumulated across the steps of one conversation.
pub type ConversationData = Map<String, Value>;

/// Identity scoping conversation state and data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistenceKey {
    pub conversation_id: String,
    pub user_id: i64,
    pub chat_id: i64,
}

impl PersistenceKey {
    pub fn new(conversation_id: impl Into<String>, user_id: i64, chat_id: i64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            chat_id,
        }
    }
}

/// Renders as `conversation:user:chat`.
impl Display for PersistenceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.conversation_id, self.user_id, self.chat_id)
    }
}

impl FromStr for PersistenceKey {
    type Err = PersistenceError;

    /// Parses from the right, so conversation ids may themselves contain `:`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| PersistenceError::InvalidKey {
            raw: raw.to_string(),
            reason,
        };
        let mut parts = raw.rsplitn(3, ':');
        let chat_id = parts.next().ok_or_else(|| invalid("missing chat id"))?;
        let user_id = parts.next().ok_or_else(|| invalid("missing user id"))?;
        let conversation_id = parts
            .next()
            .ok_or_else(|| invalid("missing conversation id"))?;
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id
                .parse()
                .map_err(|_| invalid("user id is not an integer"))?,
            chat_id: chat_id
                .parse()
                .map_err(|_| invalid("chat id is not an integer"))?,
        })
    }
}

/// Storage capability behind every conversation.
///
/// Implementations must be safe to call concurrently for distinct keys.
pub trait ConversationPersistence: Send + Sync {
    fn get_state(&self, key: &PersistenceKey) -> Result<String, PersistenceError>;
    fn set_state(&self, key: &PersistenceKey, state: &str) -> Result<(), PersistenceError>;
    fn get_data(&self, key: &PersistenceKey) -> Result<ConversationData, PersistenceError>;
    fn set_data(&self, key: &PersistenceKey, data: ConversationData)
        -> Result<(), PersistenceError>;
}

/// Accessor bound to one key for the duration of one conversation dispatch.
pub struct PersistenceContext {
    persistence: Arc<dyn ConversationPersistence>,
    key: PersistenceKey,
    transition: Option<String>,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("key", &self.key)
            .field("transition", &self.transition)
            .finish_non_exhaustive()
    }
}

impl PersistenceContext {
    pub fn new(persistence: Arc<dyn ConversationPersistence>, key: PersistenceKey) -> Self {
        Self {
            persistence,
            key,
            transition: None,
        }
    }

    pub fn key(&self) -> &PersistenceKey {
        &self.key
    }

    pub fn get_state(&self) -> Result<String, PersistenceError> {
        self.persistence.get_state(&self.key)
    }

    /// Writes the new state through and records it for state-entry hooks.
    pub fn set_state(&mut self, state: impl Into<String>) -> Result<(), PersistenceError> {
        let state = state.into();
        self.persistence.set_state(&self.key, &state)?;
        tracing::debug!(key = %self.key, state = %state, "conversation state set");
        self.transition = Some(state);
        Ok(())
    }

    pub fn get_data(&self) -> Result<ConversationData, PersistenceError> {
        self.persistence.get_data(&self.key)
    }

    pub fn set_data(&self, data: ConversationData) -> Result<(), PersistenceError> {
        self.persistence.set_data(&self.key, data)
    }

    pub fn clear_data(&self) -> Result<(), PersistenceError> {
        self.persistence.set_data(&self.key, ConversationData::new())
    }

    pub(crate) fn take_transition(&mut self) -> Option<String> {
        self.transition.take()
    }
}

/// Volatile backend; everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct LocalPersistence {
    states: RwLock<HashMap<PersistenceKey, String>>,
    data: RwLock<HashMap<PersistenceKey, ConversationData>>,
}

impl LocalPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationPersistence for LocalPersistence {
    fn get_state(&self, key: &PersistenceKey) -> Result<String, PersistenceError> {
        let states = self
            .states
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("local states"))?;
        Ok(states.get(key).cloned().unwrap_or_default())
    }

    fn set_state(&self, key: &PersistenceKey, state: &str) -> Result<(), PersistenceError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("local states"))?;
        states.insert(key.clone(), state.to_string());
        Ok(())
    }

    fn get_data(&self, key: &PersistenceKey) -> Result<ConversationData, PersistenceError> {
        let data = self
            .data
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("local data"))?;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    fn set_data(
        &self,
        key: &PersistenceKey,
        data: ConversationData,
    ) -> Result<(), PersistenceError> {
        let mut stored = self
            .data
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("local data"))?;
        stored.insert(key.clone(), data);
        Ok(())
    }
}
