//! Update dispatch engine for chat bots.
//!
//! Routes each inbound update through nestable, first-match-wins muxes of
//! filtered handlers, and layers persisted per-user conversation state machines
//! on top of them. Transport (polling, sending replies) stays with the caller.

pub mod conversation;
pub mod errors;
pub mod file_persistence;
pub mod filters;
pub mod handlers;
pub mod mux;
pub mod persistence;
pub mod update;

pub use conversation::{ConversationHandler, ENTER_STATE_SUFFIX, MAX_ENTER_HOOK_CHAIN};
pub use errors::{DispatchError, FilterError, PersistenceError};
pub use file_persistence::FilePersistence;
pub use filters::Filter;
pub use handlers::{Handler, Step, ARGS_CONTEXT_KEY, MATCHES_CONTEXT_KEY};
pub use mux::{Mux, Processor, RecoverFn};
pub use persistence::{
    ConversationData, ConversationPersistence, LocalPersistence, PersistenceContext,
    PersistenceKey,
};
pub use update::{
    BotIdentity, CallbackQuery, Chat, ChatKind, Message, RawUpdate, Update, UpdatePayload, User,
};
