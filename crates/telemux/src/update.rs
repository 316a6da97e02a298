//! Update payload types and the per-dispatch update envelope.
//!
//! A [`RawUpdate`] carries exactly one [`UpdatePayload`] variant, shaped after
//! the Telegram Bot API JSON. [`Update`] wraps it for the lifetime of a single
//! dispatch and resolves the effective message, chat and user in a fixed order
//! so filters never have to match every variant themselves.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PersistenceError;
use crate::persistence::PersistenceContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            first_name: first_name.into(),
            last_name: None,
            username: None,
        }
    }
}

impl Display for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(username) = self.username.as_deref().filter(|name| !name.is_empty()) {
            return write!(f, "{username}");
        }
        match self.last_name.as_deref().filter(|name| !name.is_empty()) {
            Some(last_name) => write!(f, "{} {}", self.first_name, last_name),
            None => write!(f, "{}", self.first_name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `ChatKind` values.
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Chat {
    pub fn new(id: i64, kind: ChatKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            username: None,
        }
    }

    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }

    pub fn is_super_group(&self) -> bool {
        self.kind == ChatKind::Supergroup
    }

    pub fn is_channel(&self) -> bool {
        self.kind == ChatKind::Channel
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// File-backed attachment (voice, audio, animation, document, sticker, video).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Venue {
    pub location: Location,
    pub title: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub voice: Option<FileAttachment>,
    #[serde(default)]
    pub audio: Option<FileAttachment>,
    #[serde(default)]
    pub animation: Option<FileAttachment>,
    #[serde(default)]
    pub document: Option<FileAttachment>,
    #[serde(default)]
    pub sticker: Option<FileAttachment>,
    #[serde(default)]
    pub video: Option<FileAttachment>,
    #[serde(default)]
    pub video_note: Option<FileAttachment>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub venue: Option<Venue>,
    #[serde(default)]
    pub new_chat_members: Option<Vec<User>>,
    #[serde(default)]
    pub left_chat_member: Option<User>,
}

impl Message {
    /// Builds a bare message in `chat`; callers fill in the fields they need.
    pub fn new(message_id: i64, chat: Chat) -> Self {
        Self {
            message_id,
            from: None,
            chat,
            date: 0,
            text: None,
            photo: None,
            voice: None,
            audio: None,
            animation: None,
            document: None,
            sticker: None,
            video: None,
            video_note: None,
            contact: None,
            location: None,
            venue: None,
            new_chat_members: None,
            left_chat_member: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_from(mut self, from: User) -> Self {
        self.from = Some(from);
        self
    }

    /// Message text, or an empty string when the message has none.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub total_amount: i64,
    #[serde(default)]
    pub invoice_payload: String,
}

/// The one event carried by a raw update.
///
/// Serialized externally tagged, so `{"message": {...}}` decodes into
/// [`UpdatePayload::Message`] exactly as the Bot API shapes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum UpdatePayload {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
}

impl UpdatePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::EditedMessage(_) => "edited_message",
            Self::ChannelPost(_) => "channel_post",
            Self::EditedChannelPost(_) => "edited_channel_post",
            Self::CallbackQuery(_) => "callback_query",
            Self::InlineQuery(_) => "inline_query",
            Self::ChosenInlineResult(_) => "chosen_inline_result",
            Self::ShippingQuery(_) => "shipping_query",
            Self::PreCheckoutQuery(_) => "pre_checkout_query",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(flatten)]
    pub payload: UpdatePayload,
}

impl RawUpdate {
    pub fn new(update_id: i64, payload: UpdatePayload) -> Self {
        Self { update_id, payload }
    }
}

/// Identity of the bot on whose behalf updates are dispatched.
///
/// Command filters compare `@botname` suffixes against `username`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotIdentity {
    pub username: String,
}

impl BotIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// One raw update plus the scratch state of a single dispatch.
#[derive(Debug)]
pub struct Update {
    pub raw: RawUpdate,
    pub bot: BotIdentity,
    /// Scratch values passed between steps of the same handler.
    pub context: Map<String, Value>,
    consumed: bool,
    persistence_context: Option<PersistenceContext>,
}

impl Update {
    pub fn new(bot: BotIdentity, raw: RawUpdate) -> Self {
        Self {
            raw,
            bot,
            context: Map::new(),
            consumed: false,
            persistence_context: None,
        }
    }

    pub fn payload(&self) -> &UpdatePayload {
        &self.raw.payload
    }

    /// Stops the remaining steps of the currently running handler.
    pub fn consume(&mut self) {
        self.consumed = true;
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub(crate) fn clear_consumed(&mut self) {
        self.consumed = false;
    }

    /// The message of a new-message update; `None` for every other kind.
    pub fn message(&self) -> Option<&Message> {
        match &self.raw.payload {
            UpdatePayload::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn effective_message(&self) -> Option<&Message> {
        match &self.raw.payload {
            UpdatePayload::Message(message)
            | UpdatePayload::EditedMessage(message)
            | UpdatePayload::ChannelPost(message)
            | UpdatePayload::EditedChannelPost(message) => Some(message),
            UpdatePayload::CallbackQuery(query) => query.message.as_ref(),
            UpdatePayload::InlineQuery(_)
            | UpdatePayload::ChosenInlineResult(_)
            | UpdatePayload::ShippingQuery(_)
            | UpdatePayload::PreCheckoutQuery(_) => None,
        }
    }

    pub fn effective_chat(&self) -> Option<&Chat> {
        self.effective_message().map(|message| &message.chat)
    }

    pub fn effective_user(&self) -> Option<&User> {
        let user = match &self.raw.payload {
            UpdatePayload::Message(message)
            | UpdatePayload::EditedMessage(message)
            | UpdatePayload::ChannelPost(message)
            | UpdatePayload::EditedChannelPost(message) => message.from.as_ref(),
            UpdatePayload::InlineQuery(query) => Some(&query.from),
            UpdatePayload::ChosenInlineResult(result) => Some(&result.from),
            UpdatePayload::CallbackQuery(query) => Some(&query.from),
            UpdatePayload::ShippingQuery(query) => Some(&query.from),
            UpdatePayload::PreCheckoutQuery(query) => Some(&query.from),
        };
        if user.is_none() {
            tracing::warn!(
                update_id = self.raw.update_id,
                kind = self.raw.payload.kind(),
                "sender not found in update; this is possibly an integration bug"
            );
        }
        user
    }

    /// Chat and sender metadata, shaped for structured log fields.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        let (chat_id, chat_name) = match self.effective_chat() {
            Some(chat) => (chat.id.to_string(), chat.title.clone().unwrap_or_default()),
            None => (String::new(), String::new()),
        };
        let (user_id, username) = match self.effective_user() {
            Some(user) => (user.id.to_string(), user.to_string()),
            None => (String::new(), String::new()),
        };
        BTreeMap::from([
            ("chat_id", chat_id),
            ("chat_name", chat_name),
            ("user_id", user_id),
            ("username", username),
        ])
    }

    /// Reads a context entry stored as an array of strings (`args`, `matches`).
    pub fn context_strings(&self, key: &str) -> Vec<String> {
        self.context
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Persistence accessor of the conversation currently handling this update.
    pub fn persistence(&self) -> Result<&PersistenceContext, PersistenceError> {
        self.persistence_context
            .as_ref()
            .ok_or(PersistenceError::NoActiveConversation)
    }

    pub fn persistence_mut(&mut self) -> Result<&mut PersistenceContext, PersistenceError> {
        self.persistence_context
            .as_mut()
            .ok_or(PersistenceError::NoActiveConversation)
    }

    pub fn has_persistence(&self) -> bool {
        self.persistence_context.is_some()
    }

    pub(crate) fn bind_persistence(&mut self, context: PersistenceContext) {
        self.persistence_context = Some(context);
    }

    pub(crate) fn unbind_persistence(&mut self) -> Option<PersistenceContext> {
        self.persistence_context.take()
    }
}
