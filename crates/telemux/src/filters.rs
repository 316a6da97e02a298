//! Filter algebra over update envelopes.
//!
//! Every filter is a pure, total predicate: a field that is structurally absent
//! makes the filter return `false`, never fault. Combinators short-circuit left
//! to right, `and([])` is vacuously true and `or([])` is vacuously false.

use std::fmt::{Debug, Formatter};
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use regex::Regex;

use crate::errors::FilterError;
use crate::update::{Chat, Message, Update, UpdatePayload};

const COMMAND_MARKER: char = '/';

type Predicate = dyn Fn(&Update) -> bool + Send + Sync;

/// Shareable predicate deciding whether a handler applies to an update.
#[derive(Clone)]
pub struct Filter {
    predicate: Arc<Predicate>,
}

impl Filter {
    pub fn new(predicate: impl Fn(&Update) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, update: &Update) -> bool {
        (self.predicate)(update)
    }
}

impl Debug for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Filter(..)")
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        and([self, rhs])
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        or([self, rhs])
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        not(self)
    }
}

/// Accepts every update.
pub fn any() -> Filter {
    Filter::new(|_| true)
}

pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::new(move |update| filters.iter().all(|filter| filter.matches(update)))
}

pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::new(move |update| filters.iter().any(|filter| filter.matches(update)))
}

pub fn not(filter: Filter) -> Filter {
    Filter::new(move |update| !filter.matches(update))
}

pub fn is_message() -> Filter {
    Filter::new(|update| update.message().is_some())
}

pub fn is_edited_message() -> Filter {
    Filter::new(|update| matches!(update.payload(), UpdatePayload::EditedMessage(_)))
}

pub fn is_channel_post() -> Filter {
    Filter::new(|update| matches!(update.payload(), UpdatePayload::ChannelPost(_)))
}

pub fn is_edited_channel_post() -> Filter {
    Filter::new(|update| matches!(update.payload(), UpdatePayload::EditedChannelPost(_)))
}

pub fn is_inline_query() -> Filter {
    Filter::new(|update| matches!(update.payload(), UpdatePayload::InlineQuery(_)))
}

pub fn is_callback_query() -> Filter {
    Filter::new(|update| matches!(update.payload(), UpdatePayload::CallbackQuery(_)))
}

/// Text that is non-empty and is not a command.
pub fn has_text() -> Filter {
    effective_message_has(|message| {
        let text = message.text();
        !text.is_empty() && !text.starts_with(COMMAND_MARKER)
    })
}

/// Any command in a new message; edits, channel posts and callbacks never match.
pub fn is_any_command_message() -> Filter {
    Filter::new(|update| {
        update
            .message()
            .is_some_and(|message| message.text().starts_with(COMMAND_MARKER))
    })
}

/// Matches `/name`, `/name args...` and `/name@botname args...` in new messages.
///
/// A `@botname` suffix must equal the dispatching bot's username exactly,
/// otherwise the command is addressed to another bot and the filter rejects it.
pub fn is_command_message(name: impl Into<String>) -> Filter {
    let name = name.into();
    Filter::new(move |update| {
        let Some(message) = update.message() else {
            return false;
        };
        match parse_command(message.text()) {
            Some(command) => {
                let addressed_here = match command.bot_username {
                    Some(suffix) => suffix == update.bot.username,
                    None => true,
                };
                command.name == name && addressed_here
            }
            None => false,
        }
    })
}

/// Compiles `pattern` once; matches against the effective message text.
pub fn has_regex(pattern: &str) -> Result<Filter, FilterError> {
    let regex = compile_pattern(pattern)?;
    Ok(effective_message_has(move |message| regex.is_match(message.text())))
}

pub fn has_photo() -> Filter {
    effective_message_has(|message| message.photo.is_some())
}

pub fn has_voice() -> Filter {
    effective_message_has(|message| message.voice.is_some())
}

pub fn has_audio() -> Filter {
    effective_message_has(|message| message.audio.is_some())
}

pub fn has_animation() -> Filter {
    effective_message_has(|message| message.animation.is_some())
}

pub fn has_document() -> Filter {
    effective_message_has(|message| message.document.is_some())
}

pub fn has_sticker() -> Filter {
    effective_message_has(|message| message.sticker.is_some())
}

pub fn has_video() -> Filter {
    effective_message_has(|message| message.video.is_some())
}

pub fn has_video_note() -> Filter {
    effective_message_has(|message| message.video_note.is_some())
}

pub fn has_contact() -> Filter {
    effective_message_has(|message| message.contact.is_some())
}

pub fn has_location() -> Filter {
    effective_message_has(|message| message.location.is_some())
}

pub fn has_venue() -> Filter {
    effective_message_has(|message| message.venue.is_some())
}

pub fn is_new_chat_members() -> Filter {
    effective_message_has(|message| {
        message
            .new_chat_members
            .as_ref()
            .is_some_and(|members| !members.is_empty())
    })
}

pub fn is_left_chat_member() -> Filter {
    effective_message_has(|message| message.left_chat_member.is_some())
}

pub fn is_private() -> Filter {
    effective_chat_is(Chat::is_private)
}

pub fn is_group() -> Filter {
    effective_chat_is(Chat::is_group)
}

pub fn is_super_group() -> Filter {
    effective_chat_is(Chat::is_super_group)
}

pub fn is_group_or_super_group() -> Filter {
    effective_chat_is(|chat| chat.is_group() || chat.is_super_group())
}

pub fn is_channel() -> Filter {
    effective_chat_is(Chat::is_channel)
}

/// A command token split out of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: &'a str,
    pub bot_username: Option<&'a str>,
    pub args: &'a str,
}

/// Splits `/name@bot rest` into its parts; `None` when `text` is not a command.
pub fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let body = text.strip_prefix(COMMAND_MARKER)?;
    let (token, args) = body.split_once(' ').unwrap_or((body, ""));
    let (name, bot_username) = match token.split_once('@') {
        Some((name, bot_username)) => (name, Some(bot_username)),
        None => (token, None),
    };
    Some(ParsedCommand {
        name,
        bot_username,
        args,
    })
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, FilterError> {
    Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn effective_message_has(check: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Filter {
    Filter::new(move |update| update.effective_message().is_some_and(&check))
}

fn effective_chat_is(check: impl Fn(&Chat) -> bool + Send + Sync + 'static) -> Filter {
    Filter::new(move |update| update.effective_chat().is_some_and(&check))
}
