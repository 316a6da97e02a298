//! Handlers: one filter bound to an ordered list of processing steps.
//!
//! A handler accepts an update iff its filter matches. Steps then run in
//! declaration order; after each step the consumed flag is checked and, once
//! set, the remaining steps are skipped while the handler still reports that
//! it handled the update.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::errors::{DispatchError, FilterError};
use crate::filters::{self, compile_pattern, Filter};
use crate::mux::Processor;
use crate::update::{Update, UpdatePayload};

/// Context key holding command arguments as a JSON string array.
pub const ARGS_CONTEXT_KEY: &str = "args";
/// Context key holding regex captures (whole match first) as a JSON string array.
pub const MATCHES_CONTEXT_KEY: &str = "matches";

/// One processing step. Any error aborts the handler and faults the dispatch.
pub type Step = Box<dyn Fn(&mut Update) -> anyhow::Result<()> + Send + Sync>;

pub struct Handler {
    filter: Filter,
    steps: Vec<Step>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("filter", &self.filter)
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Handler {
    pub fn new(
        filter: Filter,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter,
            steps: vec![Box::new(step)],
        }
    }

    /// Appends a step that runs after the existing ones.
    pub fn then(
        mut self,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Handles one or more whitespace-separated commands, e.g. `"start help"`.
    ///
    /// Arguments following the command are stored under [`ARGS_CONTEXT_KEY`]
    /// before the first user step runs.
    pub fn command(
        commands: &str,
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        let command_filter = filters::or(commands.split_whitespace().map(filters::is_command_message));
        Self::new(with_optional(command_filter, filter), store_command_args).then(step)
    }

    /// New messages only.
    pub fn message(
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(with_optional(filters::is_message(), filter), step)
    }

    pub fn edited_message(
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(with_optional(filters::is_edited_message(), filter), step)
    }

    pub fn channel_post(
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(with_optional(filters::is_channel_post(), filter), step)
    }

    pub fn edited_channel_post(
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(with_optional(filters::is_edited_channel_post(), filter), step)
    }

    /// Inline queries whose query text matches `pattern`.
    ///
    /// Captures are stored under [`MATCHES_CONTEXT_KEY`] before `step` runs.
    pub fn inline_query(
        pattern: &str,
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Self, FilterError> {
        Self::with_captures(pattern, filter, inline_query_text, step)
    }

    /// Callback queries whose data matches `pattern`.
    pub fn callback_query(
        pattern: &str,
        filter: Option<Filter>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Self, FilterError> {
        Self::with_captures(pattern, filter, callback_data_text, step)
    }

    fn with_captures(
        pattern: &str,
        filter: Option<Filter>,
        subject: fn(&Update) -> Option<&str>,
        step: impl Fn(&mut Update) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Self, FilterError> {
        let regex = Arc::new(compile_pattern(pattern)?);
        let matcher = {
            let regex = Arc::clone(&regex);
            Filter::new(move |update| subject(update).is_some_and(|text| regex.is_match(text)))
        };
        let store_matches = move |update: &mut Update| -> anyhow::Result<()> {
            let matches = subject(update)
                .map(|text| capture_groups(&regex, text))
                .unwrap_or_default();
            update
                .context
                .insert(MATCHES_CONTEXT_KEY.to_string(), string_array(matches));
            Ok(())
        };
        Ok(Self::new(with_optional(matcher, filter), store_matches).then(step))
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn accepts(&self, update: &Update) -> bool {
        self.filter.matches(update)
    }

    /// Runs every step in order until one consumes the update or fails.
    pub(crate) fn run_steps(&self, update: &mut Update) -> Result<(), DispatchError> {
        for step in &self.steps {
            step(update)?;
            if update.is_consumed() {
                break;
            }
        }
        Ok(())
    }
}

impl Processor for Handler {
    fn process(&self, update: &mut Update) -> Result<bool, DispatchError> {
        if !self.accepts(update) {
            return Ok(false);
        }
        self.run_steps(update)?;
        Ok(true)
    }
}

fn with_optional(base: Filter, extra: Option<Filter>) -> Filter {
    match extra {
        Some(extra) => filters::and([base, extra]),
        None => base,
    }
}

fn store_command_args(update: &mut Update) -> anyhow::Result<()> {
    let args: Vec<String> = update
        .message()
        .map(|message| {
            message
                .text()
                .split_whitespace()
                .skip(1)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    update
        .context
        .insert(ARGS_CONTEXT_KEY.to_string(), string_array(args));
    Ok(())
}

fn inline_query_text(update: &Update) -> Option<&str> {
    match update.payload() {
        UpdatePayload::InlineQuery(query) => Some(query.query.as_str()),
        _ => None,
    }
}

fn callback_data_text(update: &Update) -> Option<&str> {
    match update.payload() {
        UpdatePayload::CallbackQuery(query) => query.data.as_deref(),
        _ => None,
    }
}

fn capture_groups(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures(text)
        .map(|captures| {
            captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

fn string_array(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Handler, ARGS_CONTEXT_KEY, MATCHES_CONTEXT_KEY};
    use crate::filters::{self, Filter};
    use crate::mux::Processor;
    use crate::update::{
        BotIdentity, CallbackQuery, Chat, ChatKind, InlineQuery, Message, RawUpdate, Update,
        UpdatePayload, User,
    };

    fn update(payload: UpdatePayload) -> Update {
        Update::new(BotIdentity::new("testbot"), RawUpdate::new(1, payload))
    }

    fn message(text: &str) -> Message {
        Message::new(1, Chat::new(37, ChatKind::Private))
            .with_from(User::new(13, "Ann"))
            .with_text(text)
    }

    fn text_update(text: &str) -> Update {
        update(UpdatePayload::Message(message(text)))
    }

    #[test]
    fn unit_consume_stops_remaining_steps_but_reports_handled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let handler = Handler::new(filters::any(), move |_| {
            a.lock().expect("log").push("a");
            Ok(())
        })
        .then(move |update| {
            b.lock().expect("log").push("b");
            update.consume();
            Ok(())
        })
        .then(move |_| {
            c.lock().expect("log").push("c");
            Ok(())
        });

        let mut update = text_update("anything");
        assert!(handler.process(&mut update).expect("process"));
        assert_eq!(*log.lock().expect("log"), vec!["a", "b"]);
    }

    #[test]
    fn unit_rejected_filter_runs_no_steps() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let handler = Handler::new(Filter::new(|_| false), move |_| {
            *flag.lock().expect("flag") = true;
            Ok(())
        });
        let mut update = text_update("anything");
        assert!(!handler.process(&mut update).expect("process"));
        assert!(!*ran.lock().expect("flag"));
        assert!(update.context.is_empty());
    }

    #[test]
    fn unit_step_error_aborts_later_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let later = log.clone();
        let handler = Handler::new(filters::any(), |_| Err(anyhow::anyhow!("boom"))).then(
            move |_| {
                later.lock().expect("log").push("later");
                Ok(())
            },
        );
        let error = handler
            .process(&mut text_update("x"))
            .expect_err("step must fail");
        assert_eq!(error.to_string(), "boom");
        assert!(log.lock().expect("log").is_empty());
    }

    #[test]
    fn functional_command_handler_stores_args_for_any_listed_command() {
        let handler = Handler::command("foo bar", None, |update| {
            let args = update.context_strings(ARGS_CONTEXT_KEY);
            anyhow::ensure!(args == ["42"], "unexpected args {args:?}");
            Ok(())
        });
        for text in ["/foo 42", "/bar 42", "/foo@testbot 42"] {
            let mut update = text_update(text);
            assert!(handler.process(&mut update).expect("process"), "{text}");
        }
        assert!(!handler.process(&mut text_update("/baz 42")).expect("process"));

        let test = Handler::command("test", None, |_| Ok(()));
        let mut update = text_update("/test foo bar");
        assert!(test.process(&mut update).expect("process"));
        assert_eq!(update.context_strings(ARGS_CONTEXT_KEY), vec!["foo", "bar"]);
    }

    #[test]
    fn unit_command_handler_applies_extra_filter() {
        let handler = Handler::command("start", Some(filters::is_group()), |_| Ok(()));
        assert!(!handler.process(&mut text_update("/start")).expect("process"));
    }

    #[test]
    fn functional_inline_query_handler_stores_captures() {
        let handler =
            Handler::inline_query(r"^foo:(\w+):(\d+)", None, |_| Ok(())).expect("pattern");
        let mut update = update(UpdatePayload::InlineQuery(InlineQuery {
            id: "q".to_string(),
            from: User::new(13, "Ann"),
            query: "foo:bar:42".to_string(),
            offset: String::new(),
        }));
        assert!(handler.process(&mut update).expect("process"));
        assert_eq!(
            update.context_strings(MATCHES_CONTEXT_KEY),
            vec!["foo:bar:42", "bar", "42"]
        );
        assert!(!handler.process(&mut text_update("foo:bar:42")).expect("process"));
    }

    #[test]
    fn functional_callback_query_handler_fills_unmatched_groups_with_empty_strings() {
        let handler = Handler::callback_query(r"^like(:(\d+))?$", Some(filters::any()), |_| Ok(()))
            .expect("pattern");
        let mut update = update(UpdatePayload::CallbackQuery(CallbackQuery {
            id: "c".to_string(),
            from: User::new(13, "Ann"),
            message: None,
            data: Some("like".to_string()),
        }));
        assert!(handler.process(&mut update).expect("process"));
        assert_eq!(update.context_strings(MATCHES_CONTEXT_KEY), vec!["like", "", ""]);
    }

    #[test]
    fn unit_update_kind_handlers_reject_other_kinds() {
        let edited = Handler::edited_message(None, |_| Ok(()));
        let posts = Handler::channel_post(None, |_| Ok(()));
        let edited_posts = Handler::edited_channel_post(None, |_| Ok(()));
        let messages = Handler::message(Some(filters::has_text()), |_| Ok(()));

        assert!(edited
            .process(&mut update(UpdatePayload::EditedMessage(message("x"))))
            .expect("process"));
        assert!(!edited.process(&mut text_update("x")).expect("process"));
        assert!(posts
            .process(&mut update(UpdatePayload::ChannelPost(message("x"))))
            .expect("process"));
        assert!(edited_posts
            .process(&mut update(UpdatePayload::EditedChannelPost(message("x"))))
            .expect("process"));
        assert!(messages.process(&mut text_update("x")).expect("process"));
        assert!(!messages.process(&mut text_update("/x")).expect("process"));
    }
}
