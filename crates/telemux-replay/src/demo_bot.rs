//! Demo bot routed by the replay binary.
//!
//! Top level, in order: the registration conversation, `/start` + `/help`,
//! a math sub-mux with its own fault handler, a private-chat-only sub-mux and a
//! callback vote handler. Anything else stays unhandled.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use telemux::filters;
use telemux::{
    ConversationHandler, ConversationPersistence, Handler, Mux, Update, ARGS_CONTEXT_KEY,
    MATCHES_CONTEXT_KEY,
};

use crate::reply_sink::ReplySink;

pub const REGISTRATION_CONVERSATION_ID: &str = "registration";

const HELP_TEXT: &str = "Commands: /register, /cancel, /div <a> <b>, /whoami, /help";

pub fn build_demo_mux(
    sink: Arc<dyn ReplySink>,
    persistence: Arc<dyn ConversationPersistence>,
) -> Result<Mux> {
    let votes = Handler::callback_query(r"^vote:(up|down)$", None, {
        let sink = Arc::clone(&sink);
        move |update| {
            let matches = update.context_strings(MATCHES_CONTEXT_KEY);
            let direction = matches.get(1).map(String::as_str).unwrap_or_default();
            sink.reply(update, &format!("Thanks for voting {direction}!"))
        }
    })
    .context("failed to compile vote pattern")?;

    Ok(Mux::new()
        .add_processor(registration(Arc::clone(&sink), persistence))
        .add_handler(Handler::command("start help", None, {
            let sink = Arc::clone(&sink);
            move |update| sink.reply(update, HELP_TEXT)
        }))
        .add_mux(math_mux(Arc::clone(&sink)))
        .add_mux(private_mux(Arc::clone(&sink)))
        .add_handler(votes))
}

fn math_mux(sink: Arc<dyn ReplySink>) -> Mux {
    let recover_sink = Arc::clone(&sink);
    Mux::new()
        .add_handler(Handler::command("div", None, move |update| {
            let args = update.context_strings(ARGS_CONTEXT_KEY);
            let [left, right] = args.as_slice() else {
                return sink.reply(update, "Usage: /div <a> <b>");
            };
            let left: i64 = left.parse().with_context(|| format!("'{left}' is not a number"))?;
            let right: i64 = right
                .parse()
                .with_context(|| format!("'{right}' is not a number"))?;
            let quotient = left
                .checked_div(right)
                .ok_or_else(|| anyhow!("cannot divide {left} by {right}"))?;
            sink.reply(update, &format!("{left} / {right} = {quotient}"))
        }))
        .set_recover(move |update, error, _trace| {
            let text = format!("Sorry, I could not compute that: {error:#}");
            if let Err(send_error) = recover_sink.reply(update, &text) {
                tracing::warn!(error = %send_error, "failed to report math fault");
            }
        })
}

fn private_mux(sink: Arc<dyn ReplySink>) -> Mux {
    Mux::new()
        .set_global_filter(filters::is_private())
        .add_handler(Handler::command("whoami", None, move |update| {
            let fields = update.fields();
            let text = format!(
                "You are {} (id {})",
                fields.get("username").map(String::as_str).unwrap_or_default(),
                fields.get("user_id").map(String::as_str).unwrap_or_default()
            );
            sink.reply(update, &text)
        }))
}

fn registration(
    sink: Arc<dyn ReplySink>,
    persistence: Arc<dyn ConversationPersistence>,
) -> ConversationHandler {
    let start = Handler::command("register", None, {
        let sink = Arc::clone(&sink);
        move |update| {
            update.persistence_mut()?.set_state("ask_name")?;
            sink.reply(update, "What is your name?")
        }
    });
    let name = Handler::message(Some(filters::has_text()), |update| {
        let name = message_text(update);
        let context = update.persistence_mut()?;
        let mut data = context.get_data()?;
        data.insert("name".to_string(), Value::String(name));
        context.set_data(data)?;
        context.set_state("ask_age")?;
        Ok(())
    });
    let ask_age = Handler::new(filters::any(), {
        let sink = Arc::clone(&sink);
        move |update| sink.reply(update, "How old are you?")
    });
    let age = Handler::message(Some(filters::has_text()), {
        let sink = Arc::clone(&sink);
        move |update| {
            let Ok(age) = message_text(update).trim().parse::<u8>() else {
                return sink.reply(update, "Please send your age as a number.");
            };
            let context = update.persistence_mut()?;
            let mut data = context.get_data()?;
            data.insert("age".to_string(), Value::from(age));
            context.set_data(data)?;
            context.set_state("ask_confirm")?;
            sink.reply(update, "Send /confirm to finish or /cancel to start over.")
        }
    });
    let confirm = Handler::command("confirm", None, {
        let sink = Arc::clone(&sink);
        move |update| {
            let context = update.persistence_mut()?;
            let data = context.get_data()?;
            context.clear_data()?;
            context.set_state("")?;
            let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
            let age = data.get("age").and_then(Value::as_u64).unwrap_or_default();
            sink.reply(update, &format!("Registered {name}, age {age}."))
        }
    });
    let cancel = Handler::command("cancel", None, move |update| {
        let context = update.persistence_mut()?;
        context.set_state("")?;
        context.clear_data()?;
        sink.reply(update, "Registration cancelled.")
    });

    ConversationHandler::new(REGISTRATION_CONVERSATION_ID, persistence)
        .state("", [start])
        .state("ask_name", [name])
        .on_enter("ask_age", [ask_age])
        .state("ask_age", [age])
        .state("ask_confirm", [confirm])
        .defaults([cancel])
}

fn message_text(update: &Update) -> String {
    update
        .effective_message()
        .map(|message| message.text().to_string())
        .unwrap_or_default()
}
