use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use telemux::filters;
use telemux::{
    BotIdentity, ConversationHandler, ConversationPersistence, DispatchError, FilePersistence,
    Handler, LocalPersistence, Mux, PersistenceKey, RawUpdate,
};

type Transcript = Arc<Mutex<Vec<String>>>;

fn raw_update(value: Value) -> RawUpdate {
    serde_json::from_value(value).expect("update json")
}

fn text_update(update_id: i64, user_id: i64, chat_id: i64, chat_type: &str, text: &str) -> RawUpdate {
    raw_update(json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "from": { "id": user_id, "first_name": "User", "username": format!("user{user_id}") },
            "chat": { "id": chat_id, "type": chat_type },
            "text": text,
        }
    }))
}

fn callback_update(update_id: i64, user_id: i64, chat_id: i64, data: &str) -> RawUpdate {
    raw_update(json!({
        "update_id": update_id,
        "callback_query": {
            "id": format!("cb-{update_id}"),
            "from": { "id": user_id, "first_name": "User" },
            "message": {
                "message_id": 1,
                "chat": { "id": chat_id, "type": "private" },
                "text": "Pick a size",
            },
            "data": data,
        }
    }))
}

fn record(transcript: &Transcript, line: impl Into<String>) {
    transcript.lock().expect("transcript").push(line.into());
}

fn order_conversation(
    persistence: Arc<dyn ConversationPersistence>,
    transcript: &Transcript,
) -> ConversationHandler {
    let (start_log, size_log, enter_log, cancel_log) = (
        Arc::clone(transcript),
        Arc::clone(transcript),
        Arc::clone(transcript),
        Arc::clone(transcript),
    );
    ConversationHandler::new("order", persistence)
        .state(
            "",
            [Handler::command("order", None, move |update| {
                update.persistence_mut()?.set_state("pick_size")?;
                record(&start_log, "pick a size");
                Ok(())
            })],
        )
        .state(
            "pick_size",
            [Handler::callback_query(r"^size:(s|m|l)$", None, move |update| {
                let size = update.context_strings("matches")[1].clone();
                let context = update.persistence_mut()?;
                let mut data = context.get_data()?;
                data.insert("size".to_string(), json!(size));
                context.set_data(data)?;
                context.set_state("confirm")?;
                record(&size_log, format!("size {size}"));
                Ok(())
            })
            .expect("size pattern")],
        )
        .on_enter(
            "confirm",
            [Handler::new(filters::any(), move |update| {
                let size = update.persistence()?.get_data()?["size"].clone();
                record(&enter_log, format!("confirm {}?", size.as_str().unwrap_or_default()));
                Ok(())
            })],
        )
        .state(
            "confirm",
            [Handler::command("yes", None, |update| {
                let context = update.persistence_mut()?;
                context.clear_data()?;
                context.set_state("")?;
                Ok(())
            })],
        )
        .defaults([Handler::command("cancel", None, move |update| {
            let context = update.persistence_mut()?;
            context.clear_data()?;
            context.set_state("")?;
            record(&cancel_log, "cancelled");
            Ok(())
        })])
}

#[test]
fn integration_nested_muxes_conversation_and_callbacks_cooperate() {
    let persistence = Arc::new(LocalPersistence::new());
    let transcript = Transcript::default();
    let fallback_log = Arc::clone(&transcript);
    let admin_log = Arc::clone(&transcript);
    let mux = Mux::new()
        .add_mux(
            Mux::new()
                .set_global_filter(filters::is_group_or_super_group())
                .add_handler(Handler::command("ban", None, move |update| {
                    record(&admin_log, format!("ban {:?}", update.context_strings("args")));
                    Ok(())
                })),
        )
        .add_processor(order_conversation(persistence.clone(), &transcript))
        .add_handler(Handler::message(Some(filters::has_text()), move |_| {
            record(&fallback_log, "fallback");
            Ok(())
        }));
    let bot = BotIdentity::new("shop_bot");
    let key = PersistenceKey::new("order", 13, 37);

    assert!(mux.dispatch(&bot, text_update(1, 13, -9, "group", "/ban spammer")).expect("ban"));
    assert!(mux.dispatch(&bot, text_update(2, 13, 37, "private", "/order")).expect("order"));
    assert!(mux.dispatch(&bot, text_update(3, 13, 37, "private", "hello")).expect("fallback"));
    assert!(mux.dispatch(&bot, callback_update(4, 13, 37, "size:m")).expect("size"));
    assert_eq!(persistence.get_state(&key).expect("state"), "confirm");
    assert!(!mux.dispatch(&bot, callback_update(5, 13, 37, "size:l")).expect("stale click"));
    assert!(mux.dispatch(&bot, text_update(6, 13, 37, "private", "/yes")).expect("yes"));

    assert_eq!(persistence.get_state(&key).expect("state"), "");
    assert!(persistence.get_data(&key).expect("data").is_empty());
    assert_eq!(
        *transcript.lock().expect("transcript"),
        vec![
            "ban [\"spammer\"]",
            "pick a size",
            "fallback",
            "size m",
            "confirm m?",
        ]
    );
}

#[test]
fn integration_cancel_is_only_available_mid_conversation() {
    let persistence = Arc::new(LocalPersistence::new());
    let transcript = Transcript::default();
    let mux = Mux::new().add_processor(order_conversation(persistence.clone(), &transcript));
    let bot = BotIdentity::new("shop_bot");

    assert!(!mux.dispatch(&bot, text_update(1, 13, 37, "private", "/cancel")).expect("idle"));
    assert!(mux.dispatch(&bot, text_update(2, 13, 37, "private", "/order")).expect("order"));
    assert!(mux.dispatch(&bot, text_update(3, 13, 37, "private", "/cancel")).expect("cancel"));
    assert_eq!(
        *transcript.lock().expect("transcript"),
        vec!["pick a size", "cancelled"]
    );
}

#[test]
fn integration_concurrent_dispatch_keeps_identities_apart() {
    let persistence = Arc::new(LocalPersistence::new());
    let transcript = Transcript::default();
    let mux = Mux::new().add_processor(order_conversation(persistence.clone(), &transcript));
    let bot = BotIdentity::new("shop_bot");

    std::thread::scope(|scope| {
        for user_id in 1..=8_i64 {
            let (mux, bot) = (&mux, &bot);
            scope.spawn(move || {
                assert!(mux
                    .dispatch(bot, text_update(user_id, user_id, 37, "private", "/order"))
                    .expect("order"));
                if user_id % 2 == 0 {
                    assert!(mux
                        .dispatch(bot, callback_update(user_id, user_id, 37, "size:s"))
                        .expect("size"));
                }
            });
        }
    });

    for user_id in 1..=8_i64 {
        let key = PersistenceKey::new("order", user_id, 37);
        let expected = if user_id % 2 == 0 { "confirm" } else { "pick_size" };
        assert_eq!(persistence.get_state(&key).expect("state"), expected);
    }
}

#[test]
fn integration_file_backend_survives_restart_mid_conversation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("orders.json");
    let bot = BotIdentity::new("shop_bot");

    let first_transcript = Transcript::default();
    let first = Mux::new().add_processor(order_conversation(
        Arc::new(FilePersistence::new(&path)),
        &first_transcript,
    ));
    assert!(first.dispatch(&bot, text_update(1, 13, 37, "private", "/order")).expect("order"));
    assert!(first.dispatch(&bot, callback_update(2, 13, 37, "size:l")).expect("size"));
    drop(first);

    let second_transcript = Transcript::default();
    let reopened = Arc::new(FilePersistence::new(&path));
    let second = Mux::new().add_processor(order_conversation(reopened.clone(), &second_transcript));
    let key = PersistenceKey::new("order", 13, 37);
    assert_eq!(reopened.get_state(&key).expect("state"), "confirm");
    assert_eq!(reopened.get_data(&key).expect("data")["size"], "l");
    assert!(second.dispatch(&bot, text_update(3, 13, 37, "private", "/yes")).expect("yes"));
    assert_eq!(reopened.get_state(&key).expect("state"), "");

    let untouched = PersistenceKey::new("order", 14, 37);
    assert_eq!(reopened.get_state(&untouched).expect("state"), "");
    assert!(reopened.get_data(&untouched).expect("data").is_empty());
}

#[test]
fn integration_conversation_fault_reaches_outer_recover_once() {
    let faults = Transcript::default();
    let seen = Arc::clone(&faults);
    let conversation = ConversationHandler::new("broken", Arc::new(LocalPersistence::new())).state(
        "",
        [Handler::command("go", None, |update| {
            update.persistence_mut()?.set_state("next")?;
            anyhow::bail!("downstream unavailable")
        })],
    );
    let mux = Mux::new()
        .add_mux(Mux::new().add_processor(conversation))
        .set_recover(move |update, error, _| {
            record(&seen, format!("{}: {error}", update.raw.update_id));
        });

    let bot = BotIdentity::new("shop_bot");
    assert!(!mux.dispatch(&bot, text_update(7, 13, 37, "private", "/go")).expect("contained"));
    assert_eq!(
        *faults.lock().expect("faults"),
        vec!["7: downstream unavailable"]
    );

    let unguarded = Mux::new().add_processor(
        ConversationHandler::new("broken", Arc::new(LocalPersistence::new())).state(
            "",
            [Handler::new(filters::any(), |_| Err(anyhow::anyhow!("no recover")))],
        ),
    );
    let error = unguarded
        .dispatch(&bot, text_update(8, 13, 37, "private", "hi"))
        .expect_err("fault propagates");
    assert!(matches!(error, DispatchError::Step(_)));
}
