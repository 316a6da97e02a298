#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use telemux::filters;
use telemux::{BotIdentity, ConversationHandler, Handler, LocalPersistence, Mux, RawUpdate};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mux = Mux::new()
        .add_processor(
            ConversationHandler::new("fuzz", Arc::new(LocalPersistence::new()))
                .state(
                    "",
                    [Handler::command("start", None, |update| {
                        update.persistence_mut()?.set_state("busy")?;
                        Ok(())
                    })],
                )
                .defaults([Handler::command("cancel", None, |update| {
                    update.persistence_mut()?.set_state("")?;
                    Ok(())
                })]),
        )
        .add_handler(Handler::message(Some(filters::has_text()), |_| Ok(())))
        .add_handler(Handler::new(filters::any(), |update| {
            let _ = update.fields();
            Ok(())
        }));
    let bot = BotIdentity::new("fuzz_bot");

    for line in raw.lines() {
        let Ok(update) = serde_json::from_str::<RawUpdate>(line) else {
            continue;
        };
        let handled = mux.dispatch(&bot, update).expect("fuzz mux never faults");
        assert!(handled);
    }
});
