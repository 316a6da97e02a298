#![no_main]

use libfuzzer_sys::fuzz_target;
use telemux::filters::{self, parse_command};
use telemux::{BotIdentity, Chat, ChatKind, Message, RawUpdate, Update, UpdatePayload};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data).into_owned();
    let update = Update::new(
        BotIdentity::new("fuzz_bot"),
        RawUpdate::new(
            1,
            UpdatePayload::Message(Message::new(1, Chat::new(1, ChatKind::Private)).with_text(&text)),
        ),
    );

    match parse_command(&text) {
        Some(command) => {
            assert!(filters::is_any_command_message().matches(&update));
            let addressed_here = command
                .bot_username
                .map_or(true, |suffix| suffix == "fuzz_bot");
            assert_eq!(
                filters::is_command_message(command.name).matches(&update),
                addressed_here
            );
        }
        None => assert!(!filters::is_command_message("start").matches(&update)),
    }
});
