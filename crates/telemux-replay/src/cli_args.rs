use std::path::PathBuf;

use clap::{Parser, ValueEnum};

fn parse_bot_username(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_start_matches('@');
    if trimmed.is_empty() {
        return Err("bot username must not be empty".to_string());
    }
    if trimmed.contains(char::is_whitespace) {
        return Err("bot username must not contain whitespace".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliPersistenceBackend` values.
pub enum CliPersistenceBackend {
    Memory,
    File,
}

#[derive(Debug, Parser)]
#[command(
    name = "telemux-replay",
    about = "Replay newline-delimited bot updates through the telemux demo bot",
    version
)]
pub struct Cli {
    #[arg(
        long = "bot-username",
        env = "TELEMUX_BOT_USERNAME",
        default_value = "telemux_demo_bot",
        value_parser = parse_bot_username,
        help = "Bot username compared against /command@botname suffixes. A leading '@' is ignored."
    )]
    pub bot_username: String,

    #[arg(
        long,
        env = "TELEMUX_PERSISTENCE",
        value_enum,
        default_value = "memory",
        help = "Conversation persistence backend."
    )]
    pub persistence: CliPersistenceBackend,

    #[arg(
        long = "state-file",
        env = "TELEMUX_STATE_FILE",
        default_value = ".telemux/conversations.json",
        help = "JSON document used when --persistence=file."
    )]
    pub state_file: PathBuf,

    #[arg(
        long = "updates-file",
        env = "TELEMUX_UPDATES_FILE",
        help = "NDJSON file of updates to replay. Reads stdin when omitted."
    )]
    pub updates_file: Option<PathBuf>,

    #[arg(
        long = "fail-on-fault",
        default_value_t = false,
        help = "Exit with an error when any update faulted or failed to decode."
    )]
    pub fail_on_fault: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{parse_bot_username, Cli, CliPersistenceBackend};

    #[test]
    fn unit_parse_bot_username_strips_at_sign() {
        assert_eq!(parse_bot_username("@demo_bot").expect("valid"), "demo_bot");
        assert!(parse_bot_username("@").is_err());
        assert!(parse_bot_username("two words").is_err());
    }

    #[test]
    fn unit_cli_defaults_to_memory_backend_and_stdin() {
        let cli = Cli::try_parse_from(["telemux-replay"]).expect("defaults parse");
        assert_eq!(cli.persistence, CliPersistenceBackend::Memory);
        assert!(cli.updates_file.is_none());
        assert!(!cli.fail_on_fault);
    }

    #[test]
    fn regression_cli_rejects_unknown_backend() {
        let error = Cli::try_parse_from(["telemux-replay", "--persistence", "sqlite"])
            .expect_err("unknown backend must fail");
        assert!(error.to_string().contains("sqlite"));
    }
}
