mod cli_args;
mod demo_bot;
mod replay;
mod reply_sink;

use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use telemux::{BotIdentity, ConversationPersistence, FilePersistence, LocalPersistence};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::{Cli, CliPersistenceBackend};
use crate::demo_bot::build_demo_mux;
use crate::replay::replay_updates;
use crate::reply_sink::NdjsonReplySink;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let persistence = build_persistence(&cli);
    let sink = Arc::new(NdjsonReplySink::new(io::stdout()));
    let mux = build_demo_mux(sink, persistence)?;
    let bot = BotIdentity::new(cli.bot_username.clone());

    let summary = match &cli.updates_file {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open updates file {}", path.display()))?;
            replay_updates(BufReader::new(file), &mux, &bot)?
        }
        None => replay_updates(io::stdin().lock(), &mux, &bot)?,
    };

    eprintln!(
        "replay summary: handled={} unhandled={} faulted={} decode_errors={}",
        summary.handled, summary.unhandled, summary.faulted, summary.decode_errors
    );
    if cli.fail_on_fault && summary.has_failures() {
        bail!(
            "{} of {} updates faulted or failed to decode",
            summary.faulted + summary.decode_errors,
            summary.total()
        );
    }
    Ok(())
}

fn build_persistence(cli: &Cli) -> Arc<dyn ConversationPersistence> {
    match cli.persistence {
        CliPersistenceBackend::Memory => Arc::new(LocalPersistence::new()),
        CliPersistenceBackend::File => Arc::new(FilePersistence::new(cli.state_file.clone())),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}
