//! NDJSON replay loop: decode, dispatch, count.

use std::io::BufRead;

use anyhow::{Context, Result};
use telemux::{BotIdentity, Mux, RawUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub handled: usize,
    pub unhandled: usize,
    pub faulted: usize,
    pub decode_errors: usize,
}

impl ReplaySummary {
    pub fn total(&self) -> usize {
        self.handled + self.unhandled + self.faulted + self.decode_errors
    }

    pub fn has_failures(&self) -> bool {
        self.faulted > 0 || self.decode_errors > 0
    }
}

/// Dispatches every non-blank line of `reader` in order.
///
/// Malformed lines and faults that escape the mux are counted and skipped;
/// only read failures abort the replay.
pub fn replay_updates(reader: impl BufRead, mux: &Mux, bot: &BotIdentity) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| format!("failed to read update line {line_number}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let raw = match serde_json::from_str::<RawUpdate>(trimmed) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(line = line_number, error = %error, "skipping malformed update");
                summary.decode_errors += 1;
                continue;
            }
        };
        let update_id = raw.update_id;
        match mux.dispatch(bot, raw) {
            Ok(true) => summary.handled += 1,
            Ok(false) => summary.unhandled += 1,
            Err(error) => {
                tracing::error!(update_id, error = %error, "update faulted");
                summary.faulted += 1;
            }
        }
    }
    Ok(summary)
}
