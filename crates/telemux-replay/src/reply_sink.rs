//! Outbound side of the replay transport.
//!
//! Steps of the demo bot never print directly; they hand replies to a
//! [`ReplySink`], which the binary backs with NDJSON on stdout.

use std::io::Write;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use telemux::Update;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundReply {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

impl OutboundReply {
    /// Addresses the effective chat, falling back to the sender for chat-less
    /// updates such as inline queries.
    pub fn to_update(update: &Update, text: impl Into<String>) -> Result<Self> {
        let chat_id = match update.effective_chat() {
            Some(chat) => chat.id,
            None => {
                update
                    .effective_user()
                    .ok_or_else(|| anyhow!("update {} has no chat or sender", update.raw.update_id))?
                    .id
            }
        };
        Ok(Self {
            update_id: update.raw.update_id,
            chat_id,
            text: text.into(),
        })
    }
}

pub trait ReplySink: Send + Sync {
    fn send(&self, reply: OutboundReply) -> Result<()>;

    fn reply(&self, update: &Update, text: &str) -> Result<()> {
        self.send(OutboundReply::to_update(update, text)?)
    }
}

/// Writes one JSON object per reply.
pub struct NdjsonReplySink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> NdjsonReplySink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|_| anyhow!("reply writer lock poisoned"))
    }
}

impl<W: Write + Send> ReplySink for NdjsonReplySink<W> {
    fn send(&self, reply: OutboundReply) -> Result<()> {
        let line = serde_json::to_string(&reply).context("failed to encode reply")?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("reply writer lock poisoned"))?;
        writeln!(writer, "{line}").context("failed to write reply")?;
        writer.flush().context("failed to flush reply")?;
        tracing::debug!(update_id = reply.update_id, chat_id = reply.chat_id, "reply sent");
        Ok(())
    }
}
