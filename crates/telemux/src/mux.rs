//! First-match-wins multiplexer with a per-mux fault boundary.
//!
//! A [`Mux`] walks its processors in declaration order and stops at the first
//! one that accepts. Each mux contains faults raised beneath it: panics are
//! converted into [`DispatchError::Panicked`], then either handed to the
//! registered recover function (the mux reports `false`) or returned to the
//! caller unchanged.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::errors::DispatchError;
use crate::filters::Filter;
use crate::handlers::Handler;
use crate::update::{BotIdentity, RawUpdate, Update};

/// Shared contract of everything a mux can route to.
pub trait Processor: Send + Sync {
    /// Returns `Ok(true)` when this processor accepted and handled the update.
    fn process(&self, update: &mut Update) -> Result<bool, DispatchError>;
}

/// Fault handler invoked with the envelope, the fault and a diagnostic trace.
pub type RecoverFn = Arc<dyn Fn(&Update, &DispatchError, &str) + Send + Sync>;

#[derive(Default)]
pub struct Mux {
    processors: Vec<Box<dyn Processor>>,
    global_filter: Option<Filter>,
    recover: Option<RecoverFn>,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("processors", &self.processors.len())
            .field("global_filter", &self.global_filter.is_some())
            .field("recover", &self.recover.is_some())
            .finish()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(self, handler: Handler) -> Self {
        self.add_processor(handler)
    }

    pub fn add_handlers(mut self, handlers: impl IntoIterator<Item = Handler>) -> Self {
        for handler in handlers {
            self.processors.push(Box::new(handler));
        }
        self
    }

    pub fn add_mux(self, mux: Mux) -> Self {
        self.add_processor(mux)
    }

    /// Appends any processor, e.g. a conversation handler.
    pub fn add_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Rejects every update the filter does not match before any processor runs.
    pub fn set_global_filter(mut self, filter: Filter) -> Self {
        self.global_filter = Some(filter);
        self
    }

    pub fn set_recover(
        mut self,
        recover: impl Fn(&Update, &DispatchError, &str) + Send + Sync + 'static,
    ) -> Self {
        self.recover = Some(Arc::new(recover));
        self
    }

    pub fn clear_recover(mut self) -> Self {
        self.recover = None;
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Wraps `raw` into a fresh envelope and routes it.
    #[tracing::instrument(
        name = "telemux.dispatch",
        skip(self, bot, raw),
        fields(update_id = raw.update_id, kind = raw.payload.kind())
    )]
    pub fn dispatch(&self, bot: &BotIdentity, raw: RawUpdate) -> Result<bool, DispatchError> {
        let mut update = Update::new(bot.clone(), raw);
        self.process(&mut update)
    }

    fn route(&self, update: &mut Update) -> Result<bool, DispatchError> {
        if let Some(filter) = &self.global_filter {
            if !filter.matches(update) {
                tracing::debug!(update_id = update.raw.update_id, "global filter rejected update");
                return Ok(false);
            }
        }
        for (index, processor) in self.processors.iter().enumerate() {
            if processor.process(update)? {
                tracing::debug!(
                    update_id = update.raw.update_id,
                    processor = index,
                    "update handled"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Processor for Mux {
    fn process(&self, update: &mut Update) -> Result<bool, DispatchError> {
        let error = match panic::catch_unwind(AssertUnwindSafe(|| self.route(update))) {
            Ok(Ok(handled)) => return Ok(handled),
            Ok(Err(error)) => error,
            Err(payload) => DispatchError::Panicked {
                message: panic_message(&*payload),
            },
        };
        let Some(recover) = &self.recover else {
            return Err(error);
        };
        let trace = fault_trace(&error);
        tracing::error!(
            update_id = update.raw.update_id,
            fields = ?update.fields(),
            error = %error,
            "recovered from dispatch fault"
        );
        recover(update, &error, &trace);
        // Siblings after this mux must not inherit the abandoned handler's state.
        update.clear_consumed();
        update.context.clear();
        Ok(false)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn fault_trace(error: &DispatchError) -> String {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => format!("{error:?}\n{backtrace}"),
        _ => format!("{error:?}"),
    }
}
