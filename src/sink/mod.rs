//! Storage sinks and the dispatcher that fans records out to them.
//!
//! A sink persists message records and attachment bytes somewhere. The
//! [`Dispatcher`] calls every configured sink in order and stops at the
//! first failure.

pub mod local;
pub mod log;
pub mod object;

use std::io::Read;

use crate::error::{InboundError, Result};
use crate::model::attachment::Attachment;
use crate::model::message::Message;

/// A storage backend for decomposed messages.
pub trait Sink: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Store the finalized message record.
    fn store_message(&self, message: &Message) -> Result<()>;

    /// Store the content of one attachment under `id`.
    ///
    /// `data` is forward-only and can be read once; sinks that need the
    /// whole content up front must buffer it themselves.
    fn store_attachment(&self, id: &str, data: &mut dyn Read) -> Result<()>;
}

/// Fixed, read-only set of sinks shared by all sessions.
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    /// Names of the configured sinks, in dispatch order.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Hand one attachment's decoded content to every sink.
    ///
    /// Each sink gets its own reader positioned at the start of `content`.
    pub fn store_attachment(&self, attachment: &Attachment, content: &[u8]) -> Result<()> {
        for sink in &self.sinks {
            let mut reader = content;
            sink.store_attachment(&attachment.id, &mut reader)
                .map_err(|e| InboundError::AttachmentStore {
                    sink: sink.name().to_string(),
                    filename: attachment.original_filename.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Hand the finalized record to every sink.
    pub fn store_message(&self, message: &Message) -> Result<()> {
        for sink in &self.sinks {
            sink.store_message(message)
                .map_err(|e| InboundError::MessageStore {
                    sink: sink.name().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}
