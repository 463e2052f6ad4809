//! Sink that only logs what it receives.

use std::io::Read;

use tracing::info;

use super::Sink;
use crate::error::Result;
use crate::model::message::Message;

/// Logs every record and attachment id; stores nothing and never reads
/// attachment content.
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn store_message(&self, message: &Message) -> Result<()> {
        let attachment_ids: Vec<&str> = message.attachments.iter().map(|a| a.id.as_str()).collect();
        info!(
            id = %message.id,
            from = %message.from,
            to = %message.to,
            attachments = ?attachment_ids,
            "Received message"
        );
        Ok(())
    }

    fn store_attachment(&self, id: &str, _data: &mut dyn Read) -> Result<()> {
        info!(id, "Received attachment");
        Ok(())
    }
}
