//! Per-connection session handling.
//!
//! The protocol front-end drives a [`Session`] through the five
//! [`SmtpSession`] callbacks. Each `data` call runs one full
//! decompose-and-dispatch cycle through the shared [`Pipeline`].

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{InboundError, Result};
use crate::metrics::Observer;
use crate::model::message::{Message, MessageBuilder};
use crate::parser::mime::{self, WalkOptions};
use crate::sink::Dispatcher;

/// Callbacks a protocol engine invokes for one connection.
pub trait SmtpSession {
    /// `MAIL FROM`: a new transmission begins.
    fn mail(&mut self, from: &str) -> Result<()>;

    /// `RCPT TO`: called once per accepted recipient.
    fn rcpt(&mut self, to: &str) -> Result<()>;

    /// `DATA`: the complete transmission, headers and body.
    fn data(&mut self, data: &mut dyn Read) -> Result<Message>;

    /// `RSET`, and after every completed `DATA`.
    fn reset(&mut self);

    /// `QUIT` or disconnect.
    fn logout(&mut self) -> Result<()>;
}

/// Read-only state shared by every session: sinks, observer, settings.
pub struct Pipeline {
    dispatcher: Dispatcher,
    observer: Arc<dyn Observer>,
    options: WalkOptions,
}

impl Pipeline {
    pub fn new(dispatcher: Dispatcher, observer: Arc<dyn Observer>, options: WalkOptions) -> Self {
        Self {
            dispatcher,
            observer,
            options,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    /// Decompose one raw transmission and hand the result to every sink.
    ///
    /// Attachments reach the sinks while parts are walked; the record is
    /// dispatched last. Nothing is rolled back on failure.
    pub fn process(&self, from: &str, to: &str, raw: &[u8]) -> Result<Message> {
        let parsed = mime::parse_transmission(raw)?;

        let mut builder = MessageBuilder::new(from, to);
        mime::walk_parts(&parsed, &mut builder, &self.dispatcher, &self.options)?;
        mime::read_headers(&parsed, &mut builder);

        let message = builder.build();
        self.dispatcher.store_message(&message)?;
        Ok(message)
    }
}

/// Envelope of the transmission in progress.
#[derive(Debug, Default)]
struct Envelope {
    from: String,
    to: String,
    started: Option<Instant>,
}

/// One connection's state.
pub struct Session {
    pipeline: Arc<Pipeline>,
    envelope: Envelope,
}

impl Session {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            envelope: Envelope::default(),
        }
    }

    fn receive(&self, data: &mut dyn Read) -> Result<Message> {
        let mut raw = Vec::new();
        data.read_to_end(&mut raw)
            .map_err(|source| InboundError::Read { source })?;
        self.pipeline
            .process(&self.envelope.from, &self.envelope.to, &raw)
    }
}

impl SmtpSession for Session {
    fn mail(&mut self, from: &str) -> Result<()> {
        self.envelope.from = from.to_string();
        self.envelope.started = Some(Instant::now());
        Ok(())
    }

    fn rcpt(&mut self, to: &str) -> Result<()> {
        self.envelope.to = to.to_string();
        Ok(())
    }

    fn data(&mut self, data: &mut dyn Read) -> Result<Message> {
        let started = self.envelope.started.unwrap_or_else(Instant::now);
        match self.receive(data) {
            Ok(message) => {
                let elapsed = started.elapsed();
                info!(
                    id = %message.id,
                    alternatives = message.alternatives.len(),
                    attachments = message.attachments.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Message stored"
                );
                self.pipeline.observer.on_receive_success(elapsed);
                Ok(message)
            }
            Err(e) => {
                warn!(
                    from = %self.envelope.from,
                    to = %self.envelope.to,
                    error = %e,
                    "Rejected transmission"
                );
                self.pipeline.observer.on_receive_error();
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        self.envelope = Envelope::default();
    }

    fn logout(&mut self) -> Result<()> {
        debug!("Session closed");
        Ok(())
    }
}
