//! Core data model types for received messages, body alternatives, and attachments.

pub mod attachment;
pub mod message;
