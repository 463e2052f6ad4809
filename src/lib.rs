//! `inbound`: receives mail over SMTP and decomposes every transmission
//! into a structured record plus separately stored attachments.
//!
//! The library holds the decomposition pipeline, the storage sinks and a
//! minimal SMTP front-end; the binary wires them together from
//! configuration.

pub mod aws;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod session;
pub mod sink;
pub mod smtp;
