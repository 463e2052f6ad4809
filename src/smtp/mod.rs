//! Minimal blocking SMTP front-end.
//!
//! Accepts connections on a TCP listener and runs every connection on its
//! own thread, feeding the protocol callbacks into a fresh
//! [`Session`](crate::session::Session). Only the commands needed to receive
//! mail are understood, plus STARTTLS when a certificate is configured;
//! there is no AUTH or relaying.

pub mod connection;
pub mod tls;

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use self::connection::{Buffered, Exit, TlsMode};
use self::tls::TlsAcceptor;
use crate::error::{InboundError, Result};
use crate::session::{Pipeline, Session, SmtpSession};

/// Protocol limits and identity, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address to listen on, e.g. `"localhost:1025"`.
    pub listen: String,
    /// Name announced in the greeting and `EHLO` reply.
    pub domain: String,
    /// Largest accepted transmission, in bytes.
    pub max_message_size: usize,
    /// Recipients accepted per transmission.
    pub max_recipients: usize,
    /// Idle time after which a silent client is disconnected.
    pub read_timeout: Duration,
    /// Offer STARTTLS with this certificate.
    pub tls: Option<TlsAcceptor>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "localhost:1025".to_string(),
            domain: "localhost".to_string(),
            max_message_size: 100 * 1024 * 1024,
            max_recipients: 100,
            read_timeout: Duration::from_secs(300),
            tls: None,
        }
    }
}

pub struct Server {
    pipeline: Arc<Pipeline>,
    settings: Arc<ServerSettings>,
}

impl Server {
    pub fn new(pipeline: Arc<Pipeline>, settings: ServerSettings) -> Self {
        Self {
            pipeline,
            settings: Arc::new(settings),
        }
    }

    /// Bind the configured address.
    pub fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.settings.listen).map_err(|e| {
            InboundError::Config(format!("cannot listen on {}: {e}", self.settings.listen))
        })
    }

    /// Bind and serve until the listener fails.
    pub fn listen_and_serve(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Accept connections forever, one thread each.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        let address = listener.local_addr()?;
        let options = self.pipeline.options();
        info!(
            %address,
            domain = %self.settings.domain,
            starttls = self.settings.tls.is_some(),
            sinks = ?self.pipeline.dispatcher().sink_names(),
            classify_html = options.classify_html,
            body_mode = ?options.body_mode,
            "Mail server listening"
        );

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let pipeline = Arc::clone(&self.pipeline);
            let settings = Arc::clone(&self.settings);

            let spawned = std::thread::Builder::new()
                .name(format!("smtp-{peer}"))
                .spawn(move || {
                    debug!(%peer, "Connection accepted");
                    match serve_stream(stream, pipeline, &settings) {
                        Ok(()) => debug!(%peer, "Client disconnected"),
                        Err(e) => warn!(%peer, error = %e, "Abnormal client disconnect"),
                    }
                });
            if let Err(e) = spawned {
                warn!(error = %e, "Failed to spawn connection thread");
            }
        }
        Ok(())
    }
}

/// Serve one connection, upgrading it in place on STARTTLS.
fn serve_stream(
    stream: TcpStream,
    pipeline: Arc<Pipeline>,
    settings: &ServerSettings,
) -> io::Result<()> {
    stream.set_read_timeout(Some(settings.read_timeout))?;
    let mut session = Session::new(pipeline);

    let mode = match settings.tls {
        Some(_) => TlsMode::Offered,
        None => TlsMode::Unavailable,
    };
    let mut plain = Buffered::new(stream);
    let exit = connection::handle_connection(&mut plain, &mut session, settings, mode)?;
    let (Exit::StartTls, Some(acceptor)) = (exit, &settings.tls) else {
        return Ok(());
    };

    // Anything sent after STARTTLS but before the handshake is unprotected.
    if !plain.buffer().is_empty() {
        if let Err(e) = session.logout() {
            warn!(error = %e, "Logout failed");
        }
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client sent data before the TLS handshake",
        ));
    }

    let mut secure = Buffered::new(acceptor.accept(plain.into_inner())?);
    debug!("TLS session started");
    connection::handle_connection(&mut secure, &mut session, settings, TlsMode::Active)?;
    Ok(())
}
