//! SMTP command loop for a single connection.
//!
//! Generic over the transport so it runs the same over a socket, over TLS
//! and over in-memory buffers.

use std::io::{self, BufRead, BufReader, Read, Write};

use tracing::{debug, trace, warn};

use super::ServerSettings;
use crate::session::SmtpSession;

/// Longest command line accepted, terminator included.
const MAX_COMMAND_LINE: u64 = 4096;

/// Longest text line accepted inside `DATA`.
const MAX_DATA_LINE: u64 = 64 * 1024;

/// Transaction state between commands.
#[derive(Debug, Default)]
struct Transaction {
    greeted: bool,
    has_sender: bool,
    recipients: usize,
}

impl Transaction {
    fn clear(&mut self) {
        self.has_sender = false;
        self.recipients = 0;
    }
}

/// TLS state of the connection being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// No certificate configured; STARTTLS is refused.
    Unavailable,
    /// Plain connection that may upgrade with STARTTLS.
    Offered,
    /// Running inside TLS after a STARTTLS handshake.
    Active,
}

/// Why the command loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The client quit or disconnected. The session has been logged out.
    Closed,
    /// STARTTLS was accepted. The caller performs the handshake and runs
    /// the loop again with [`TlsMode::Active`]; the session stays open.
    StartTls,
}

/// Buffered reads with direct writes over one bidirectional stream.
#[derive(Debug)]
pub struct Buffered<S> {
    inner: BufReader<S>,
}

impl<S: Read> Buffered<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffer(&self) -> &[u8] {
        self.inner.buffer()
    }

    /// The underlying stream. Unconsumed buffered bytes are dropped.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S: Read> Read for Buffered<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Read> BufRead for Buffered<S> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

impl<S: Read + Write> Write for Buffered<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.get_mut().flush()
    }
}

/// Run the protocol until the client quits, disconnects or starts TLS.
///
/// Every failure inside `session` is answered with a reply code; only
/// transport errors end the loop early. The greeting is skipped in
/// [`TlsMode::Active`] since the client already received it.
pub fn handle_connection<T, S>(
    stream: &mut T,
    session: &mut S,
    settings: &ServerSettings,
    tls: TlsMode,
) -> io::Result<Exit>
where
    T: BufRead + Write,
    S: SmtpSession,
{
    if tls != TlsMode::Active {
        reply(stream, &format!("220 {} ESMTP Service Ready", settings.domain))?;
    }

    let mut state = Transaction::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut *stream)
            .take(MAX_COMMAND_LINE)
            .read_until(b'\n', &mut line)?;
        if read == 0 {
            debug!("Client closed the connection");
            break;
        }
        if !line.ends_with(b"\n") && read as u64 == MAX_COMMAND_LINE {
            discard_line(stream)?;
            reply(stream, "500 5.5.2 Line too long")?;
            continue;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        let (verb, args) = split_command(text);
        trace!(verb = %verb, "Command");

        match verb.as_str() {
            "HELO" | "EHLO" if args.is_empty() => {
                reply(stream, "501 5.5.4 Domain name required")?;
            }
            "HELO" => {
                session.reset();
                state.clear();
                state.greeted = true;
                reply(stream, &format!("250 {}", settings.domain))?;
            }
            "EHLO" => {
                session.reset();
                state.clear();
                state.greeted = true;
                let mut lines = vec![
                    settings.domain.clone(),
                    format!("SIZE {}", settings.max_message_size),
                    "8BITMIME".to_string(),
                ];
                if tls == TlsMode::Offered {
                    lines.push("STARTTLS".to_string());
                }
                reply_lines(stream, 250, &lines)?;
            }
            "MAIL" => {
                if !state.greeted {
                    reply(stream, "503 5.5.1 Please introduce yourself first")?;
                } else if state.has_sender {
                    reply(stream, "503 5.5.1 Sender already specified")?;
                } else {
                    match parse_mail_from(args) {
                        None => reply(stream, "501 5.5.4 Syntax: MAIL FROM:<address>")?,
                        Some((_, Some(size))) if size > settings.max_message_size => reply(
                            stream,
                            "552 5.3.4 Message size exceeds fixed maximum message size",
                        )?,
                        Some((from, _)) => match session.mail(&from) {
                            Ok(()) => {
                                state.has_sender = true;
                                reply(stream, "250 2.1.0 OK")?;
                            }
                            Err(e) => {
                                warn!(error = %e, "Sender refused");
                                reply(stream, "451 4.3.0 Sender refused")?;
                            }
                        },
                    }
                }
            }
            "RCPT" => {
                if !state.has_sender {
                    reply(stream, "503 5.5.1 Need MAIL before RCPT")?;
                } else if state.recipients >= settings.max_recipients {
                    reply(stream, "452 4.5.3 Too many recipients")?;
                } else {
                    match parse_path(args, "TO:") {
                        None => reply(stream, "501 5.5.4 Syntax: RCPT TO:<address>")?,
                        Some(to) => match session.rcpt(&to) {
                            Ok(()) => {
                                state.recipients += 1;
                                reply(stream, "250 2.1.5 OK")?;
                            }
                            Err(e) => {
                                warn!(error = %e, "Recipient refused");
                                reply(stream, "451 4.3.0 Recipient refused")?;
                            }
                        },
                    }
                }
            }
            "DATA" => {
                if !state.has_sender || state.recipients == 0 {
                    reply(stream, "503 5.5.1 Need RCPT before DATA")?;
                    continue;
                }
                reply(stream, "354 Start mail input; end with <CRLF>.<CRLF>")?;

                match read_data(stream, settings.max_message_size)? {
                    None => reply(
                        stream,
                        "552 5.3.4 Message size exceeds fixed maximum message size",
                    )?,
                    Some(data) => match session.data(&mut data.as_slice()) {
                        Ok(message) => {
                            reply(stream, &format!("250 2.0.0 OK: queued as {}", message.id))?
                        }
                        Err(e) => {
                            debug!(error = %e, "Transmission failed");
                            reply(stream, "554 5.0.0 Transaction failed")?;
                        }
                    },
                }
                session.reset();
                state.clear();
            }
            "RSET" => {
                session.reset();
                state.clear();
                reply(stream, "250 2.0.0 OK")?;
            }
            "NOOP" => reply(stream, "250 2.0.0 OK")?,
            "VRFY" => reply(
                stream,
                "252 2.5.0 Cannot VRFY user, but will accept message",
            )?,
            "QUIT" => {
                reply(stream, &format!("221 2.0.0 {} closing connection", settings.domain))?;
                break;
            }
            "STARTTLS" => match tls {
                TlsMode::Unavailable => reply(stream, "502 5.5.1 Command not implemented")?,
                TlsMode::Active => reply(stream, "503 5.5.1 TLS already active")?,
                TlsMode::Offered if !state.greeted => {
                    reply(stream, "503 5.5.1 Please introduce yourself first")?
                }
                TlsMode::Offered if !args.is_empty() => {
                    reply(stream, "501 5.5.4 Syntax error (no parameters allowed)")?
                }
                TlsMode::Offered => {
                    reply(stream, "220 2.0.0 Ready to start TLS")?;
                    session.reset();
                    return Ok(Exit::StartTls);
                }
            },
            "AUTH" | "BDAT" | "EXPN" | "HELP" | "TURN" | "ETRN" => {
                reply(stream, "502 5.5.1 Command not implemented")?;
            }
            _ => reply(stream, "500 5.5.2 Syntax error, command unrecognized")?,
        }
    }

    if let Err(e) = session.logout() {
        warn!(error = %e, "Logout failed");
    }
    Ok(Exit::Closed)
}

fn reply<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_all(format!("{text}\r\n").as_bytes())?;
    writer.flush()
}

/// Multi-line reply: `code-` on every line but the last.
fn reply_lines<W: Write>(writer: &mut W, code: u16, lines: &[String]) -> io::Result<()> {
    let mut text = String::new();
    for (i, line) in lines.iter().enumerate() {
        let separator = if i + 1 == lines.len() { ' ' } else { '-' };
        text.push_str(&format!("{code}{separator}{line}\r\n"));
    }
    writer.write_all(text.as_bytes())?;
    writer.flush()
}

/// Upper-cased verb and the untouched remainder.
fn split_command(line: &str) -> (String, &str) {
    let line = line.trim_start();
    match line.split_once(' ') {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// Address from `FROM:<addr>` or `TO:<addr>`, brackets removed.
///
/// The null reverse path `<>` yields an empty address.
fn parse_path(args: &str, keyword: &str) -> Option<String> {
    let prefix = args.get(..keyword.len())?;
    if !prefix.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let path = args[keyword.len()..].trim_start();
    let path = path.split_whitespace().next().unwrap_or_default();
    if let Some(inner) = path.strip_prefix('<') {
        return inner.strip_suffix('>').map(str::to_string);
    }
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Sender address and the declared `SIZE=` parameter, if any.
fn parse_mail_from(args: &str) -> Option<(String, Option<usize>)> {
    let from = parse_path(args, "FROM:")?;
    let size = args
        .split_whitespace()
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("SIZE"))
        .and_then(|(_, value)| value.parse().ok());
    Some((from, size))
}

/// Read the `DATA` payload up to the lone `.` line, removing dot-stuffing.
///
/// Lines longer than [`MAX_DATA_LINE`] arrive in several reads; only a read
/// that starts a line is unstuffed or taken as the terminator.
///
/// Returns `None` when the payload outgrew `max_size`; the rest is still
/// drained so the connection stays in sync.
fn read_data<R: BufRead>(reader: &mut R, max_size: usize) -> io::Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    let mut too_large = false;
    let mut line = Vec::new();
    let mut at_line_start = true;

    loop {
        line.clear();
        let read = reader.by_ref().take(MAX_DATA_LINE).read_until(b'\n', &mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            ));
        }
        let starts_line = at_line_start;
        at_line_start = line.ends_with(b"\n");
        if starts_line && (line == b".\r\n" || line == b".\n") {
            break;
        }

        let content = match line.strip_prefix(b".") {
            Some(rest) if starts_line => rest,
            _ => &line[..],
        };
        if too_large {
            continue;
        }
        if data.len() + content.len() > max_size {
            too_large = true;
            data = Vec::new();
            continue;
        }
        data.extend_from_slice(content);
    }

    if too_large {
        Ok(None)
    } else {
        Ok(Some(data))
    }
}

/// Skip the rest of an overlong line.
fn discard_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    let mut sink = Vec::new();
    loop {
        sink.clear();
        let read = reader.by_ref().take(MAX_COMMAND_LINE).read_until(b'\n', &mut sink)?;
        if read == 0 || sink.ends_with(b"\n") {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("mail FROM:<a@b>"), ("MAIL".to_string(), "FROM:<a@b>"));
        assert_eq!(split_command("QUIT"), ("QUIT".to_string(), ""));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("TO:<x@y.z>", "TO:").as_deref(), Some("x@y.z"));
        assert_eq!(parse_path("to: <x@y.z>", "TO:").as_deref(), Some("x@y.z"));
        assert_eq!(parse_path("FROM:<>", "FROM:").as_deref(), Some(""));
        assert_eq!(parse_path("FROM:bare@host", "FROM:").as_deref(), Some("bare@host"));
        assert_eq!(parse_path("TO:<broken", "TO:"), None);
        assert_eq!(parse_path("x", "FROM:"), None);
        assert_eq!(parse_path("FROM:", "FROM:"), None);
    }

    #[test]
    fn test_parse_mail_from_size() {
        assert_eq!(
            parse_mail_from("FROM:<a@b> BODY=8BITMIME SIZE=1234"),
            Some(("a@b".to_string(), Some(1234)))
        );
        assert_eq!(parse_mail_from("FROM:<a@b>"), Some(("a@b".to_string(), None)));
    }

    #[test]
    fn test_read_data_unstuffs_dots() {
        let mut input: &[u8] = b"line\r\n..dot\r\n.\r\nNEXT\r\n";
        let data = read_data(&mut input, 1024).unwrap().unwrap();
        assert_eq!(data, b"line\r\n.dot\r\n");
        assert_eq!(input, b"NEXT\r\n");
    }

    #[test]
    fn test_read_data_long_line_keeps_dots() {
        let mut body = "a".repeat(MAX_DATA_LINE as usize).into_bytes();
        body.extend_from_slice(b".tail\r\n");
        let mut input = body.clone();
        input.extend_from_slice(b".\r\nNEXT\r\n");

        let mut reader = input.as_slice();
        let data = read_data(&mut reader, 1 << 20).unwrap().unwrap();
        assert_eq!(data, body);
        assert_eq!(reader, b"NEXT\r\n");
    }

    #[test]
    fn test_read_data_lone_dot_inside_long_line() {
        // A chunk boundary right before ".\r\n" does not end the payload.
        let mut body = "b".repeat(MAX_DATA_LINE as usize).into_bytes();
        body.extend_from_slice(b".\r\n");
        let mut input = body.clone();
        input.extend_from_slice(b".\r\n");

        let data = read_data(&mut input.as_slice(), 1 << 20).unwrap().unwrap();
        assert_eq!(data, body);
    }

    #[test]
    fn test_reply_lines() {
        let mut out = Vec::new();
        reply_lines(&mut out, 250, &["mx".to_string(), "SIZE 10".to_string()]).unwrap();
        assert_eq!(out, b"250-mx\r\n250 SIZE 10\r\n");
    }

    #[test]
    fn test_buffered_reads_lines_and_writes_through() {
        struct Pipe {
            input: &'static [u8],
            output: Vec<u8>,
        }
        impl Read for Pipe {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }
        impl Write for Pipe {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut stream = Buffered::new(Pipe {
            input: b"EHLO a\r\nREST",
            output: Vec::new(),
        });
        let mut line = String::new();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, "EHLO a\r\n");
        assert_eq!(stream.buffer(), b"REST");
        reply(&mut stream, "250 ok").unwrap();
        assert_eq!(stream.into_inner().output, b"250 ok\r\n");
    }

    #[test]
    fn test_read_data_too_large_drains() {
        let mut input: &[u8] = b"0123456789\r\n0123456789\r\n.\r\nQUIT\r\n";
        assert!(read_data(&mut input, 15).unwrap().is_none());
        assert_eq!(input, b"QUIT\r\n");
    }

    #[test]
    fn test_read_data_eof() {
        let mut input: &[u8] = b"unterminated\r\n";
        let err = read_data(&mut input, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
