//! MIME decomposition: walks the decoded part tree of one transmission,
//! separating body alternatives from attachments.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, trace};

use crate::error::{InboundError, Result};
use crate::model::attachment::Attachment;
use crate::model::message::{Alternative, MessageBuilder};
use crate::parser::classify;
use crate::parser::references::resolve_references;
use crate::sink::Dispatcher;

/// How inline parts become [`Alternative`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
    /// One alternative per inline part.
    #[default]
    Alternatives,
    /// All inline parts concatenated into a single alternative.
    Merged,
}

/// Decomposition settings shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Split HTML bodies into new content and quoted history.
    pub classify_html: bool,
    pub body_mode: BodyMode,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            classify_html: true,
            body_mode: BodyMode::Alternatives,
        }
    }
}

/// How a single MIME part is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// Body content.
    Inline,
    /// File content, stored separately.
    Attachment,
    /// Structural container (multipart); carries no content of its own.
    Container,
}

/// Parse a raw transmission into its header set and part tree.
pub fn parse_transmission(raw: &[u8]) -> Result<mail_parser::Message<'_>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(InboundError::Parse("empty transmission".into()));
    }
    MessageParser::default()
        .parse(raw)
        .ok_or_else(|| InboundError::Parse("no message headers found".into()))
}

/// Decide whether a part is body content or an attachment.
///
/// A part is inline when its disposition says so, or when it is textual and
/// not explicitly an attachment. Everything else with content is an
/// attachment.
pub fn classify_part(part: &MessagePart<'_>) -> PartKind {
    if matches!(part.body, PartType::Multipart(_)) {
        return PartKind::Container;
    }

    let is_text = part
        .content_type()
        .map(|ct| ct.ctype().eq_ignore_ascii_case("text"))
        .unwrap_or(true);
    let disposition = part
        .content_disposition()
        .map(|cd| cd.ctype().to_ascii_lowercase());

    match disposition.as_deref() {
        Some("inline") => PartKind::Inline,
        Some("attachment") => PartKind::Attachment,
        _ if is_text => PartKind::Inline,
        _ => PartKind::Attachment,
    }
}

/// Walk every part of `message` in transmission order.
///
/// Inline parts become alternatives on `builder`. Each attachment is handed
/// to `dispatcher` as soon as it is reached, then recorded on `builder`.
/// The first failing part aborts the walk; attachments already stored stay
/// stored.
pub fn walk_parts(
    message: &mail_parser::Message<'_>,
    builder: &mut MessageBuilder,
    dispatcher: &Dispatcher,
    options: &WalkOptions,
) -> Result<()> {
    let mut alternatives = Vec::new();

    for (index, part) in message.parts.iter().enumerate() {
        match classify_part(part) {
            PartKind::Container => {
                trace!(index, "Skipping multipart container");
            }
            PartKind::Inline => {
                let alternative = read_inline(part);
                trace!(index, content_type = %alternative.content_type, "Inline part");
                alternatives.push(alternative);
            }
            PartKind::Attachment => {
                let filename = part
                    .attachment_name()
                    .filter(|name| !name.trim().is_empty())
                    .ok_or(InboundError::MissingFilename { index })?;
                let attachment = Attachment::new(filename);
                debug!(
                    index,
                    id = %attachment.id,
                    filename = %attachment.original_filename,
                    bytes = part.contents().len(),
                    "Attachment part"
                );
                dispatcher.store_attachment(&attachment, part.contents())?;
                builder.push_attachment(attachment);
            }
        }
    }

    if options.body_mode == BodyMode::Merged {
        alternatives = classify::merge_alternatives(&alternatives)
            .into_iter()
            .collect();
    }
    if options.classify_html {
        for alternative in alternatives.iter_mut().filter(|a| a.is_html()) {
            let (primary, quoted) = classify::split_quoted_html(&alternative.text);
            alternative.primary_content = Some(primary);
            alternative.quoted_thread = Some(quoted);
        }
    }
    builder.set_alternatives(alternatives);
    Ok(())
}

/// Copy subject, Message-ID and the reference chain from the top-level headers.
pub fn read_headers(message: &mail_parser::Message<'_>, builder: &mut MessageBuilder) {
    builder.set_subject(message.subject().unwrap_or_default());
    builder.set_message_id(message.message_id().map(String::from));
    builder.set_references(resolve_references(
        message.header_raw("References").unwrap_or_default(),
        message.header_raw("In-Reply-To").unwrap_or_default(),
    ));
}

/// Decode an inline part with trailing line terminators removed.
fn read_inline(part: &MessagePart<'_>) -> Alternative {
    let text = match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        _ => decode_bytes(part.contents()),
    };
    let text = text.trim_end_matches(['\r', '\n']).to_string();
    Alternative::new(content_type_of(part), text)
}

/// Lower-case `type/subtype` without parameters; `text/plain` when undeclared.
fn content_type_of(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        },
        None => "text/plain".to_string(),
    }
}

/// UTF-8 when valid, otherwise Windows-1252 (which accepts every byte).
fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}
