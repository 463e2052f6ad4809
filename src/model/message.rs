//! Received message record and its body alternatives.

use super::attachment::Attachment;

/// One fully decomposed mail transmission.
///
/// This is the record handed to every storage sink. Attachment bytes are
/// stored separately, keyed by [`Attachment::id`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Generated at receipt time; storage key and correlation token.
    #[serde(rename = "inbound_id")]
    pub id: String,

    /// The `Message-ID` header value, without angle brackets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Envelope sender (`MAIL FROM`), not the `From:` header.
    pub from: String,

    /// Envelope recipient (`RCPT TO`), not the `To:` header.
    pub to: String,

    /// Decoded subject line, empty when absent.
    pub subject: String,

    /// Ancestor Message-IDs, oldest first.
    pub references: Vec<String>,

    /// Body renditions in transmission order.
    pub alternatives: Vec<Alternative>,

    /// Attachment metadata in transmission order.
    pub attachments: Vec<Attachment>,
}

/// One inline body part.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Alternative {
    /// Media type as declared by the part (e.g. `"text/plain"`).
    pub content_type: String,

    /// Decoded content with trailing line terminators removed.
    pub text: String,

    /// New content of an HTML body, when the classifier ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_content: Option<String>,

    /// Quoted conversation history of an HTML body, when the classifier ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_thread: Option<String>,
}

impl Alternative {
    pub fn new(content_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            text: text.into(),
            primary_content: None,
            quoted_thread: None,
        }
    }

    /// Whether this rendition is an HTML body.
    pub fn is_html(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("text/html")
    }
}

/// Session-scoped, incrementally filled message.
///
/// The builder exists only while a transmission is being walked and is
/// consumed by [`MessageBuilder::build`], which assigns the record id.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    from: String,
    to: String,
    message_id: Option<String>,
    subject: String,
    references: Vec<String>,
    alternatives: Vec<Alternative>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Start a record for the given envelope.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Self::default()
        }
    }

    pub fn push_alternative(&mut self, alternative: Alternative) {
        self.alternatives.push(alternative);
    }

    pub fn push_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// Replace all alternatives at once (used by body reconciliation).
    pub fn set_alternatives(&mut self, alternatives: Vec<Alternative>) {
        self.alternatives = alternatives;
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = subject.into();
    }

    /// Empty identifiers are treated as absent.
    pub fn set_message_id(&mut self, message_id: Option<String>) {
        self.message_id = message_id.filter(|id| !id.is_empty());
    }

    pub fn set_references(&mut self, references: Vec<String>) {
        self.references = references;
    }

    /// Freeze the builder into a [`Message`] with a freshly generated id.
    pub fn build(self) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: self.message_id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            references: self.references,
            alternatives: self.alternatives,
            attachments: self.attachments,
        }
    }
}
