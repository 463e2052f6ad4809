//! Attachment metadata.
//!
//! The content itself is never part of the record: it is handed to the
//! storage sinks separately, keyed by [`Attachment::id`].

/// Metadata about one attachment part of a received message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// Generated identifier, used as the storage key for the attachment bytes.
    pub id: String,

    /// Filename as declared by the part (`Content-Disposition` or `Content-Type` name).
    pub original_filename: String,
}

impl Attachment {
    /// Create a record with a freshly generated identifier.
    pub fn new(original_filename: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_filename: original_filename.into(),
        }
    }
}
