//! Local filesystem sink.
//!
//! Layout under the root directory:
//!
//! ```text
//! messages/<message id>.json
//! attachments/<attachment id>
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::Sink;
use crate::error::{InboundError, Result};
use crate::model::message::Message;

pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    /// Open (and create if needed) a local store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join("messages"), root.join("attachments")] {
            std::fs::create_dir_all(&dir).map_err(|e| InboundError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    pub fn message_path(&self, id: &str) -> PathBuf {
        self.root.join("messages").join(format!("{id}.json"))
    }

    pub fn attachment_path(&self, id: &str) -> PathBuf {
        self.root.join("attachments").join(id)
    }
}

impl Sink for LocalSink {
    fn name(&self) -> &str {
        "local"
    }

    fn store_message(&self, message: &Message) -> Result<()> {
        let path = self.message_path(&message.id);
        let value = serde_json::to_vec_pretty(message)?;
        std::fs::write(&path, value).map_err(|e| InboundError::io(&path, e))?;
        debug!(path = %path.display(), "Stored message metadata");
        Ok(())
    }

    fn store_attachment(&self, id: &str, data: &mut dyn Read) -> Result<()> {
        let path = self.attachment_path(id);
        let file = File::create(&path).map_err(|e| InboundError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        let written = std::io::copy(data, &mut writer).map_err(|e| InboundError::io(&path, e))?;
        writer.flush().map_err(|e| InboundError::io(&path, e))?;
        debug!(path = %path.display(), bytes = written, "Stored attachment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::{Alternative, MessageBuilder};

    #[test]
    fn test_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");
        LocalSink::new(&root).unwrap();
        assert!(root.join("messages").is_dir());
        assert!(root.join("attachments").is_dir());
    }

    #[test]
    fn test_store_message_as_json() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(tmp.path()).unwrap();
        let mut builder = MessageBuilder::new("a@x", "b@y");
        builder.push_alternative(Alternative::new("text/plain", "Hello"));
        let msg = builder.build();

        sink.store_message(&msg).unwrap();
        let raw = std::fs::read_to_string(sink.message_path(&msg.id)).unwrap();
        let back: Message = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_store_attachment_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(tmp.path()).unwrap();
        let mut data: &[u8] = b"\x00\x01binary\xff";

        sink.store_attachment("att-1", &mut data).unwrap();
        assert_eq!(
            std::fs::read(sink.attachment_path("att-1")).unwrap(),
            b"\x00\x01binary\xff"
        );
    }

    #[test]
    fn test_missing_root_parent_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(matches!(
            LocalSink::new(blocker.join("store")),
            Err(InboundError::Io { .. })
        ));
    }
}
