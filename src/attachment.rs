//! One-shot file payload for multipart requests.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::PathBuf;

/// Where the bytes of an attachment come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    Bytes(Bytes),
    /// Read when the request is sent.
    Path(PathBuf),
}

impl AttachmentContent {
    pub async fn load(&self) -> Result<Bytes> {
        match self {
            AttachmentContent::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentContent::Path(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read attachment {}", path.display()))?;
                Ok(Bytes::from(data))
            }
        }
    }
}

impl From<Vec<u8>> for AttachmentContent {
    fn from(data: Vec<u8>) -> Self {
        AttachmentContent::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for AttachmentContent {
    fn from(data: &'static [u8]) -> Self {
        AttachmentContent::Bytes(Bytes::from_static(data))
    }
}

impl From<&str> for AttachmentContent {
    fn from(data: &str) -> Self {
        AttachmentContent::Bytes(Bytes::copy_from_slice(data.as_bytes()))
    }
}

impl From<String> for AttachmentContent {
    fn from(data: String) -> Self {
        AttachmentContent::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for AttachmentContent {
    fn from(data: Bytes) -> Self {
        AttachmentContent::Bytes(data)
    }
}

impl From<PathBuf> for AttachmentContent {
    fn from(path: PathBuf) -> Self {
        AttachmentContent::Path(path)
    }
}

/// A file sent as a multipart part under a form field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    name: String,
    content: AttachmentContent,
    filename: String,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<AttachmentContent>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            filename: filename.into(),
        }
    }

    /// Same as [`Attachment::new`].
    pub fn make(
        name: impl Into<String>,
        content: impl Into<AttachmentContent>,
        filename: impl Into<String>,
    ) -> Self {
        Self::new(name, content, filename)
    }

    /// Form field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn content(&self) -> &AttachmentContent {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<AttachmentContent>) -> &mut Self {
        self.content = content.into();
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) -> &mut Self {
        self.filename = filename.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_make_equals_new() {
        assert_eq!(
            Attachment::make("avatar", "png-bytes", "me.png"),
            Attachment::new("avatar", "png-bytes", "me.png")
        );
    }

    #[test]
    fn test_accessors_and_mutators() {
        let mut attachment = Attachment::new("file", "a", "a.txt");
        attachment
            .set_name("document")
            .set_content(b"b".as_slice())
            .set_filename("b.txt");

        assert_eq!(attachment.name(), "document");
        assert_eq!(
            attachment.content(),
            &AttachmentContent::Bytes(Bytes::from_static(b"b"))
        );
        assert_eq!(attachment.filename(), "b.txt");
    }

    #[tokio::test]
    async fn test_load_bytes() {
        let content = AttachmentContent::from("hello");
        assert_eq!(content.load().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_load_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"from disk").unwrap();

        let content = AttachmentContent::from(file.path().to_path_buf());
        assert_eq!(
            content.load().await.unwrap(),
            Bytes::from_static(b"from disk")
        );
    }

    #[tokio::test]
    async fn test_load_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let content = AttachmentContent::from(dir.path().join("missing.bin"));
        let err = content.load().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read attachment"));
    }
}
