//! Note records.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Title-only note metadata as reported by a metadata chunk.
///
/// Storing a stub leaves the note pending until its content is downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteStub {
    /// Remote identifier.
    pub guid: String,
    /// Note title.
    pub title: String,
    /// Notebook holding the note.
    pub notebook_guid: String,
    /// False if the note is in the trash.
    pub active: bool,
}

impl NoteStub {
    /// Creates an active note stub.
    pub fn new(
        guid: impl Into<String>,
        title: impl Into<String>,
        notebook_guid: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            notebook_guid: notebook_guid.into(),
            active: true,
        }
    }
}

/// A binary attachment of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Remote identifier.
    pub guid: String,
    /// MIME type.
    pub mime: String,
    /// Attachment bytes.
    #[serde(with = "serde_bytes_vec")]
    pub data: Vec<u8>,
    /// Size in bytes as reported by the remote.
    pub size: u64,
}

impl Resource {
    /// Creates a resource whose reported size matches its data.
    pub fn new(guid: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            guid: guid.into(),
            mime: mime.into(),
            data,
            size,
        }
    }
}

/// A fully downloaded note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Remote identifier.
    pub guid: String,
    /// Note title.
    pub title: String,
    /// Notebook holding the note.
    pub notebook_guid: String,
    /// False if the note is in the trash.
    pub active: bool,
    /// Note body markup.
    pub content: Option<String>,
    /// Length of the body as reported by the remote.
    pub content_length: u64,
    /// Tag identifiers.
    pub tag_guids: Vec<String>,
    /// Human-readable tag names, resolved before persistence.
    pub tag_names: Vec<String>,
    /// Attachments.
    pub resources: Vec<Resource>,
    /// Creation time in milliseconds since the epoch.
    pub created: Option<i64>,
    /// Last update time in milliseconds since the epoch.
    pub updated: Option<i64>,
}

impl Note {
    /// Creates an active note with the given body.
    pub fn new(
        guid: impl Into<String>,
        title: impl Into<String>,
        notebook_guid: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            guid: guid.into(),
            title: title.into(),
            notebook_guid: notebook_guid.into(),
            active: true,
            content_length: content.len() as u64,
            content: Some(content),
            tag_guids: Vec::new(),
            tag_names: Vec::new(),
            resources: Vec::new(),
            created: None,
            updated: None,
        }
    }

    /// Adds an attachment.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Sets the tag identifiers.
    pub fn with_tags<I, S>(mut self, tag_guids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_guids = tag_guids.into_iter().map(Into::into).collect();
        self
    }

    /// Size used for download memory accounting: body length plus attachment sizes.
    pub fn resolved_size(&self) -> u64 {
        self.resources
            .iter()
            .fold(self.content_length, |total, r| total.saturating_add(r.size))
    }

    /// Returns the metadata stub for this note.
    pub fn stub(&self) -> NoteStub {
        NoteStub {
            guid: self.guid.clone(),
            title: self.title.clone(),
            notebook_guid: self.notebook_guid.clone(),
            active: self.active,
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CodecError::encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' [{}], notebook_id {}",
            self.title, self.guid, self.notebook_guid
        )?;
        if !self.active {
            write!(f, ", DELETED")?;
        }
        Ok(())
    }
}

/// A note whose metadata is stored locally but whose body is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNote {
    /// Remote identifier.
    pub guid: String,
    /// Note title.
    pub title: String,
    /// Linked notebook the note belongs to, if any.
    pub linked_notebook_guid: Option<String>,
}

impl PendingNote {
    /// Creates a pending note of the primary account.
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            linked_notebook_guid: None,
        }
    }
}

/// Encodes attachment data as a CBOR byte string instead of an integer array.
mod serde_bytes_vec {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note() -> Note {
        Note::new("n1", "Groceries", "nb1", "<en-note>milk</en-note>")
            .with_tags(["t1", "t2"])
            .with_resource(Resource::new("r1", "image/png", vec![0x89, 0x50, 0x4e, 0x47]))
    }

    #[test]
    fn resolved_size_counts_body_and_resources() {
        let note = sample_note();
        assert_eq!(note.resolved_size(), 23 + 4);
    }

    #[test]
    fn resolved_size_uses_reported_resource_size() {
        let mut note = sample_note();
        note.resources[0].size = 1000;
        note.content_length = 100;
        assert_eq!(note.resolved_size(), 1100);
    }

    #[test]
    fn resolved_size_saturates_on_huge_reported_sizes() {
        let mut note = sample_note()
            .with_resource(Resource::new("r2", "image/png", vec![1]));
        note.content_length = u64::MAX - 1;
        note.resources[0].size = u64::MAX;
        assert_eq!(note.resolved_size(), u64::MAX);
    }

    #[test]
    fn cbor_preserves_every_field() {
        let mut note = sample_note();
        note.tag_names = vec!["home".into(), "food".into()];
        note.active = false;
        note.updated = Some(1_712_692_800_000);

        let bytes = note.encode().unwrap();
        assert_eq!(Note::decode(&bytes).unwrap(), note);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Note::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn display_marks_trashed_notes() {
        let mut note = sample_note();
        assert!(!note.to_string().contains("DELETED"));
        note.active = false;
        assert!(note.to_string().ends_with(", DELETED"));
    }
}
