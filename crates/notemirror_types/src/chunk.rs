//! Metadata chunks and watermark scopes.

use crate::note::NoteStub;
use crate::notebook::Notebook;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One bounded batch of metadata changes returned by a single sync fetch.
///
/// # Fields
///
/// - `notebooks`: notebooks created or updated in this range
/// - `notes`: title-only stubs of notes created or updated in this range
/// - `expunged_*`: identifiers permanently removed on the remote
/// - `chunk_high_watermark`: highest sequence number covered by this chunk
/// - `total_watermark`: the remote's overall high watermark when the chunk was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChunk {
    /// Notebooks created or updated.
    pub notebooks: Vec<Notebook>,
    /// Note stubs created or updated.
    pub notes: Vec<NoteStub>,
    /// Expunged notebook identifiers.
    pub expunged_notebook_guids: Vec<String>,
    /// Expunged note identifiers.
    pub expunged_note_guids: Vec<String>,
    /// Expunged linked notebook identifiers.
    pub expunged_linked_notebook_guids: Vec<String>,
    /// Highest sequence number covered by this chunk.
    pub chunk_high_watermark: u64,
    /// Remote high watermark at the time the chunk was produced.
    pub total_watermark: u64,
}

impl SyncChunk {
    /// Creates an empty chunk covering up to `chunk_high_watermark`.
    pub fn new(chunk_high_watermark: u64, total_watermark: u64) -> Self {
        Self {
            chunk_high_watermark,
            total_watermark,
            ..Self::default()
        }
    }

    /// Returns true if the source reports this chunk as the last one.
    pub fn is_final(&self) -> bool {
        self.chunk_high_watermark == self.total_watermark
    }

    /// Returns true if the chunk carries no changes.
    pub fn is_empty(&self) -> bool {
        self.notebooks.is_empty()
            && self.notes.is_empty()
            && self.expunged_notebook_guids.is_empty()
            && self.expunged_note_guids.is_empty()
            && self.expunged_linked_notebook_guids.is_empty()
    }
}

/// An independently checkpointed change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatermarkScope {
    /// The account's own notebooks and notes.
    Primary,
    /// One linked notebook, by link identifier.
    Linked(String),
    /// The task and reminder stream (timestamp watermark).
    Tasks,
}

impl WatermarkScope {
    /// Returns the key the scope's watermark is persisted under.
    pub fn key(&self) -> String {
        match self {
            WatermarkScope::Primary => "usn".to_string(),
            WatermarkScope::Linked(guid) => format!("linked:{}", guid),
            WatermarkScope::Tasks => "tasks".to_string(),
        }
    }

    /// Parses a persisted key back into a scope.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "usn" => Some(WatermarkScope::Primary),
            "tasks" => Some(WatermarkScope::Tasks),
            _ => key
                .strip_prefix("linked:")
                .filter(|guid| !guid.is_empty())
                .map(|guid| WatermarkScope::Linked(guid.to_string())),
        }
    }
}

impl fmt::Display for WatermarkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkScope::Primary => write!(f, "account"),
            WatermarkScope::Linked(guid) => write!(f, "linked notebook [{}]", guid),
            WatermarkScope::Tasks => write!(f, "tasks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_chunk_is_fixed_point() {
        assert!(SyncChunk::new(50, 50).is_final());
        assert!(!SyncChunk::new(20, 50).is_final());
    }

    #[test]
    fn empty_chunk() {
        let mut chunk = SyncChunk::new(1, 1);
        assert!(chunk.is_empty());
        chunk.expunged_note_guids.push("n1".into());
        assert!(!chunk.is_empty());
    }

    #[test]
    fn scope_keys_parse_back() {
        for scope in [
            WatermarkScope::Primary,
            WatermarkScope::Tasks,
            WatermarkScope::Linked("abc".into()),
        ] {
            assert_eq!(WatermarkScope::from_key(&scope.key()), Some(scope));
        }
        assert_eq!(WatermarkScope::from_key("linked:"), None);
        assert_eq!(WatermarkScope::from_key("db_version"), None);
    }
}
