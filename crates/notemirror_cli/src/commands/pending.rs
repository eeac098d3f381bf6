//! Pending command implementation.

use super::OutputFormat;
use notemirror_store::{MirrorStore, SqliteStore};
use notemirror_types::PendingNote;
use serde::Serialize;
use std::path::Path;

/// A note waiting for its body.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    /// Remote identifier.
    pub guid: String,
    /// Note title.
    pub title: String,
    /// Linked notebook the note belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_notebook: Option<String>,
}

impl From<PendingNote> for PendingEntry {
    fn from(note: PendingNote) -> Self {
        Self {
            guid: note.guid,
            title: note.title,
            linked_notebook: note.linked_notebook_guid,
        }
    }
}

/// Lists pending notes, at most `limit` of them.
pub fn collect<S: MirrorStore>(
    store: &S,
    limit: Option<usize>,
) -> Result<(usize, Vec<PendingEntry>), Box<dyn std::error::Error>> {
    let pending = store.list_notes_missing_body()?;
    let total = pending.len();
    let entries = pending
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(PendingEntry::from)
        .collect();
    Ok((total, entries))
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let store = SqliteStore::open(path)?;
    let (total, entries) = collect(&store, limit)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            println!("{} note(s) pending", total);
            for entry in &entries {
                match &entry.linked_notebook {
                    Some(linked) => {
                        println!("  {}  {}  (linked notebook {})", entry.guid, entry.title, linked)
                    }
                    None => println!("  {}  {}", entry.guid, entry.title),
                }
            }
            if entries.len() < total {
                println!("  ... and {} more", total - entries.len());
            }
        }
    }
    Ok(())
}
