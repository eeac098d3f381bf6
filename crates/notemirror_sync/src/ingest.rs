//! Metadata chunk ingestion.
//!
//! A chunk is applied in a fixed order: expunges first, then notebook
//! upserts, then note stubs, and only then the scope watermark. A crash
//! anywhere before the watermark write leaves the watermark at the previous
//! chunk, and re-applying a chunk is harmless, so an interrupted run resumes
//! from the last fully applied chunk.

use crate::error::{SyncError, SyncResult};
use notemirror_store::MirrorStore;
use notemirror_types::{LinkedNotebook, SyncChunk, WatermarkScope};
use std::ops::AddAssign;
use tracing::debug;

pub use crate::remote::ChunkStream;

/// Counters of one ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Chunks applied (empty no-op chunks excluded).
    pub chunks: u64,
    /// Notebooks created or updated.
    pub notebooks: u64,
    /// Note stubs created or updated, each awaiting a body download.
    pub notes: u64,
    /// Notebooks expunged.
    pub expunged_notebooks: u64,
    /// Notes expunged.
    pub expunged_notes: u64,
    /// Linked notebooks expunged.
    pub expunged_linked_notebooks: u64,
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, other: Self) {
        self.chunks += other.chunks;
        self.notebooks += other.notebooks;
        self.notes += other.notes;
        self.expunged_notebooks += other.expunged_notebooks;
        self.expunged_notes += other.expunged_notes;
        self.expunged_linked_notebooks += other.expunged_linked_notebooks;
    }
}

/// Applies metadata chunks of one scope to a store.
#[derive(Debug, Clone)]
pub struct ChunkIngester {
    scope: WatermarkScope,
    linked: Option<LinkedNotebook>,
}

impl ChunkIngester {
    /// Creates an ingester for the account's own notebooks.
    pub fn primary() -> Self {
        Self {
            scope: WatermarkScope::Primary,
            linked: None,
        }
    }

    /// Creates an ingester for a linked notebook.
    ///
    /// Notebooks reported in its chunks inherit the link's stack and get a
    /// back-reference to the link.
    pub fn linked(linked: LinkedNotebook) -> Self {
        Self {
            scope: WatermarkScope::Linked(linked.guid.clone()),
            linked: Some(linked),
        }
    }

    /// Returns the scope this ingester writes.
    pub fn scope(&self) -> &WatermarkScope {
        &self.scope
    }

    /// Applies every chunk of `chunks` in order.
    ///
    /// Stops at the first error. Chunks applied before it stay applied.
    pub fn ingest<S, I>(&self, store: &mut S, chunks: I) -> SyncResult<IngestStats>
    where
        S: MirrorStore + ?Sized,
        I: IntoIterator<Item = SyncResult<SyncChunk>>,
    {
        let mut stats = IngestStats::default();
        for chunk in chunks {
            let chunk = chunk?;
            stats += self.apply_chunk(store, &chunk)?;
        }
        Ok(stats)
    }

    /// Applies one chunk and advances the scope watermark to its high
    /// watermark.
    pub fn apply_chunk<S>(&self, store: &mut S, chunk: &SyncChunk) -> SyncResult<IngestStats>
    where
        S: MirrorStore + ?Sized,
    {
        let current = store.get_watermark(&self.scope)?;
        let high = chunk.chunk_high_watermark;

        if high < current {
            return Err(SyncError::Protocol(format!(
                "{} chunk ends at {} but {} is already stored",
                self.scope, high, current
            )));
        }
        if high == current && chunk.is_empty() {
            debug!("{} chunk at {} has nothing new", self.scope, high);
            return Ok(IngestStats::default());
        }

        let mut stats = IngestStats {
            chunks: 1,
            ..IngestStats::default()
        };

        if !chunk.expunged_notebook_guids.is_empty() {
            store.expunge_notebooks(&chunk.expunged_notebook_guids)?;
            stats.expunged_notebooks = chunk.expunged_notebook_guids.len() as u64;
        }
        if !chunk.expunged_note_guids.is_empty() {
            store.expunge_notes(&chunk.expunged_note_guids)?;
            stats.expunged_notes = chunk.expunged_note_guids.len() as u64;
        }
        if !chunk.expunged_linked_notebook_guids.is_empty() {
            store.expunge_linked_notebooks(&chunk.expunged_linked_notebook_guids)?;
            stats.expunged_linked_notebooks = chunk.expunged_linked_notebook_guids.len() as u64;
        }

        if !chunk.notebooks.is_empty() {
            let mut notebooks = chunk.notebooks.clone();
            if let Some(linked) = &self.linked {
                for notebook in &mut notebooks {
                    notebook.stack = linked.stack.clone();
                    notebook.linked_notebook_guid = Some(linked.guid.clone());
                    store.upsert_linked_notebook(linked, &notebook.guid)?;
                }
            }
            for notebook in &notebooks {
                debug!("Adding/updating notebook {}", notebook);
            }
            store.upsert_notebooks(&notebooks)?;
            stats.notebooks = notebooks.len() as u64;
        }

        if !chunk.notes.is_empty() {
            store.upsert_note_stubs(&chunk.notes)?;
            stats.notes = chunk.notes.len() as u64;
        }

        store.set_watermark(&self.scope, high)?;
        debug!(
            "{} watermark advanced to {} of {}",
            self.scope, high, chunk.total_watermark
        );
        Ok(stats)
    }
}
