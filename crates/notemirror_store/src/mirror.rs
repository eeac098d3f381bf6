//! The storage contract used by the sync engine.

use crate::error::StoreResult;
use notemirror_types::{
    LinkedNotebook, Note, NoteStub, Notebook, PendingNote, Reminder, Task, TaskChunk,
    WatermarkScope,
};

/// Row counts and sizes reported by [`MirrorStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Notebooks, including the local mirrors of linked notebooks.
    pub notebooks: u64,
    /// Linked notebook records.
    pub linked_notebooks: u64,
    /// Notes not in the trash.
    pub active_notes: u64,
    /// Notes in the trash.
    pub trashed_notes: u64,
    /// Notes whose body has not been downloaded yet.
    pub pending_notes: u64,
    /// Sum of the sizes recorded for downloaded notes.
    pub stored_bytes: u64,
    /// Tasks.
    pub tasks: u64,
    /// Reminders.
    pub reminders: u64,
}

/// Durable local mirror of the remote collection.
///
/// The store is owned by a single coordinating thread; implementations do
/// not need to be shareable across threads.
///
/// # Invariants
///
/// - Every write operation is atomic: it is either fully applied or not at all
/// - A note is *pending* exactly when its metadata is stored but its body is not
/// - `upsert_note_stubs` leaves (or makes) the note pending, discarding any
///   previously stored body
/// - `upsert_note_full` stores the body and clears the pending state
/// - Watermarks default to 0 for scopes never synced
///
/// # Implementors
///
/// - [`super::SqliteStore`]
pub trait MirrorStore {
    /// Creates or replaces notebooks.
    fn upsert_notebooks(&mut self, notebooks: &[Notebook]) -> StoreResult<()>;

    /// Records a linked notebook and the local notebook that mirrors it.
    fn upsert_linked_notebook(
        &mut self,
        linked: &LinkedNotebook,
        notebook_guid: &str,
    ) -> StoreResult<()>;

    /// Creates or replaces note metadata, leaving each note pending.
    fn upsert_note_stubs(&mut self, stubs: &[NoteStub]) -> StoreResult<()>;

    /// Stores a downloaded note, replacing any previous content.
    ///
    /// `size` is the accounted size of the note (see [`Note::resolved_size`]).
    fn upsert_note_full(&mut self, note: &Note, size: u64) -> StoreResult<()>;

    /// Removes notebooks. Unknown identifiers are ignored.
    fn expunge_notebooks(&mut self, guids: &[String]) -> StoreResult<()>;

    /// Removes notes. Unknown identifiers are ignored.
    fn expunge_notes(&mut self, guids: &[String]) -> StoreResult<()>;

    /// Removes linked notebook records together with their mirrored
    /// notebook, its notes and the link's watermark.
    fn expunge_linked_notebooks(&mut self, guids: &[String]) -> StoreResult<()>;

    /// Returns every note whose body is missing.
    fn list_notes_missing_body(&self) -> StoreResult<Vec<PendingNote>>;

    /// Returns the persisted watermark of a scope, 0 if never set.
    fn get_watermark(&self, scope: &WatermarkScope) -> StoreResult<u64>;

    /// Persists the watermark of a scope.
    ///
    /// Callers must only advance a watermark after the effects it covers are
    /// durable.
    fn set_watermark(&mut self, scope: &WatermarkScope, value: u64) -> StoreResult<()>;

    /// Returns the local notebook mirroring a linked notebook.
    fn get_notebook_by_linked_guid(&self, linked_guid: &str) -> StoreResult<Option<Notebook>>;

    /// Returns a recorded linked notebook.
    fn get_linked_notebook(&self, guid: &str) -> StoreResult<Option<LinkedNotebook>>;

    /// Returns a configuration value.
    fn get_config(&self, name: &str) -> StoreResult<Option<String>>;

    /// Sets a configuration value.
    fn set_config(&mut self, name: &str, value: &str) -> StoreResult<()>;

    /// Creates or replaces tasks.
    fn upsert_tasks(&mut self, tasks: &[Task]) -> StoreResult<()>;

    /// Creates or replaces reminders.
    fn upsert_reminders(&mut self, reminders: &[Reminder]) -> StoreResult<()>;

    /// Removes tasks and their reminders.
    fn expunge_tasks(&mut self, task_ids: &[String]) -> StoreResult<()>;

    /// Removes reminders.
    fn expunge_reminders(&mut self, reminder_ids: &[String]) -> StoreResult<()>;

    /// Applies a decoded task stream chunk and advances the
    /// [`WatermarkScope::Tasks`] watermark in one transaction.
    fn apply_task_chunk(&mut self, chunk: &TaskChunk) -> StoreResult<()>;

    /// Returns a downloaded note. Pending and unknown notes yield `None`.
    fn get_note(&self, guid: &str) -> StoreResult<Option<Note>>;

    /// Returns all notebooks ordered by name.
    fn notebooks(&self) -> StoreResult<Vec<Notebook>>;

    /// Returns row counts.
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Runs the backend's consistency check; returns `"ok"` when healthy.
    fn integrity_check(&self) -> StoreResult<String>;
}
