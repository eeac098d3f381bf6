//! Remote service abstraction.
//!
//! The RPC transport and its wire encoding live outside this crate. A
//! transport implements [`RemoteService`] for metadata calls made by the
//! coordinator, and [`RemoteConnector`] to hand out one [`NoteClient`] per
//! credential pair for the download workers.

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::with_network_retry;
use notemirror_types::{
    LinkedNotebook, Note, NotebookAuth, SyncChunk, TaskUpdatePage, WatermarkScope,
};
use std::collections::HashMap;

/// Metadata side of the remote service, authenticated as the account owner.
pub trait RemoteService: Send + Sync {
    /// Returns the identity of the authenticated account.
    fn owner_identity(&self) -> SyncResult<String>;

    /// Returns the account's current high watermark (total update count).
    fn remote_high_watermark(&self) -> SyncResult<u64>;

    /// Returns the linked notebooks of the account.
    fn list_linked_notebooks(&self) -> SyncResult<Vec<LinkedNotebook>>;

    /// Fetches the chunk of changes following watermark `after` in `scope`.
    ///
    /// For a linked scope, [`crate::SyncError::NotFound`] means the notebook
    /// is no longer shared.
    fn fetch_chunk(
        &self,
        scope: &WatermarkScope,
        after: u64,
        max_entries: u32,
    ) -> SyncResult<SyncChunk>;

    /// Returns the lazy chunk sequence of a scope starting after `after`.
    fn iterate_chunks(
        &self,
        scope: WatermarkScope,
        after: u64,
        max_entries: u32,
    ) -> ChunkStream<'_, Self>
    where
        Self: Sized,
    {
        ChunkStream::new(self, scope, after, max_entries)
    }

    /// Authorizes against a privately shared notebook and returns the token
    /// for fetching its notes.
    fn authorize_linked_notebook(&self, linked: &LinkedNotebook) -> SyncResult<String>;

    /// Returns the credentials of the account owner.
    fn primary_auth(&self) -> NotebookAuth;

    /// Fetches one page of the task stream following timestamp `after_ms`.
    fn fetch_task_updates(&self, after_ms: i64) -> SyncResult<TaskUpdatePage>;
}

/// Creates connected content clients, one per credential pair.
pub trait RemoteConnector: Send + Sync {
    /// The client type handed to download workers.
    type Client: NoteClient;

    /// Connects a client for the given credentials.
    fn connect(&self, auth: &NotebookAuth) -> SyncResult<Self::Client>;
}

/// Content side of the remote service, bound to one credential pair.
pub trait NoteClient: Send {
    /// Fetches a note with its content and resources.
    fn fetch_note(&mut self, guid: &str) -> SyncResult<Note>;

    /// Returns the tag guid to name map of the account.
    fn list_tags(&mut self) -> SyncResult<HashMap<String, String>>;

    /// Returns the tag guid to name map visible through a shared notebook.
    fn list_tags_for_notebook(&mut self, notebook_guid: &str)
        -> SyncResult<HashMap<String, String>>;
}

/// Lazy, finite sequence of metadata chunks for one scope.
///
/// Each call to `next` performs one fetch starting where the previous chunk
/// ended. The stream ends after the first chunk whose high watermark equals
/// its total watermark, or after the first error. A non-final chunk that
/// does not move past the previous one is reported as a protocol error.
///
/// With [`ChunkStream::with_retry`], network errors of a fetch are retried
/// before being yielded.
pub struct ChunkStream<'a, R: RemoteService + ?Sized> {
    remote: &'a R,
    scope: WatermarkScope,
    after: u64,
    max_entries: u32,
    retry: Option<(&'a RetryConfig, &'a CancellationToken)>,
    done: bool,
}

impl<'a, R: RemoteService + ?Sized> ChunkStream<'a, R> {
    /// Creates a stream starting after watermark `after`.
    pub fn new(remote: &'a R, scope: WatermarkScope, after: u64, max_entries: u32) -> Self {
        Self {
            remote,
            scope,
            after,
            max_entries,
            retry: None,
            done: false,
        }
    }

    /// Retries network errors of each fetch with backoff.
    pub fn with_retry(mut self, config: &'a RetryConfig, cancel: &'a CancellationToken) -> Self {
        self.retry = Some((config, cancel));
        self
    }

    /// Returns the scope being streamed.
    pub fn scope(&self) -> &WatermarkScope {
        &self.scope
    }
}

impl<R: RemoteService + ?Sized> Iterator for ChunkStream<'_, R> {
    type Item = SyncResult<SyncChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (remote, scope, after, max_entries) =
            (self.remote, &self.scope, self.after, self.max_entries);
        let fetched = match self.retry {
            Some((config, cancel)) => with_network_retry(config, cancel, "chunk fetch", || {
                remote.fetch_chunk(scope, after, max_entries)
            }),
            None => remote.fetch_chunk(scope, after, max_entries),
        };

        match fetched {
            Ok(chunk) if !chunk.is_final() && chunk.chunk_high_watermark <= after => {
                let error = SyncError::Protocol(format!(
                    "{} chunk after {} does not advance",
                    scope, after
                ));
                self.done = true;
                Some(Err(error))
            }
            Ok(chunk) => {
                self.after = chunk.chunk_high_watermark;
                if chunk.is_final() {
                    self.done = true;
                }
                Some(Ok(chunk))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
