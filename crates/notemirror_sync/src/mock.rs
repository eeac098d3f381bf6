//! Scriptable in-memory remote for tests.

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use crate::remote::{NoteClient, RemoteConnector, RemoteService};
use notemirror_types::{
    LinkedNotebook, Note, NotebookAuth, SyncChunk, TaskUpdatePage, WatermarkScope,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Failure injected into a note fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteFault {
    /// The next `n` fetches return an undecodable payload.
    DecodeGlitch(u32),
    /// Every fetch returns an undecodable payload.
    DecodeAlways,
    /// Every fetch fails with a permanent remote fault.
    Permanent,
    /// Every fetch reports rate limiting.
    RateLimited,
    /// The next `n` fetches fail with a network error.
    Network(u32),
}

#[derive(Debug, Default)]
struct MockState {
    owner: String,
    token: String,
    high_watermark: Option<u64>,
    chunks: HashMap<WatermarkScope, Vec<SyncChunk>>,
    chunk_network_failures: u32,
    linked: Vec<LinkedNotebook>,
    unshared: HashSet<String>,
    notes: HashMap<String, Note>,
    note_auth: HashMap<String, NotebookAuth>,
    faults: HashMap<String, NoteFault>,
    tags: HashMap<String, String>,
    notebook_tags: HashMap<String, HashMap<String, String>>,
    task_pages: Vec<TaskUpdatePage>,
    fetch_delay: Duration,
    cancel_after: Option<(usize, CancellationToken)>,
    fetched: Vec<String>,
}

#[derive(Debug, Default)]
struct MockCounters {
    chunk_fetches: AtomicUsize,
    note_fetches: AtomicUsize,
    authorizations: AtomicUsize,
    connects: AtomicUsize,
    tag_listings: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockInner {
    state: Mutex<MockState>,
    counters: MockCounters,
}

/// A remote service backed by scripted data.
///
/// Clones share the same state, so a test can keep a handle for inspection
/// while the engine owns another. `MockRemote` is both the metadata service
/// and the connector for content clients.
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    inner: Arc<MockInner>,
}

impl MockRemote {
    /// Creates an empty remote for the given account.
    pub fn new(owner: impl Into<String>) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.inner.state.lock();
            state.owner = owner.into();
            state.token = "primary-token".to_string();
        }
        remote
    }

    /// Changes the authenticated account identity.
    pub fn set_owner(&self, owner: impl Into<String>) {
        self.inner.state.lock().owner = owner.into();
    }

    /// Overrides the reported primary high watermark.
    pub fn set_high_watermark(&self, watermark: u64) {
        self.inner.state.lock().high_watermark = Some(watermark);
    }

    /// Appends a chunk to a scope's change stream.
    pub fn add_chunk(&self, scope: WatermarkScope, chunk: SyncChunk) {
        let mut state = self.inner.state.lock();
        let chunks = state.chunks.entry(scope).or_default();
        chunks.push(chunk);
        chunks.sort_by_key(|c| c.chunk_high_watermark);
    }

    /// Replaces every chunk of a scope.
    pub fn clear_chunks(&self, scope: &WatermarkScope) {
        self.inner.state.lock().chunks.remove(scope);
    }

    /// Makes the next `n` chunk fetches fail with a network error.
    pub fn fail_chunk_fetches(&self, n: u32) {
        self.inner.state.lock().chunk_network_failures = n;
    }

    /// Adds a linked notebook to the account.
    pub fn add_linked_notebook(&self, linked: LinkedNotebook) {
        self.inner.state.lock().linked.push(linked);
    }

    /// Makes chunk fetches of a linked notebook report "not found".
    pub fn unshare(&self, linked_guid: impl Into<String>) {
        self.inner.state.lock().unshared.insert(linked_guid.into());
    }

    /// Adds a downloadable note.
    pub fn add_note(&self, note: Note) {
        self.inner.state.lock().notes.insert(note.guid.clone(), note);
    }

    /// Adds a note that can only be fetched with `auth`.
    pub fn add_note_requiring(&self, note: Note, auth: NotebookAuth) {
        let mut state = self.inner.state.lock();
        state.note_auth.insert(note.guid.clone(), auth);
        state.notes.insert(note.guid.clone(), note);
    }

    /// Injects a fault into fetches of a note.
    pub fn set_note_fault(&self, guid: impl Into<String>, fault: NoteFault) {
        self.inner.state.lock().faults.insert(guid.into(), fault);
    }

    /// Removes an injected fault.
    pub fn clear_note_fault(&self, guid: &str) {
        self.inner.state.lock().faults.remove(guid);
    }

    /// Sets the tag guid to name map.
    pub fn set_tags<I, K, V>(&self, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.state.lock().tags = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
    }

    /// Sets the tag map visible through one shared notebook. Notebooks
    /// without their own map see the account map.
    pub fn set_notebook_tags<I, K, V>(&self, notebook_guid: impl Into<String>, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tags = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.inner
            .state
            .lock()
            .notebook_tags
            .insert(notebook_guid.into(), tags);
    }

    /// Appends a page to the task stream.
    pub fn add_task_page(&self, page: TaskUpdatePage) {
        self.inner.state.lock().task_pages.push(page);
    }

    /// Delays every note fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.inner.state.lock().fetch_delay = delay;
    }

    /// Cancels `token` once `n` note fetches have completed.
    pub fn cancel_after_fetches(&self, n: usize, token: CancellationToken) {
        self.inner.state.lock().cancel_after = Some((n, token));
    }

    /// Returns the number of chunk fetches.
    pub fn chunk_fetches(&self) -> usize {
        self.inner.counters.chunk_fetches.load(Ordering::SeqCst)
    }

    /// Returns the number of note fetch attempts.
    pub fn note_fetches(&self) -> usize {
        self.inner.counters.note_fetches.load(Ordering::SeqCst)
    }

    /// Returns the guids of successfully fetched notes in completion order.
    pub fn fetched_notes(&self) -> Vec<String> {
        self.inner.state.lock().fetched.clone()
    }

    /// Returns the number of shared notebook authorizations.
    pub fn authorizations(&self) -> usize {
        self.inner.counters.authorizations.load(Ordering::SeqCst)
    }

    /// Returns the number of content clients connected.
    pub fn connects(&self) -> usize {
        self.inner.counters.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of tag map listings.
    pub fn tag_listings(&self) -> usize {
        self.inner.counters.tag_listings.load(Ordering::SeqCst)
    }

    /// Returns the highest number of concurrent note fetches observed.
    pub fn peak_concurrent_fetches(&self) -> usize {
        self.inner.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Token returned by [`RemoteService::authorize_linked_notebook`].
    pub fn share_token_for(linked_guid: &str) -> String {
        format!("share-token-{}", linked_guid)
    }

    fn scope_total(state: &MockState, scope: &WatermarkScope) -> u64 {
        let scripted = state
            .chunks
            .get(scope)
            .and_then(|chunks| chunks.last())
            .map(|c| c.total_watermark)
            .unwrap_or(0);
        match scope {
            WatermarkScope::Primary => state.high_watermark.unwrap_or(scripted),
            _ => scripted,
        }
    }

    fn fetch_note_as(&self, guid: &str, auth: &NotebookAuth) -> SyncResult<Note> {
        let counters = &self.inner.counters;
        counters.note_fetches.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.inner.state.lock().fetch_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = self.resolve_note(guid, auth);
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn resolve_note(&self, guid: &str, auth: &NotebookAuth) -> SyncResult<Note> {
        let mut state = self.inner.state.lock();

        match state.faults.get(guid).copied() {
            Some(NoteFault::DecodeGlitch(n)) if n > 0 => {
                state
                    .faults
                    .insert(guid.to_string(), NoteFault::DecodeGlitch(n - 1));
                return Err(SyncError::decode(format!("unpack requires a buffer ({})", guid)));
            }
            Some(NoteFault::DecodeAlways) => {
                return Err(SyncError::decode(format!("unpack requires a buffer ({})", guid)));
            }
            Some(NoteFault::Permanent) => {
                return Err(SyncError::remote_fault(format!("note {} is unavailable", guid)));
            }
            Some(NoteFault::RateLimited) => {
                return Err(SyncError::RateLimited {
                    retry_after_secs: 60,
                });
            }
            Some(NoteFault::Network(n)) if n > 0 => {
                state
                    .faults
                    .insert(guid.to_string(), NoteFault::Network(n - 1));
                return Err(SyncError::network("connection reset by peer"));
            }
            _ => {}
        }

        if let Some(required) = state.note_auth.get(guid) {
            if required != auth {
                return Err(SyncError::remote_fault(format!(
                    "permission denied for note {}",
                    guid
                )));
            }
        }

        let note = state
            .notes
            .get(guid)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("note {}", guid)))?;

        state.fetched.push(guid.to_string());
        let completed = state.fetched.len();
        if let Some((n, token)) = &state.cancel_after {
            if completed >= *n {
                token.cancel();
            }
        }

        Ok(note)
    }
}

impl RemoteService for MockRemote {
    fn owner_identity(&self) -> SyncResult<String> {
        Ok(self.inner.state.lock().owner.clone())
    }

    fn remote_high_watermark(&self) -> SyncResult<u64> {
        let state = self.inner.state.lock();
        Ok(Self::scope_total(&state, &WatermarkScope::Primary))
    }

    fn list_linked_notebooks(&self) -> SyncResult<Vec<LinkedNotebook>> {
        Ok(self.inner.state.lock().linked.clone())
    }

    fn fetch_chunk(
        &self,
        scope: &WatermarkScope,
        after: u64,
        max_entries: u32,
    ) -> SyncResult<SyncChunk> {
        self.inner
            .counters
            .chunk_fetches
            .fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock();

        if state.chunk_network_failures > 0 {
            state.chunk_network_failures -= 1;
            return Err(SyncError::network("connection timed out"));
        }

        if let WatermarkScope::Linked(guid) = scope {
            if state.unshared.contains(guid) {
                return Err(SyncError::NotFound(format!("linked notebook {}", guid)));
            }
        }
        if max_entries == 0 {
            return Err(SyncError::Protocol("max entries must be positive".into()));
        }

        let next = state
            .chunks
            .get(scope)
            .and_then(|chunks| chunks.iter().find(|c| c.chunk_high_watermark > after))
            .cloned();

        match next {
            Some(chunk) => Ok(chunk),
            None => {
                let total = Self::scope_total(&state, scope).max(after);
                Ok(SyncChunk::new(total, total))
            }
        }
    }

    fn authorize_linked_notebook(&self, linked: &LinkedNotebook) -> SyncResult<String> {
        self.inner
            .counters
            .authorizations
            .fetch_add(1, Ordering::SeqCst);
        if self.inner.state.lock().unshared.contains(&linked.guid) {
            return Err(SyncError::NotFound(format!("linked notebook {}", linked.guid)));
        }
        Ok(Self::share_token_for(&linked.guid))
    }

    fn primary_auth(&self) -> NotebookAuth {
        NotebookAuth::primary(self.inner.state.lock().token.clone())
    }

    fn fetch_task_updates(&self, after_ms: i64) -> SyncResult<TaskUpdatePage> {
        let state = self.inner.state.lock();
        let page = state
            .task_pages
            .iter()
            .find(|p| p.last_timestamp > after_ms)
            .cloned();
        Ok(page.unwrap_or_else(|| TaskUpdatePage {
            updates: Vec::new(),
            last_timestamp: after_ms,
            has_more: false,
        }))
    }
}

impl RemoteConnector for MockRemote {
    type Client = MockClient;

    fn connect(&self, auth: &NotebookAuth) -> SyncResult<MockClient> {
        self.inner.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockClient {
            remote: self.clone(),
            auth: auth.clone(),
        })
    }
}

/// Content client handed out by [`MockRemote`].
#[derive(Debug)]
pub struct MockClient {
    remote: MockRemote,
    auth: NotebookAuth,
}

impl MockClient {
    /// Returns the credentials the client was connected with.
    pub fn auth(&self) -> &NotebookAuth {
        &self.auth
    }
}

impl NoteClient for MockClient {
    fn fetch_note(&mut self, guid: &str) -> SyncResult<Note> {
        self.remote.fetch_note_as(guid, &self.auth)
    }

    fn list_tags(&mut self) -> SyncResult<HashMap<String, String>> {
        let inner = &self.remote.inner;
        inner.counters.tag_listings.fetch_add(1, Ordering::SeqCst);
        Ok(inner.state.lock().tags.clone())
    }

    fn list_tags_for_notebook(
        &mut self,
        notebook_guid: &str,
    ) -> SyncResult<HashMap<String, String>> {
        let inner = &self.remote.inner;
        inner.counters.tag_listings.fetch_add(1, Ordering::SeqCst);
        let state = inner.state.lock();
        Ok(state
            .notebook_tags
            .get(notebook_guid)
            .unwrap_or(&state.tags)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notemirror_types::{Notebook, NoteStub};

    #[test]
    fn chunk_stream_follows_scripted_chunks() {
        let remote = MockRemote::new("alice");
        let mut first = SyncChunk::new(20, 50);
        first.notebooks.push(Notebook::new("nb1", "One"));
        let mut second = SyncChunk::new(50, 50);
        second.notes.push(NoteStub::new("n1", "Note", "nb1"));
        remote.add_chunk(WatermarkScope::Primary, second);
        remote.add_chunk(WatermarkScope::Primary, first);

        let chunks: Vec<_> = remote
            .iterate_chunks(WatermarkScope::Primary, 0, 100)
            .collect::<SyncResult<_>>()
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_high_watermark, 20);
        assert!(chunks[1].is_final());
        assert_eq!(remote.chunk_fetches(), 2);
        assert_eq!(remote.remote_high_watermark().unwrap(), 50);
    }

    #[test]
    fn up_to_date_scope_yields_one_final_empty_chunk() {
        let remote = MockRemote::new("alice");
        remote.add_chunk(WatermarkScope::Primary, SyncChunk::new(50, 50));

        let chunks: Vec<_> = remote
            .iterate_chunks(WatermarkScope::Primary, 50, 100)
            .collect::<SyncResult<_>>()
            .unwrap();

        assert_eq!(chunks, vec![SyncChunk::new(50, 50)]);
    }

    #[test]
    fn stream_stops_after_error() {
        let remote = MockRemote::new("alice");
        remote.add_linked_notebook(LinkedNotebook::private("l1", "x", "s2", "k"));
        remote.unshare("l1");

        let mut stream = remote.iterate_chunks(WatermarkScope::Linked("l1".into()), 0, 10);
        assert!(matches!(stream.next(), Some(Err(SyncError::NotFound(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn decode_glitch_recovers() {
        let remote = MockRemote::new("alice");
        remote.add_note(Note::new("n1", "t", "nb1", "body"));
        remote.set_note_fault("n1", NoteFault::DecodeGlitch(1));

        let mut client = remote.connect(&remote.primary_auth()).unwrap();
        assert!(matches!(
            client.fetch_note("n1"),
            Err(SyncError::PayloadDecode { .. })
        ));
        assert_eq!(client.fetch_note("n1").unwrap().guid, "n1");
        assert_eq!(remote.fetched_notes(), vec!["n1".to_string()]);
    }

    #[test]
    fn notes_requiring_shared_auth_reject_primary_client() {
        let remote = MockRemote::new("alice");
        let shared = NotebookAuth::shared(MockRemote::share_token_for("l1"), "s2");
        remote.add_note_requiring(Note::new("n1", "t", "nb9", "body"), shared.clone());

        let mut primary = remote.connect(&remote.primary_auth()).unwrap();
        assert!(matches!(
            primary.fetch_note("n1"),
            Err(SyncError::RemoteFault { .. })
        ));

        let mut client = remote.connect(&shared).unwrap();
        assert!(client.fetch_note("n1").is_ok());
    }
}
