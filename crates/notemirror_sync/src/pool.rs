//! Concurrent download of note bodies.
//!
//! The coordinating thread owns the store. Download workers never touch it:
//! they fetch notes and send them back over a channel, and the coordinator
//! persists each note before returning its size to the [`MemoryBudget`].
//!
//! On a fatal worker error or an external cancellation the coordinator
//! stops the workers, forgets all budget accounting and discards whatever
//! still arrives during a bounded grace period. Discarded notes stay pending
//! and are fetched again by the next run.

use crate::budget::MemoryBudget;
use crate::cancel::CancellationToken;
use crate::config::{RetryConfig, SyncConfig};
use crate::credentials::{CredentialCache, WorkerClients};
use crate::error::{SyncError, SyncResult};
use crate::remote::{NoteClient, RemoteConnector, RemoteService};
use crate::retry::{with_decode_retry, with_network_retry};
use notemirror_store::MirrorStore;
use notemirror_types::{Note, NotebookAuth, PendingNote};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of a download phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Notes handed to the workers.
    pub scheduled: u64,
    /// Notes downloaded and stored.
    pub downloaded: u64,
    /// Notes skipped after a permanent fetch failure.
    pub failed: u64,
    /// Notes left pending because their linked notebook could not be
    /// authorized.
    pub unresolved: u64,
    /// Total size of the stored notes.
    pub bytes: u64,
    /// Highest budget consumption observed.
    pub peak_memory: u64,
}

struct Job {
    guid: String,
    title: String,
    auth: NotebookAuth,
}

enum WorkerEvent {
    Downloaded { note: Box<Note>, size: u64 },
    Failed { guid: String, title: String, error: SyncError },
    Fatal { guid: String, title: String, error: SyncError },
}

/// Fixed-width pool of download workers.
pub struct ContentDownloadPool<C: RemoteConnector> {
    config: SyncConfig,
    connector: Arc<C>,
    budget: Arc<MemoryBudget>,
    cancel: CancellationToken,
}

impl<C: RemoteConnector + 'static> ContentDownloadPool<C> {
    /// Creates a pool sized from `config`.
    pub fn new(config: SyncConfig, connector: Arc<C>, cancel: CancellationToken) -> Self {
        let budget = Arc::new(MemoryBudget::new(config.memory_limit_bytes()));
        Self {
            config,
            connector,
            budget,
            cancel,
        }
    }

    /// Returns the pool's memory budget.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Downloads the bodies of `pending` notes into `store`.
    pub fn run<S, R>(
        &self,
        store: &mut S,
        remote: &R,
        credentials: &mut CredentialCache,
        pending: Vec<PendingNote>,
    ) -> SyncResult<DownloadSummary>
    where
        S: MirrorStore + ?Sized,
        R: RemoteService + ?Sized,
    {
        let mut summary = DownloadSummary::default();
        let jobs = self.plan_jobs(store, remote, credentials, pending, &mut summary)?;
        if jobs.is_empty() {
            info!("No notes to download");
            return Ok(summary);
        }

        summary.scheduled = jobs.len() as u64;
        let width = self.config.download_workers.min(jobs.len()).max(1);
        info!(
            "Downloading {} notes with {} workers [memory limit {} MB]",
            jobs.len(),
            width,
            self.config.memory_limit_mb
        );

        let queue = Arc::new(Mutex::new(jobs));
        let (events_tx, events_rx) = mpsc::channel();

        let mut workers = Vec::with_capacity(width);
        for id in 0..width {
            let worker = Worker {
                connector: Arc::clone(&self.connector),
                queue: Arc::clone(&queue),
                budget: Arc::clone(&self.budget),
                cancel: self.cancel.clone(),
                events: events_tx.clone(),
                retry: self.config.retry.clone(),
                decode_attempts: self.config.decode_retry_attempts,
            };
            let spawned = thread::Builder::new()
                .name(format!("notemirror-download-{}", id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(events_tx);
                    let error = SyncError::Worker(format!("cannot start download worker: {}", e));
                    return Err(self.abort(&events_rx, workers, error));
                }
            }
        }
        drop(events_tx);

        self.coordinate(store, &events_rx, workers, summary)
    }

    fn plan_jobs<S, R>(
        &self,
        store: &S,
        remote: &R,
        credentials: &mut CredentialCache,
        pending: Vec<PendingNote>,
        summary: &mut DownloadSummary,
    ) -> SyncResult<VecDeque<Job>>
    where
        S: MirrorStore + ?Sized,
        R: RemoteService + ?Sized,
    {
        let primary = remote.primary_auth();
        let mut linked_auth: HashMap<String, Option<NotebookAuth>> = HashMap::new();
        let mut jobs = VecDeque::with_capacity(pending.len());

        for note in pending {
            let auth = match &note.linked_notebook_guid {
                None => Some(primary.clone()),
                Some(linked_guid) => {
                    if !linked_auth.contains_key(linked_guid) {
                        let auth = self.resolve_linked(store, remote, credentials, linked_guid)?;
                        linked_auth.insert(linked_guid.clone(), auth);
                    }
                    linked_auth.get(linked_guid).cloned().flatten()
                }
            };

            match auth {
                Some(auth) => jobs.push_back(Job {
                    guid: note.guid,
                    title: note.title,
                    auth,
                }),
                None => summary.unresolved += 1,
            }
        }
        Ok(jobs)
    }

    fn resolve_linked<S, R>(
        &self,
        store: &S,
        remote: &R,
        credentials: &mut CredentialCache,
        linked_guid: &str,
    ) -> SyncResult<Option<NotebookAuth>>
    where
        S: MirrorStore + ?Sized,
        R: RemoteService + ?Sized,
    {
        let Some(linked) = store.get_linked_notebook(linked_guid)? else {
            warn!(
                "Linked notebook [{}] is not recorded locally, its notes stay pending",
                linked_guid
            );
            return Ok(None);
        };

        match credentials.resolve(remote, &linked, &self.config.retry, &self.cancel) {
            Ok(auth) => Ok(Some(auth)),
            Err(e) if e.is_per_note() => {
                warn!(
                    "Cannot access linked notebook {}, its notes stay pending: {}",
                    linked, e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn coordinate<S>(
        &self,
        store: &mut S,
        events: &Receiver<WorkerEvent>,
        workers: Vec<JoinHandle<()>>,
        mut summary: DownloadSummary,
    ) -> SyncResult<DownloadSummary>
    where
        S: MirrorStore + ?Sized,
    {
        loop {
            if self.cancel.is_cancelled() {
                info!("Download interrupted");
                return Err(self.abort(events, workers, SyncError::Cancelled));
            }

            match events.recv_timeout(self.config.poll_interval) {
                Ok(WorkerEvent::Downloaded { note, size }) => {
                    let stored = store.upsert_note_full(&note, size);
                    self.budget.release(size);
                    if let Err(e) = stored {
                        error!("Cannot store note {}: {}", note, e);
                        return Err(self.abort(events, workers, e.into()));
                    }
                    summary.downloaded += 1;
                    summary.bytes += size;
                    debug!(
                        "Stored note {} ({}/{})",
                        note, summary.downloaded, summary.scheduled
                    );
                }
                Ok(WorkerEvent::Failed { guid, title, error }) => {
                    warn!(
                        "Skipping note '{}' [{}], it stays pending: {}",
                        title, guid, error
                    );
                    summary.failed += 1;
                }
                Ok(WorkerEvent::Fatal { guid, title, error }) => {
                    if !matches!(error, SyncError::Cancelled) {
                        error!("Download of note '{}' [{}] failed: {}", title, guid, error);
                    }
                    return Err(self.abort(events, workers, error));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        join_all(workers)?;
        summary.peak_memory = self.budget.peak();
        info!(
            "Downloaded {} notes ({} bytes), {} failed",
            summary.downloaded, summary.bytes, summary.failed
        );
        Ok(summary)
    }

    fn abort(
        &self,
        events: &Receiver<WorkerEvent>,
        workers: Vec<JoinHandle<()>>,
        cause: SyncError,
    ) -> SyncError {
        warn!("Aborting, please wait...");
        self.cancel.cancel();
        self.budget.reset();

        let grace = self.config.drain_grace;
        let deadline = Instant::now() + grace;
        let mut discarded = 0u64;
        let drained = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break false;
            }
            match events.recv_timeout(remaining) {
                Ok(WorkerEvent::Downloaded { .. }) => discarded += 1,
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => break false,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        if discarded > 0 {
            debug!("Discarded {} downloaded notes after abort", discarded);
        }
        if drained {
            if let Err(e) = join_all(workers) {
                warn!("{}", e);
            }
        } else {
            warn!(
                "Download workers still busy after {:?}, leaving them behind",
                grace
            );
        }
        cause
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) -> SyncResult<()> {
    let mut panicked = 0;
    for handle in workers {
        if handle.join().is_err() {
            panicked += 1;
        }
    }
    if panicked > 0 {
        return Err(SyncError::Worker(format!(
            "{} download workers panicked",
            panicked
        )));
    }
    Ok(())
}

struct Worker<C: RemoteConnector> {
    connector: Arc<C>,
    queue: Arc<Mutex<VecDeque<Job>>>,
    budget: Arc<MemoryBudget>,
    cancel: CancellationToken,
    events: Sender<WorkerEvent>,
    retry: RetryConfig,
    decode_attempts: u32,
}

impl<C: RemoteConnector> Worker<C> {
    fn run(self) {
        let mut clients = WorkerClients::new(&*self.connector);
        loop {
            self.budget.wait_for_budget(&self.cancel);
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(job) = self.queue.lock().pop_front() else {
                break;
            };

            let event = match self.download(&mut clients, &job) {
                Ok(note) => {
                    let size = note.resolved_size();
                    self.budget.consume(size);
                    WorkerEvent::Downloaded {
                        note: Box::new(note),
                        size,
                    }
                }
                Err(error) if error.is_per_note() => WorkerEvent::Failed {
                    guid: job.guid,
                    title: job.title,
                    error,
                },
                Err(error) => {
                    let _ = self.events.send(WorkerEvent::Fatal {
                        guid: job.guid,
                        title: job.title,
                        error,
                    });
                    break;
                }
            };
            if self.events.send(event).is_err() {
                break;
            }
        }
        debug!(
            "Download worker {:?} done",
            thread::current().name().unwrap_or("unnamed")
        );
    }

    fn download(&self, clients: &mut WorkerClients<'_, C>, job: &Job) -> SyncResult<Note> {
        let cached = clients.get(&job.auth)?;

        let mut note = with_decode_retry(self.decode_attempts, &job.guid, || {
            with_network_retry(&self.retry, &self.cancel, "note download", || {
                cached.client().fetch_note(&job.guid)
            })
        })?;

        if !note.tag_guids.is_empty() {
            with_network_retry(&self.retry, &self.cancel, "tag listing", || {
                cached.ensure_tags(&note.notebook_guid)
            })?;
            note.tag_names = cached.tag_names(&note.notebook_guid, &note.tag_guids);
        }
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRemote, NoteFault};
    use notemirror_store::SqliteStore;
    use notemirror_types::{LinkedNotebook, NoteStub, Notebook};
    use std::time::Duration;

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_download_workers(3)
            .with_poll_interval(Duration::from_millis(10))
            .with_drain_grace(Duration::from_secs(5))
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
    }

    fn seed(store: &mut SqliteStore, remote: &MockRemote, guids: &[&str]) -> Vec<PendingNote> {
        let stubs: Vec<_> = guids.iter().map(|g| NoteStub::new(*g, *g, "nb1")).collect();
        store.upsert_note_stubs(&stubs).unwrap();
        for guid in guids {
            remote.add_note(Note::new(*guid, *guid, "nb1", format!("body of {}", guid)));
        }
        store.list_notes_missing_body().unwrap()
    }

    fn pool(remote: &MockRemote, config: SyncConfig) -> ContentDownloadPool<MockRemote> {
        ContentDownloadPool::new(config, Arc::new(remote.clone()), CancellationToken::new())
    }

    #[test]
    fn downloads_every_pending_note() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pending = seed(&mut store, &remote, &["a", "b", "c", "d", "e"]);

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.scheduled, 5);
        assert_eq!(summary.downloaded, 5);
        assert!(store.list_notes_missing_body().unwrap().is_empty());
        assert_eq!(store.get_note("c").unwrap().unwrap().content.as_deref(), Some("body of c"));
    }

    #[test]
    fn empty_pending_set_spawns_nothing() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), Vec::new())
            .unwrap();

        assert_eq!(summary, DownloadSummary::default());
        assert_eq!(remote.connects(), 0);
    }

    #[test]
    fn permanent_fault_skips_only_that_note() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pending = seed(&mut store, &remote, &["a", "b", "c"]);
        remote.set_note_fault("b", NoteFault::Permanent);

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
        let left = store.list_notes_missing_body().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guid, "b");
    }

    #[test]
    fn decode_glitch_is_retried() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pending = seed(&mut store, &remote, &["a"]);
        remote.set_note_fault("a", NoteFault::DecodeGlitch(2));

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(remote.note_fetches(), 3);
    }

    #[test]
    fn rate_limit_aborts_and_leaves_notes_pending() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pending = seed(&mut store, &remote, &["a", "b", "c", "d"]);
        remote.set_note_fault("a", NoteFault::RateLimited);

        let pool = pool(&remote, config().with_download_workers(1));
        let err = pool
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap_err();

        assert!(matches!(err, SyncError::RateLimited { .. }));
        assert_eq!(pool.budget().consumed(), 0);
        assert!(store.get_note("a").unwrap().is_none());
    }

    #[test]
    fn tag_names_are_resolved() {
        let remote = MockRemote::new("alice");
        remote.set_tags([("t1", "work")]);
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_note_stubs(&[NoteStub::new("a", "a", "nb1")]).unwrap();
        remote.add_note(Note::new("a", "a", "nb1", "x").with_tags(["t1", "t-unknown"]));
        let pending = store.list_notes_missing_body().unwrap();

        pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        let note = store.get_note("a").unwrap().unwrap();
        assert_eq!(note.tag_names, vec!["work".to_string()]);
    }

    #[test]
    fn linked_notes_use_shared_credentials() {
        let remote = MockRemote::new("alice");
        let linked = LinkedNotebook::private("l1", "Team", "s2", "key");
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_notebooks(&[Notebook::new("nb9", "Team")]).unwrap();
        store.upsert_linked_notebook(&linked, "nb9").unwrap();
        store.upsert_note_stubs(&[NoteStub::new("s1", "Shared", "nb9")]).unwrap();
        remote.add_note_requiring(
            Note::new("s1", "Shared", "nb9", "x"),
            NotebookAuth::shared(MockRemote::share_token_for("l1"), "s2"),
        );
        let pending = store.list_notes_missing_body().unwrap();

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(remote.authorizations(), 1);
    }

    #[test]
    fn shared_client_resolves_tags_per_notebook() {
        let remote = MockRemote::new("alice");
        remote.set_notebook_tags("nbA", [("ta", "alpha")]);
        remote.set_notebook_tags("nbB", [("tb", "beta")]);
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_notebooks(&[Notebook::new("nbA", "Recipes"), Notebook::new("nbB", "Travel")])
            .unwrap();
        store
            .upsert_linked_notebook(&LinkedNotebook::public("lA", "Recipes", "s9", "recipes"), "nbA")
            .unwrap();
        store
            .upsert_linked_notebook(&LinkedNotebook::public("lB", "Travel", "s9", "travel"), "nbB")
            .unwrap();
        store
            .upsert_note_stubs(&[NoteStub::new("a", "A", "nbA"), NoteStub::new("b", "B", "nbB")])
            .unwrap();
        remote.add_note(Note::new("a", "A", "nbA", "x").with_tags(["ta"]));
        remote.add_note(Note::new("b", "B", "nbB", "y").with_tags(["tb"]));
        let pending = store.list_notes_missing_body().unwrap();

        let summary = pool(&remote, config().with_download_workers(1))
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(remote.connects(), 1);
        assert_eq!(store.get_note("a").unwrap().unwrap().tag_names, vec!["alpha".to_string()]);
        assert_eq!(store.get_note("b").unwrap().unwrap().tag_names, vec!["beta".to_string()]);
    }

    #[test]
    fn unrecorded_linked_notebook_leaves_notes_pending() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut pending = seed(&mut store, &remote, &["a"]);
        pending.push(PendingNote {
            guid: "orphan".into(),
            title: "Orphan".into(),
            linked_notebook_guid: Some("missing".into()),
        });

        let summary = pool(&remote, config())
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.unresolved, 1);
    }

    #[test]
    fn memory_stays_within_limit_plus_one_note_per_worker() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let body = "x".repeat(900 * 1024);
        let guids: Vec<String> = (0..8).map(|i| format!("n{:02}", i)).collect();
        let stubs: Vec<_> = guids.iter().map(|g| NoteStub::new(g, g, "nb1")).collect();
        store.upsert_note_stubs(&stubs).unwrap();
        for guid in &guids {
            remote.add_note(Note::new(guid, guid, "nb1", body.clone()));
        }
        remote.set_fetch_delay(Duration::from_millis(2));
        let pending = store.list_notes_missing_body().unwrap();

        let pool = pool(&remote, config().with_download_workers(4).with_memory_limit_mb(1));
        let summary = pool
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 8);
        // Each worker may pass the check before any of them consumes.
        let bound = pool.budget().limit() + 4 * body.len() as u64;
        assert!(summary.peak_memory < bound);
        assert_eq!(pool.budget().consumed(), 0);
    }

    #[test]
    fn single_worker_overshoots_by_one_note_at_most() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let body = "x".repeat(900 * 1024);
        let guids: Vec<String> = (0..4).map(|i| format!("n{:02}", i)).collect();
        let stubs: Vec<_> = guids.iter().map(|g| NoteStub::new(g, g, "nb1")).collect();
        store.upsert_note_stubs(&stubs).unwrap();
        for guid in &guids {
            remote.add_note(Note::new(guid, guid, "nb1", body.clone()));
        }
        let pending = store.list_notes_missing_body().unwrap();

        let pool = pool(&remote, config().with_download_workers(1).with_memory_limit_mb(1));
        let summary = pool
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap();

        assert_eq!(summary.downloaded, 4);
        assert!(summary.peak_memory < pool.budget().limit() + body.len() as u64);
    }

    #[test]
    fn external_cancellation_returns_cancelled() {
        let remote = MockRemote::new("alice");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let guids: Vec<String> = (0..20).map(|i| format!("n{:02}", i)).collect();
        let refs: Vec<&str> = guids.iter().map(String::as_str).collect();
        let pending = seed(&mut store, &remote, &refs);
        remote.set_fetch_delay(Duration::from_millis(5));

        let cancel = CancellationToken::new();
        remote.cancel_after_fetches(5, cancel.clone());
        let pool = ContentDownloadPool::new(
            config().with_download_workers(2),
            Arc::new(remote.clone()),
            cancel,
        );

        let err = pool
            .run(&mut store, &remote, &mut CredentialCache::new(), pending)
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        let stored = 20 - store.list_notes_missing_body().unwrap().len();
        assert!(stored <= 5 + 2);
        assert!(stored < 20);
    }
}
