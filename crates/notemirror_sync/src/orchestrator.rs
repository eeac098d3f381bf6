//! Top-level sync driver.
//!
//! A run goes through fixed phases: owner check, account metadata, each
//! linked notebook's metadata, body downloads for every pending note and,
//! if enabled, the task stream. Every phase only moves watermarks forward
//! after its effects are stored, so an aborted run can simply be started
//! again.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::credentials::CredentialCache;
use crate::error::{SyncError, SyncResult};
use crate::ingest::{ChunkIngester, IngestStats};
use crate::pool::{ContentDownloadPool, DownloadSummary};
use crate::remote::{RemoteConnector, RemoteService};
use crate::retry::with_network_retry;
use crate::tasks::{TaskIngester, TaskStats};
use notemirror_store::{MirrorStore, CONFIG_USER};
use notemirror_types::{LinkedNotebook, WatermarkScope};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Metadata ingestion counters across all scopes.
    pub metadata: IngestStats,
    /// Body download counters.
    pub downloads: DownloadSummary,
    /// Linked notebooks skipped because they are no longer shared.
    pub skipped_linked_notebooks: u64,
    /// Task stream counters, if the task stream was synced.
    pub tasks: Option<TaskStats>,
}

impl SyncReport {
    /// Returns the report as display lines.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Updated or added notebooks: {}", self.metadata.notebooks),
            format!("Updated or added notes: {}", self.downloads.downloaded),
            format!("Expunged notebooks: {}", self.metadata.expunged_notebooks),
            format!(
                "Expunged linked notebooks: {}",
                self.metadata.expunged_linked_notebooks
            ),
            format!("Expunged notes: {}", self.metadata.expunged_notes),
        ];
        if let Some(tasks) = &self.tasks {
            lines.push(format!(
                "Updated or added tasks/reminders: {}/{}",
                tasks.tasks, tasks.reminders
            ));
            lines.push(format!(
                "Expunged tasks/reminders: {}/{}",
                tasks.expunged_tasks, tasks.expunged_reminders
            ));
        }
        let left = self.downloads.failed + self.downloads.unresolved;
        if left > 0 {
            lines.push(format!("Notes left pending: {}", left));
        }
        lines
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Drives a full sync run against one store.
pub struct SyncOrchestrator<R, C, S>
where
    R: RemoteService,
    C: RemoteConnector + 'static,
    S: MirrorStore,
{
    config: SyncConfig,
    remote: R,
    connector: Arc<C>,
    store: S,
    cancel: CancellationToken,
}

impl<R, C, S> SyncOrchestrator<R, C, S>
where
    R: RemoteService,
    C: RemoteConnector + 'static,
    S: MirrorStore,
{
    /// Creates an orchestrator.
    pub fn new(config: SyncConfig, remote: R, connector: Arc<C>, store: S) -> Self {
        Self {
            config,
            remote,
            connector,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to interrupt the run from outside.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that interrupts the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the store mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the orchestrator and returns its store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Returns the remote service.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Runs every sync phase and returns the report.
    pub fn run(&mut self) -> SyncResult<SyncReport> {
        self.config.validate()?;
        self.check_owner()?;

        let mut report = SyncReport::default();

        info!("Syncing user notebooks...");
        report.metadata += self.sync_primary()?;

        self.cancel.check()?;
        let linked = with_network_retry(
            &self.config.retry,
            &self.cancel,
            "linked notebook listing",
            || self.remote.list_linked_notebooks(),
        )?;
        if !linked.is_empty() {
            info!("Syncing linked notebooks...");
        }
        for notebook in &linked {
            match self.sync_linked(notebook) {
                Ok(stats) => report.metadata += stats,
                Err(SyncError::NotFound(_)) => {
                    warn!(
                        "Linked notebook {} is no longer shared, skipping",
                        notebook
                    );
                    report.skipped_linked_notebooks += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.cancel.check()?;
        let pending = self.store.list_notes_missing_body()?;
        if !pending.is_empty() {
            info!("{} note(s) to download...", pending.len());
        }
        let pool = ContentDownloadPool::new(
            self.config.clone(),
            Arc::clone(&self.connector),
            self.cancel.clone(),
        );
        let mut credentials = CredentialCache::new();
        report.downloads = pool.run(&mut self.store, &self.remote, &mut credentials, pending)?;

        if self.config.include_tasks {
            self.cancel.check()?;
            let stats = TaskIngester::new().ingest(
                &mut self.store,
                &self.remote,
                &self.config.retry,
                &self.cancel,
            )?;
            report.tasks = Some(stats);
        }

        for line in report.lines() {
            info!("{}", line);
        }
        Ok(report)
    }

    fn check_owner(&self) -> SyncResult<()> {
        let local = self
            .store
            .get_config(CONFIG_USER)?
            .ok_or(SyncError::NotInitialized)?;
        let remote = with_network_retry(&self.config.retry, &self.cancel, "user lookup", || {
            self.remote.owner_identity()
        })?;

        if local != remote {
            return Err(SyncError::OwnerMismatch { local, remote });
        }
        Ok(())
    }

    fn sync_primary(&mut self) -> SyncResult<IngestStats> {
        let scope = WatermarkScope::Primary;
        let current = self.store.get_watermark(&scope)?;
        let remote_high =
            with_network_retry(&self.config.retry, &self.cancel, "high watermark lookup", || {
                self.remote.remote_high_watermark()
            })?;

        if remote_high == current {
            info!("User notebooks are up to date, nothing to sync!");
            return Ok(IngestStats::default());
        }

        let chunks = self
            .remote
            .iterate_chunks(scope, current, self.config.max_chunk_entries)
            .with_retry(&self.config.retry, &self.cancel);
        ChunkIngester::primary().ingest(&mut self.store, chunks)
    }

    fn sync_linked(&mut self, linked: &LinkedNotebook) -> SyncResult<IngestStats> {
        // Refresh the link record of an already mirrored notebook.
        if let Some(notebook) = self.store.get_notebook_by_linked_guid(&linked.guid)? {
            self.store.upsert_linked_notebook(linked, &notebook.guid)?;
        }

        let scope = WatermarkScope::Linked(linked.guid.clone());
        let current = self.store.get_watermark(&scope)?;
        let chunks = self
            .remote
            .iterate_chunks(scope, current, self.config.max_chunk_entries)
            .with_retry(&self.config.retry, &self.cancel);
        ChunkIngester::linked(linked.clone()).ingest(&mut self.store, chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;
    use notemirror_store::SqliteStore;
    use notemirror_types::{Note, NoteStub, Notebook, SyncChunk};

    fn orchestrator(remote: &MockRemote) -> SyncOrchestrator<MockRemote, MockRemote, SqliteStore> {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set_config(CONFIG_USER, "alice").unwrap();
        SyncOrchestrator::new(
            SyncConfig::new().with_poll_interval(std::time::Duration::from_millis(10)),
            remote.clone(),
            Arc::new(remote.clone()),
            store,
        )
    }

    #[test]
    fn report_lines_cover_every_counter() {
        let report = SyncReport {
            metadata: IngestStats {
                notebooks: 2,
                expunged_notes: 3,
                ..IngestStats::default()
            },
            downloads: DownloadSummary {
                downloaded: 4,
                ..DownloadSummary::default()
            },
            skipped_linked_notebooks: 0,
            tasks: Some(TaskStats {
                tasks: 5,
                reminders: 1,
                ..TaskStats::default()
            }),
        };

        let lines = report.lines();
        assert_eq!(lines[0], "Updated or added notebooks: 2");
        assert_eq!(lines[1], "Updated or added notes: 4");
        assert_eq!(lines[4], "Expunged notes: 3");
        assert_eq!(lines[5], "Updated or added tasks/reminders: 5/1");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn missing_owner_is_reported() {
        let remote = MockRemote::new("alice");
        let mut orch = SyncOrchestrator::new(
            SyncConfig::new(),
            remote.clone(),
            Arc::new(remote),
            SqliteStore::open_in_memory().unwrap(),
        );

        assert!(matches!(orch.run(), Err(SyncError::NotInitialized)));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_call() {
        let remote = MockRemote::new("alice");
        let mut orch = orchestrator(&remote);
        orch.config = SyncConfig::new().with_download_workers(0);

        assert!(matches!(orch.run(), Err(SyncError::Config(_))));
        assert_eq!(remote.chunk_fetches(), 0);
    }

    #[test]
    fn full_run_mirrors_account() {
        let remote = MockRemote::new("alice");
        let mut chunk = SyncChunk::new(10, 10);
        chunk.notebooks.push(Notebook::new("nb1", "Inbox"));
        chunk.notes.push(NoteStub::new("n1", "Hello", "nb1"));
        remote.add_chunk(WatermarkScope::Primary, chunk);
        remote.add_note(Note::new("n1", "Hello", "nb1", "<en-note>hi</en-note>"));

        let mut orch = orchestrator(&remote);
        let report = orch.run().unwrap();

        assert_eq!(report.metadata.notebooks, 1);
        assert_eq!(report.downloads.downloaded, 1);
        assert_eq!(report.tasks, None);
        assert!(orch.store().get_note("n1").unwrap().is_some());
    }

    #[test]
    fn refreshes_link_record_of_mirrored_notebook() {
        let remote = MockRemote::new("alice");
        let mut orch = orchestrator(&remote);
        let old = LinkedNotebook::private("l1", "Old name", "s2", "key");
        orch.store_mut()
            .upsert_notebooks(&[Notebook::new("nb9", "Team")])
            .unwrap();
        orch.store_mut().upsert_linked_notebook(&old, "nb9").unwrap();

        let renamed = LinkedNotebook::private("l1", "New name", "s2", "key");
        remote.add_linked_notebook(renamed.clone());
        orch.run().unwrap();

        assert_eq!(orch.store().get_linked_notebook("l1").unwrap(), Some(renamed));
    }
}
