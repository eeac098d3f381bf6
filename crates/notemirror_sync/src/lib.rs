//! # notemirror sync engine
//!
//! One-way, incremental and resumable pull of a remote note collection into
//! a local [`notemirror_store::MirrorStore`].
//!
//! This crate provides:
//! - Metadata chunk ingestion per watermark scope (account, linked notebooks)
//! - A memory-bounded pool of download workers for note bodies
//! - Per-run credentials for linked notebooks
//! - Task and reminder stream ingestion
//! - Retry helpers and cooperative cancellation
//! - A scriptable mock remote for tests
//!
//! ## Architecture
//!
//! A run is driven by [`SyncOrchestrator`]:
//! 1. Check that the store belongs to the authenticated account
//! 2. Ingest account metadata chunks up to the remote high watermark
//! 3. Ingest each linked notebook's chunks under its own watermark
//! 4. Download the body of every pending note
//! 5. Optionally ingest the task stream
//!
//! The transport is not part of this crate. It is plugged in through the
//! [`RemoteService`] and [`RemoteConnector`] traits.
//!
//! ## Key Invariants
//!
//! - A watermark is stored only after the effects of its chunk are stored
//! - A note is pending exactly while its body is absent from the store
//! - Budgeted memory never exceeds the limit by more than the notes already
//!   past the budget check
//! - Only the coordinating thread writes to the store

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
mod cancel;
mod config;
pub mod credentials;
mod error;
pub mod ingest;
pub mod mock;
pub mod orchestrator;
pub mod pool;
pub mod remote;
mod retry;
pub mod tasks;

pub use budget::MemoryBudget;
pub use cancel::CancellationToken;
pub use config::{RetryConfig, SyncConfig, MAX_CHUNK_ENTRIES_CEILING, MAX_DOWNLOAD_WORKERS};
pub use credentials::{CredentialCache, WorkerClients};
pub use error::{SyncError, SyncResult};
pub use ingest::{ChunkIngester, IngestStats};
pub use mock::{MockClient, MockRemote, NoteFault};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use pool::{ContentDownloadPool, DownloadSummary};
pub use remote::{ChunkStream, NoteClient, RemoteConnector, RemoteService};
pub use retry::{with_decode_retry, with_network_retry};
pub use tasks::{TaskChunk, TaskIngester, TaskStats};
