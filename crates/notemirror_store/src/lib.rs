//! # notemirror store
//!
//! Durable local mirror of the remote note collection.
//!
//! The store is the single source of truth for resumption: it records
//! notebooks, note metadata, downloaded note bodies, linked notebooks, tasks
//! and reminders, plus one watermark per independently checkpointed scope.
//! A note whose body is missing is *pending*; there is no separate download
//! queue.
//!
//! ## Design Principles
//!
//! - Every write is a single transaction
//! - Watermarks are written by the caller only after the changes they cover
//! - Schema changes are versioned and applied in place on open
//!
//! ## Available Stores
//!
//! - [`SqliteStore`] - SQLite database file, or in memory for tests
//!
//! ## Example
//!
//! ```rust
//! use notemirror_store::{MirrorStore, SqliteStore};
//! use notemirror_types::WatermarkScope;
//!
//! let mut store = SqliteStore::open_in_memory().unwrap();
//! store.set_watermark(&WatermarkScope::Primary, 42).unwrap();
//! assert_eq!(store.get_watermark(&WatermarkScope::Primary).unwrap(), 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mirror;
mod schema;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use mirror::{MirrorStore, StoreStats};
pub use schema::{CONFIG_BACKEND, CONFIG_DB_VERSION, CONFIG_USER, CURRENT_DB_VERSION};
pub use sqlite::SqliteStore;
