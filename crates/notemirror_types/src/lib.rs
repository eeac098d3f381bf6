//! # notemirror types
//!
//! Data model shared by the notemirror store and sync engine.
//!
//! This crate provides:
//! - [`Notebook`] and [`LinkedNotebook`] records
//! - [`NoteStub`] (title-only metadata) and [`Note`] (full content)
//! - [`SyncChunk`] for one batch of metadata changes
//! - [`WatermarkScope`] naming each independently checkpointed stream
//! - Task stream records ([`EntityUpdate`], [`Task`], [`Reminder`])
//! - CBOR encoding of full notes
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod chunk;
mod error;
mod note;
mod notebook;
mod task;

pub use auth::NotebookAuth;
pub use chunk::{SyncChunk, WatermarkScope};
pub use error::{CodecError, CodecResult};
pub use note::{Note, NoteStub, PendingNote, Resource};
pub use notebook::{LinkedNotebook, Notebook};
pub use task::{
    EntityRef, EntityType, EntityUpdate, InstanceType, Reminder, SyncOperationType, Task,
    TaskChunk, TaskUpdatePage,
};
