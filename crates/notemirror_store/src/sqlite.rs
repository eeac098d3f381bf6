//! SQLite implementation of the mirror store.

use crate::error::{StoreError, StoreResult};
use crate::mirror::{MirrorStore, StoreStats};
use crate::schema;
use notemirror_types::{
    LinkedNotebook, Note, NoteStub, Notebook, PendingNote, Reminder, Task, TaskChunk,
    WatermarkScope,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A mirror store backed by a single SQLite database file.
///
/// Full notes are stored as CBOR blobs in `notes.raw_note`; a NULL blob marks
/// the note as pending. Tasks and reminders are stored as their remote JSON.
///
/// # Example
///
/// ```rust
/// use notemirror_store::{MirrorStore, SqliteStore};
/// use notemirror_types::NoteStub;
///
/// let mut store = SqliteStore::open_in_memory().unwrap();
/// store.upsert_note_stubs(&[NoteStub::new("n1", "Title", "nb1")]).unwrap();
/// assert_eq!(store.list_notes_missing_body().unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Creates a new database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the file exists and `force`
    /// is false. With `force`, the existing file is removed first.
    pub fn create(path: impl AsRef<Path>, force: bool) -> StoreResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            if !force {
                return Err(StoreError::AlreadyExists(path.to_path_buf()));
            }
            info!(path = %path.display(), "Removing existing database");
            fs::remove_file(path)?;
            for suffix in ["-wal", "-shm"] {
                let sidecar = sidecar_path(path, suffix);
                if sidecar.exists() {
                    fs::remove_file(sidecar)?;
                }
            }
        }

        let conn = Connection::open(path)?;
        let mut store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.configure()?;
        schema::initialize(&mut store.conn)?;

        info!(path = %path.display(), "Created mirror database");
        Ok(store)
    }

    /// Opens an existing database, upgrading its schema if needed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the file does not exist
    /// - [`StoreError::InvalidDatabase`] if the file is not a mirror database
    /// - [`StoreError::ResyncRequired`] if the upgrade discarded content; the
    ///   database is upgraded and can be reopened
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open(path)?;
        let mut store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.configure()?;

        let version = schema::read_version(&store.conn)?;
        schema::upgrade(&mut store.conn, version)?;

        debug!(path = %path.display(), version, "Opened mirror database");
        Ok(store)
    }

    /// Creates a fresh in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::initialize(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    /// Returns the database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the stored schema version.
    pub fn db_version(&self) -> StoreResult<u32> {
        schema::read_version(&self.conn)
    }

    fn configure(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Ok(())
    }

    fn query_count(&self, sql: &str) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn to_sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidInput(format!("{} does not fit an INTEGER column", value)))
}

fn delete_by_key(tx: &Transaction<'_>, sql: &str, keys: &[String]) -> StoreResult<()> {
    let mut stmt = tx.prepare(sql)?;
    for key in keys {
        stmt.execute(params![key])?;
    }
    Ok(())
}

fn write_watermark(tx: &Transaction<'_>, scope: &WatermarkScope, value: u64) -> StoreResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO watermarks(scope, value) VALUES (?1, ?2)",
        params![scope.key(), to_sql_int(value)?],
    )?;
    Ok(())
}

fn write_tasks(tx: &Transaction<'_>, tasks: &[Task]) -> StoreResult<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO tasks(task_id, note_guid, raw_task) VALUES (?1, ?2, ?3)",
    )?;
    for task in tasks {
        debug!(task_id = %task.task_id, "Adding/updating task");
        let raw = serde_json::to_string(task)?;
        stmt.execute(params![task.task_id, task.parent_id, raw])?;
    }
    Ok(())
}

fn write_reminders(tx: &Transaction<'_>, reminders: &[Reminder]) -> StoreResult<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO reminders(reminder_id, task_id, raw_reminder) VALUES (?1, ?2, ?3)",
    )?;
    for reminder in reminders {
        debug!(reminder_id = %reminder.reminder_id, "Adding/updating reminder");
        let raw = serde_json::to_string(reminder)?;
        stmt.execute(params![reminder.reminder_id, reminder.source_id, raw])?;
    }
    Ok(())
}

fn remove_tasks(tx: &Transaction<'_>, task_ids: &[String]) -> StoreResult<()> {
    delete_by_key(tx, "DELETE FROM reminders WHERE task_id=?1", task_ids)?;
    delete_by_key(tx, "DELETE FROM tasks WHERE task_id=?1", task_ids)
}

impl MirrorStore for SqliteStore {
    fn upsert_notebooks(&mut self, notebooks: &[Notebook]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO notebooks(guid, name, stack) VALUES (?1, ?2, ?3)")?;
            for notebook in notebooks {
                debug!(notebook = %notebook, "Adding/updating notebook");
                stmt.execute(params![notebook.guid, notebook.name, notebook.stack])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_linked_notebook(
        &mut self,
        linked: &LinkedNotebook,
        notebook_guid: &str,
    ) -> StoreResult<()> {
        debug!(linked = %linked, notebook_guid, "Adding/updating linked notebook");
        self.conn.execute(
            r#"
            INSERT INTO notebooks_linked(guid, notebook_guid, share_name, username, shard_id, share_key, uri, stack)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(guid) DO UPDATE SET
              notebook_guid=excluded.notebook_guid,
              share_name=excluded.share_name,
              username=excluded.username,
              shard_id=excluded.shard_id,
              share_key=excluded.share_key,
              uri=excluded.uri,
              stack=excluded.stack
            "#,
            params![
                linked.guid,
                notebook_guid,
                linked.share_name,
                linked.username,
                linked.shard_id,
                linked.share_key,
                linked.uri,
                linked.stack
            ],
        )?;
        Ok(())
    }

    fn upsert_note_stubs(&mut self, stubs: &[NoteStub]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO notes(guid, title, notebook_guid, is_active) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for stub in stubs {
                debug!(note = %stub.guid, title = %stub.title, "Scheduling note for download");
                stmt.execute(params![stub.guid, stub.title, stub.notebook_guid, stub.active])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_note_full(&mut self, note: &Note, size: u64) -> StoreResult<()> {
        debug!(note = %note, size, "Adding/updating note");
        let raw = note.encode()?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO notes(guid, title, notebook_guid, is_active, raw_note, body_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                note.guid,
                note.title,
                note.notebook_guid,
                note.active,
                raw,
                to_sql_int(size)?
            ],
        )?;
        Ok(())
    }

    fn expunge_notebooks(&mut self, guids: &[String]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        delete_by_key(&tx, "DELETE FROM notebooks WHERE guid=?1", guids)?;
        tx.commit()?;
        Ok(())
    }

    fn expunge_notes(&mut self, guids: &[String]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        delete_by_key(&tx, "DELETE FROM notes WHERE guid=?1", guids)?;
        tx.commit()?;
        Ok(())
    }

    fn expunge_linked_notebooks(&mut self, guids: &[String]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        for guid in guids {
            let notebook_guid: Option<Option<String>> = tx
                .query_row(
                    "SELECT notebook_guid FROM notebooks_linked WHERE guid=?1",
                    params![guid],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(notebook_guid) = notebook_guid.flatten() {
                debug!(linked = %guid, notebook_guid = %notebook_guid, "Expunging linked notebook content");
                tx.execute("DELETE FROM notes WHERE notebook_guid=?1", params![notebook_guid])?;
                tx.execute("DELETE FROM notebooks WHERE guid=?1", params![notebook_guid])?;
            }

            tx.execute("DELETE FROM notebooks_linked WHERE guid=?1", params![guid])?;
            tx.execute(
                "DELETE FROM watermarks WHERE scope=?1",
                params![WatermarkScope::Linked(guid.clone()).key()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_notes_missing_body(&self) -> StoreResult<Vec<PendingNote>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT notes.guid, notes.title, notebooks_linked.guid
            FROM notes
            LEFT JOIN notebooks_linked USING (notebook_guid)
            WHERE notes.raw_note IS NULL
            ORDER BY notes.guid
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingNote {
                guid: row.get(0)?,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                linked_notebook_guid: row.get(2)?,
            })
        })?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    fn get_watermark(&self, scope: &WatermarkScope) -> StoreResult<u64> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM watermarks WHERE scope=?1",
                params![scope.key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    fn set_watermark(&mut self, scope: &WatermarkScope, value: u64) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        write_watermark(&tx, scope, value)?;
        tx.commit()?;
        Ok(())
    }

    fn get_notebook_by_linked_guid(&self, linked_guid: &str) -> StoreResult<Option<Notebook>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT notebooks.guid, notebooks.name, notebooks.stack
                FROM notebooks_linked
                JOIN notebooks ON notebooks.guid=notebooks_linked.notebook_guid
                WHERE notebooks_linked.guid=?1
                "#,
                params![linked_guid],
                |row| {
                    Ok(Notebook {
                        guid: row.get(0)?,
                        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        stack: row.get(2)?,
                        linked_notebook_guid: Some(linked_guid.to_string()),
                    })
                },
            )
            .optional()?)
    }

    fn get_linked_notebook(&self, guid: &str) -> StoreResult<Option<LinkedNotebook>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT guid, share_name, username, shard_id, share_key, uri, stack
                FROM notebooks_linked
                WHERE guid=?1
                "#,
                params![guid],
                |row| {
                    Ok(LinkedNotebook {
                        guid: row.get(0)?,
                        share_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        username: row.get(2)?,
                        shard_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        share_key: row.get(4)?,
                        uri: row.get(5)?,
                        stack: row.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    fn get_config(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM config WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_config(&mut self, name: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config(name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }

    fn upsert_tasks(&mut self, tasks: &[Task]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        write_tasks(&tx, tasks)?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_reminders(&mut self, reminders: &[Reminder]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        write_reminders(&tx, reminders)?;
        tx.commit()?;
        Ok(())
    }

    fn expunge_tasks(&mut self, task_ids: &[String]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        remove_tasks(&tx, task_ids)?;
        tx.commit()?;
        Ok(())
    }

    fn expunge_reminders(&mut self, reminder_ids: &[String]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        delete_by_key(&tx, "DELETE FROM reminders WHERE reminder_id=?1", reminder_ids)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_task_chunk(&mut self, chunk: &TaskChunk) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        remove_tasks(&tx, &chunk.expunged_tasks)?;
        delete_by_key(
            &tx,
            "DELETE FROM reminders WHERE reminder_id=?1",
            &chunk.expunged_reminders,
        )?;
        write_tasks(&tx, &chunk.tasks)?;
        write_reminders(&tx, &chunk.reminders)?;
        write_watermark(&tx, &WatermarkScope::Tasks, chunk.last_timestamp.max(0) as u64)?;
        tx.commit()?;
        Ok(())
    }

    fn get_note(&self, guid: &str) -> StoreResult<Option<Note>> {
        let raw: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT raw_note FROM notes WHERE guid=?1",
                params![guid],
                |row| row.get(0),
            )
            .optional()?;

        match raw.flatten() {
            Some(bytes) => Ok(Some(Note::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn notebooks(&self) -> StoreResult<Vec<Notebook>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT notebooks.guid, notebooks.name, notebooks.stack, notebooks_linked.guid
            FROM notebooks
            LEFT JOIN notebooks_linked ON notebooks_linked.notebook_guid=notebooks.guid
            ORDER BY notebooks.name COLLATE NOCASE
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Notebook {
                guid: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                stack: row.get(2)?,
                linked_notebook_guid: row.get(3)?,
            })
        })?;

        let mut notebooks = Vec::new();
        for row in rows {
            notebooks.push(row?);
        }
        Ok(notebooks)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            notebooks: self.query_count("SELECT COUNT(*) FROM notebooks")?,
            linked_notebooks: self.query_count("SELECT COUNT(*) FROM notebooks_linked")?,
            active_notes: self.query_count(
                "SELECT COUNT(*) FROM notes WHERE raw_note IS NOT NULL AND is_active=1",
            )?,
            trashed_notes: self.query_count(
                "SELECT COUNT(*) FROM notes WHERE raw_note IS NOT NULL AND is_active=0",
            )?,
            pending_notes: self.query_count("SELECT COUNT(*) FROM notes WHERE raw_note IS NULL")?,
            stored_bytes: self.query_count("SELECT COALESCE(SUM(body_size), 0) FROM notes")?,
            tasks: self.query_count("SELECT COUNT(*) FROM tasks")?,
            reminders: self.query_count("SELECT COUNT(*) FROM reminders")?,
        })
    }

    fn integrity_check(&self) -> StoreResult<String> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?);
        }
        Ok(lines.join("\n"))
    }
}
