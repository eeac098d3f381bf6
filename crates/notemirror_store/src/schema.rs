//! Database schema and in-place upgrades.

use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{info, warn};

/// Schema version written by this build.
pub const CURRENT_DB_VERSION: u32 = 5;

/// Config key holding the schema version.
pub const CONFIG_DB_VERSION: &str = "db_version";
/// Config key holding the identity of the account the database mirrors.
pub const CONFIG_USER: &str = "user";
/// Config key holding the remote backend name.
pub const CONFIG_BACKEND: &str = "backend";

// Watermark of the primary scope before it moved into its own table.
const LEGACY_USN_KEY: &str = "usn";

pub(crate) const DB_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notebooks(
  guid TEXT PRIMARY KEY,
  name TEXT,
  stack TEXT
);
CREATE TABLE IF NOT EXISTS notebooks_linked(
  guid TEXT PRIMARY KEY,
  notebook_guid TEXT,
  share_name TEXT,
  username TEXT,
  shard_id TEXT,
  share_key TEXT,
  uri TEXT,
  stack TEXT
);
CREATE TABLE IF NOT EXISTS notes(
  guid TEXT PRIMARY KEY,
  title TEXT,
  notebook_guid TEXT,
  is_active BOOLEAN,
  raw_note BLOB,
  body_size INTEGER
);
CREATE TABLE IF NOT EXISTS config(
  name TEXT PRIMARY KEY,
  value TEXT
);
CREATE TABLE IF NOT EXISTS watermarks(
  scope TEXT PRIMARY KEY,
  value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks(
  task_id TEXT PRIMARY KEY,
  note_guid TEXT,
  raw_task TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reminders(
  reminder_id TEXT PRIMARY KEY,
  task_id TEXT,
  raw_reminder TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notes
  ON notes(notebook_guid, is_active);
CREATE INDEX IF NOT EXISTS idx_notes_title
  ON notes(title COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_notebooks_linked
  ON notebooks_linked(guid, notebook_guid);
CREATE INDEX IF NOT EXISTS idx_tasks_note
  ON tasks(note_guid);
CREATE INDEX IF NOT EXISTS idx_reminders_task
  ON reminders(task_id);
"#;

// Columns added to tables that already existed in version 4.
const V5_COLUMNS: &[(&str, &str, &str)] = &[
    ("notebooks_linked", "share_name", "TEXT"),
    ("notebooks_linked", "username", "TEXT"),
    ("notebooks_linked", "shard_id", "TEXT"),
    ("notebooks_linked", "share_key", "TEXT"),
    ("notebooks_linked", "uri", "TEXT"),
    ("notebooks_linked", "stack", "TEXT"),
    ("notes", "body_size", "INTEGER"),
];

/// Creates all tables of a fresh database and stamps the current version.
pub(crate) fn initialize(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(DB_SCHEMA)?;
    write_version(&tx, CURRENT_DB_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Reads the stored schema version; databases written before versioning
/// report 0.
pub(crate) fn read_version(conn: &Connection) -> StoreResult<u32> {
    if !has_table(conn, "config")? {
        return Err(StoreError::InvalidDatabase(
            "no config table, not a mirror database".to_string(),
        ));
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM config WHERE name=?1",
            params![CONFIG_DB_VERSION],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| StoreError::InvalidDatabase(format!("bad schema version '{}'", v))),
    }
}

/// Brings the schema up to [`CURRENT_DB_VERSION`].
///
/// Returns [`StoreError::ResyncRequired`] after a successful upgrade from
/// version 0: content tables were recreated and every watermark was reset.
pub(crate) fn upgrade(conn: &mut Connection, from: u32) -> StoreResult<()> {
    if from > CURRENT_DB_VERSION {
        return Err(StoreError::InvalidDatabase(format!(
            "schema version {} is newer than supported version {}",
            from, CURRENT_DB_VERSION
        )));
    }
    if from == CURRENT_DB_VERSION {
        return Ok(());
    }

    info!(from, to = CURRENT_DB_VERSION, "Upgrading database schema");

    let need_resync = from == 0;
    let tx = conn.transaction()?;

    if need_resync {
        tx.execute_batch("DROP TABLE IF EXISTS notebooks; DROP TABLE IF EXISTS notes;")?;
    }

    if from < 5 {
        for (table, column, decl) in V5_COLUMNS {
            add_column_if_missing(&tx, table, column, decl)?;
        }
    }

    // Creates whatever the older layout lacks, including the title index (v3)
    // and the linked notebook table (v4).
    tx.execute_batch(DB_SCHEMA)?;

    if from < 5 {
        tx.execute(
            "INSERT OR REPLACE INTO watermarks(scope, value)
             SELECT 'usn', CAST(value AS INTEGER) FROM config WHERE name=?1",
            params![LEGACY_USN_KEY],
        )?;
        tx.execute("DELETE FROM config WHERE name=?1", params![LEGACY_USN_KEY])?;

        if has_column(&tx, "notebooks_linked", "usn")? {
            tx.execute(
                "INSERT OR REPLACE INTO watermarks(scope, value)
                 SELECT 'linked:' || guid, usn FROM notebooks_linked WHERE usn > 0",
                [],
            )?;
        }
    }

    if need_resync {
        tx.execute("DELETE FROM watermarks", [])?;
    }

    write_version(&tx, CURRENT_DB_VERSION)?;
    tx.commit()?;

    if need_resync {
        warn!("Database schema was upgraded from an unversioned layout, full resync required");
        return Err(StoreError::ResyncRequired);
    }
    Ok(())
}

fn write_version(tx: &Transaction<'_>, version: u32) -> StoreResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO config(name, value) VALUES (?1, ?2)",
        params![CONFIG_DB_VERSION, version.to_string()],
    )?;
    Ok(())
}

fn has_table(conn: &Connection, table: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> StoreResult<()> {
    if has_table(conn, table)? && !has_column(conn, table, column)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            table, column, decl
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Layout of a version 4 database.
    const V4_SCHEMA: &str = r#"
    CREATE TABLE notebooks(guid TEXT PRIMARY KEY, name TEXT, stack TEXT);
    CREATE TABLE notebooks_linked(guid TEXT PRIMARY KEY, notebook_guid TEXT, usn INT DEFAULT 0);
    CREATE TABLE notes(guid TEXT PRIMARY KEY, title TEXT, notebook_guid TEXT, is_active BOOLEAN, raw_note BLOB);
    CREATE TABLE config(name TEXT PRIMARY KEY, value TEXT);
    "#;

    fn watermark(conn: &Connection, scope: &str) -> Option<i64> {
        conn.query_row(
            "SELECT value FROM watermarks WHERE scope=?1",
            params![scope],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
    }

    #[test]
    fn fresh_database_has_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        assert_eq!(read_version(&conn).unwrap(), CURRENT_DB_VERSION);
    }

    #[test]
    fn v4_upgrade_keeps_watermarks_and_content() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(V4_SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO config VALUES ('db_version', '4');
             INSERT INTO config VALUES ('usn', '120');
             INSERT INTO notebooks_linked VALUES ('l1', 'nb9', 33);
             INSERT INTO notes VALUES ('n1', 'Title', 'nb1', 1, NULL);",
        )
        .unwrap();

        upgrade(&mut conn, 4).unwrap();

        assert_eq!(read_version(&conn).unwrap(), CURRENT_DB_VERSION);
        assert_eq!(watermark(&conn, "usn"), Some(120));
        assert_eq!(watermark(&conn, "linked:l1"), Some(33));
        assert!(has_column(&conn, "notebooks_linked", "share_key").unwrap());
        assert!(has_column(&conn, "notes", "body_size").unwrap());

        let notes: i64 = conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(notes, 1);
    }

    #[test]
    fn unversioned_database_requires_resync() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE notebooks(guid TEXT PRIMARY KEY, name TEXT, stack TEXT);
             CREATE TABLE notes(guid TEXT PRIMARY KEY, title TEXT, notebook_guid TEXT, is_active BOOLEAN, raw_note BLOB);
             CREATE TABLE config(name TEXT PRIMARY KEY, value TEXT);
             INSERT INTO config VALUES ('usn', '500');
             INSERT INTO notes VALUES ('n1', 'Old', 'nb1', 1, x'00');",
        )
        .unwrap();
        assert_eq!(read_version(&conn).unwrap(), 0);

        let err = upgrade(&mut conn, 0).unwrap_err();
        assert!(matches!(err, StoreError::ResyncRequired));

        assert_eq!(read_version(&conn).unwrap(), CURRENT_DB_VERSION);
        assert_eq!(watermark(&conn, "usn"), None);
        let notes: i64 = conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(notes, 0);
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        let err = upgrade(&mut conn, CURRENT_DB_VERSION + 1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDatabase(_)));
    }

    #[test]
    fn missing_config_table_is_not_a_mirror() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            read_version(&conn),
            Err(StoreError::InvalidDatabase(_))
        ));
    }
}
