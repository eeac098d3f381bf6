//! Status command implementation.

use super::config::{load_sync_config, print_settings, Settings};
use super::OutputFormat;
use notemirror_store::{MirrorStore, SqliteStore, CONFIG_BACKEND, CONFIG_USER};
use notemirror_types::WatermarkScope;
use serde::Serialize;
use std::path::Path;

/// Database status.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Database path.
    pub path: String,
    /// Schema version.
    pub db_version: u32,
    /// Owner identity.
    pub user: Option<String>,
    /// Backend name.
    pub backend: Option<String>,
    /// Account high watermark.
    pub account_watermark: u64,
    /// Task stream watermark.
    pub tasks_watermark: u64,
    /// Content counts.
    pub counts: Counts,
    /// Effective sync settings.
    pub settings: Settings,
}

/// Content counts.
#[derive(Debug, Serialize)]
pub struct Counts {
    /// Notebooks, linked ones included.
    pub notebooks: u64,
    /// Linked notebooks.
    pub linked_notebooks: u64,
    /// Downloaded notes outside the trash.
    pub notes: u64,
    /// Downloaded notes in the trash.
    pub trashed_notes: u64,
    /// Notes waiting for their body.
    pub pending_notes: u64,
    /// Stored body bytes.
    pub stored_bytes: u64,
    /// Tasks.
    pub tasks: u64,
    /// Reminders.
    pub reminders: u64,
}

/// Collects the status of an opened database.
pub fn collect(store: &SqliteStore) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    let config = load_sync_config(store)?;

    Ok(StatusReport {
        path: store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string()),
        db_version: store.db_version()?,
        user: store.get_config(CONFIG_USER)?,
        backend: store.get_config(CONFIG_BACKEND)?,
        account_watermark: store.get_watermark(&WatermarkScope::Primary)?,
        tasks_watermark: store.get_watermark(&WatermarkScope::Tasks)?,
        counts: Counts {
            notebooks: stats.notebooks,
            linked_notebooks: stats.linked_notebooks,
            notes: stats.active_notes,
            trashed_notes: stats.trashed_notes,
            pending_notes: stats.pending_notes,
            stored_bytes: stats.stored_bytes,
            tasks: stats.tasks,
            reminders: stats.reminders,
        },
        settings: Settings::from(&config),
    })
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let store = SqliteStore::open(path)?;
    let report = collect(&store)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("Mirror database: {}", report.path);
    println!();
    println!("Schema version:    v{}", report.db_version);
    println!(
        "User:              {}",
        report.user.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Backend:           {}",
        report.backend.as_deref().unwrap_or("(not set)")
    );
    println!("Account watermark: {}", report.account_watermark);
    println!("Tasks watermark:   {}", report.tasks_watermark);
    println!();
    println!("Contents:");
    println!("  Notebooks:         {}", report.counts.notebooks);
    println!("  Linked notebooks:  {}", report.counts.linked_notebooks);
    println!("  Notes:             {}", report.counts.notes);
    println!("  Notes in trash:    {}", report.counts.trashed_notes);
    println!("  Notes pending:     {}", report.counts.pending_notes);
    println!("  Stored bytes:      {}", report.counts.stored_bytes);
    println!("  Tasks:             {}", report.counts.tasks);
    println!("  Reminders:         {}", report.counts.reminders);
    println!();
    println!("Settings:");
    print_settings(&report.settings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use notemirror_types::NoteStub;

    #[test]
    fn reports_watermarks_and_counts() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set_config(CONFIG_USER, "alice").unwrap();
        store.set_watermark(&WatermarkScope::Primary, 42).unwrap();
        store
            .upsert_note_stubs(&[NoteStub::new("n1", "One", "nb1")])
            .unwrap();

        let report = collect(&store).unwrap();

        assert_eq!(report.path, ":memory:");
        assert_eq!(report.user.as_deref(), Some("alice"));
        assert_eq!(report.backend, None);
        assert_eq!(report.account_watermark, 42);
        assert_eq!(report.tasks_watermark, 0);
        assert_eq!(report.counts.pending_notes, 1);
        assert_eq!(report.settings.download_workers, 5);
    }

    #[test]
    fn serializes_to_json() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = collect(&store).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["account_watermark"], 0);
        assert!(json["settings"]["max_chunk_entries"].is_number());
    }
}
