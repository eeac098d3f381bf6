//! Config command implementation.
//!
//! Sync settings live in the database's `config` table next to the owner
//! identity, so every run against the same mirror uses the same values.

use super::CommandError;
use notemirror_store::{MirrorStore, SqliteStore};
use notemirror_sync::{RetryConfig, SyncConfig};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

/// Config key for the maximum entries per metadata chunk.
pub const SETTING_MAX_CHUNK_ENTRIES: &str = "max_chunk_entries";
/// Config key for the download pool width.
pub const SETTING_DOWNLOAD_WORKERS: &str = "download_workers";
/// Config key for the download memory budget in megabytes.
pub const SETTING_MEMORY_LIMIT_MB: &str = "memory_limit_mb";
/// Config key for the attempts per remote call.
pub const SETTING_NETWORK_RETRIES: &str = "network_retries";

/// Requested changes; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct SettingChanges {
    /// New maximum entries per metadata chunk.
    pub max_chunk_entries: Option<u32>,
    /// New download pool width.
    pub download_workers: Option<usize>,
    /// New memory budget in megabytes.
    pub memory_limit_mb: Option<u64>,
    /// New attempts per remote call.
    pub network_retries: Option<u32>,
}

impl SettingChanges {
    fn is_empty(&self) -> bool {
        self.max_chunk_entries.is_none()
            && self.download_workers.is_none()
            && self.memory_limit_mb.is_none()
            && self.network_retries.is_none()
    }
}

/// Effective sync settings of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Maximum entries per metadata chunk.
    pub max_chunk_entries: u32,
    /// Download pool width.
    pub download_workers: usize,
    /// Memory budget in megabytes.
    pub memory_limit_mb: u64,
    /// Attempts per remote call.
    pub network_retries: u32,
}

impl From<&SyncConfig> for Settings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_chunk_entries: config.max_chunk_entries,
            download_workers: config.download_workers,
            memory_limit_mb: config.memory_limit_mb,
            network_retries: config.retry.max_attempts,
        }
    }
}

fn read_setting<S, T>(store: &S, name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    S: MirrorStore,
    T: FromStr,
{
    match store.get_config(name)? {
        Some(value) => value.parse().map(Some).map_err(|_| {
            CommandError::InvalidSetting {
                name: name.to_string(),
                value,
            }
            .into()
        }),
        None => Ok(None),
    }
}

/// Builds the sync configuration from defaults and stored settings.
pub fn load_sync_config<S: MirrorStore>(
    store: &S,
) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let mut config = SyncConfig::new();
    if let Some(entries) = read_setting(store, SETTING_MAX_CHUNK_ENTRIES)? {
        config = config.with_max_chunk_entries(entries);
    }
    if let Some(workers) = read_setting(store, SETTING_DOWNLOAD_WORKERS)? {
        config = config.with_download_workers(workers);
    }
    if let Some(megabytes) = read_setting(store, SETTING_MEMORY_LIMIT_MB)? {
        config = config.with_memory_limit_mb(megabytes);
    }
    if let Some(attempts) = read_setting(store, SETTING_NETWORK_RETRIES)? {
        config = config.with_retry(RetryConfig::new(attempts));
    }
    Ok(config)
}

/// Validates `changes` against the stored settings and persists them.
///
/// Nothing is written if the resulting configuration is invalid.
pub fn apply_changes<S: MirrorStore>(
    store: &mut S,
    changes: &SettingChanges,
) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let mut config = load_sync_config(store)?;
    if let Some(entries) = changes.max_chunk_entries {
        config = config.with_max_chunk_entries(entries);
    }
    if let Some(workers) = changes.download_workers {
        config = config.with_download_workers(workers);
    }
    if let Some(megabytes) = changes.memory_limit_mb {
        config = config.with_memory_limit_mb(megabytes);
    }
    if let Some(attempts) = changes.network_retries {
        config = config.with_retry(RetryConfig::new(attempts));
    }
    config.validate()?;

    if let Some(entries) = changes.max_chunk_entries {
        store.set_config(SETTING_MAX_CHUNK_ENTRIES, &entries.to_string())?;
    }
    if let Some(workers) = changes.download_workers {
        store.set_config(SETTING_DOWNLOAD_WORKERS, &workers.to_string())?;
    }
    if let Some(megabytes) = changes.memory_limit_mb {
        store.set_config(SETTING_MEMORY_LIMIT_MB, &megabytes.to_string())?;
    }
    if let Some(attempts) = changes.network_retries {
        store.set_config(SETTING_NETWORK_RETRIES, &attempts.to_string())?;
    }
    Ok(config)
}

/// Runs the config command.
pub fn run(path: &Path, changes: &SettingChanges) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = SqliteStore::open(path)?;

    let config = if changes.is_empty() {
        load_sync_config(&store)?
    } else {
        let config = apply_changes(&mut store, changes)?;
        println!("Settings updated");
        println!();
        config
    };

    print_settings(&Settings::from(&config));
    Ok(())
}

/// Prints settings as text lines.
pub fn print_settings(settings: &Settings) {
    println!("Max chunk entries:  {}", settings.max_chunk_entries);
    println!("Download workers:   {}", settings.download_workers);
    println!("Memory limit:       {} MB", settings.memory_limit_mb);
    println!("Network retries:    {}", settings.network_retries);
}
