//! Init command implementation.

use notemirror_store::{MirrorStore, SqliteStore, CONFIG_BACKEND, CONFIG_USER};
use std::path::Path;
use tracing::info;

/// Creates a database at `path` owned by `user`.
pub fn create<P: AsRef<Path>>(
    path: P,
    user: &str,
    backend: &str,
    force: bool,
) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    if user.trim().is_empty() {
        return Err("User name must not be empty".into());
    }

    let mut store = SqliteStore::create(path, force)?;
    store.set_config(CONFIG_USER, user)?;
    store.set_config(CONFIG_BACKEND, backend)?;
    info!(user, backend, "Initialized mirror database");
    Ok(store)
}

/// Runs the init command.
pub fn run(
    path: &Path,
    user: &str,
    backend: &str,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = create(path, user, backend, force)?;

    println!("Initialized mirror database at {:?}", path);
    println!("  User:    {}", user);
    println!("  Backend: {}", backend);
    println!("  Schema:  v{}", store.db_version()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notemirror_store::CURRENT_DB_VERSION;
    use tempfile::TempDir;

    #[test]
    fn stores_owner_and_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.db");

        drop(create(&path, "alice", "sandbox", false).unwrap());
        let store = SqliteStore::open(&path).unwrap();

        assert_eq!(store.get_config(CONFIG_USER).unwrap().as_deref(), Some("alice"));
        assert_eq!(
            store.get_config(CONFIG_BACKEND).unwrap().as_deref(),
            Some("sandbox")
        );
        assert_eq!(store.db_version().unwrap(), CURRENT_DB_VERSION);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.db");

        drop(create(&path, "alice", "production", false).unwrap());
        assert!(create(&path, "bob", "production", false).is_err());

        let store = create(&path, "bob", "production", true).unwrap();
        assert_eq!(store.get_config(CONFIG_USER).unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn empty_user_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.db");

        assert!(create(&path, "  ", "production", false).is_err());
        assert!(!path.exists());
    }
}
