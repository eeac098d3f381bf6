//! Check command implementation.

use super::CommandError;
use notemirror_store::{MirrorStore, SqliteStore};
use std::path::Path;

/// Runs the integrity check and returns the problems found, if any.
pub fn verify<S: MirrorStore>(store: &S) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let outcome = store.integrity_check()?;
    if outcome.trim() == "ok" {
        Ok(None)
    } else {
        Ok(Some(outcome))
    }
}

/// Runs the check command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checking database at {:?}", path);
    println!();

    let store = SqliteStore::open(path)?;
    let problems = verify(&store)?;
    let stats = store.stats()?;

    println!("Notebooks:         {}", stats.notebooks);
    println!("Linked notebooks:  {}", stats.linked_notebooks);
    println!("Notes:             {}", stats.active_notes);
    println!("Notes in trash:    {}", stats.trashed_notes);
    println!("Notes pending:     {}", stats.pending_notes);
    println!();

    match problems {
        None => {
            println!("✓ Database integrity check passed");
            Ok(())
        }
        Some(problems) => {
            println!("✗ Database integrity check failed");
            Err(CommandError::IntegrityFailed(problems).into())
        }
    }
}
