//! notemirror CLI
//!
//! Command-line tools for local note mirror databases.
//!
//! # Commands
//!
//! - `init` - Create a mirror database for an account
//! - `status` - Display owner, watermarks and content counts
//! - `check` - Run an integrity check on the database
//! - `pending` - List notes whose body is not downloaded yet
//! - `config` - Show or change stored sync settings

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Local note mirror database tools.
#[derive(Parser)]
#[command(name = "notemirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the mirror database file
    #[arg(global = true, short, long)]
    database: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a mirror database
    Init {
        /// Owner identity of the mirrored account
        #[arg(short, long)]
        user: String,

        /// Backend the account lives on
        #[arg(short, long, default_value = "production")]
        backend: String,

        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Display database status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check database integrity
    Check,

    /// List notes waiting for their body
    Pending {
        /// Maximum number of notes to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show or change stored sync settings
    Config {
        /// Maximum entries per metadata chunk
        #[arg(long)]
        max_chunk_entries: Option<u32>,

        /// Number of concurrent download workers
        #[arg(long)]
        download_workers: Option<usize>,

        /// Download memory budget in megabytes
        #[arg(long)]
        memory_limit: Option<u64>,

        /// Attempts per remote call on network errors
        #[arg(long)]
        network_retries: Option<u32>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init {
            user,
            backend,
            force,
        } => {
            let path = cli.database.ok_or("Database path required for init")?;
            commands::init::run(&path, &user, &backend, force)?;
        }
        Commands::Status { format } => {
            let path = cli.database.ok_or("Database path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Check => {
            let path = cli.database.ok_or("Database path required for check")?;
            commands::check::run(&path)?;
        }
        Commands::Pending { limit, format } => {
            let path = cli.database.ok_or("Database path required for pending")?;
            commands::pending::run(&path, limit, &format)?;
        }
        Commands::Config {
            max_chunk_entries,
            download_workers,
            memory_limit,
            network_retries,
        } => {
            let path = cli.database.ok_or("Database path required for config")?;
            let changes = commands::config::SettingChanges {
                max_chunk_entries,
                download_workers,
                memory_limit_mb: memory_limit,
                network_retries,
            };
            commands::config::run(&path, &changes)?;
        }
        Commands::Version => {
            println!("notemirror CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Database schema v{}",
                notemirror_store::CURRENT_DB_VERSION
            );
        }
    }

    Ok(())
}
