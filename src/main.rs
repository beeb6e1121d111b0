//! # Civic Sync CLI (`civsync`)
//!
//! The `civsync` binary runs synchronization passes from configured feeds
//! into entity tables, and inspects the result.
//!
//! ## Usage
//!
//! ```bash
//! civsync --config ./config/civsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `civsync init` | Create the local database and register feed tables |
//! | `civsync feeds` | List configured feeds and their health |
//! | `civsync sync <feed>` | Run one pass for a feed (or `all`) |
//! | `civsync stats <table>` | Rows per source and status |
//! | `civsync export <table>` | Dump a table as JSON |
//! | `civsync id --prefix P <parts>` | Print a derived identifier |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use civic_sync::progress::ProgressMode;
use civic_sync::{config, export, ingest, migrate, sources, stats};
use civic_sync_core::identity::{identifier_for, normalize_text};

/// Civic Sync CLI: keep entity tables in sync with their source feeds.
///
/// All commands except `id` accept a `--config` flag pointing to a TOML
/// configuration file. See `config/civsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "civsync",
    about = "Civic Sync: reconciling upsert of civic data feeds into entity tables",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/civsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local database.
    ///
    /// Creates the SQLite schema and, with the sqlite backend, registers
    /// every table named by a feed. Idempotent.
    Init,

    /// List configured feeds and their health.
    Feeds,

    /// Run a synchronization pass.
    ///
    /// Fetches the feed, diffs it against the current table contents and
    /// writes the minimal set of creates, updates and status changes.
    Sync {
        /// Feed name, or `all`.
        feed: String,

        /// Plan only; print what would be written.
        #[arg(long)]
        dry_run: bool,

        /// Do not deactivate rows missing from this fetch.
        #[arg(long)]
        keep_missing: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show record counts per source and status for a table.
    Stats {
        /// Table name.
        table: String,
    },

    /// Export a table as JSON.
    Export {
        /// Table name.
        table: String,

        /// Only rows owned by this source.
        #[arg(long)]
        source: Option<String>,

        /// Output file (defaults to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the identifier derived from the given parts.
    Id {
        /// Namespace prefix, e.g. `meser-`.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Trim, collapse whitespace and lowercase each part first.
        #[arg(long)]
        normalize: bool,

        /// Parts, in order. Empty strings are skipped.
        parts: Vec<String>,
    },
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Id {
        prefix,
        normalize,
        parts,
    } = &cli.command
    {
        let parts: Vec<Option<String>> = parts
            .iter()
            .map(|p| {
                let p = if *normalize { normalize_text(p) } else { p.clone() };
                (!p.is_empty()).then_some(p)
            })
            .collect();
        let refs: Vec<Option<&str>> = parts.iter().map(|p| p.as_deref()).collect();
        println!("{}", identifier_for(prefix, &refs));
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let tables = migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            for table in tables {
                println!("  registered table: {}", table);
            }
        }
        Commands::Feeds => {
            sources::list_feeds(&cfg)?;
        }
        Commands::Sync {
            feed,
            dry_run,
            keep_missing,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_sync(&cfg, &feed, dry_run, keep_missing, mode).await?;
        }
        Commands::Stats { table } => {
            stats::run_stats(&cfg, &table).await?;
        }
        Commands::Export {
            table,
            source,
            output,
        } => {
            export::run_export(&cfg, &table, source.as_deref(), output.as_deref()).await?;
        }
        Commands::Id { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
