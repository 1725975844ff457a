//! # repo-scribe CLI (`scribe`)
//!
//! The `scribe` binary submits repositories, inspects their progress and
//! runs the warehouse scheduler that documents them.
//!
//! ## Usage
//!
//! ```bash
//! scribe --config ./config/scribe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scribe init` | Create the SQLite database and run schema migrations |
//! | `scribe submit <address>` | Queue a repository for documentation |
//! | `scribe list` | List jobs |
//! | `scribe status <id>` | Show a job, its document record and catalogue |
//! | `scribe retry <id>` | Put a job back in the queue |
//! | `scribe reset <id>` | Delete a job and everything generated for it |
//! | `scribe run` | Start the scheduler loop |
//! | `scribe tree <dir>` | Render a directory as the pipeline sees it |
//!
//! ## Logging
//!
//! Logs go to stderr. `RUST_LOG` takes precedence, then `--verbose`
//! (debug), then `[logging] level` from the config.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_scribe::catalogue::TreeFormat;
use repo_scribe::{config, jobs, migrate};
use repo_scribe_core::models::JobKind;

/// repo-scribe: a local-first documentation warehouse for source repositories.
#[derive(Parser)]
#[command(
    name = "scribe",
    about = "repo-scribe: a local-first documentation warehouse for source repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scribe.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Queue a repository and print the new job id.
    Submit {
        /// Git remote URL, or a local directory for `--kind file`.
        address: String,

        /// Branch to document. Defaults to the remote HEAD.
        #[arg(long)]
        branch: Option<String>,

        /// `git` (clone the address) or `file` (use an extracted directory).
        #[arg(long, default_value = "git")]
        kind: JobKind,
    },

    /// List all jobs.
    List,

    /// Show a job, its document record and catalogue.
    Status {
        /// Job id.
        id: String,
    },

    /// Move a job back to Pending and clear its error.
    Retry {
        /// Job id.
        id: String,
    },

    /// Delete a job and everything generated for it.
    Reset {
        /// Job id.
        id: String,
    },

    /// Run the warehouse scheduler until Ctrl-C.
    Run {
        /// Process at most one job, then exit.
        #[arg(long)]
        once: bool,
    },

    /// Render a directory tree with the pipeline's excludes applied.
    Tree {
        /// Directory to scan.
        dir: PathBuf,

        #[arg(long, value_enum, default_value = "indented")]
        format: TreeFormat,
    },
}

fn init_logging(verbose: bool, config_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            config_level.unwrap_or("info")
        };
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Tree { dir, format } = &cli.command {
        init_logging(cli.verbose, None);
        let cfg = config::load_config(&cli.config).ok();
        jobs::print_tree(cfg.as_ref(), dir, *format)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_logging(cli.verbose, Some(&cfg.logging.level));

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Submit {
            address,
            branch,
            kind,
        } => {
            jobs::submit_job(&cfg, &address, branch, kind).await?;
        }
        Commands::List => {
            jobs::list_jobs(&cfg).await?;
        }
        Commands::Status { id } => {
            jobs::show_status(&cfg, &id).await?;
        }
        Commands::Retry { id } => {
            jobs::retry_job(&cfg, &id).await?;
        }
        Commands::Reset { id } => {
            jobs::reset_job(&cfg, &id).await?;
        }
        Commands::Run { once } => {
            jobs::run_scheduler(&cfg, once).await?;
        }
        Commands::Tree { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
