//! # rag-ingest CLI (`ingest`)
//!
//! Registers project files, runs them through the ingestion pipeline, and
//! reports per-project statistics.
//!
//! ## Usage
//!
//! ```bash
//! ingest --config ./config/ingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest init` | Create the SQLite database and tables |
//! | `ingest files add <path> --project <id>` | Store files and register them as pending |
//! | `ingest files list --project <id>` | List files with status and chunk counts |
//! | `ingest files reset <file-id>` | Reset a stuck `processing` file to `pending` |
//! | `ingest process <file-id>` | Run the pipeline for one file |
//! | `ingest process --project <id> [--all]` | Run pending and failed files of a project |
//! | `ingest reprocess <file-id>` | Delete a file's chunks and run it again |
//! | `ingest stats --project <id>` | File counts by status, chunk and token totals |
//! | `ingest completions <shell>` | Print shell completions |
//!
//! Logs go to stderr and honor `RUST_LOG` (default `rag_ingest=info`).

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_ingest::progress::ProgressMode;
use rag_ingest::{batch, config, files, migrate, pipeline, stats};

/// rag-ingest: turn project files into embedded, retrievable chunks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ingest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ingest",
    about = "Document ingestion pipeline for retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ingest.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `files` and `chunks`
    /// tables. Idempotent.
    Init,

    /// Register, list, or reset project files.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },

    /// Run the ingestion pipeline for one file or a whole project.
    Process {
        /// File id to process.
        #[arg(conflicts_with = "project", required_unless_present = "project")]
        file_id: Option<String>,

        /// Process the project's pending and failed files.
        #[arg(long)]
        project: Option<String>,

        /// With `--project`: also re-run completed files.
        #[arg(long, requires = "project")]
        all: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a file's chunks and run the pipeline again.
    Reprocess {
        file_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show file and chunk statistics for a project.
    Stats {
        #[arg(long)]
        project: String,

        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    /// Copy a file or directory of files into object storage and register
    /// them as `pending`.
    Add {
        path: PathBuf,

        #[arg(long)]
        project: String,

        /// Glob(s) selecting files inside a directory (default: txt, md, pdf, xml).
        #[arg(long = "include")]
        include: Vec<String>,
    },
    /// List a project's files with status, chunk count, and last error.
    List {
        #[arg(long)]
        project: String,

        #[arg(long)]
        json: bool,
    },
    /// Reset a file stuck in `processing` back to `pending`.
    Reset { file_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rag_ingest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "ingest", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);
    let reporter = mode.reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Files { action } => match action {
            FilesAction::Add {
                path,
                project,
                include,
            } => {
                files::run_add(&cfg, &path, &project, &include).await?;
            }
            FilesAction::List { project, json } => {
                files::run_list(&cfg, &project, json).await?;
            }
            FilesAction::Reset { file_id } => {
                files::run_reset(&cfg, &file_id).await?;
            }
        },
        Commands::Process {
            file_id,
            project,
            all,
            json,
        } => match (file_id, project) {
            (Some(file_id), _) => {
                pipeline::run_single(&cfg, &file_id, false, reporter.as_ref(), json).await?;
            }
            (None, Some(project)) => {
                batch::run_batch(&cfg, &project, all, reporter.as_ref(), json).await?;
            }
            (None, None) => anyhow::bail!("either a file id or --project is required"),
        },
        Commands::Reprocess { file_id, json } => {
            pipeline::run_single(&cfg, &file_id, true, reporter.as_ref(), json).await?;
        }
        Commands::Stats { project, json } => {
            stats::run_stats(&cfg, &project, json).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
