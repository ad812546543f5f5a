//! # docqa CLI
//!
//! Ask questions about your own documents.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest <paths..>` | Load, split, embed and index files (replaces the collection) |
//! | `docqa ask "<question>"` | Answer one question, optionally continuing a session |
//! | `docqa chat` | Interactive chat; the session is saved after every answer |
//! | `docqa sessions list` | List saved sessions, most recent first |
//! | `docqa sessions show <id>` | Print a saved transcript |
//! | `docqa sessions delete <id>` | Delete a saved session |
//! | `docqa sweep` | Remove sessions inactive for longer than the retention window |
//!
//! ## Examples
//!
//! ```bash
//! # Index a folder of manuals
//! docqa ingest ./manuals
//!
//! # One-off question
//! docqa ask "How do I reset the controller?"
//!
//! # Continue a conversation as alice
//! docqa chat --session 1b4e28ba-2fa1-11d2-883f-0016d3cca427 --user alice
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docqa::{commands, config, logging};

/// docqa: conversational question answering over your documents.
///
/// Provider credentials are read from the environment (`GOOGLE_API_KEY`,
/// `OPENAI_API_KEY`, `QDRANT_API_KEY`); a `.env` file in the working
/// directory is loaded first.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml`. A missing file means built-in
    /// defaults plus `DOCQA_*` environment overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging for docqa modules.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from files and directories.
    ///
    /// Directories are walked recursively; `.pdf`, `.txt` and `.md` files
    /// are loaded, everything else is skipped. The existing collection is
    /// replaced once every batch has been embedded.
    Ingest {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,

        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,

        /// Owner of the session.
        #[arg(long)]
        user: Option<String>,
    },

    /// Interactive chat. Type `/quit` or send EOF to leave.
    Chat {
        /// Resume an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Owner of the session.
        #[arg(long)]
        user: Option<String>,
    },

    /// Inspect and manage saved chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Delete sessions not updated within the retention window.
    Sweep {
        /// Maximum age in days. Defaults to `history.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, most recently updated first.
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Print a session transcript.
    Show {
        id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete a session.
    Delete {
        id: String,
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { paths } => commands::run_ingest(&cfg, &paths).await?,
        Commands::Ask {
            question,
            session,
            user,
        } => commands::run_ask(&cfg, &question, session.as_deref(), user.as_deref()).await?,
        Commands::Chat { session, user } => {
            commands::run_chat(&cfg, session.as_deref(), user.as_deref()).await?
        }
        Commands::Sessions { action } => match action {
            SessionsAction::List { user } => {
                commands::run_sessions_list(&cfg, user.as_deref()).await?
            }
            SessionsAction::Show { id, user } => {
                commands::run_sessions_show(&cfg, &id, user.as_deref()).await?
            }
            SessionsAction::Delete { id, user } => {
                commands::run_sessions_delete(&cfg, &id, user.as_deref()).await?
            }
        },
        Commands::Sweep { days } => commands::run_sweep(&cfg, days).await?,
    }

    Ok(())
}
