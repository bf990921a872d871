//! # MailPilot CLI (`mpt`)
//!
//! The `mpt` binary is the primary interface for MailPilot. It provides
//! commands for database initialization, account management, mail sync,
//! question answering, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! mpt --config ./pilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mpt init` | Create the SQLite database and run schema migrations |
//! | `mpt accounts add <email>` | Register a mail account |
//! | `mpt accounts list` | List registered accounts |
//! | `mpt sync` | Sync all accounts (backfill on first run, delta after) |
//! | `mpt ask "<question>"` | Answer a question from email and calendar |
//! | `mpt recent` | Show recently indexed messages |
//! | `mpt events` | Show upcoming calendar events |
//! | `mpt serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mailpilot::app::{AppContext, SyncOutcome};
use mailpilot::{config, db, migrate, scheduler, server, sync};

/// MailPilot — a local-first assistant over your email and calendar.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pilot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mpt",
    about = "MailPilot — sync, filter, and ask questions about your email and calendar",
    version,
    long_about = "MailPilot incrementally syncs mail, filters out noise with deterministic \
    rules, indexes relevant messages in SQLite (optionally with embeddings), and answers \
    questions by combining retrieved email with upcoming calendar events in an LLM prompt."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (accounts, cursors, messages, message_vectors). Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Manage mail accounts.
    Accounts {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Sync mail into the index.
    ///
    /// The first sync for an account backfills a bounded recent window;
    /// subsequent syncs fetch only changes since the stored cursor.
    Sync {
        /// Ignore the stored cursor and re-run the backfill.
        #[arg(long)]
        full: bool,

        /// Sync only this account instead of all of them.
        #[arg(long)]
        account: Option<String>,
    },

    /// Ask a question about your email and calendar.
    Ask {
        /// The question, in natural language.
        question: String,
    },

    /// Show the most recently indexed messages.
    Recent {
        /// Maximum number of messages to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show upcoming calendar events.
    Events {
        /// Days of lookahead.
        #[arg(long)]
        days: Option<i64>,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`. When the
    /// scheduler is enabled, also runs periodic background sync.
    Serve,
}

/// Account management subcommands.
#[derive(Subcommand)]
enum AccountAction {
    /// Register an account (or update its primary flag).
    Add {
        /// The account's email address.
        email: String,

        /// Make this the primary account (used for calendar context).
        #[arg(long)]
        primary: bool,
    },
    /// List registered accounts.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailpilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Accounts { action } => match action {
            AccountAction::Add { email, primary } => {
                let pool = db::connect(&cfg).await?;
                migrate::run_migrations(&pool).await?;
                sync::add_account(&pool, &email, primary).await?;
                println!("Registered {email}{}", if primary { " (primary)" } else { "" });
            }
            AccountAction::List => {
                let pool = db::connect(&cfg).await?;
                migrate::run_migrations(&pool).await?;
                let accounts = sync::list_accounts(&pool).await?;
                if accounts.is_empty() {
                    println!("No accounts registered.");
                }
                for account in accounts {
                    println!(
                        "{}{}",
                        account.email,
                        if account.primary { " (primary)" } else { "" }
                    );
                }
            }
        },
        Commands::Sync { full, account } => {
            let ctx = AppContext::init(cfg).await?;
            let outcomes = ctx.sync_accounts(full, account.as_deref()).await?;
            for outcome in outcomes {
                match outcome {
                    SyncOutcome::Completed { report } => println!(
                        "{}: fetched {}, indexed {} relevant ({} spam dropped{}){}",
                        report.account,
                        report.fetched,
                        report.relevant,
                        report.spam,
                        if report.blocked > 0 {
                            format!(", {} blocked", report.blocked)
                        } else {
                            String::new()
                        },
                        if report.cursor_reset {
                            " [cursor reset, re-backfilled]"
                        } else {
                            ""
                        }
                    ),
                    SyncOutcome::Skipped { account } => {
                        println!("{account}: skipped, sync already in flight")
                    }
                    SyncOutcome::Failed { account, error } => {
                        eprintln!("{account}: sync failed: {error}")
                    }
                }
            }
        }
        Commands::Ask { question } => {
            let ctx = AppContext::init(cfg).await?;
            let response = ctx.orchestrator.answer(&question).await;
            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!("\nSources:");
                for citation in &response.citations {
                    println!("  - {} — {}", citation.subject, citation.sender);
                }
            }
        }
        Commands::Recent { limit } => {
            let ctx = AppContext::init(cfg).await?;
            let messages = ctx.store.recent(limit).await?;
            if messages.is_empty() {
                println!("No messages indexed yet. Run `mpt sync` first.");
            }
            for meta in messages {
                println!(
                    "{}  {}  ({})",
                    meta.timestamp.format("%Y-%m-%d %H:%M"),
                    meta.subject,
                    meta.sender
                );
            }
        }
        Commands::Events { days } => {
            let ctx = AppContext::init(cfg).await?;
            let days = days.unwrap_or(ctx.config.llm.calendar_days);
            let events = ctx.calendar.list_events(days).await?;
            if events.is_empty() {
                println!("No events in the next {days} days.");
            }
            for event in events {
                println!(
                    "{}  {}{}",
                    event.start.format("%Y-%m-%d %H:%M"),
                    event.summary,
                    event
                        .location
                        .as_deref()
                        .map(|l| format!(" @ {l}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Serve => {
            let ctx = Arc::new(AppContext::init(cfg).await?);
            if ctx.config.scheduler.enabled {
                scheduler::spawn(Arc::clone(&ctx));
            }
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
