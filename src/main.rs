//! Linkscout main entry point
//!
//! This is the command-line interface for the linkscout link monitor.

use anyhow::Context;
use clap::{Parser, Subcommand};
use linkscout::config::{load_config_with_hash, Config};
use linkscout::output::{default_export_filename, print_statistics};
use linkscout::platform::ContentKind;
use linkscout::storage::AccountFilter;
use linkscout::{AccountStatus, Orchestrator, OperationStatus, Platform, SubmitOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Linkscout: recent-link monitoring for social media accounts
///
/// Fetches the most recent content links of Instagram, TikTok, X, Facebook,
/// YouTube and Telegram accounts, either on demand or by continuously cycling
/// through a managed set of accounts.
#[derive(Parser, Debug)]
#[command(name = "linkscout")]
#[command(version)]
#[command(about = "Recent-link monitoring for social media accounts", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch recent links for one account and print them
    Fetch {
        /// Account URL, domain path or username
        identifier: String,

        /// YouTube tab to read (videos or shorts)
        #[arg(long)]
        content_type: Option<ContentKind>,

        /// Number of links to return (1-200)
        #[arg(long)]
        max_items: Option<usize>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the workers and the round-robin scheduler until interrupted
    Monitor,

    /// Manage monitored accounts
    Accounts {
        #[command(subcommand)]
        action: AccountsCommand,
    },

    /// Control the round-robin scheduler
    Scheduler {
        #[command(subcommand)]
        action: SchedulerCommand,
    },

    /// Show credential pool state per platform
    Credentials,

    /// Show statistics from the database
    Stats,
}

#[derive(Subcommand, Debug)]
enum AccountsCommand {
    /// Add one account
    Add { identifier: String },

    /// Add accounts from a file, one identifier per line
    Import { file: PathBuf },

    /// List accounts
    List {
        #[arg(long)]
        platform: Option<Platform>,

        #[arg(long)]
        status: Option<AccountStatus>,
    },

    /// Stop monitoring an account
    Pause { id: i64 },

    /// Resume monitoring an account
    Resume { id: i64 },

    /// Delete an account and its links
    Delete { id: i64 },

    /// Print an account's stored links
    Links { id: i64 },

    /// Export an account's links as CSV
    Export {
        id: i64,

        /// Output file (defaults to <username>_<platform>_links_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SchedulerCommand {
    /// Mark the scheduler as running; `monitor` resumes it
    Start,

    /// Mark the scheduler as stopped
    Stop,

    /// Show scheduler state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Fetch {
            identifier,
            content_type,
            max_items,
            json,
        } => {
            let options = SubmitOptions {
                content_type,
                max_items,
            };
            handle_fetch(config, &identifier, options, json).await?;
        }
        Command::Monitor => handle_monitor(config).await?,
        Command::Accounts { action } => handle_accounts(config, action)?,
        Command::Scheduler { action } => handle_scheduler(config, action)?,
        Command::Credentials => handle_credentials(config)?,
        Command::Stats => handle_stats(config)?,
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("linkscout=info,warn"),
            1 => EnvFilter::new("linkscout=debug,info"),
            2 => EnvFilter::new("linkscout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Handles `fetch`: submits one operation and waits for its result
async fn handle_fetch(
    config: Config,
    identifier: &str,
    options: SubmitOptions,
    json: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    let operation_id = orchestrator.submit(identifier, options).await?;
    tracing::info!("Submitted operation {}", operation_id);

    let status = orchestrator
        .queue()
        .wait_for(&operation_id, Duration::from_millis(500))
        .await;
    orchestrator.shutdown().await?;
    let status = status?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status {
        OperationStatus::Completed {
            platform,
            account_url,
            links,
            ..
        } => {
            println!("{} ({}): {} links", account_url, platform, links.len());
            for link in links {
                println!("  {}", link);
            }
            Ok(())
        }
        OperationStatus::Failed { reason } => anyhow::bail!("operation failed: {}", reason),
        OperationStatus::InProgress { state } => {
            anyhow::bail!("operation ended in unexpected state {}", state)
        }
    }
}

/// Handles `monitor`: runs workers and the scheduler until Ctrl-C
async fn handle_monitor(config: Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;

    let recovery = orchestrator.start().await?;
    tracing::info!(
        "Worker pool running ({} re-enqueued, {} interrupted)",
        recovery.requeued,
        recovery.interrupted
    );
    orchestrator.scheduler().start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Interrupt received, finishing in-flight operations...");

    orchestrator.shutdown().await?;
    Ok(())
}

/// Handles `accounts` subcommands
fn handle_accounts(config: Config, action: AccountsCommand) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;

    match action {
        AccountsCommand::Add { identifier } => {
            let account = orchestrator.add_account(&identifier)?;
            println!(
                "✓ Added account {}: {} ({})",
                account.id, account.url, account.platform
            );
        }
        AccountsCommand::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let outcomes = orchestrator.import_accounts(contents.lines());

            let mut added = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(account) => {
                        added += 1;
                        println!("  added   {} -> {}", outcome.identifier, account.url);
                    }
                    Err(e) => println!("  error   {}: {}", outcome.identifier, e),
                }
            }
            println!("\n{} of {} accounts added", added, outcomes.len());
        }
        AccountsCommand::List { platform, status } => {
            let accounts = orchestrator.list_accounts(AccountFilter { platform, status })?;
            println!("Accounts ({}):", accounts.len());
            for account in accounts {
                println!(
                    "  [{}] {} {} {} (last checked: {}){}",
                    account.id,
                    account.platform,
                    account.status,
                    account.url,
                    account.last_checked.as_deref().unwrap_or("never"),
                    account
                        .last_error
                        .map(|e| format!(" error: {}", e))
                        .unwrap_or_default()
                );
            }
        }
        AccountsCommand::Pause { id } => {
            let account = orchestrator.pause_account(id)?;
            println!("✓ Paused {}", account.url);
        }
        AccountsCommand::Resume { id } => {
            let account = orchestrator.resume_account(id)?;
            println!("✓ Resumed {}", account.url);
        }
        AccountsCommand::Delete { id } => {
            orchestrator.delete_account(id)?;
            println!("✓ Deleted account {}", id);
        }
        AccountsCommand::Links { id } => {
            for link in orchestrator.account_links(id)? {
                println!("{}  {}", link.discovered_at, link.url);
            }
        }
        AccountsCommand::Export { id, output } => {
            let account = orchestrator.get_account(id)?;
            let path = output.unwrap_or_else(|| {
                PathBuf::from(default_export_filename(&account, chrono::Utc::now()))
            });
            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let written = orchestrator.export_links(id, file)?;
            println!("✓ Exported {} links to {}", written, path.display());
        }
    }

    Ok(())
}

/// Handles `scheduler` subcommands
fn handle_scheduler(config: Config, action: SchedulerCommand) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;

    match action {
        SchedulerCommand::Start => {
            orchestrator.set_persisted_scheduler(true)?;
            println!("✓ Scheduler marked as running; a running `monitor` resumes at its next tick");
        }
        SchedulerCommand::Stop => {
            orchestrator.set_persisted_scheduler(false)?;
            println!("✓ Scheduler marked as stopped; a running `monitor` pauses at its next tick");
        }
        SchedulerCommand::Status => {
            let scheduler = orchestrator.scheduler();
            let status = scheduler.status()?;
            let persisted = if scheduler.persisted_running()? {
                "running"
            } else {
                "stopped"
            };

            println!("=== Scheduler Status ===\n");
            println!("  Status: {}", persisted);
            println!("  Tick interval: {}s", status.tick_interval.as_secs());
            println!("  Batch size: {}", status.batch_size);
            println!("  Active accounts: {}", status.active_accounts);
            match (status.cursor, status.position) {
                (Some(cursor), Some(position)) => println!(
                    "  Cursor: account {} (position {} of {})",
                    cursor,
                    position + 1,
                    status.active_accounts
                ),
                (Some(cursor), None) => println!("  Cursor: account {} (no longer active)", cursor),
                (None, _) => println!("  Cursor: not started"),
            }
        }
    }

    Ok(())
}

/// Handles `credentials`: shows per-platform credential pools
fn handle_credentials(config: Config) -> anyhow::Result<()> {
    println!("Credentials: {}\n", config.storage.credentials_dir);
    let orchestrator = Orchestrator::new(config)?;

    for pool in orchestrator.credential_stats()? {
        println!(
            "{} ({} active, {} burnt{}):",
            pool.platform,
            pool.active,
            pool.burnt,
            if pool.exclusive { ", exclusive" } else { "" }
        );
        for credential in &pool.credentials {
            println!(
                "  {} [{}] failures: {}",
                credential.name,
                credential.status.as_str(),
                credential.consecutive_failures
            );
        }
    }

    Ok(())
}

/// Handles `stats`: shows statistics from the database
fn handle_stats(config: Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);
    let orchestrator = Orchestrator::new(config)?;

    let stats = orchestrator.statistics()?;
    print_statistics(&stats);

    Ok(())
}
