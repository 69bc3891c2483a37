//! calendar-pipeline - command-line front end for the calendar workflow
//!
//! Runs a workflow up to the review checkpoint and exposes the checkpoint
//! operations (list, show, replace, approve, resume) as sub-commands.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use integration::DateRange;
use orchestrator::config::{load_config, resolve_config_path};
use orchestrator::{PipelineComponents, ReviewService, WorkflowOrchestrator, WorkflowOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calendar-pipeline")]
#[command(about = "Generate, review and complete marketing send calendars", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: $CALENDAR_PIPELINE_CONFIG or config/calendar-pipeline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow up to the review checkpoint
    Run {
        /// Account alias, platform id or name
        #[arg(short, long)]
        account: String,
        /// First day of the calendar (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day of the calendar (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },

    /// Review checkpoint operations
    #[command(subcommand)]
    Review(ReviewCommands),

    /// List configured accounts
    Accounts,
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List workflows waiting for review
    List {
        /// Only this account
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Show a workflow and its artifact as JSON
    Show {
        /// Workflow ID
        id: String,
    },
    /// Replace the artifact with an edited JSON document
    Replace {
        /// Workflow ID
        id: String,
        /// JSON file holding the edited calendar
        #[arg(short, long)]
        file: PathBuf,
        /// Who made the edit
        #[arg(short, long)]
        editor: Option<String>,
    },
    /// Approve a workflow
    Approve {
        /// Workflow ID
        id: String,
        /// Reviewer identity
        #[arg(short, long)]
        reviewer: String,
    },
    /// Resume an approved workflow and generate briefs
    Resume {
        /// Workflow ID
        id: String,
    },
    /// Return workflows stuck mid-resume to pending review
    Recover {
        /// Workflow ID; all stale workflows when omitted
        id: Option<String>,
        /// Only recover records untouched for this many seconds
        #[arg(long, default_value_t = 900)]
        stale_after_secs: i64,
    },
    /// Delete a workflow record
    Delete {
        /// Workflow ID
        id: String,
    },
    /// Delete records older than the given number of days
    Purge {
        #[arg(long)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let components = PipelineComponents::from_config(&config).await?;
    let workers = components.workers.clone();
    let reaper = workers
        .as_ref()
        .map(|pool| pool.spawn_reaper(Duration::from_millis(config.worker.idle_timeout_ms.max(1000) / 2)));

    let orchestrator = Arc::new(
        WorkflowOrchestrator::new(components)
            .with_retry(config.retry.clone())
            .with_require_approval(config.review.require_approval),
    );

    let result = dispatch(cli.command, orchestrator).await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    if let Some(pool) = workers {
        pool.shutdown().await;
    }
    result
}

async fn dispatch(command: Commands, orchestrator: Arc<WorkflowOrchestrator>) -> anyhow::Result<()> {
    match command {
        Commands::Run { account, start, end } => {
            let range = DateRange::new(start, end)?;
            match orchestrator.run(&account, range).await {
                WorkflowOutcome::PendingReview(record) => {
                    println!("{}", "✓ Calendar ready for review".green().bold());
                    println!("  ID: {}", record.workflow_id);
                    println!("  Items: {}", record.stage2_output.len());
                    for (category, count) in record.stage2_output.count_by_category() {
                        println!("    {:<6} {}", category, count);
                    }
                    print_advisories(&record.advisories);
                    Ok(())
                }
                WorkflowOutcome::Failed(failure) => {
                    eprintln!("{}", "✗ Workflow failed".red().bold());
                    eprintln!("  State: {}", failure.state);
                    eprintln!("  Kind: {}", failure.kind());
                    eprintln!("  Error: {}", failure.error);
                    print_advisories(&failure.advisories);
                    bail!("workflow {} failed in {}", failure.workflow_id, failure.state)
                }
            }
        }
        Commands::Accounts => {
            let accounts = orchestrator.components().registry.accounts();
            if accounts.is_empty() {
                println!("{}", "No accounts configured".yellow());
                return Ok(());
            }
            println!("{:<24} {:<24} {:<30} {}", "Alias", "Platform ID", "Name", "Minimums");
            println!("{}", "-".repeat(100));
            for account in accounts {
                let minimums: Vec<String> = account
                    .minimum_requirements
                    .iter()
                    .map(|(category, count)| format!("{}={}", category, count))
                    .collect();
                println!(
                    "{:<24} {:<24} {:<30} {}",
                    account.alias,
                    account.platform_account_id,
                    account.name(),
                    minimums.join(", ")
                );
            }
            Ok(())
        }
        Commands::Review(command) => review(command, ReviewService::new(orchestrator)).await,
    }
}

async fn review(command: ReviewCommands, service: ReviewService) -> anyhow::Result<()> {
    match command {
        ReviewCommands::List { account } => {
            let records = service.list_pending(account.as_deref()).await?;
            if records.is_empty() {
                println!("{}", "No workflows waiting for review".yellow());
                return Ok(());
            }
            println!("{:<56} {:<10} {:<6} {}", "ID", "Approved", "Items", "Created");
            println!("{}", "-".repeat(100));
            for record in records {
                println!(
                    "{:<56} {:<10} {:<6} {}",
                    record.workflow_id,
                    if record.review.is_approved() { "yes" } else { "no" },
                    record.stage2_output.len(),
                    record.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        ReviewCommands::Show { id } => {
            let record = service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        ReviewCommands::Replace { id, file, editor } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let document: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;
            let record = service.replace_artifact(&id, document, editor.as_deref()).await?;
            println!("{}", "✓ Artifact replaced".green().bold());
            println!("  Items: {}", record.stage2_output.len());
            println!("  Edits: {}", record.review.edit_history.len());
            Ok(())
        }
        ReviewCommands::Approve { id, reviewer } => {
            let record = service.approve(&id, &reviewer).await?;
            println!("{}", "✓ Workflow approved".green().bold());
            if let (Some(reviewer), Some(at)) = (&record.review.reviewer_id, record.review.approved_at) {
                println!("  By: {} at {}", reviewer, at.to_rfc3339());
            }
            Ok(())
        }
        ReviewCommands::Resume { id } => match service.resume(&id).await {
            Ok(record) => {
                println!("{}", "✓ Workflow completed".green().bold());
                if let Some(briefs) = &record.stage3_output {
                    println!("\n{}", briefs);
                }
                print_advisories(&record.advisories);
                Ok(())
            }
            Err(e) => {
                eprintln!("{} [{}] {}", "✗ Resume failed".red().bold(), e.code(), e);
                Err(e.into())
            }
        },
        ReviewCommands::Recover { id, stale_after_secs } => {
            let stale_after = chrono::Duration::seconds(stale_after_secs);
            let recovered = match id {
                Some(id) => vec![service.recover(&id, stale_after).await?],
                None => service.recover_stale(stale_after).await?,
            };
            println!("Recovered {} workflow(s)", recovered.len());
            for record in &recovered {
                let approval = if record.review.is_approved() { "approved" } else { "not approved" };
                println!("  {} ({})", record.workflow_id, approval);
            }
            Ok(())
        }
        ReviewCommands::Delete { id } => {
            service.delete(&id).await?;
            println!("{}", "✓ Workflow deleted".green().bold());
            Ok(())
        }
        ReviewCommands::Purge { older_than_days } => {
            let removed = service
                .purge_older_than(chrono::Duration::days(older_than_days))
                .await?;
            println!("Removed {} workflow record(s)", removed);
            Ok(())
        }
    }
}

fn print_advisories(advisories: &[String]) {
    if advisories.is_empty() {
        return;
    }
    println!("  Advisories:");
    for advisory in advisories {
        println!("    {} {}", "⚠".yellow(), advisory);
    }
}
