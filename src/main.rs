//! outreach - scheduler and compliance engine for social outreach campaigns.
//!
//! Usage:
//!   outreach run <config> [--jobs DIR]        Run the scheduler
//!   outreach validate <config> [--jobs DIR]   Validate configuration without running
//!   outreach list <config> --jobs DIR         List job files
//!   outreach stats <config> <job-id>          Show persisted statistics for a job
//!   outreach check <config> <platform> <msg>  Review a message against the compliance rules

use clap::{Parser, Subcommand};
use outreach::config::build_dry_run_platforms;
use outreach::{
    ConfigError, Event, EventBus, EventHandler, GlobalConfig, InMemoryStorage, LoadedJob,
    Platform, Scheduler, SchedulerError, SkipReason, Storage, StorageConfig, Verdict, YamlLoader,
    build_scheduler, load_jobs_from_directory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// outreach - scheduler and compliance engine for social outreach campaigns
#[derive(Parser)]
#[command(name = "outreach")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run {
        /// Path to the global configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory containing job YAML files
        #[arg(short = 'j', long, value_name = "DIR")]
        jobs: Option<PathBuf>,

        /// Override the tick interval in seconds
        #[arg(long)]
        tick_interval: Option<u64>,
    },

    /// Validate configuration without running
    Validate {
        /// Path to the global configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory containing job YAML files
        #[arg(short = 'j', long, value_name = "DIR")]
        jobs: Option<PathBuf>,
    },

    /// List the jobs in a directory
    List {
        /// Path to the global configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory containing job YAML files
        #[arg(short = 'j', long, value_name = "DIR")]
        jobs: PathBuf,
    },

    /// Show persisted statistics and recent activity for a job
    Stats {
        /// Path to the global configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Job ID
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Number of audit entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Review a message against a platform's compliance rules
    Check {
        /// Path to the global configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Platform (reddit, twitter)
        #[arg(value_name = "PLATFORM")]
        platform: String,

        /// Message text
        #[arg(value_name = "MESSAGE")]
        message: String,
    },
}

/// Logging event handler that reports job activity.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::CycleStarted {
                job_id,
                run_id,
                keywords,
                ..
            } => {
                info!("Job '{}' searching \"{}\" (run: {})", job_id, keywords, run_id);
            }
            Event::DiscoveryFailed {
                job_id,
                error,
                fatal,
                retry_after,
                ..
            } => {
                if *fatal {
                    error!("Job '{}' discovery failed: {}", job_id, error);
                } else {
                    let retry = retry_after
                        .map(|t| format!(", retrying after {}", t.format("%H:%M:%S")))
                        .unwrap_or_default();
                    warn!("Job '{}' discovery failed: {}{}", job_id, error, retry);
                }
            }
            Event::MessageDelivered {
                job_id,
                candidate_id,
                ..
            } => {
                info!("  Job '{}' messaged {}", job_id, candidate_id);
            }
            Event::DeliveryFailed {
                job_id,
                candidate_id,
                reason,
                ..
            } => {
                warn!("  Job '{}' failed to message {}: {}", job_id, candidate_id, reason);
            }
            Event::CandidateSkipped {
                job_id,
                candidate_id,
                reason,
                detail,
                ..
            } => {
                let kind = match reason {
                    SkipReason::Render => "render",
                    SkipReason::Compliance => "compliance",
                };
                warn!(
                    "  Job '{}' skipped {} ({}): {}",
                    job_id, candidate_id, kind, detail
                );
            }
            Event::QuotaExhausted {
                job_id,
                daily_limit,
                ..
            } => {
                info!("Job '{}' reached its daily limit of {}", job_id, daily_limit);
            }
            Event::StatusChanged {
                job_id,
                from,
                to,
                reason,
                ..
            } => {
                let reason = reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default();
                info!("Job '{}' {} -> {}{}", job_id, from, to, reason);
            }
            Event::InvariantViolation { job_id, detail, .. } => {
                error!("Job '{}' refused change: {}", job_id, detail);
            }
            Event::CycleCompleted {
                job_id,
                delivered,
                failed,
                skipped,
                duration,
                ..
            } => {
                info!(
                    "Job '{}' cycle done in {:?}: {} sent, {} failed, {} skipped",
                    job_id, duration, delivered, failed, skipped
                );
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> CliResult {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            jobs,
            tick_interval,
        } => {
            let mut global = YamlLoader::load_global_config(&config)?;
            match tick_interval {
                Some(0) => return Err("tick interval must be at least one second".into()),
                Some(secs) => global.tick_interval_secs = secs,
                None => {}
            }
            run_scheduler(global, jobs).await?;
        }
        Commands::Validate { config, jobs } => {
            validate(&config, jobs.as_deref())?;
        }
        Commands::List { config, jobs } => {
            list_jobs(&config, &jobs)?;
        }
        Commands::Stats {
            config,
            job_id,
            limit,
        } => {
            show_stats(&config, job_id, limit).await?;
        }
        Commands::Check {
            config,
            platform,
            message,
        } => {
            check_message(&config, &platform, &message)?;
        }
    }

    Ok(())
}

fn load_jobs(dir: Option<&Path>, global: &GlobalConfig) -> Result<Vec<LoadedJob>, ConfigError> {
    match dir {
        Some(dir) => load_jobs_from_directory(dir, global),
        None => Ok(Vec::new()),
    }
}

/// Run the scheduler on the configured storage backend.
async fn run_scheduler(global: GlobalConfig, jobs_dir: Option<PathBuf>) -> CliResult {
    let jobs = load_jobs(jobs_dir.as_deref(), &global)?;

    match global.storage.clone() {
        StorageConfig::Memory => {
            run_with_storage(global, jobs, Arc::new(InMemoryStorage::new())).await
        }
        StorageConfig::Sqlite { path } => {
            let storage = open_sqlite(&path).await?;
            run_with_storage(global, jobs, storage).await
        }
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(path: &str) -> CliResult<Arc<outreach::SqliteStorage>> {
    info!("Opening database: {}", path);
    Ok(Arc::new(outreach::SqliteStorage::new(path).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(path: &str) -> CliResult<Arc<InMemoryStorage>> {
    Err(format!("sqlite storage '{}' requested but the sqlite feature is disabled", path).into())
}

async fn run_with_storage<S: Storage + 'static>(
    global: GlobalConfig,
    jobs: Vec<LoadedJob>,
    storage: Arc<S>,
) -> CliResult {
    let event_bus = EventBus::new().with_handler(Arc::new(LoggingHandler));
    let scheduler = build_scheduler(&global, storage, build_dry_run_platforms(&global))
        .with_event_bus(event_bus);

    let recovered = scheduler.recover().await?;
    if !recovered.is_empty() {
        info!("Recovered {} job(s) from storage", recovered.len());
    }

    info!(
        "Starting scheduler (tick interval: {}s)...",
        global.tick_interval_secs
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task) = scheduler.start().await;

    for job in jobs {
        let id = job.spec.id.clone();
        match handle.create_job(job.spec).await {
            Ok(stats) => info!(
                "  - {} on {} (limit {}/day)",
                stats.job_id, stats.platform, stats.daily_limit
            ),
            Err(SchedulerError::JobExists(_)) => {
                info!("  - {} already known, keeping stored state", id);
                continue;
            }
            Err(e) => {
                error!("Job '{}' was not created: {}", id, e);
                continue;
            }
        }
        if !job.enabled {
            handle.pause_job(id).await?;
        }
    }

    handle.tick_now().await?;

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate configuration without running.
fn validate(config: &Path, jobs_dir: Option<&Path>) -> CliResult {
    info!("Validating configuration: {}", config.display());

    let result = YamlLoader::load_global_config(config).and_then(|global| {
        let jobs = load_jobs(jobs_dir, &global)?;
        Ok((global, jobs))
    });

    match result {
        Ok((global, jobs)) => {
            info!(
                "Configuration is valid (tick {}s, storage {:?})",
                global.tick_interval_secs, global.storage
            );
            for job in &jobs {
                info!("  - {} ({}): OK", job.spec.id, job.spec.platform);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all jobs in the directory.
fn list_jobs(config: &Path, jobs_dir: &Path) -> CliResult {
    let global = YamlLoader::load_global_config(config)?;
    let jobs = load_jobs_from_directory(jobs_dir, &global)?;

    if jobs.is_empty() {
        println!("No jobs found in {}", jobs_dir.display());
        return Ok(());
    }

    println!("Jobs in {}:", jobs_dir.display());
    println!();

    for job in &jobs {
        let spec = &job.spec;
        println!("ID: {}", spec.id);
        println!("  Campaign: {}", spec.campaign_id);
        println!("  Platform: {}", spec.platform);
        println!("  Enabled: {}", job.enabled);
        println!("  Keywords: {}", spec.search_keywords);
        println!("  Daily limit: {}", spec.effective_daily_limit());
        if let Some(user) = &spec.user_id {
            println!("  User: {}", user);
        }
        println!();
    }

    Ok(())
}

/// Print persisted statistics for a job.
async fn show_stats(config: &Path, job_id: String, limit: usize) -> CliResult {
    let global = YamlLoader::load_global_config(config)?;
    match global.storage.clone() {
        StorageConfig::Memory => Err("stats needs persistent storage; configure sqlite".into()),
        StorageConfig::Sqlite { path } => {
            let storage = open_sqlite(&path).await?;
            print_stats(&global, storage, job_id, limit).await
        }
    }
}

async fn print_stats<S: Storage + 'static>(
    global: &GlobalConfig,
    storage: Arc<S>,
    job_id: String,
    limit: usize,
) -> CliResult {
    let scheduler = Scheduler::with_storage(storage, build_dry_run_platforms(global))
        .with_tick_interval(Duration::from_secs(86_400));
    scheduler.recover().await?;
    let (handle, _task) = scheduler.start().await;

    let stats = handle.job_stats(job_id.as_str()).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let entries = handle.audit_log(job_id.as_str(), limit).await?;
    if !entries.is_empty() {
        println!();
        println!("Recent activity:");
        for entry in entries {
            let candidate = entry
                .candidate_id
                .map(|c| format!(" [{}]", c))
                .unwrap_or_default();
            println!(
                "  {} {}{}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.kind,
                candidate,
                entry.detail
            );
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Review a message against the configured compliance rules.
fn check_message(config: &Path, platform: &str, message: &str) -> CliResult {
    let global = YamlLoader::load_global_config(config)?;
    let platform: Platform = platform.parse()?;
    let gate = outreach::config::build_gate(&global);

    let verdict = gate.review(platform, message);
    println!("{}: {}", platform, verdict.label());
    for reason in verdict.reasons() {
        println!("  - {}", reason);
    }

    match verdict {
        Verdict::Fail(_) => Err("message rejected".into()),
        _ => Ok(()),
    }
}
