use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{json, Value};
use tasksync_core::activity::ActivityLog;
use tasksync_core::clock::{Clock, SystemClock};
use tasksync_core::config::{self, TaskSyncConfig};
use tasksync_core::detector::ChangeDetector;
use tasksync_core::document::{DocumentStore, FsDocumentStore};
use tasksync_core::http::HttpTaskClient;
use tasksync_core::ids::IdNormalizer;
use tasksync_core::journal::backup::BackupCategory;
use tasksync_core::journal::Journal;
use tasksync_core::lines::MarkdownLines;
use tasksync_core::remote::{
    CompletedPage, RemoteError, RemoteProject, RemoteTask, RemoteTaskClient,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tasksync", version, about = "Reconcile task completion between notes and a task service")]
struct Cli {
    /// Vault root (defaults to the current directory)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation cycle, or keep running with --watch
    Sync {
        #[arg(long)]
        watch: bool,
    },
    /// Track every linked task the journal is missing
    Heal {
        #[arg(long)]
        force: bool,
    },
    /// Journal summary and statistics
    Stats,
    /// Inspect or prune tombstones
    Tombstones {
        #[command(subcommand)]
        command: TombstoneCommand,
    },
    /// Journal backups
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Empty the journal (a reset backup is kept)
    Reset,
    /// Recent activity log entries
    Activity {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show the resolved configuration, or write a default one
    Config {
        #[arg(long)]
        init: bool,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum TombstoneCommand {
    List,
    Cleanup {
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    Create,
    List,
    Restore { path: PathBuf },
}

/// Stand-in client for commands that never need the network. Any call
/// (e.g. an id migration on load) fails instead of silently succeeding.
struct OfflineClient;

impl OfflineClient {
    fn error() -> RemoteError {
        RemoteError::Network("no API token configured".to_string())
    }
}

#[async_trait]
impl RemoteTaskClient for OfflineClient {
    async fn get_task(&self, _id: &str) -> Result<RemoteTask, RemoteError> {
        Err(Self::error())
    }

    async fn get_active_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        Err(Self::error())
    }

    async fn list_projects(&self) -> Result<Vec<RemoteProject>, RemoteError> {
        Err(Self::error())
    }

    async fn completed_tasks_page(
        &self,
        _project_id: &str,
        _cursor: Option<&str>,
    ) -> Result<CompletedPage, RemoteError> {
        Err(Self::error())
    }

    async fn map_legacy_ids(
        &self,
        _ids: &[String],
    ) -> Result<HashMap<String, String>, RemoteError> {
        Err(Self::error())
    }
}

struct Session {
    journal: Journal,
    detector: ChangeDetector,
}

/// Opens the journal and loads it. With `recovering`, a journal that fails
/// to load is still handed back so backups can be listed or restored.
async fn open_session(
    vault: &Path,
    config: &TaskSyncConfig,
    online: bool,
    recovering: bool,
) -> Result<Session> {
    let state_dir = config::state_dir(vault, config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client: Arc<dyn RemoteTaskClient> = if online {
        Arc::new(HttpTaskClient::from_config(&config.remote).context("remote client")?)
    } else {
        Arc::new(OfflineClient)
    };
    let documents: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(vault));

    let mut journal = Journal::open(&state_dir, config.journal.clone(), clock.clone())
        .with_context(|| format!("open journal in {}", state_dir.display()))?;
    let mut detector = ChangeDetector::new(
        config.clone(),
        documents,
        Arc::new(MarkdownLines),
        client,
        IdNormalizer::open(&state_dir),
        clock,
    )
    .with_activity_log(ActivityLog::new(&state_dir));
    match detector.load_journal(&mut journal).await {
        Ok(report) => tracing::debug!(?report, "journal ready"),
        Err(err) if recovering => {
            tracing::warn!(error = %err, "journal did not load; continuing with recovery command");
        }
        Err(err) => return Err(err).context("load journal"),
    }
    Ok(Session { journal, detector })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let vault = match cli.vault {
        Some(vault) => vault,
        None => std::env::current_dir().context("current directory")?,
    };

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Command::Version => {
            println!("tasksync {}", tasksync_core::version());
            Ok(())
        }
        Command::Config { init } => {
            let (config, source) = config::resolve_config_with_source(&vault);
            if init {
                let path = config::write_config(&vault, &config)?;
                return print_json(&json!({"written": path}));
            }
            print_json(&json!({"source": source.as_str(), "config": config}))
        }
        command => run(command, &vault).await,
    }
}

async fn run(command: Command, vault: &Path) -> Result<()> {
    let config = config::resolve_config(vault);
    let online = matches!(command, Command::Sync { .. } | Command::Heal { .. });
    let recovering = matches!(
        command,
        Command::Reset
            | Command::Backup {
                command: BackupCommand::List | BackupCommand::Restore { .. }
            }
    );
    let Session {
        mut journal,
        mut detector,
    } = open_session(vault, &config, online, recovering).await?;

    match command {
        Command::Sync { watch } => loop {
            let changes = detector.detect_changes(&mut journal).await?;
            print_json(&json!(changes))?;
            if !watch {
                return Ok(());
            }
            let pause = config.sync.interval_secs.max(1) as u64;
            tokio::time::sleep(Duration::from_secs(pause)).await;
        },
        Command::Heal { force } => {
            let report = detector.heal_journal(&mut journal, force).await?;
            print_json(&json!(report))
        }
        Command::Stats => print_json(&json!(journal.summary())),
        Command::Tombstones { command } => match command {
            TombstoneCommand::List => {
                let tombstones: Vec<Value> = journal
                    .tombstones()
                    .map(|(id, tombstone)| json!({"id": id, "tombstone": tombstone}))
                    .collect();
                print_json(&json!(tombstones))
            }
            TombstoneCommand::Cleanup { older_than_days } => {
                let removed =
                    journal.cleanup_tombstones(chrono::Duration::days(older_than_days));
                journal.flush()?;
                print_json(&json!({"removed": removed}))
            }
        },
        Command::Backup { command } => match command {
            BackupCommand::Create => {
                let path = journal.create_backup(BackupCategory::Manual)?;
                print_json(&json!({"backup": path}))
            }
            BackupCommand::List => print_json(&json!(journal.list_backups()?)),
            BackupCommand::Restore { path } => {
                let tasks = journal
                    .restore_from_backup(&path)
                    .with_context(|| format!("restore {}", path.display()))?;
                print_json(&json!({"restored_tasks": tasks}))
            }
        },
        Command::Reset => {
            let backup = journal.reset()?;
            print_json(&json!({"reset": true, "backup": backup}))
        }
        Command::Activity { limit } => {
            let log = ActivityLog::new(journal.state_dir());
            let events = log.read_events()?;
            let skip = events.len().saturating_sub(limit);
            print_json(&json!(events.into_iter().skip(skip).collect::<Vec<_>>()))
        }
        Command::Version | Command::Config { .. } => Ok(()),
    }
}
