// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Command-line interface
//!
//! Thin wiring over the library: builds the handles (config, store, event
//! bus, cache, scheduler) at startup and calls the documented operations.
//! Exit code 0 on success, 1 on error.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use hf_suite::api::{HubProviderFactory, ResponseCache};
use hf_suite::config::Config;
use hf_suite::download::{ResumeStore, Scheduler};
use hf_suite::events::{topic, EventBus};
use hf_suite::paths::{format_bytes, AppPaths};
use hf_suite::scan::ModelScanner;
use hf_suite::logging;
use hf_suite::storage::{Database, NewTask, Platform, RepoType, Store, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hf-suite", version, about = "Model repository download orchestrator")]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Huggingface,
    Modelscope,
}

impl From<PlatformArg> for Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::Huggingface => Platform::Huggingface,
            PlatformArg::Modelscope => Platform::Modelscope,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RepoTypeArg {
    Model,
    Dataset,
}

impl From<RepoTypeArg> for RepoType {
    fn from(value: RepoTypeArg) -> Self {
        match value {
            RepoTypeArg::Model => RepoType::Model,
            RepoTypeArg::Dataset => RepoType::Dataset,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ListTarget {
    History,
    Local,
    Queue,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a repository download
    Download {
        /// Repository id (owner/name)
        repo_id: String,
        #[arg(short, long, value_enum, default_value = "huggingface")]
        platform: PlatformArg,
        #[arg(short = 't', long = "type", value_enum, default_value = "model")]
        repo_type: RepoTypeArg,
        /// Output directory (defaults to the configured save path)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Priority 1-10, lower is higher
        #[arg(long, default_value_t = 5)]
        priority: u8,
        /// Block until the download finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// List history, local models, or the queue
    List {
        #[arg(value_enum)]
        what: ListTarget,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Scan directories for local model files
    Scan {
        /// Paths to scan (defaults to the HuggingFace hub cache)
        paths: Vec<PathBuf>,
        /// Hash files to enable duplicate detection (slow on large files)
        #[arg(long)]
        hash: bool,
    },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set a value, e.g. --key download.max_workers --value 4
    Set {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Reset the configuration to defaults
    Reset,
}

struct App {
    paths: AppPaths,
    config: Config,
    store: Store,
    events: Arc<EventBus>,
}

impl App {
    async fn bootstrap() -> anyhow::Result<Self> {
        let paths = AppPaths::default_location();
        let config = Config::load(&paths.config_file()).context("failed to load configuration")?;
        let db = Database::open(paths.database_file())
            .await
            .context("failed to open database")?;

        Ok(Self {
            paths,
            config,
            store: Store::new(db),
            events: Arc::new(EventBus::new()),
        })
    }

    fn scheduler(&self) -> Arc<Scheduler> {
        let cache = Arc::new(ResponseCache::new(self.paths.cache_dir()));
        let factory = Arc::new(HubProviderFactory::new(
            self.config.clone(),
            self.store.clone(),
            cache,
        ));
        Scheduler::new(
            self.store.clone(),
            Arc::clone(&self.events),
            ResumeStore::new(self.paths.resume_state_dir()),
            &self.config,
            factory,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_stderr();
    } else {
        let paths = AppPaths::default_location();
        if logging::init_file(&paths.log_dir()).is_err() {
            logging::init_stderr();
        }
    }

    match cli.command {
        Command::Download {
            repo_id,
            platform,
            repo_type,
            output,
            priority,
            wait,
        } => cmd_download(repo_id, platform.into(), repo_type.into(), output, priority, wait).await,
        Command::List { what, limit } => cmd_list(what, limit).await,
        Command::Scan { paths, hash } => cmd_scan(paths, hash).await,
        Command::Config { action } => cmd_config(action).await,
    }
}

async fn cmd_download(
    repo_id: String,
    platform: Platform,
    repo_type: RepoType,
    output: Option<PathBuf>,
    priority: u8,
    wait: bool,
) -> anyhow::Result<()> {
    let mut app = App::bootstrap().await?;

    let save_path = output
        .map(|p| p.display().to_string())
        .or_else(|| {
            let configured = app.config.paths.default_save_path.clone();
            (!configured.is_empty()).then_some(configured)
        })
        .unwrap_or_else(|| ".".to_string());

    let scheduler = app.scheduler();
    let task_id = scheduler
        .add(NewTask::new(&repo_id, &save_path, platform, repo_type).with_priority(priority))
        .await?;

    app.config.add_recent_repo(&repo_id);
    let _ = app.config.save(&app.paths.config_file());

    println!("Queued {repo_id} ({}) as task {task_id}", platform.as_str());
    println!("Save path: {save_path}");

    if !wait {
        return Ok(());
    }

    // Progress to stdout while we wait for a terminal status.
    app.events.subscribe(
        topic::DOWNLOAD_PROGRESS,
        Arc::new(|payload| {
            let downloaded = payload["downloaded_bytes"].as_u64().unwrap_or(0);
            let total = payload["total_bytes"].as_u64().unwrap_or(0);
            let speed = payload["speed_bps"].as_f64().unwrap_or(0.0) as u64;
            if total > 0 {
                let percent = downloaded as f64 / total as f64 * 100.0;
                println!(
                    "  {percent:5.1}%  {} / {}  {}/s",
                    format_bytes(downloaded),
                    format_bytes(total),
                    format_bytes(speed)
                );
            } else {
                println!("  {}  {}/s", format_bytes(downloaded), format_bytes(speed));
            }
        }),
    );

    scheduler.start().await?;

    let final_status = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let task = app
            .store
            .get_task(task_id)
            .await?
            .context("task disappeared from the store")?;
        if task.is_terminal() {
            break task;
        }
    };

    scheduler.stop().await;

    match final_status.status {
        TaskStatus::Completed => {
            println!("Completed: {}", repo_id);
            Ok(())
        }
        TaskStatus::Cancelled => bail!("download was cancelled"),
        _ => bail!(
            "download failed: {}",
            final_status
                .error_message
                .unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

async fn cmd_list(what: ListTarget, limit: usize) -> anyhow::Result<()> {
    let app = App::bootstrap().await?;

    match what {
        ListTarget::History => {
            let history = app.store.get_history(limit, false).await?;
            if history.is_empty() {
                println!("No download history.");
                return Ok(());
            }
            println!("Download history ({} entries):", history.len());
            for entry in history {
                let favorite = if entry.is_favorite { "*" } else { " " };
                println!(
                    "{favorite} {:<40} {:<12} {}",
                    entry.repo_id,
                    entry.platform.as_str(),
                    format_bytes(entry.total_bytes)
                );
            }
        }
        ListTarget::Local => {
            let models = app.store.get_local_models(None).await?;
            if models.is_empty() {
                println!("No local models recorded. Run 'hf-suite scan' first.");
                return Ok(());
            }
            println!("Local models ({} files):", models.len());
            for model in models.into_iter().take(limit) {
                println!(
                    "  {:<44} {:>10}  {}",
                    model.file_name,
                    format_bytes(model.file_size),
                    model.model_type.as_deref().unwrap_or("-")
                );
            }
        }
        ListTarget::Queue => {
            let pending = app.store.get_pending().await?;
            if pending.is_empty() {
                println!("Download queue is empty.");
                return Ok(());
            }
            println!("Download queue ({} items):", pending.len());
            for task in pending.into_iter().take(limit) {
                println!(
                    "  [{}] {:<40} {}",
                    task.priority,
                    task.repo_id,
                    task.status.as_str()
                );
            }
        }
    }

    Ok(())
}

async fn cmd_scan(paths: Vec<PathBuf>, hash: bool) -> anyhow::Result<()> {
    let app = App::bootstrap().await?;

    let paths = if paths.is_empty() {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        vec![PathBuf::from(home).join(".cache/huggingface/hub")]
    } else {
        paths
    };

    println!("Scanning {} path(s)...", paths.len());
    let mut scanner = ModelScanner::new(app.store.clone());
    if hash {
        scanner = scanner.with_hashes();
    }

    let results = scanner.scan_paths(&paths).await?;
    println!(
        "Found {} model files ({} recorded, {} paths skipped).",
        results.files_found, results.files_recorded, results.paths_skipped
    );
    Ok(())
}

async fn cmd_config(action: ConfigAction) -> anyhow::Result<()> {
    let paths = AppPaths::default_location();

    match action {
        ConfigAction::Show => {
            let config = Config::load(&paths.config_file())?;
            println!("Configuration ({}):", paths.config_file().display());
            println!("  default_save_path: {}", config.paths.default_save_path);
            println!("  comfy_root:        {}", config.paths.comfy_root);
            println!("  max_workers:       {}", config.download.max_workers);
            println!("  auto_retry:        {}", config.download.auto_retry);
            println!("  max_retries:       {}", config.download.max_retries);
            println!("  verify_checksums:  {}", config.download.verify_checksums);
            println!("  hf_endpoint:       {}", config.network.hf_endpoint);
            println!("  use_hf_mirror:     {}", config.network.use_hf_mirror);
        }
        ConfigAction::Set { key, value } => {
            let config = Config::load(&paths.config_file())?;

            // Apply the dotted key to the JSON form, then round-trip so the
            // usual clamping runs.
            let mut doc = serde_json::to_value(&config)?;
            let mut cursor = &mut doc;
            let segments: Vec<&str> = key.split('.').collect();
            for segment in &segments[..segments.len() - 1] {
                cursor = cursor
                    .get_mut(*segment)
                    .with_context(|| format!("unknown config section '{segment}'"))?;
            }
            let leaf = segments.last().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value.clone()));
            cursor
                .as_object_mut()
                .with_context(|| format!("'{key}' does not name a settable field"))?
                .insert(leaf.to_string(), parsed);

            let mut updated: Config = serde_json::from_value(doc)?;
            updated.clamp();
            updated.save(&paths.config_file())?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save(&paths.config_file())?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}
