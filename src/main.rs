// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rangedl::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Resumable, multi-connection HTTP downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a URL.
    Get {
        url: String,

        /// Output file, or a directory to save into.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of concurrent connections.
        #[arg(short = 't', long)]
        threads: Option<usize>,
    },
    /// Continue a paused or interrupted download.
    Resume { id: String },
    /// Show download history.
    List,
    /// Forget a download, stopping it and removing its chunk index.
    Remove {
        id: String,

        /// Also delete the downloaded file.
        #[arg(long)]
        delete_file: bool,
    },
}

/// Prints a progress line whenever the whole percentage changes.
#[derive(Default)]
struct ConsoleProgress {
    last_percent: AtomicU64,
}

impl ProgressListener for ConsoleProgress {
    fn on_progress(&self, downloaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = downloaded.min(total) * 100 / total;
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            eprint!("\r{:>3}%  {} / {} bytes", percent, downloaded, total);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = EngineConfig::load_or_init(&config_path)
        .await
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let store = TaskStore::open(&history_path()?).await.context("opening download history")?;
    let engine = Arc::new(DownloadEngine::new(config.clone())?.with_listener(Arc::new(ConsoleProgress::default())));

    match cli.command {
        Command::Get { url, output, threads } => {
            let save_path = output.unwrap_or_else(|| config.download_dir.clone());
            let threads = config.effective_threads(threads.unwrap_or(0));
            let task = TaskDescriptor::new(url, save_path, threads);
            store.save(&task).await?;
            info!(task = %task.id, "added download");
            run_task(&engine, &store, task.into_shared()).await
        }
        Command::Resume { id } => {
            let Some(task) = store.get(&id).await? else {
                bail!("no download with id {}", id);
            };
            if matches!(task.status, TaskStatus::Completed | TaskStatus::Canceled) {
                bail!("download {} is {:?} and cannot be resumed", id, task.status);
            }
            run_task(&engine, &store, task.into_shared()).await
        }
        Command::List => {
            for task in store.list().await? {
                println!(
                    "{:<24} {:<11} {:>3}%  {:>12}  {}",
                    task.id,
                    format!("{:?}", task.status),
                    task.progress_percent(),
                    task.file_size,
                    task.file_name.as_deref().unwrap_or(&task.url)
                );
            }
            Ok(())
        }
        Command::Remove { id, delete_file } => {
            let Some(task) = store.get(&id).await? else {
                bail!("no download with id {}", id);
            };
            engine.cancel_session(&task.into_shared(), delete_file).await?;
            store.delete(&id).await?;
            println!("removed {}", id);
            Ok(())
        }
    }
}

/// Runs a session for `task`, saving it to the history every few seconds.
/// Ctrl-C pauses the download.
async fn run_task(engine: &Arc<DownloadEngine>, store: &TaskStore, task: SharedTask) -> Result<()> {
    let mut session = engine.spawn_session(task.clone());
    let mut save_tick = tokio::time::interval(Duration::from_secs(5));
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            joined = &mut session => break joined.context("download session panicked")?,
            _ = save_tick.tick() => {
                let snapshot = task.lock().await.clone();
                if let Err(e) = store.save(&snapshot).await {
                    warn!(task = %snapshot.id, error = %e, "periodic save failed");
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!();
                info!("interrupted, pausing");
                engine.pause_session(&task).await;
            }
        }
    };
    eprintln!();

    let snapshot = task.lock().await.clone();
    store.save(&snapshot).await?;

    match result? {
        SessionOutcome::Completed => {
            println!("{} completed", snapshot.file_name.as_deref().unwrap_or(&snapshot.url));
        }
        SessionOutcome::Paused => {
            println!("paused at {}%, resume with: rangedl resume {}", snapshot.progress_percent(), snapshot.id);
        }
        SessionOutcome::Incomplete { remaining_chunks, .. } => {
            println!(
                "{} chunks could not be fetched, resume with: rangedl resume {}",
                remaining_chunks, snapshot.id
            );
        }
        SessionOutcome::Canceled => println!("canceled"),
        SessionOutcome::AlreadyRunning => println!("{} is already downloading", snapshot.id),
    }
    Ok(())
}

fn history_path() -> Result<PathBuf> {
    let dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("rangedl");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("history.db"))
}
