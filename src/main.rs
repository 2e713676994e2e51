// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use odm_queue::logging::init_tracing;
use odm_queue::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Download files one after another into a local directory.
#[derive(Debug, Parser)]
#[command(name = "odm-queue", version)]
struct Cli {
    /// TOML config file.
    #[arg(short, long, default_value = "odm-queue.toml")]
    config: PathBuf,

    /// Override the download root from the config.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Seconds between progress lines, 0 to disable.
    #[arg(long, default_value_t = 2)]
    progress_interval: u64,

    /// Downloads as URL=DESTINATION, destination relative to the root.
    #[arg(required = true, value_parser = parse_request)]
    downloads: Vec<(String, PathBuf)>,
}

fn parse_request(raw: &str) -> Result<(String, PathBuf), String> {
    let (url, dest) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected URL=DESTINATION, got {raw:?}"))?;
    if url.is_empty() || dest.is_empty() {
        return Err(format!("expected URL=DESTINATION, got {raw:?}"));
    }
    Ok((url.to_string(), PathBuf::from(dest)))
}

/// Prints queue events and forwards completions to `main`.
struct ConsoleListener {
    completed: mpsc::UnboundedSender<(PathBuf, bool)>,
}

impl DownloadListener for ConsoleListener {
    fn on_download_added(&self, destination: &Path, progress: TransferProgress) {
        match progress.fraction() {
            Some(f) => println!("[queued] {} ({:.1}%)", destination.display(), f * 100.0),
            None => println!("[queued] {}", destination.display()),
        }
    }

    fn on_download_complete(&self, destination: &Path, success: bool) {
        let label = if success { "done" } else { "FAILED" };
        println!("[{label}] {}", destination.display());
        let _ = self.completed.send((destination.to_path_buf(), success));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ManagerConfig::load_or_default(&cli.config);
    if let Some(root) = cli.root {
        config.download_root = root;
    }
    init_tracing(&config.log);

    let manager = Arc::new(DownloadManager::with_http(config).context("building HTTP client")?);
    manager.initialise()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn DownloadListener> = Arc::new(ConsoleListener { completed: tx });
    manager.add_listener(listener.clone())?;
    manager.enumerate(listener.as_ref())?;

    let mut pending = 0usize;
    for (url, dest) in cli.downloads {
        match manager.enqueue(url, dest.clone()) {
            Ok(()) => pending += 1,
            Err(e) => eprintln!("skipping {}: {e}", dest.display()),
        }
    }

    println!(
        "downloading {pending} file(s) into {}",
        manager.config().download_root.display()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.progress_interval.max(1)));
    let mut failures = 0usize;
    while pending > 0 {
        tokio::select! {
            event = rx.recv() => {
                let Some((_, success)) = event else { break };
                pending -= 1;
                if !success {
                    failures += 1;
                }
            }
            _ = ticker.tick(), if cli.progress_interval > 0 => {
                if let Some(entry) = manager.snapshot()?.first() {
                    if let (Some(position), size) = (entry.progress.position, entry.progress.size) {
                        match size {
                            Some(size) => println!("[progress] {} {position}/{size} bytes", entry.destination.display()),
                            None => println!("[progress] {} {position} bytes", entry.destination.display()),
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted, cancelling remaining downloads");
                manager.begin_deinitialise()?;
                break;
            }
        }
    }

    if manager.is_available() {
        manager.remove_listener(&listener)?;
    }
    manager.deinitialise().await?;

    if failures > 0 || pending > 0 {
        bail!("{failures} download(s) failed, {pending} not finished");
    }
    Ok(())
}
