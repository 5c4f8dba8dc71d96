//! Batchloader - grouped, cancellable downloads
//!
//! Downloads a batch of URLs as one task group under a bounded number of
//! parallel transfers.

use anyhow::{bail, Result};
use batchloader::backend::{BackendActor, BackendCommand, BackendEvent, BatchSummary, TransferSpec};
use batchloader::downloader::SpeedTier;
use batchloader::fetch::HttpFetcher;
use batchloader::queue::EventBus;
use batchloader::utils::{init_logging, AppSettings};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "batchloader", version, about = "Download a batch of URLs as one group")]
struct Args {
    /// URLs to download
    #[arg(required = true)]
    urls: Vec<String>,

    /// Directory to save into (defaults to the configured download location)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use the high concurrency tier
    #[arg(long)]
    boost: bool,

    /// Put the batch at the front of the queue
    #[arg(long)]
    priority: bool,

    /// Abort a single transfer after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Settings file (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose);

    let mut settings = AppSettings::load(args.settings.as_deref())?;
    if let Some(dir) = args.output {
        settings.download_location = dir;
    }
    if args.timeout.is_some() {
        settings.transfer_timeout_secs = args.timeout;
    }
    let settings = settings.sanitized();

    let transfers = args
        .urls
        .iter()
        .enumerate()
        .map(|(i, url)| TransferSpec::from_url(url, &settings.download_location, i))
        .collect::<Result<Vec<_>, _>>()?;

    let tier = args.boost.then_some(SpeedTier::High);
    let fetcher = Arc::new(HttpFetcher::from_settings(&settings)?);
    let bus = EventBus::new();

    let (command_tx, command_rx) = mpsc::channel::<BackendCommand>(32);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BackendEvent>();
    let actor = BackendActor::new(settings, fetcher, bus, command_rx, event_tx);
    let actor_handle = tokio::spawn(actor.run());

    command_tx
        .send(BackendCommand::Submit {
            transfers,
            priority: args.priority,
            tier,
        })
        .await?;

    let mut summary = BatchSummary::new();
    let mut submit_error = None;

    while !summary.is_done() {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                summary.record(&event);
                match event {
                    BackendEvent::GroupAdmitted { group: id, tasks, .. } => {
                        info!("Queued {} downloads as group {}", tasks, id);
                    }
                    BackendEvent::TaskFinished { source, error: None, .. } => {
                        println!("ok      {}", source);
                    }
                    BackendEvent::TaskFinished { source, error: Some(e), .. } => {
                        println!("failed  {} ({})", source, e);
                    }
                    BackendEvent::Group(event) => {
                        if Some(event.group) == summary.group() && event.kind.is_terminal() {
                            info!("Group {} {}", event.group, event.channel_name());
                        }
                    }
                    // The group may already be gone when the cancel lands
                    BackendEvent::Error(e) if summary.is_interrupted() => warn!("{}", e),
                    BackendEvent::Error(e) => {
                        submit_error = Some(e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                match summary.group() {
                    Some(id) if !summary.is_interrupted() => {
                        eprintln!("Interrupted, cancelling downloads...");
                        summary.interrupt();
                        command_tx.send(BackendCommand::Cancel(id)).await?;
                    }
                    _ => {
                        summary.interrupt();
                        break;
                    }
                }
            }
        }
    }

    command_tx.send(BackendCommand::Shutdown).await.ok();
    actor_handle.await.ok();

    if let Some(e) = submit_error {
        bail!(e);
    }

    println!(
        "{} downloaded, {} failed{}",
        summary.succeeded(),
        summary.failed(),
        if summary.is_interrupted() { " (interrupted)" } else { "" }
    );
    let code = summary.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
