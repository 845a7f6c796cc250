//! Long-run recording
//!
//! Polls the snapshot file written by `telescan-capture` and accumulates
//! every new row into a growing record file, deduplicated by timestamp. The
//! rolling history only covers the most recent frames; this keeps the rest.
//!
//! Usage:
//!   telescan-record --snapshot history.json --output record.json

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use telescan::snapshot::{read_snapshot, write_snapshot};
use telescan::{Recorder, TelemetryError};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Snapshot file written by the capture process
    #[arg(short, long, default_value = "history.json")]
    snapshot: PathBuf,

    /// Output record file
    #[arg(short, long, default_value = "record.json")]
    output: PathBuf,

    /// Poll interval in seconds
    #[arg(long, default_value = "2")]
    interval: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        })?;
    }

    info!(
        "recording from {} to {} every {}s",
        args.snapshot.display(),
        args.output.display(),
        args.interval
    );

    let mut recorder = Recorder::new();
    while !shutdown.load(Ordering::Relaxed) {
        match read_snapshot(&args.snapshot) {
            Ok(snap) => {
                let taken = recorder.ingest(&snap)?;
                if taken > 0 {
                    info!("recorded {} new rows, {} total", taken, recorder.len());
                    write_snapshot(&args.output, recorder.record())?;
                }
            }
            Err(TelemetryError::SnapshotTransient(reason)) => {
                debug!("snapshot not ready: {reason}");
            }
            Err(e) => return Err(e.into()),
        }

        // Sleep in short slices so Ctrl-C takes effect promptly.
        for _ in 0..args.interval * 4 {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }

    if !recorder.is_empty() {
        write_snapshot(&args.output, recorder.record())?;
    }
    info!(
        "recording stopped: {} rows in {}",
        recorder.len(),
        args.output.display()
    );
    Ok(())
}
