//! Live telemetry capture
//!
//! Binds a UDP socket, decodes incoming frames against a word definition
//! file and keeps a rolling history, optionally persisted as a periodic
//! snapshot for plotters and the recorder to poll.
//!
//! Usage:
//!   telescan-capture --words TelemetryFrameWords.txt \
//!       --bind 0.0.0.0:5000 --snapshot history.json

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;
use telescan::{capture, standard_words, CaptureConfig, RollingHistory, WordTable};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the word definition file
    #[arg(short, long, default_value = "TelemetryFrameWords.txt")]
    words: PathBuf,

    /// Local address to listen on
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Rolling history capacity in frames
    #[arg(short, long, default_value = "1000")]
    capacity: usize,

    /// Snapshot file path (omit to disable persistence)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Frames between snapshot writes
    #[arg(long, default_value = "12")]
    snapshot_every: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let table = WordTable::from_file(&args.words)?;
    info!(
        "loaded {} word definitions from {}",
        table.len(),
        args.words.display()
    );

    let mut config = CaptureConfig::new(standard_words());
    config.bind = args.bind;
    config.capacity = args.capacity;
    config.snapshot_path = args.snapshot;
    config.snapshot_every = args.snapshot_every;

    let history = Arc::new(Mutex::new(RollingHistory::new(
        config.capacity,
        &config.words,
    )));
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        })?;
    }

    let stats = capture::run(&config, &table, &history, &shutdown, None)?;
    info!(
        "captured {} frames ({} rejected)",
        stats.frames, stats.rejected
    );
    Ok(())
}
