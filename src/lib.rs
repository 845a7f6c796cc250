//! Telemetry frame capture and triangular-scan spectral reduction
//!
//! This library ingests fixed-format binary telemetry frames broadcast over
//! UDP, decodes selected 16-bit engineering words plus a BCD timestamp from
//! each frame, and keeps a bounded rolling history per word. On top of that
//! history it reconstructs the positions of four phase-shifted detector
//! samples on a triangular scan waveform from a single wrapped counter, and
//! bins detector readings by reconstructed position into per-window spectra
//! with background subtraction.
//!
//! # Architecture
//!
//! - **WordTable**: word name → frame position mapping, loaded once at startup
//! - **Frame decoder**: pure byte-level decode of one datagram into a sample
//! - **RollingHistory**: fixed-capacity FIFO buffers, one per tracked word
//! - **Capture loop**: blocking UDP receive, append, periodic snapshot write
//! - **Scan reduction**: triangle-wave unfolding and windowed spectral binning
//!   over point-in-time snapshots
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::{Arc, Mutex};
//! use telescan::{standard_words, CaptureConfig, RollingHistory, WordTable};
//!
//! let table = WordTable::from_file("TelemetryFrameWords.txt")?;
//! let config = CaptureConfig::new(standard_words());
//! let history = Arc::new(Mutex::new(RollingHistory::new(
//!     config.capacity,
//!     &config.words,
//! )));
//! let shutdown = Arc::new(AtomicBool::new(false));
//! telescan::capture::run(&config, &table, &history, &shutdown, None)?;
//! # Ok::<(), telescan::TelemetryError>(())
//! ```

use thiserror::Error;

pub mod capture;
pub mod frame;
pub mod history;
pub mod recorder;
pub mod scan;
pub mod snapshot;
pub mod words;

pub use capture::{CaptureConfig, CaptureStats};
pub use frame::{decode_frame, DecodedSample, FrameTimestamp};
pub use history::{CommandChange, CommandChangeDetector, HistorySnapshot, RollingHistory};
pub use recorder::Recorder;
pub use scan::binner::{Background, BinnerConfig, PositionBin, SummaryPoint, SummaryPoints};
pub use scan::series::ScanSeries;
pub use scan::triangle::{direction_bits, unfold, TriangleParameters, UnfoldedPosition};
pub use words::{standard_words, WordTable, TIME_FIELDS};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too short: need {needed} bytes, got {got}")]
    FrameTooShort { needed: usize, got: usize },

    #[error("unknown telemetry word: {0}")]
    UnknownWord(String),

    #[error("word table parse error: {0}")]
    ParseWordTable(String),

    #[error("insufficient samples: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("snapshot not readable yet: {0}")]
    SnapshotTransient(String),

    #[error("snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
