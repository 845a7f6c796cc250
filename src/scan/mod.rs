//! Scan reduction: waveform reconstruction and spectral binning
//!
//! Turns a history snapshot into science products in three stages:
//!
//! - [`triangle`]: estimate the triangular scan waveform and unfold the
//!   wrapped position counter into four phase positions per frame
//! - [`series`]: assemble the per-frame scan series (positions, the four
//!   phase detector readings, pointing, time counter) from snapshot columns
//! - [`binner`]: slide a window over the series, median-combine readings
//!   into position bins, subtract a background and integrate the line flux
//!
//! All stages are pure functions over owned snapshot data, so they can run
//! live against the capture loop's periodic snapshots or offline against a
//! recorded file.

pub mod binner;
pub mod series;
pub mod triangle;

pub use binner::{Background, BinnerConfig, PositionBin, SummaryPoint, SummaryPoints};
pub use series::ScanSeries;
pub use triangle::{direction_bits, unfold, TriangleParameters, UnfoldedPosition};
