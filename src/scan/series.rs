//! Per-frame scan series assembled from history snapshot columns
//!
//! Bridges the raw word columns of a [`HistorySnapshot`] and the scan
//! reduction: combines the split high/low counter words, converts the
//! star-tracker error counts to arcseconds, extracts the coarse direction
//! bits and unfolds the position counter. The result owns plain vectors, one
//! row per frame, ready for windowed binning.

use tracing::debug;

use crate::history::HistorySnapshot;
use crate::scan::triangle::{direction_bits, unfold, TriangleParameters, UnfoldedPosition};
use crate::Result;

/// Wrapped scan position counter, one value per frame.
pub const POSITION_COUNTER: &str = "FPC COUNTER";
/// Scan status word carrying the coarse up/down bit.
pub const SCAN_STATUS: &str = "FPS SCAN STATUS";

const FINE_ELEVATION_SENSE: &str = "Fine Elev. S. E.";
const FINE_CROSS_ELEVATION_SENSE: &str = "Fine Xelev. S. E.";
const TRACKER_ELEVATION_ERROR: &str = "S.T. Elev. Error";
const TRACKER_CROSS_ELEVATION_ERROR: &str = "S.T. Xelev. Error";
const TIME_HIGH: &str = "Time H";
const TIME_LOW: &str = "Time L";

/// Star-tracker error scale factors in arcseconds per count, zero at 2048.
const ELEVATION_ERROR_SCALE: f64 = -0.02188;
const CROSS_ELEVATION_ERROR_SCALE: f64 = -0.02217;
const TRACKER_ERROR_ZERO: f64 = 2048.0;

/// One frame's four phase detector readings next to their reconstructed
/// positions, plus the per-frame pointing and time counter.
#[derive(Debug, Clone)]
pub struct ScanSeries {
    /// Waveform parameters the unfolding used.
    pub params: TriangleParameters,
    /// Reconstructed phase positions, one entry per frame.
    pub positions: Vec<UnfoldedPosition>,
    /// The four phase detector readings per frame, phases 1 to 4.
    pub readings: Vec<[f64; 4]>,
    /// Elevation pointing in arcseconds, one value per frame.
    pub elevation: Vec<f64>,
    /// Cross-elevation pointing in arcseconds, one value per frame.
    pub cross_elevation: Vec<f64>,
    /// Combined 24-bit spacecraft time counter per frame.
    pub time_counter: Vec<f64>,
}

/// Combine a split detector reading: the high word carries the upper bits
/// scaled by 16, the low word's upper nibble carries the rest.
fn combine_reading(high: f64, low: f64) -> f64 {
    high * 16.0 + (low / 16.0).floor()
}

impl ScanSeries {
    /// Assemble the series from a snapshot, unfolding the position counter
    /// with the given waveform parameters or parameters estimated from the
    /// counter itself when `None`.
    ///
    /// Fails with [`crate::TelemetryError::UnknownWord`] when the snapshot
    /// lacks a required column and with
    /// [`crate::TelemetryError::InsufficientSamples`] below two frames.
    pub fn from_snapshot(
        snapshot: &HistorySnapshot,
        params: Option<TriangleParameters>,
    ) -> Result<Self> {
        let counter = snapshot.require(POSITION_COUNTER)?;
        let status = snapshot.require(SCAN_STATUS)?;

        let params = match params {
            Some(p) => p,
            None => TriangleParameters::estimate(counter)?,
        };
        let directions = direction_bits(status);
        let positions = unfold(counter, &directions, &params)?;

        let mut phase_columns = Vec::with_capacity(4);
        for phase in 1..=4 {
            let high = snapshot.require(&format!("FPS {phase} H"))?;
            let low = snapshot.require(&format!("FPS {phase} L"))?;
            phase_columns.push(
                high.iter()
                    .zip(low)
                    .map(|(&h, &l)| combine_reading(h, l))
                    .collect::<Vec<f64>>(),
            );
        }
        let readings: Vec<[f64; 4]> = (0..counter.len())
            .map(|i| {
                [
                    phase_columns[0][i],
                    phase_columns[1][i],
                    phase_columns[2][i],
                    phase_columns[3][i],
                ]
            })
            .collect();

        // The fine sense and star-tracker error channels are cross-paired:
        // elevation combines the fine cross-elevation sense with the
        // elevation error, and vice versa. This matches the instrument
        // wiring, not a transcription slip.
        let tracker_el = snapshot.require(TRACKER_ELEVATION_ERROR)?;
        let tracker_xel = snapshot.require(TRACKER_CROSS_ELEVATION_ERROR)?;
        let elevation: Vec<f64> = snapshot
            .require(FINE_CROSS_ELEVATION_SENSE)?
            .iter()
            .zip(tracker_el)
            .map(|(&sense, &err)| sense + (err - TRACKER_ERROR_ZERO) * ELEVATION_ERROR_SCALE)
            .collect();
        let cross_elevation: Vec<f64> = snapshot
            .require(FINE_ELEVATION_SENSE)?
            .iter()
            .zip(tracker_xel)
            .map(|(&sense, &err)| {
                sense + (err - TRACKER_ERROR_ZERO) * CROSS_ELEVATION_ERROR_SCALE
            })
            .collect();

        let time_counter: Vec<f64> = snapshot
            .require(TIME_HIGH)?
            .iter()
            .zip(snapshot.require(TIME_LOW)?)
            .map(|(&h, &l)| h * 4096.0 + l)
            .collect();

        debug!(
            "assembled scan series: {} frames, step={}",
            positions.len(),
            params.amplitude_step
        );
        Ok(Self {
            params,
            positions,
            readings,
            elevation,
            cross_elevation,
            time_counter,
        })
    }

    /// Number of frames in the series.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
