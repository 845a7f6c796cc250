//! Long-run recording by polling overlapping snapshots
//!
//! The rolling history only ever holds the most recent frames, so an
//! unattended long observation is assembled by polling the capture loop's
//! snapshot file and keeping every row not seen before. Consecutive
//! snapshots overlap heavily; rows are deduplicated by their composed
//! timestamp, strictly newer than the newest row already recorded.

use tracing::debug;

use crate::history::HistorySnapshot;
use crate::Result;

/// Accumulates deduplicated history rows across snapshot polls.
///
/// The accumulated record uses the snapshot column layout, so it can be
/// persisted with [`crate::snapshot::write_snapshot`] and read back like any
/// snapshot.
#[derive(Debug, Default)]
pub struct Recorder {
    record: HistorySnapshot,
    last_timestamp: f64,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the snapshot rows newer than anything recorded so far and
    /// return how many were taken.
    ///
    /// The first ingest fixes the column layout; later snapshots must carry
    /// the same columns. Rows at or before the newest recorded timestamp are
    /// skipped, which makes re-reading an unchanged snapshot a no-op.
    pub fn ingest(&mut self, snapshot: &HistorySnapshot) -> Result<usize> {
        let times = snapshot.time_axis()?;
        let fresh: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, &t)| t > self.last_timestamp)
            .map(|(i, _)| i)
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        if self.record.columns.is_empty() {
            for name in snapshot.columns.keys() {
                self.record.columns.insert(name.clone(), Vec::new());
            }
        }
        for (name, column) in &mut self.record.columns {
            let source = snapshot.require(name)?;
            column.extend(fresh.iter().map(|&i| source[i]));
        }
        self.last_timestamp = fresh
            .iter()
            .map(|&i| times[i])
            .fold(self.last_timestamp, f64::max);

        debug!(
            "recorded {} new rows, {} total",
            fresh.len(),
            self.record.len()
        );
        Ok(fresh.len())
    }

    /// The accumulated record.
    pub fn record(&self) -> &HistorySnapshot {
        &self.record
    }

    /// Number of recorded rows.
    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }
}
