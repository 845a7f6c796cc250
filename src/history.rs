//! Rolling history store: bounded per-word FIFO buffers
//!
//! One fixed-capacity ring buffer per tracked word, all appended to in
//! lock-step (one value per word per incoming frame, with the five timestamp
//! sub-fields kept as pseudo-words). Oldest entries are evicted silently once
//! capacity is reached; that is the designed behaviour for bounding memory
//! over long-running capture, not an error.
//!
//! Consumers never read the live buffers directly: [`RollingHistory::snapshot`]
//! produces a consistent, optionally time-filtered copy that downstream
//! processing owns outright.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::frame::DecodedSample;
use crate::words::TIME_FIELDS;
use crate::{Result, TelemetryError};

/// Per-word fixed-capacity FIFO buffers over decoded samples.
#[derive(Debug)]
pub struct RollingHistory {
    capacity: usize,
    /// Tracked word names in append order, followed by the time pseudo-words.
    names: Vec<String>,
    buffers: HashMap<String, VecDeque<f64>>,
}

impl RollingHistory {
    /// Create a store tracking the given words plus the timestamp
    /// pseudo-words, each with the same fixed capacity.
    pub fn new(capacity: usize, word_names: &[String]) -> Self {
        let mut names: Vec<String> = word_names.to_vec();
        names.extend(TIME_FIELDS.iter().map(|s| s.to_string()));
        let buffers = names
            .iter()
            .map(|n| (n.clone(), VecDeque::with_capacity(capacity)))
            .collect();
        Self {
            capacity,
            names,
            buffers,
        }
    }

    /// Number of entries currently held (identical across all buffers).
    pub fn len(&self) -> usize {
        self.names
            .first()
            .map(|n| self.buffers[n].len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one decoded frame: one value per tracked word plus the five
    /// timestamp sub-fields, evicting the oldest entry of every buffer once
    /// capacity is reached.
    ///
    /// A sample that lacks a tracked word means the decode selection and the
    /// store were configured with different word sets; callers treat that as
    /// fatal.
    pub fn append(&mut self, sample: &DecodedSample) -> Result<()> {
        let ts = sample.timestamp;
        let time_values = [
            ts.day as f64,
            ts.hour as f64,
            ts.minute as f64,
            ts.second as f64,
            ts.millisecond as f64,
        ];

        // Validate before mutating so a bad sample can't break lock-step.
        for name in &self.names[..self.names.len() - TIME_FIELDS.len()] {
            if !sample.words.contains_key(name) {
                return Err(TelemetryError::UnknownWord(name.clone()));
            }
        }

        let at_capacity = self.len() >= self.capacity;
        let word_count = self.names.len() - TIME_FIELDS.len();
        for (i, name) in self.names.iter().enumerate() {
            let value = if i < word_count {
                f64::from(sample.words[name])
            } else {
                time_values[i - word_count]
            };
            let buffer = self.buffers.get_mut(name).expect("buffer exists per name");
            if at_capacity {
                buffer.pop_front();
            }
            buffer.push_back(value);
        }
        Ok(())
    }

    /// The two newest entries of a word's buffer, oldest first.
    pub fn last_two(&self, name: &str) -> Option<(f64, f64)> {
        let buffer = self.buffers.get(name)?;
        let n = buffer.len();
        if n < 2 {
            return None;
        }
        Some((buffer[n - 2], buffer[n - 1]))
    }

    /// Composed fractional-day timestamp of entry `index`.
    fn timestamp_at(&self, index: usize) -> f64 {
        let field = |name: &str| self.buffers[name][index];
        field("DAY")
            + field("HH") / 24.0
            + field("MM") / 1_440.0
            + field("SEC") / 86_400.0
            + field("MSEC") / 864_000_000.0
    }

    /// A consistent point-in-time copy of all buffers, keeping only entries
    /// whose composed timestamp falls inside the optional `[start, end]`
    /// bounds. Frames that arrived before the instrument clock was set carry
    /// a zero timestamp and are always excluded. The live buffers are never
    /// filtered in place; arrival order is preserved among retained entries.
    pub fn snapshot(&self, start: Option<f64>, end: Option<f64>) -> HistorySnapshot {
        let retained: Vec<usize> = (0..self.len())
            .filter(|&i| {
                let t = self.timestamp_at(i);
                t > 0.0
                    && start.map_or(true, |s| t >= s)
                    && end.map_or(true, |e| t <= e)
            })
            .collect();

        let columns = self
            .names
            .iter()
            .map(|name| {
                let buffer = &self.buffers[name];
                (
                    name.clone(),
                    retained.iter().map(|&i| buffer[i]).collect(),
                )
            })
            .collect();
        HistorySnapshot { columns }
    }
}

/// Owned, serializable copy of the rolling history at one instant.
///
/// This is both the persistence payload and the offline input to the scan
/// reduction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl HistorySnapshot {
    /// A named column, if present.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    /// A named column, with a configuration error when it is missing.
    pub fn require(&self, name: &str) -> Result<&[f64]> {
        self.column(name)
            .ok_or_else(|| TelemetryError::UnknownWord(name.to_string()))
    }

    /// Number of rows (identical across all columns).
    pub fn len(&self) -> usize {
        self.columns.values().next().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Composed fractional-day timestamps, one per row.
    pub fn time_axis(&self) -> Result<Vec<f64>> {
        let day = self.require("DAY")?;
        let hour = self.require("HH")?;
        let minute = self.require("MM")?;
        let second = self.require("SEC")?;
        let msec = self.require("MSEC")?;
        Ok((0..day.len())
            .map(|i| {
                day[i]
                    + hour[i] / 24.0
                    + minute[i] / 1_440.0
                    + second[i] / 86_400.0
                    + msec[i] / 864_000_000.0
            })
            .collect())
    }
}

/// A change in the command pair echoed back by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandChange {
    pub address: u16,
    pub data: u16,
}

/// Watches two designated words and signals when the newest pair differs
/// from the previous pair.
///
/// Stateless beyond the store itself: the comparison always looks at the two
/// newest entries, so it fires exactly once per consecutive pair change and
/// no-ops while fewer than two entries exist.
#[derive(Debug, Clone)]
pub struct CommandChangeDetector {
    address_word: String,
    data_word: String,
}

impl CommandChangeDetector {
    pub fn new(address_word: impl Into<String>, data_word: impl Into<String>) -> Self {
        Self {
            address_word: address_word.into(),
            data_word: data_word.into(),
        }
    }

    /// Check the two newest entries after an append; `Some` when the
    /// `(address, data)` pair changed between them, compared jointly.
    pub fn check(&self, history: &RollingHistory) -> Option<CommandChange> {
        let (prev_addr, addr) = history.last_two(&self.address_word)?;
        let (prev_data, data) = history.last_two(&self.data_word)?;
        if (addr, data) != (prev_addr, prev_data) {
            Some(CommandChange {
                address: addr as u16,
                data: data as u16,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameTimestamp;
    use std::collections::HashMap;

    fn sample(words: &[(&str, u16)], second: u32) -> DecodedSample {
        DecodedSample {
            timestamp: FrameTimestamp {
                day: 100,
                hour: 0,
                minute: 0,
                second,
                millisecond: 0,
            },
            words: words
                .iter()
                .map(|(n, v)| (n.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn tracked(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lockstep_append() {
        let mut history = RollingHistory::new(10, &tracked(&["A", "B"]));
        history.append(&sample(&[("A", 1), ("B", 2)], 0)).unwrap();
        history.append(&sample(&[("A", 3), ("B", 4)], 1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last_two("A"), Some((1.0, 3.0)));
        assert_eq!(history.last_two("MSEC"), Some((0.0, 0.0)));
    }

    #[test]
    fn test_missing_word_rejected_without_partial_append() {
        let mut history = RollingHistory::new(10, &tracked(&["A", "B"]));
        let result = history.append(&sample(&[("A", 1)], 0));
        assert!(matches!(result, Err(TelemetryError::UnknownWord(w)) if w == "B"));
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn test_fifo_eviction_retains_last_capacity_entries() {
        for capacity in [1usize, 3, 8] {
            let n = capacity + 7;
            let mut history = RollingHistory::new(capacity, &tracked(&["A"]));
            for i in 0..n {
                history
                    .append(&sample(&[("A", i as u16)], i as u32))
                    .unwrap();
            }
            assert_eq!(history.len(), capacity);
            let snap = history.snapshot(None, None);
            let expected: Vec<f64> = ((n - capacity)..n).map(|i| i as f64).collect();
            assert_eq!(snap.column("A").unwrap(), expected.as_slice());
        }
    }

    #[test]
    fn test_snapshot_time_filtering() {
        let mut history = RollingHistory::new(100, &tracked(&["A"]));
        for second in 0..10u32 {
            history.append(&sample(&[("A", second as u16)], second)).unwrap();
        }
        let base = 100.0;
        let start = base + 3.0 / 86_400.0;
        let end = base + 7.0 / 86_400.0;
        let snap = history.snapshot(Some(start), Some(end));
        assert_eq!(snap.len(), 5);
        assert_eq!(snap.column("A").unwrap(), &[3.0, 4.0, 5.0, 6.0, 7.0]);
        for &t in &snap.time_axis().unwrap() {
            assert!(t >= start && t <= end);
        }

        // Open-ended bounds
        assert_eq!(history.snapshot(Some(start), None).len(), 7);
        assert_eq!(history.snapshot(None, Some(end)).len(), 8);
    }

    #[test]
    fn test_snapshot_drops_zero_timestamps() {
        let mut history = RollingHistory::new(100, &tracked(&["A"]));
        let mut unset = sample(&[("A", 1)], 0);
        unset.timestamp = FrameTimestamp {
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            millisecond: 0,
        };
        history.append(&unset).unwrap();
        history.append(&sample(&[("A", 2)], 5)).unwrap();
        let snap = history.snapshot(None, None);
        assert_eq!(snap.column("A").unwrap(), &[2.0]);
    }

    #[test]
    fn test_out_of_order_timestamps_tolerated() {
        let mut history = RollingHistory::new(100, &tracked(&["A"]));
        history.append(&sample(&[("A", 1)], 9)).unwrap();
        history.append(&sample(&[("A", 2)], 3)).unwrap();
        history.append(&sample(&[("A", 3)], 3)).unwrap();
        // Arrival order preserved, no reordering by timestamp
        let snap = history.snapshot(None, None);
        assert_eq!(snap.column("A").unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_command_change_detection() {
        let words = tracked(&["Command Address", "Command Data"]);
        let detector = CommandChangeDetector::new("Command Address", "Command Data");
        let mut history = RollingHistory::new(100, &words);

        let append = |h: &mut RollingHistory, addr: u16, data: u16, s: u32| {
            h.append(&sample(
                &[("Command Address", addr), ("Command Data", data)],
                s,
            ))
            .unwrap();
        };

        // Fewer than two entries: no-op
        append(&mut history, 0o100, 0o7, 0);
        assert_eq!(detector.check(&history), None);

        // Same pair again: no change
        append(&mut history, 0o100, 0o7, 1);
        assert_eq!(detector.check(&history), None);

        // Data changes: fires with both values
        append(&mut history, 0o100, 0o11, 2);
        assert_eq!(
            detector.check(&history),
            Some(CommandChange {
                address: 0o100,
                data: 0o11
            })
        );

        // Pair stable at the new value: fires exactly once
        append(&mut history, 0o100, 0o11, 3);
        assert_eq!(detector.check(&history), None);

        // Both fields change together: one notification
        append(&mut history, 0o200, 0o12, 4);
        assert_eq!(
            detector.check(&history),
            Some(CommandChange {
                address: 0o200,
                data: 0o12
            })
        );
    }
}
