//! Telemetry word definition table
//!
//! Maps human-readable word names to their zero-based position inside a
//! frame's word region. The table is loaded once at startup from a
//! line-oriented definition file and is immutable afterwards.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::{Result, TelemetryError};

/// Names of the five timestamp sub-fields kept in the rolling history
/// alongside the extracted words.
pub const TIME_FIELDS: [&str; 5] = ["DAY", "HH", "MM", "SEC", "MSEC"];

/// Command words reported back in telemetry, watched for changes.
pub const COMMAND_ADDRESS: &str = "Command Address";
pub const COMMAND_DATA: &str = "Command Data";

/// Mapping from word name to its position index within a frame.
///
/// Positions are unique integers; names are never empty. A name that appears
/// twice in the definition file keeps its last position.
#[derive(Debug, Clone)]
pub struct WordTable {
    positions: HashMap<String, usize>,
}

impl WordTable {
    /// Parse a word table from a line-oriented definition.
    ///
    /// Each line is `<integer position> <word name...>`; the name may contain
    /// spaces. Lines with fewer than two tokens are ignored. An unparsable
    /// position is a configuration error and fails the load.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut positions = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                continue;
            }
            let position: usize = tokens[0].parse().map_err(|_| {
                TelemetryError::ParseWordTable(format!("invalid position in line: {line:?}"))
            })?;
            positions.insert(tokens[1..].join(" "), position);
        }
        Ok(Self { positions })
    }

    /// Load a word table from a definition file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Position of a word within the frame's word region, if defined.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Whether the table defines the given word.
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Number of defined words.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// The fixed set of words extracted from each frame and retained in the
/// rolling history: frame sync, magnitudes, pointing errors, detector
/// channels, command echo, time counters, and the scan counter/status/signal
/// words used by the spectral reduction.
pub fn standard_words() -> Vec<String> {
    let mut words: Vec<String> = ["SYNC 0", "SYNC 1", "SYNC 2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    words.extend(["MAG - I", "MAG - II", "Coarse Elev. S. E."].map(String::from));
    words.extend((1..=8).map(|i| format!("PDA No. {i}")));
    words.extend((1..=8).map(|i| format!("DC PDA {i}")));
    words.extend(["S.T. Elev. Error", "S.T. Xelev. Error"].map(String::from));
    words.extend(["Fine Elev. S. E.", "Fine Xelev. S. E."].map(String::from));
    words.extend(
        ["Time H", "Time L", COMMAND_ADDRESS, COMMAND_DATA, "Frame Number"].map(String::from),
    );
    words.extend(["FPC COUNTER", "DET SIGNAL", "FPS SCAN STATUS"].map(String::from));
    words.extend((1..=4).map(|i| format!("FPS {i} L")));
    words.extend((1..=4).map(|i| format!("FPS {i} H")));
    words
}
