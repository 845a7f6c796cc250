//! Snapshot persistence: atomic write, transient-tolerant read
//!
//! The capture loop periodically serializes the full rolling history so that
//! offline consumers (plotters, the recorder) can poll a consistent file.
//! Writes go to a sibling temp file first and are renamed into place, so a
//! reader never sees a half-written snapshot through the final path. A
//! missing or partially readable file is reported as
//! [`TelemetryError::SnapshotTransient`], which callers handle by retrying
//! after a short delay.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::history::HistorySnapshot;
use crate::{Result, TelemetryError};

/// Serialize a snapshot and atomically replace the file at `path`.
pub fn write_snapshot<P: AsRef<Path>>(path: P, snapshot: &HistorySnapshot) -> Result<()> {
    let path = path.as_ref();
    let payload = serde_json::to_vec(snapshot)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, &payload)?;
    fs::rename(&tmp, path)?;
    debug!(
        "wrote snapshot: {} rows, {} bytes to {}",
        snapshot.len(),
        payload.len(),
        path.display()
    );
    Ok(())
}

/// Read a snapshot file.
///
/// A file that does not exist yet, or whose contents do not deserialize
/// (e.g. a writer without atomic rename was interrupted mid-write), maps to
/// [`TelemetryError::SnapshotTransient`]; only other I/O failures surface as
/// hard errors.
pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<HistorySnapshot> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(TelemetryError::SnapshotTransient(format!(
                "{} does not exist yet",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        TelemetryError::SnapshotTransient(format!("{}: {e}", path.display()))
    })
}
