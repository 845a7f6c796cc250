//! UDP capture loop: receive, decode, append, snapshot
//!
//! One blocking loop owns the socket and drives everything per datagram:
//! decode the frame, append it to the shared history, check the command
//! words for a change and periodically persist a snapshot. The receive
//! timeout is short so the shutdown flag is polled even on a silent link.
//!
//! Malformed (short) frames are counted and skipped; the stream carries them
//! routinely during instrument reconfiguration and they must never stop the
//! capture. Socket errors other than timeouts are tolerated a bounded number
//! of consecutive times before the loop gives up.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::frame::decode_frame;
use crate::history::{CommandChange, CommandChangeDetector, RollingHistory};
use crate::snapshot::write_snapshot;
use crate::words::{WordTable, COMMAND_ADDRESS, COMMAND_DATA};
use crate::{Result, TelemetryError};

const RECV_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Capture loop configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Words decoded from every frame and tracked in the history.
    pub words: Vec<String>,
    /// Local address the UDP socket binds to.
    pub bind: String,
    /// Rolling history capacity in frames.
    pub capacity: usize,
    /// Word pair watched for command changes; `None` disables detection.
    pub command_words: Option<(String, String)>,
    /// Snapshot file path; `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    /// Snapshot write interval in accepted frames.
    pub snapshot_every: u64,
    /// Receive buffer size; datagrams larger than this are truncated.
    pub max_datagram: usize,
}

impl CaptureConfig {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words,
            bind: "0.0.0.0:5000".to_string(),
            capacity: 1000,
            command_words: Some((COMMAND_ADDRESS.to_string(), COMMAND_DATA.to_string())),
            snapshot_path: None,
            snapshot_every: 12,
            max_datagram: 4096,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames decoded and appended to the history.
    pub frames: u64,
    /// Frames rejected as too short.
    pub rejected: u64,
}

fn flush_snapshot(path: &PathBuf, history: &Mutex<RollingHistory>) {
    let snap = history
        .lock()
        .expect("history mutex poisoned")
        .snapshot(None, None);
    // Serialization happens outside the lock; the copy is already consistent.
    if let Err(e) = write_snapshot(path, &snap) {
        warn!("snapshot write failed: {e}");
    }
}

/// Run the capture loop until `shutdown` is set or a fatal error occurs.
///
/// Fails immediately when a configured word is missing from the table or the
/// socket cannot be bound; both are configuration problems no amount of
/// retrying fixes. Detected command changes are logged and, when `changes`
/// is given, forwarded over the channel.
pub fn run(
    config: &CaptureConfig,
    table: &WordTable,
    history: &Mutex<RollingHistory>,
    shutdown: &AtomicBool,
    changes: Option<&Sender<CommandChange>>,
) -> Result<CaptureStats> {
    for name in &config.words {
        if !table.contains(name) {
            return Err(TelemetryError::UnknownWord(name.clone()));
        }
    }

    let socket = UdpSocket::bind(&config.bind)?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    info!("listening for telemetry frames on {}", config.bind);

    // Change detection only applies when both command words are tracked.
    let detector = config.command_words.as_ref().and_then(|(address, data)| {
        (config.words.contains(address) && config.words.contains(data))
            .then(|| CommandChangeDetector::new(address.clone(), data.clone()))
    });

    let mut buf = vec![0u8; config.max_datagram];
    let mut stats = CaptureStats::default();
    let mut consecutive_errors = 0u32;

    while !shutdown.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                consecutive_errors = 0;
                len
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("socket receive failed ({consecutive_errors}): {e}");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    return Err(e.into());
                }
                continue;
            }
        };

        let sample = match decode_frame(&buf[..len], table, &config.words) {
            Ok(sample) => sample,
            Err(e @ TelemetryError::FrameTooShort { .. }) => {
                stats.rejected += 1;
                debug!("rejected frame: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        let change = {
            let mut h = history.lock().expect("history mutex poisoned");
            h.append(&sample)?;
            detector.as_ref().and_then(|d| d.check(&h))
        };
        stats.frames += 1;

        if let Some(change) = change {
            // Command words are conventionally read in octal.
            info!(
                "command change: address {:o}, data {:o}",
                change.address, change.data
            );
            if let Some(tx) = changes {
                let _ = tx.send(change);
            }
        }

        if let Some(path) = &config.snapshot_path {
            if stats.frames % config.snapshot_every == 0 {
                flush_snapshot(path, history);
            }
        }
    }

    if let Some(path) = &config.snapshot_path {
        flush_snapshot(path, history);
    }
    info!(
        "capture stopped: {} frames kept, {} rejected",
        stats.frames, stats.rejected
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::WORD_REGION_OFFSET;
    use crate::snapshot::read_snapshot;
    use crate::words::WordTable;
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn table() -> WordTable {
        WordTable::from_reader(Cursor::new("0 A\n1 B\n")).unwrap()
    }

    /// A valid frame carrying words A and B, pre-parity-strip values doubled.
    fn valid_frame(a: u16, b: u16) -> Vec<u8> {
        let mut frame = vec![0u8; WORD_REGION_OFFSET];
        frame[4..6].copy_from_slice(&[0x00, 0x42]); // day 42
        for value in [a, b] {
            let wire = value << 1;
            frame.push((wire & 0xFF) as u8);
            frame.push((wire >> 8) as u8);
        }
        frame
    }

    fn free_local_addr() -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    }

    fn config(bind: String) -> CaptureConfig {
        let mut config = CaptureConfig::new(vec!["A".to_string(), "B".to_string()]);
        config.bind = bind;
        config.capacity = 100;
        config
    }

    #[test]
    fn test_unknown_configured_word_is_fatal() {
        let config = CaptureConfig::new(vec!["NOPE".to_string()]);
        let history = Mutex::new(RollingHistory::new(10, &config.words));
        let shutdown = AtomicBool::new(false);
        let result = run(&config, &table(), &history, &shutdown, None);
        assert!(matches!(result, Err(TelemetryError::UnknownWord(w)) if w == "NOPE"));
    }

    #[test]
    fn test_capture_appends_rejects_and_snapshots() {
        let bind = free_local_addr();
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("history.json");

        let mut config = config(bind.clone());
        config.snapshot_path = Some(snapshot_path.clone());
        config.snapshot_every = 2;

        let history = Arc::new(Mutex::new(RollingHistory::new(
            config.capacity,
            &config.words,
        )));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let config = config.clone();
            let history = Arc::clone(&history);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || run(&config, &table(), &history, &shutdown, None))
        };

        thread::sleep(Duration::from_millis(100));
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for i in 0..3u16 {
            sender.send_to(&valid_frame(i, i + 10), &bind).unwrap();
        }
        sender.send_to(&[0u8; 5], &bind).unwrap(); // too short

        thread::sleep(Duration::from_millis(200));
        shutdown.store(true, Ordering::Relaxed);
        let stats = worker.join().unwrap().unwrap();

        assert_eq!(stats, CaptureStats { frames: 3, rejected: 1 });
        assert_eq!(history.lock().unwrap().len(), 3);

        let snap = read_snapshot(&snapshot_path).unwrap();
        assert_eq!(snap.column("A").unwrap(), &[0.0, 1.0, 2.0]);
        assert_eq!(snap.column("B").unwrap(), &[10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_command_changes_forwarded_over_channel() {
        let bind = free_local_addr();
        let table = WordTable::from_reader(Cursor::new(format!(
            "0 {COMMAND_ADDRESS}\n1 {COMMAND_DATA}\n"
        )))
        .unwrap();
        let config = {
            let mut c = CaptureConfig::new(vec![
                COMMAND_ADDRESS.to_string(),
                COMMAND_DATA.to_string(),
            ]);
            c.bind = bind.clone();
            c
        };
        let history = Arc::new(Mutex::new(RollingHistory::new(100, &config.words)));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = {
            let config = config.clone();
            let history = Arc::clone(&history);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || run(&config, &table, &history, &shutdown, Some(&tx)))
        };

        thread::sleep(Duration::from_millis(100));
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&valid_frame(0o100, 0o7), &bind).unwrap();
        thread::sleep(Duration::from_millis(50));
        sender.send_to(&valid_frame(0o100, 0o7), &bind).unwrap();
        thread::sleep(Duration::from_millis(50));
        sender.send_to(&valid_frame(0o100, 0o11), &bind).unwrap();

        let change = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            change,
            CommandChange {
                address: 0o100,
                data: 0o11
            }
        );

        shutdown.store(true, Ordering::Relaxed);
        worker.join().unwrap().unwrap();
    }
}
