//! Audit sink for sent and received frames
//!
//! Connections hand records to a bounded channel; one dedicated writer
//! thread drains it into an `AuditWriter`. Recording never blocks and never
//! fails the caller: a full channel drops the record and counts it.
//!
//! ```text
//! Connection ─┐
//! Connection ─┼─► mpsc (bounded) ─► writer thread ─► AuditWriter
//! Connection ─┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::types::NetworkIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One audited frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub peer: Option<NetworkIdentity>,
    pub direction: Direction,
    pub frame: String,
}

impl AuditRecord {
    pub fn new(
        peer: Option<NetworkIdentity>,
        direction: Direction,
        frame: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            peer,
            direction,
            frame: frame.into(),
        }
    }
}

/// Destination of audit records; runs on the writer thread only
pub trait AuditWriter: Send + 'static {
    fn write(&mut self, record: &AuditRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonLinesWriter<BufWriter<File>> {
    /// Append to `path`, creating it if needed
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send + 'static> AuditWriter for JsonLinesWriter<W> {
    fn write(&mut self, record: &AuditRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::from)?;
        line.push(b'\n');
        self.out.write_all(&line)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Emits records as `tracing` events on the `ocpp::audit` target
#[derive(Debug, Default)]
pub struct TracingWriter;

impl AuditWriter for TracingWriter {
    fn write(&mut self, record: &AuditRecord) -> io::Result<()> {
        let peer = record.peer.as_ref().map(NetworkIdentity::as_str).unwrap_or("-");
        info!(
            target: "ocpp::audit",
            peer,
            direction = ?record.direction,
            at = %record.timestamp,
            "{}",
            record.frame
        );
        Ok(())
    }
}

/// Bounded retry of a failed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Totals reported by the writer thread when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub written: u64,
    /// Records abandoned after exhausting the retry policy
    pub failed: u64,
}

/// Producer side; cheap to clone into every connection
#[derive(Debug, Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

/// Owner of the writer thread
#[derive(Debug)]
pub struct AuditHandle {
    thread: thread::JoinHandle<AuditReport>,
}

impl AuditHandle {
    /// Wait for the writer to drain; returns once every sink is dropped
    pub fn join(self) -> AuditReport {
        self.thread.join().unwrap_or_else(|_| {
            error!("Audit writer thread panicked");
            AuditReport::default()
        })
    }
}

impl AuditSink {
    /// Start the writer thread
    pub fn spawn<W: AuditWriter>(
        writer: W,
        config: &AuditConfig,
    ) -> io::Result<(Self, AuditHandle)> {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let retry = config.retry;
        let thread = thread::Builder::new()
            .name("ocpp-audit".to_string())
            .spawn(move || run_writer(writer, rx, retry))?;

        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            AuditHandle { thread },
        ))
    }

    /// Queue a record; never blocks
    pub fn record(&self, record: AuditRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Audit channel full, record dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Audit writer gone, record dropped");
                false
            }
        }
    }

    /// Records dropped because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn run_writer<W: AuditWriter>(
    mut writer: W,
    mut rx: mpsc::Receiver<AuditRecord>,
    retry: RetryPolicy,
) -> AuditReport {
    let mut report = AuditReport::default();
    while let Some(record) = rx.blocking_recv() {
        if write_with_retry(&mut writer, &record, retry) {
            report.written += 1;
        } else {
            report.failed += 1;
        }
    }
    if let Err(e) = writer.flush() {
        error!(error = %e, "Audit flush failed");
    }
    debug!(written = report.written, failed = report.failed, "Audit writer stopped");
    report
}

fn write_with_retry<W: AuditWriter>(
    writer: &mut W,
    record: &AuditRecord,
    retry: RetryPolicy,
) -> bool {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match writer.write(record) {
            Ok(()) => return true,
            Err(e) if attempt < max_attempts => {
                warn!(attempt, error = %e, "Audit write failed, retrying");
                thread::sleep(retry.backoff);
                attempt += 1;
            }
            Err(e) => {
                error!(attempts = attempt, error = %e, "Audit record dropped");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    /// Fails the first `failures` writes
    struct FlakyWriter {
        failures: u32,
        attempts: Arc<AtomicU64>,
    }

    impl AuditWriter for FlakyWriter {
        fn write(&mut self, _record: &AuditRecord) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            Ok(())
        }
    }

    struct SlowWriter;

    impl AuditWriter for SlowWriter {
        fn write(&mut self, _record: &AuditRecord) -> io::Result<()> {
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }
    }

    fn fast_retry(max_attempts: u32) -> AuditConfig {
        AuditConfig::default().with_retry(RetryPolicy::new(max_attempts, Duration::from_millis(1)))
    }

    #[test]
    fn test_json_lines_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let writer = JsonLinesWriter::append(&path).unwrap();
        let (sink, handle) = AuditSink::spawn(writer, &AuditConfig::default()).unwrap();

        let peer = NetworkIdentity::new("CS001").ok();
        sink.record(AuditRecord::new(
            peer.clone(),
            Direction::Inbound,
            r#"[2,"1","Heartbeat",{}]"#,
        ));
        sink.record(AuditRecord::new(peer, Direction::Outbound, r#"[3,"1",{}]"#));
        drop(sink);

        let report = handle.join();
        assert_eq!(report.written, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["peer"], "CS001");
        assert_eq!(lines[0]["direction"], "inbound");
        assert_eq!(lines[1]["frame"], r#"[3,"1",{}]"#);
    }

    #[test]
    fn test_retry_recovers() {
        let attempts = Arc::new(AtomicU64::new(0));
        let writer = FlakyWriter {
            failures: 2,
            attempts: Arc::clone(&attempts),
        };
        let (sink, handle) = AuditSink::spawn(writer, &fast_retry(3)).unwrap();
        sink.record(AuditRecord::new(None, Direction::Outbound, "[]"));
        drop(sink);

        assert_eq!(handle.join(), AuditReport { written: 1, failed: 0 });
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_is_bounded() {
        let attempts = Arc::new(AtomicU64::new(0));
        let writer = FlakyWriter {
            failures: u32::MAX,
            attempts: Arc::clone(&attempts),
        };
        let (sink, handle) = AuditSink::spawn(writer, &fast_retry(3)).unwrap();
        sink.record(AuditRecord::new(None, Direction::Outbound, "[]"));
        sink.record(AuditRecord::new(None, Direction::Inbound, "[]"));
        drop(sink);

        assert_eq!(handle.join(), AuditReport { written: 0, failed: 2 });
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let config = AuditConfig::default().with_capacity(1);
        let (sink, handle) = AuditSink::spawn(SlowWriter, &config).unwrap();
        let accepted = (0..10)
            .filter(|_| sink.record(AuditRecord::new(None, Direction::Inbound, "[]")))
            .count() as u64;

        assert!(sink.dropped() >= 1);
        assert_eq!(accepted + sink.dropped(), 10);
        drop(sink);
        assert_eq!(handle.join().written, accepted);
    }

    #[test]
    fn test_tracing_writer_accepts_records() {
        let mut writer = TracingWriter;
        let record = AuditRecord::new(None, Direction::Outbound, r#"[2,"9","Heartbeat",{}]"#);
        assert!(writer.write(&record).is_ok());
    }
}
