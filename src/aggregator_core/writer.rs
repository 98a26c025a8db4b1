//! Unified writer interface for average records
//!
//! Routes writes to either a named JSONL file or stdout, and runs the sink
//! loop that drains the output queue.

use super::jsonl_writer::{AverageRecord, JsonlWriter};
use super::writer_backend::{ResultWriterBackend, WriterError};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Stdout;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Unified writer that routes to a file or to stdout
pub enum OutputWriter {
    File(JsonlWriter<File>),
    Stdout(JsonlWriter<Stdout>),
}

impl OutputWriter {
    /// Open the destination once for the writer's whole lifetime. A missing
    /// path means stdout.
    pub fn open(path: Option<&Path>, append: bool) -> Result<Self, WriterError> {
        let Some(path) = path else {
            return Ok(OutputWriter::Stdout(JsonlWriter::new(std::io::stdout(), "stdout")));
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(path)?;

        log::info!("📝 Writing averages to: {}", path.display());
        Ok(OutputWriter::File(JsonlWriter::new(file, "JSONL file")))
    }
}

#[async_trait]
impl ResultWriterBackend for OutputWriter {
    async fn write_record(&mut self, record: &AverageRecord) -> Result<(), WriterError> {
        match self {
            OutputWriter::File(w) => w.write_record(record),
            OutputWriter::Stdout(w) => w.write_record(record),
        }
    }

    async fn flush(&mut self) -> Result<(), WriterError> {
        match self {
            OutputWriter::File(w) => ResultWriterBackend::flush(w).await,
            OutputWriter::Stdout(w) => ResultWriterBackend::flush(w).await,
        }
    }

    fn backend_type(&self) -> &'static str {
        match self {
            OutputWriter::File(w) => w.backend_type(),
            OutputWriter::Stdout(w) => w.backend_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
}

async fn write_one<B: ResultWriterBackend>(
    backend: &mut B,
    record: &AverageRecord,
    stats: &mut WriterStats,
) {
    match backend.write_record(record).await {
        Ok(()) => stats.written += 1,
        Err(e) => {
            stats.failed += 1;
            log::error!("❌ Failed to write average record: {}", e);
        }
    }
}

/// Pop records with a short timeout and persist each one before the next pop.
/// Records already queued when `cancel` fires are still written.
pub async fn run_writer<B: ResultWriterBackend>(
    mut rx: mpsc::Receiver<AverageRecord>,
    mut backend: B,
    dequeue_timeout: Duration,
    cancel: CancellationToken,
) -> WriterStats {
    log::info!("📊 Writer started (backend: {})", backend.backend_type());
    let mut stats = WriterStats::default();

    while !cancel.is_cancelled() {
        let popped = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            popped = tokio::time::timeout(dequeue_timeout, rx.recv()) => popped,
        };

        match popped {
            Ok(Some(record)) => write_one(&mut backend, &record, &mut stats).await,
            Ok(None) => {
                log::info!("Output queue closed, writer exiting");
                break;
            }
            // Empty pop, not an error
            Err(_) => continue,
        }
    }

    while let Ok(record) = rx.try_recv() {
        write_one(&mut backend, &record, &mut stats).await;
    }
    if let Err(e) = backend.flush().await {
        log::error!("❌ Failed to flush {}: {}", backend.backend_type(), e);
    }

    log::info!("📊 Writer stopped: {:?}", stats);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::event::local_now;

    /// Backend that fails on every other record
    struct FlakyBackend {
        calls: usize,
    }

    #[async_trait]
    impl ResultWriterBackend for FlakyBackend {
        async fn write_record(&mut self, _record: &AverageRecord) -> Result<(), WriterError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(WriterError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), WriterError> {
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_writes_to_file_and_flushes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let out_path = temp_dir.path().join("nested").join("out.json");
        let writer = OutputWriter::open(Some(out_path.as_path()), false).unwrap();
        assert_eq!(writer.backend_type(), "JSONL file");

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_writer(rx, writer, Duration::from_millis(100), cancel.clone()));

        tx.send(AverageRecord::new(local_now(), Some(45.5))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Visible before the writer stops
        let text = std::fs::read_to_string(&out_path).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(line["average_delivery_time"], serde_json::json!(45.5));

        cancel.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats, WriterStats { written: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_truncate_and_append_modes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let out_path = temp_dir.path().join("out.json");
        std::fs::write(&out_path, "old line\n").unwrap();

        let OutputWriter::File(mut w) = OutputWriter::open(Some(out_path.as_path()), true).unwrap() else {
            panic!("expected file backend");
        };
        w.write_record(&AverageRecord::new(local_now(), None)).unwrap();
        drop(w);
        assert_eq!(std::fs::read_to_string(&out_path).unwrap().lines().count(), 2);

        let writer = OutputWriter::open(Some(out_path.as_path()), false).unwrap();
        drop(writer);
        assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_loop() {
        let (tx, rx) = mpsc::channel(8);
        for avg in [1.0, 2.0, 3.0] {
            tx.send(AverageRecord::new(local_now(), Some(avg))).await.unwrap();
        }
        drop(tx);

        let backend = FlakyBackend { calls: 0 };
        let stats = run_writer(rx, backend, Duration::from_millis(50), CancellationToken::new()).await;

        assert_eq!(stats, WriterStats { written: 2, failed: 1 });
    }
}
