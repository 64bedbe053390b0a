// Background writer for routes that already existed

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where and how duplicate records are persisted.
#[derive(Debug, Clone)]
pub struct DuplicateLogConfig {
    pub directory: PathBuf,
    pub prefix: String,
    /// Records buffered in memory before a write.
    pub flush_threshold: usize,
    /// Capacity of the queue between workers and the writer.
    pub queue_capacity: usize,
}

impl Default for DuplicateLogConfig {
    fn default() -> Self {
        DuplicateLogConfig {
            directory: PathBuf::from("/tmp"),
            prefix: "route_duplicates_".to_string(),
            flush_threshold: 10_000,
            queue_capacity: 50_000,
        }
    }
}

impl DuplicateLogConfig {
    /// Timestamped file name for a log opened now.
    pub fn file_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.directory.join(format!("{}{}.log", self.prefix, stamp))
    }
}

/// What the writer did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateLogSummary {
    /// Set only if at least one record was flushed.
    pub path: Option<PathBuf>,
    pub records_written: u64,
    pub flushes: u32,
}

struct DuplicateLog {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    buffer: Vec<String>,
    flush_threshold: usize,
    summary: DuplicateLogSummary,
}

impl DuplicateLog {
    fn new(config: &DuplicateLogConfig) -> Self {
        DuplicateLog {
            path: config.file_path(),
            file: None,
            buffer: Vec::with_capacity(config.flush_threshold),
            flush_threshold: config.flush_threshold,
            summary: DuplicateLogSummary::default(),
        }
    }

    async fn push(&mut self, record: String) {
        self.buffer.push(record);
        if self.buffer.len() >= self.flush_threshold {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        // Opened on first flush so a run without duplicates leaves no file behind.
        if self.file.is_none() {
            match File::create(&self.path).await {
                Ok(file) => {
                    self.file = Some(BufWriter::new(file));
                    self.summary.path = Some(self.path.clone());
                }
                Err(e) => {
                    tracing::error!(
                        "Error creating duplicates file {}: {}",
                        self.path.display(),
                        e
                    );
                    self.buffer.clear();
                    return;
                }
            }
        }

        let Some(writer) = self.file.as_mut() else {
            return;
        };

        let mut written = 0u64;
        for record in self.buffer.drain(..) {
            if let Err(e) = writer.write_all(record.as_bytes()).await {
                tracing::error!("Error writing duplicate: {}", e);
                continue;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                tracing::error!("Error writing newline: {}", e);
                continue;
            }
            written += 1;
        }

        if let Err(e) = writer.flush().await {
            tracing::error!("Error flushing duplicates file: {}", e);
        }

        self.summary.records_written += written;
        self.summary.flushes += 1;
        tracing::debug!("Flushed {} duplicate records", written);
    }

    async fn finish(mut self) -> DuplicateLogSummary {
        self.flush().await;

        if let Some(mut writer) = self.file.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::error!("Error closing duplicates file: {}", e);
            }
            tracing::info!(
                "Duplicates written to: {} ({} records, {} flushes)",
                self.path.display(),
                self.summary.records_written,
                self.summary.flushes
            );
        }

        self.summary
    }
}

/// Consume records until shutdown is requested, then drain what is queued and close the file.
pub(crate) async fn run_writer(
    mut records: mpsc::Receiver<String>,
    shutdown: CancellationToken,
    config: DuplicateLogConfig,
) -> DuplicateLogSummary {
    let mut log = DuplicateLog::new(&config);
    let mut closing = false;

    loop {
        let next = if closing {
            records.recv().await
        } else {
            tokio::select! {
                record = records.recv() => record,
                _ = shutdown.cancelled() => {
                    // Refuse new sends; already queued records are still delivered.
                    records.close();
                    closing = true;
                    continue;
                }
            }
        };

        match next {
            Some(record) => log.push(record).await,
            None => break,
        }
    }

    log.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path, flush_threshold: usize) -> DuplicateLogConfig {
        DuplicateLogConfig {
            directory: dir.to_path_buf(),
            prefix: "dups_".to_string(),
            flush_threshold,
            queue_capacity: 64,
        }
    }

    #[test]
    fn test_file_path_is_timestamped() {
        let config = DuplicateLogConfig::default();
        let path = config.file_path();
        let name = path.file_name().unwrap().to_str().unwrap();

        assert!(path.starts_with("/tmp"));
        assert!(name.starts_with("route_duplicates_"));
        assert!(name.ends_with(".log"));
        // route_duplicates_YYYY-MM-DD_HH-MM-SS.log
        assert_eq!(name.len(), "route_duplicates_".len() + 19 + 4);
    }

    #[tokio::test]
    async fn test_no_records_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(run_writer(rx, shutdown.clone(), config(dir.path(), 4)));

        shutdown.cancel();
        let summary = writer.await.unwrap();
        drop(tx);

        assert_eq!(summary, DuplicateLogSummary::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drains_queue_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();

        for i in 0..10 {
            tx.send(format!("10.0.{}.0/24 via 10.8.0.1 dev tun0", i)).await.unwrap();
        }

        let writer = tokio::spawn(run_writer(rx, shutdown.clone(), config(dir.path(), 4)));
        shutdown.cancel();
        let summary = writer.await.unwrap();

        assert_eq!(summary.records_written, 10);
        // 4 + 4 on threshold, 2 on close
        assert_eq!(summary.flushes, 3);

        let contents = std::fs::read_to_string(summary.path.unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "10.0.0.0/24 via 10.8.0.1 dev tun0");

        assert!(tx.send("late".to_string()).await.is_err());
    }
}
