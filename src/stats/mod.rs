// Stats module - outcome counters and the duplicate-route log

pub mod duplicates;

use std::fmt::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::routes::classify::RouteErrorKind;
use duplicates::{DuplicateLogConfig, DuplicateLogSummary};

/// Per-outcome counters. Only ever incremented.
#[derive(Debug, Default)]
pub struct Stats {
    success: AtomicU64,
    already_exists: AtomicU64,
    network_unreachable: AtomicU64,
    operation_not_permitted: AtomicU64,
    invalid_argument: AtomicU64,
    no_route_to_host: AtomicU64,
    unknown: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub success: u64,
    pub already_exists: u64,
    pub network_unreachable: u64,
    pub operation_not_permitted: u64,
    pub invalid_argument: u64,
    pub no_route_to_host: u64,
    pub unknown: u64,
}

impl Stats {
    #[inline]
    fn increment_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the counter for `kind`. `NoSuchDevice` is fatal and has no counter.
    fn increment_error(&self, kind: RouteErrorKind) -> bool {
        let counter = match kind {
            RouteErrorKind::AlreadyExists => &self.already_exists,
            RouteErrorKind::NetworkUnreachable => &self.network_unreachable,
            RouteErrorKind::OperationNotPermitted => &self.operation_not_permitted,
            RouteErrorKind::InvalidArgument => &self.invalid_argument,
            RouteErrorKind::NoRouteToHost => &self.no_route_to_host,
            RouteErrorKind::Unknown => &self.unknown,
            RouteErrorKind::NoSuchDevice => return false,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            already_exists: self.already_exists.load(Ordering::Relaxed),
            network_unreachable: self.network_unreachable.load(Ordering::Relaxed),
            operation_not_permitted: self.operation_not_permitted.load(Ordering::Relaxed),
            invalid_argument: self.invalid_argument.load(Ordering::Relaxed),
            no_route_to_host: self.no_route_to_host.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.success
            + self.already_exists
            + self.network_unreachable
            + self.operation_not_permitted
            + self.invalid_argument
            + self.no_route_to_host
            + self.unknown
    }

    /// Human-readable summary. Error lines appear only when nonzero.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("========== Statistics ==========\n");
        let _ = writeln!(out, "Successfully added: {}", self.success);
        let _ = writeln!(out, "Already existed (skipped): {}", self.already_exists);

        let errors = [
            ("Network unreachable", self.network_unreachable),
            ("Operation not permitted", self.operation_not_permitted),
            ("Invalid argument", self.invalid_argument),
            ("No route to host", self.no_route_to_host),
            ("Unknown errors", self.unknown),
        ];
        for (label, count) in errors {
            if count > 0 {
                let _ = writeln!(out, "{}: {}", label, count);
            }
        }

        let _ = writeln!(out, "Total processed: {}", self.total());
        out.push_str("================================");
        out
    }
}

/// Process-wide sink for route outcomes.
///
/// Counters are lock-free. Duplicate descriptions go through a bounded queue to a
/// single writer task; producers wait when the queue is full rather than drop.
pub struct Recorder {
    stats: Stats,
    duplicates: mpsc::Sender<String>,
    shutdown: CancellationToken,
    writer: Mutex<Option<JoinHandle<DuplicateLogSummary>>>,
    summary: OnceLock<DuplicateLogSummary>,
}

impl Recorder {
    /// Create the recorder and start its writer. Must be called inside a tokio runtime.
    pub fn spawn(config: DuplicateLogConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(duplicates::run_writer(rx, shutdown.clone(), config));

        Recorder {
            stats: Stats::default(),
            duplicates: tx,
            shutdown,
            writer: Mutex::new(Some(writer)),
            summary: OnceLock::new(),
        }
    }

    pub fn record_success(&self) {
        self.stats.increment_success();
    }

    /// Count an already-existing route and queue its description for the log.
    pub async fn record_duplicate(&self, record: String) {
        self.stats.increment_error(RouteErrorKind::AlreadyExists);

        if let Err(e) = self.duplicates.send(record).await {
            tracing::warn!("Duplicate log closed, dropping record: {}", e.0);
        }
    }

    pub fn record_error(&self, kind: RouteErrorKind) {
        if !self.stats.increment_error(kind) {
            tracing::error!("{} outcome has no counter", kind);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn report(&self) -> String {
        self.snapshot().render()
    }

    /// Stop accepting duplicates, flush what is buffered and wait for the writer to exit.
    ///
    /// Safe to call more than once and from several tasks; every caller returns
    /// only after the writer has finished.
    pub async fn close(&self) -> Option<&DuplicateLogSummary> {
        self.shutdown.cancel();

        let mut writer = self.writer.lock().await;
        if let Some(handle) = writer.take() {
            match handle.await {
                Ok(summary) => {
                    let _ = self.summary.set(summary);
                }
                Err(e) => tracing::error!("Duplicate writer task failed: {}", e),
            }
        }

        self.summary.get()
    }
}
