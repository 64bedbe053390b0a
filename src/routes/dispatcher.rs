// Bounded fan-out of route installations
//
// One batch at a time: every destination takes a slot from a fixed-size
// semaphore before its worker is spawned, so at most `concurrency` route-add
// calls are ever in flight. The call returns only after every worker has
// finished.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::RouteTarget;
use super::backend::RouteBackend;
use super::classify::{Outcome, RouteErrorKind, classify};
use super::installer::install;
use crate::error::{AppError, AppResult};
use crate::stats::Recorder;

/// Destinations read from one route file.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Used for logging only.
    pub name: String,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub name: String,
    /// Destinations handed to a worker. Less than the batch size only when interrupted.
    pub dispatched: usize,
    pub interrupted: bool,
}

pub struct Dispatcher<B> {
    backend: Arc<B>,
    recorder: Arc<Recorder>,
    slots: Arc<Semaphore>,
    debug: bool,
    shutdown: CancellationToken,
}

impl<B: RouteBackend> Dispatcher<B> {
    /// `concurrency` must be at least 1.
    pub fn new(
        backend: Arc<B>,
        recorder: Arc<Recorder>,
        concurrency: usize,
        debug: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Dispatcher {
            backend,
            recorder,
            slots: Arc::new(Semaphore::new(concurrency)),
            debug,
            shutdown,
        }
    }

    /// Parse the gateway and look up the interface index.
    pub async fn resolve(&self, gateway: &str, interface: &str) -> AppResult<RouteTarget> {
        let gateway: IpAddr = gateway
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidGateway(gateway.to_string()))?;

        let interface_index = match self.backend.link_index(interface).await {
            Ok(index) => index,
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    || classify(&e) == RouteErrorKind::NoSuchDevice =>
            {
                return Err(AppError::InterfaceNotFound(interface.to_string()));
            }
            Err(e) => {
                return Err(AppError::InterfaceLookup {
                    interface: interface.to_string(),
                    source: e,
                });
            }
        };

        Ok(RouteTarget {
            gateway,
            interface: interface.to_string(),
            interface_index,
        })
    }

    /// Install every destination of `batch` and wait for all of them.
    ///
    /// Fails before dispatching anything if the gateway or interface cannot be
    /// resolved, and fails after draining in-flight work if the interface
    /// disappears mid-batch. A shutdown request stops dispatching and the
    /// report is marked interrupted.
    pub async fn run(
        &self,
        batch: &Batch,
        gateway: &str,
        interface: &str,
    ) -> AppResult<BatchReport> {
        let target = Arc::new(self.resolve(gateway, interface).await?);

        // Raised by a worker that sees the device vanish, or by process shutdown.
        let abort = self.shutdown.child_token();
        let mut workers = JoinSet::new();
        let mut dispatched = 0;
        let mut device_vanished = false;

        tracing::debug!(
            "Dispatching {} destinations from {} via {} dev {}",
            batch.destinations.len(),
            batch.name,
            target.gateway,
            target.interface
        );

        for destination in &batch.destinations {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => permit,
            };
            // Slots are never closed.
            let Ok(permit) = permit else { break };

            let backend = self.backend.clone();
            let recorder = self.recorder.clone();
            let target = target.clone();
            let abort = abort.clone();
            let destination = destination.clone();
            let debug = self.debug;

            workers.spawn(async move {
                let _permit = permit;
                process(&*backend, &recorder, &destination, &target, debug, &abort).await
            });
            dispatched += 1;

            while let Some(result) = workers.try_join_next() {
                device_vanished |= self.reap(result);
            }
        }

        while let Some(result) = workers.join_next().await {
            device_vanished |= self.reap(result);
        }

        if device_vanished {
            return Err(AppError::DeviceVanished(target.interface.clone()));
        }

        Ok(BatchReport {
            name: batch.name.clone(),
            dispatched,
            interrupted: self.shutdown.is_cancelled(),
        })
    }

    /// Returns true if the worker hit the fatal no-such-device condition.
    fn reap(&self, result: Result<Outcome, JoinError>) -> bool {
        match result {
            Ok(outcome) => outcome == Err(RouteErrorKind::NoSuchDevice),
            Err(e) => {
                // The outcome was never recorded; keep the totals whole.
                tracing::error!("Route worker failed: {}", e);
                self.recorder.record_error(RouteErrorKind::Unknown);
                false
            }
        }
    }
}

async fn process<B: RouteBackend>(
    backend: &B,
    recorder: &Recorder,
    destination: &str,
    target: &RouteTarget,
    debug: bool,
    abort: &CancellationToken,
) -> Outcome {
    let outcome = install(backend, destination, target).await;

    match outcome {
        Ok(()) => recorder.record_success(),
        Err(RouteErrorKind::AlreadyExists) => {
            recorder.record_duplicate(target.describe(destination)).await
        }
        Err(RouteErrorKind::NoSuchDevice) => {
            tracing::error!(
                "Configuration error: interface '{}' does not exist (while adding {})",
                target.interface,
                destination
            );
            abort.cancel();
        }
        Err(kind) => {
            recorder.record_error(kind);
            if debug {
                tracing::warn!(
                    "Error adding route for {} via {} dev {}: {}",
                    destination,
                    target.gateway,
                    target.interface,
                    kind
                );
            }
        }
    }

    outcome
}
