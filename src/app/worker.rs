//! Settlement worker pool and recovery crank.
//!
//! Jobs are transfer ids on a bounded queue. A fixed number of workers pull
//! from it, so outbound provider calls stay bounded. What to do with a transfer
//! is decided from its persisted state, and every in-flight transfer carries
//! `next_attempt_at`, so the crank can rebuild the queue after a restart.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::ConfigError;

use super::service::AppService;
use super::settlement::{SettlementStep, parse_env};

/// Worker pool and crank configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Concurrent settlement workers
    pub workers: usize,
    pub queue_capacity: usize,
    /// How often the crank looks for due transfers
    pub crank_interval: Duration,
    pub crank_batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 4,
            queue_capacity: 1024,
            crank_interval: Duration::from_secs(15),
            crank_batch_size: 50,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled = std::env::var("ENABLE_BACKGROUND_WORKER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);
        let workers: usize = parse_env("SETTLEMENT_WORKERS", defaults.workers)?;
        let queue_capacity: usize =
            parse_env("SETTLEMENT_QUEUE_CAPACITY", defaults.queue_capacity)?;
        if workers == 0 || queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SETTLEMENT_WORKERS".to_string(),
                message: "worker count and queue capacity must be at least 1".to_string(),
            });
        }
        let crank_secs: u64 = parse_env("CRANK_INTERVAL_SECS", defaults.crank_interval.as_secs())?;
        if crank_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CRANK_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            enabled,
            workers,
            queue_capacity,
            crank_interval: Duration::from_secs(crank_secs),
            crank_batch_size: parse_env("CRANK_BATCH_SIZE", defaults.crank_batch_size)?,
        })
    }
}

/// Producer side of the settlement queue
#[derive(Clone)]
pub struct SettlementQueue {
    sender: mpsc::Sender<String>,
    in_flight: Arc<DashSet<String>>,
}

/// Consumer side, handed to [`spawn_worker`]
pub struct SettlementReceiver {
    receiver: mpsc::Receiver<String>,
    in_flight: Arc<DashSet<String>>,
}

impl SettlementQueue {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, SettlementReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let in_flight = Arc::new(DashSet::new());
        (
            Self {
                sender,
                in_flight: Arc::clone(&in_flight),
            },
            SettlementReceiver {
                receiver,
                in_flight,
            },
        )
    }

    /// Queue a transfer unless it is already queued or being worked on.
    /// Never blocks; a full queue is drained later by the crank.
    pub fn enqueue(&self, transfer_id: &str) -> bool {
        if !self.in_flight.insert(transfer_id.to_string()) {
            return false;
        }
        match self.sender.try_send(transfer_id.to_string()) {
            Ok(()) => true,
            Err(e) => {
                self.in_flight.remove(transfer_id);
                warn!(id = %transfer_id, error = %e, "Settlement queue rejected job");
                false
            }
        }
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}

/// Spawn the settlement worker pool.
/// Returns a handle and a shutdown sender.
pub fn spawn_worker(
    service: Arc<AppService>,
    receiver: SettlementReceiver,
    config: WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let SettlementReceiver {
        receiver,
        in_flight,
    } = receiver;
    let receiver = Arc::new(Mutex::new(receiver));

    let handle = tokio::spawn(async move {
        if !config.enabled {
            info!("Settlement workers disabled");
            return;
        }
        info!(
            workers = config.workers,
            capacity = config.queue_capacity,
            "Settlement workers started"
        );

        let workers: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&service),
                    Arc::clone(&receiver),
                    Arc::clone(&in_flight),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Settlement worker panicked");
            }
        }
        info!("Settlement workers stopped");
    });

    (handle, shutdown_tx)
}

async fn run_worker(
    worker_id: usize,
    service: Arc<AppService>,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    in_flight: Arc<DashSet<String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => None,
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(transfer_id) = next else {
            break;
        };

        match service.settle_transfer(&transfer_id).await {
            Ok(SettlementStep::NotDue | SettlementStep::Skipped) => {
                debug!(worker = worker_id, id = %transfer_id, "Nothing to do");
            }
            Ok(step) => {
                debug!(worker = worker_id, id = %transfer_id, step = ?step, "Settlement step done");
            }
            Err(e) => {
                // Deferred by settle_transfer; the crank re-queues it once due
                error!(worker = worker_id, id = %transfer_id, error = ?e, "Settlement step failed");
            }
        }
        in_flight.remove(&transfer_id);
    }
}

/// Spawn the recovery crank: re-queues due transfers at startup and on an interval.
/// Returns a handle and a shutdown sender.
pub fn spawn_crank(
    service: Arc<AppService>,
    config: WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !config.enabled {
            return;
        }
        // First tick fires immediately: startup recovery
        let mut interval = tokio::time::interval(config.crank_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Recovery crank shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = service.enqueue_due_transfers(config.crank_batch_size).await {
                        error!(error = ?e, "Recovery crank failed to load due transfers");
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
