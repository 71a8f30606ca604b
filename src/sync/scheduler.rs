//! Bounded run queue served by a fixed pool of workers.
//!
//! At most one run per account is queued or running at any time. Each run's
//! outcome is kept so callers can poll it after the fact.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ScheduleError;
use crate::sync::orchestrator::{SyncReport, SyncRunner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded { report: SyncReport },
    Failed { reason: String },
}

struct Shared {
    runner: Arc<dyn SyncRunner>,
    in_flight: Mutex<HashSet<Uuid>>,
    statuses: Mutex<HashMap<Uuid, RunStatus>>,
    shutdown: CancellationToken,
}

/// A poisoned lock only means another worker panicked mid-update; the sets
/// stay usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_status(&self, account_id: Uuid, status: RunStatus) {
        lock(&self.statuses).insert(account_id, status);
    }
}

/// Releases the account's single-flight slot however the run ends.
struct InFlightGuard {
    shared: Arc<Shared>,
    account_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.shared.in_flight).remove(&self.account_id);
    }
}

pub struct SyncScheduler {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Uuid>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn start(runner: Arc<dyn SyncRunner>, workers: usize, capacity: usize) -> Self {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared {
            runner,
            in_flight: Mutex::new(HashSet::new()),
            statuses: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        let handles = (0..workers.max(1))
            .map(|worker_id| tokio::spawn(worker(worker_id, shared.clone(), receiver.clone())))
            .collect();

        tracing::info!(
            "Sync scheduler started ({} worker(s), queue capacity {})",
            workers.max(1),
            capacity.max(1)
        );

        Self {
            shared,
            queue,
            workers: tokio::sync::Mutex::new(handles),
        }
    }

    /// Queue a run for an account unless one is already queued or running.
    pub fn enqueue(&self, account_id: Uuid) -> Result<(), ScheduleError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ScheduleError::QueueClosed);
        }

        let previous = {
            let mut in_flight = lock(&self.shared.in_flight);
            if !in_flight.insert(account_id) {
                return Err(ScheduleError::AlreadyRunning(account_id));
            }
            // Status is set under the same lock so a fast worker cannot be overwritten
            lock(&self.shared.statuses).insert(account_id, RunStatus::Queued)
        };

        match self.queue.try_send(account_id) {
            Ok(()) => {
                tracing::debug!("Queued sync for account {}", account_id);
                Ok(())
            }
            Err(err) => {
                // The last finished run stays visible
                {
                    let mut statuses = lock(&self.shared.statuses);
                    match previous {
                        Some(status) => statuses.insert(account_id, status),
                        None => statuses.remove(&account_id),
                    };
                }
                lock(&self.shared.in_flight).remove(&account_id);
                match err {
                    TrySendError::Full(_) => Err(ScheduleError::QueueFull),
                    TrySendError::Closed(_) => Err(ScheduleError::QueueClosed),
                }
            }
        }
    }

    /// Latest known status of an account's run.
    pub fn status(&self, account_id: Uuid) -> Option<RunStatus> {
        lock(&self.shared.statuses).get(&account_id).cloned()
    }

    /// Cancel running syncs and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!("Sync worker ended abnormally: {}", err);
            }
        }

        let mut statuses = lock(&self.shared.statuses);
        for status in statuses.values_mut() {
            if *status == RunStatus::Queued {
                *status = RunStatus::Failed {
                    reason: ScheduleError::QueueClosed.to_string(),
                };
            }
        }
        tracing::info!("Sync scheduler stopped");
    }
}

async fn worker(
    worker_id: usize,
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => None,
            next = async { receiver.lock().await.recv().await } => next,
        };
        let Some(account_id) = next else {
            break;
        };

        let _slot = InFlightGuard {
            shared: shared.clone(),
            account_id,
        };
        shared.set_status(account_id, RunStatus::Running);
        tracing::debug!("Worker {} picked up account {}", worker_id, account_id);

        let status = match shared
            .runner
            .run(account_id, shared.shutdown.child_token())
            .await
        {
            Ok(report) => RunStatus::Succeeded { report },
            Err(err) => RunStatus::Failed {
                reason: err.to_string(),
            },
        };
        shared.set_status(account_id, status);
    }

    tracing::debug!("Sync worker {} exiting", worker_id);
}
