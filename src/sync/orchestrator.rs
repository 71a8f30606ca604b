use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accounts::{AccountStore, MailAccount};
use crate::config::SyncConfig;
use crate::error::{PersistenceError, SyncError};
use crate::mail::connector::{self, MailboxConnector, MailboxSession};
use crate::mail::decoder::MessageDecoder;
use crate::mail::lister;
use crate::publish::{ProgressPublisher, SyncEvent};
use crate::store::IngestionStore;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Connecting,
    Listing,
    Processing,
    Closing,
    Done,
    Failed,
}

/// Outcome of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

enum ItemOutcome {
    Ingested,
    Duplicate,
    Failed,
}

/// Executes one sync run for an account.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, account_id: Uuid, cancel: CancellationToken) -> Result<SyncReport, SyncError>;
}

/// Cancellation and deadline shared by every suspension point of a run.
struct RunLimits<'a> {
    cancel: &'a CancellationToken,
    deadline: Instant,
}

impl RunLimits<'_> {
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, SyncError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(SyncError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

/// Drives one run: connect, list, then decode/dedup/persist/notify each
/// pending message in turn, and finally close the session.
///
/// A failure to connect aborts the run. Failures on a single message are
/// logged and the loop moves on to the next identifier.
pub struct SyncOrchestrator {
    accounts: Arc<dyn AccountStore>,
    connector: Arc<dyn MailboxConnector>,
    store: Arc<dyn IngestionStore>,
    publisher: Arc<dyn ProgressPublisher>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        connector: Arc<dyn MailboxConnector>,
        store: Arc<dyn IngestionStore>,
        publisher: Arc<dyn ProgressPublisher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            accounts,
            connector,
            store,
            publisher,
            config,
        }
    }

    pub async fn sync_account(
        &self,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = std::time::Instant::now();
        let limits = RunLimits {
            cancel,
            deadline: Instant::now() + self.config.run_timeout(),
        };

        match self.execute(account_id, &limits).await {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                self.enter(account_id, SyncState::Done);
                tracing::info!(
                    "Sync of account {} finished: {} new, {} duplicate, {} failed of {} in {}ms",
                    account_id,
                    report.ingested,
                    report.duplicates,
                    report.failed,
                    report.total,
                    report.duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                self.enter(account_id, SyncState::Failed);
                tracing::error!("Sync of account {} failed: {}", account_id, err);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        account_id: Uuid,
        limits: &RunLimits<'_>,
    ) -> Result<SyncReport, SyncError> {
        let account = limits.guard(self.accounts.get(account_id)).await??;

        self.enter(account_id, SyncState::Connecting);
        let mut session = limits.guard(self.connector.open(&account)).await??;

        let outcome = self.drain(&account, session.as_mut(), limits).await;

        // The session is closed on every path once opened, cancellation included
        self.enter(account_id, SyncState::Closing);
        if tokio::time::timeout(CLOSE_TIMEOUT, connector::close(session))
            .await
            .is_err()
        {
            tracing::warn!("Closing mailbox session of account {} timed out", account_id);
        }

        outcome
    }

    async fn drain(
        &self,
        account: &MailAccount,
        session: &mut dyn MailboxSession,
        limits: &RunLimits<'_>,
    ) -> Result<SyncReport, SyncError> {
        self.enter(account.id, SyncState::Listing);
        let uids = limits.guard(lister::list_pending(&mut *session)).await?;
        let total = uids.len();
        let topic = self.config.topic_for(account.id);
        tracing::info!("{} pending message(s) in {}", total, account.address);

        self.enter(account.id, SyncState::Processing);
        let mut report = SyncReport {
            total,
            ..SyncReport::default()
        };
        let mut decoder = MessageDecoder::new(self.config.fetch_interval());

        for (index, uid) in uids.iter().enumerate() {
            let outcome = self
                .process(account.id, uid, &mut *session, &mut decoder, &topic, limits)
                .await?;
            match outcome {
                ItemOutcome::Ingested => report.ingested += 1,
                ItemOutcome::Duplicate => report.duplicates += 1,
                ItemOutcome::Failed => report.failed += 1,
            }

            self.notify(&topic, SyncEvent::progress(index + 1, total), limits)
                .await?;
        }

        Ok(report)
    }

    async fn process(
        &self,
        account_id: Uuid,
        uid: &str,
        session: &mut dyn MailboxSession,
        decoder: &mut MessageDecoder,
        topic: &str,
        limits: &RunLimits<'_>,
    ) -> Result<ItemOutcome, SyncError> {
        // Known identifiers are not fetched again
        match limits.guard(self.store.exists(account_id, uid)).await? {
            Ok(true) => {
                tracing::debug!("uid {} already stored, skipping", uid);
                return Ok(ItemOutcome::Duplicate);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("Duplicate check for uid {} failed, skipping: {}", uid, err);
                return Ok(ItemOutcome::Failed);
            }
        }

        let decoded = match limits.guard(decoder.fetch_and_decode(session, uid)).await? {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!("Skipping uid {}: {}", uid, err);
                return Ok(ItemOutcome::Failed);
            }
        };

        let stored = match limits.guard(self.store.persist(account_id, &decoded)).await? {
            Ok(stored) => stored,
            Err(PersistenceError::Duplicate { .. }) => {
                tracing::debug!("uid {} was stored concurrently", uid);
                return Ok(ItemOutcome::Duplicate);
            }
            Err(err) => {
                tracing::warn!("Message uid {} lost for this run: {}", uid, err);
                return Ok(ItemOutcome::Failed);
            }
        };

        self.notify(topic, SyncEvent::email(&stored), limits).await?;
        Ok(ItemOutcome::Ingested)
    }

    /// Publish failures never interrupt a run.
    async fn notify(
        &self,
        topic: &str,
        event: SyncEvent,
        limits: &RunLimits<'_>,
    ) -> Result<(), SyncError> {
        if let Err(err) = limits.guard(self.publisher.publish(topic, event)).await? {
            tracing::debug!("Event not delivered: {}", err);
        }
        Ok(())
    }

    fn enter(&self, account_id: Uuid, state: SyncState) {
        tracing::debug!("Sync of account {} -> {:?}", account_id, state);
    }
}

#[async_trait]
impl SyncRunner for SyncOrchestrator {
    async fn run(&self, account_id: Uuid, cancel: CancellationToken) -> Result<SyncReport, SyncError> {
        self.sync_account(account_id, &cancel).await
    }
}
