//! In-memory fakes and fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::accounts::{AccountStore, MailAccount};
use crate::error::{AccountError, ConnectError, FetchError, ListError, PersistenceError, PublishError};
use crate::mail::connector::{MailboxConnector, MailboxSession};
use crate::mail::message::DecodedMessage;
use crate::publish::{ProgressPublisher, SyncEvent};
use crate::store::{IngestionStore, StoredMessage};

pub async fn test_db() -> DatabaseConnection {
    let db = crate::db::connect("sqlite::memory:").await.unwrap();
    crate::migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub fn account(provider: &str) -> MailAccount {
    MailAccount {
        id: Uuid::new_v4(),
        provider: provider.to_string(),
        address: "user@example.com".to_string(),
        password_encrypted: "secret".to_string(),
    }
}

pub fn raw_message(uid: &str) -> String {
    format!(
        "Subject: Subject {uid}\r\n\
         From: sender@example.com\r\n\
         Date: Fri, 1 Mar 2024 09:30:00 +0000\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Body of {uid}"
    )
}

pub fn decoded(uid: &str) -> DecodedMessage {
    crate::mail::decoder::decode_message(uid, raw_message(uid).as_bytes(), Utc::now()).unwrap()
}

pub fn stored(uid: &str) -> StoredMessage {
    StoredMessage {
        id: Uuid::new_v4(),
        account_id: Uuid::new_v4(),
        uid: uid.to_string(),
        email_from: Some("sender@example.com".to_string()),
        title: Some(format!("Subject {}", uid)),
        dispatch_date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        receipt_date: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 5).unwrap(),
        text: Some(format!("Body of {}", uid)),
        msg_read: true,
        files: Some(serde_json::json!([])),
        created_at: Utc::now(),
    }
}

/// What the server-side mailbox looks like and how it misbehaves.
#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    pub uids: Vec<String>,
    pub fail_open: bool,
    pub fail_search: bool,
    pub fail_fetch: HashSet<String>,
    pub hang_fetch: bool,
}

/// Commands observed across every session opened by a fake connector.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub opens: usize,
    pub fetched: Vec<String>,
    pub fetch_times: Vec<Instant>,
    pub logouts: usize,
}

pub struct FakeSession {
    pub mailbox: FakeMailbox,
    pub log: Arc<Mutex<SessionLog>>,
}

impl FakeSession {
    pub fn with_uids(uids: &[&str]) -> Self {
        Self {
            mailbox: FakeMailbox {
                uids: uids.iter().map(|uid| uid.to_string()).collect(),
                ..FakeMailbox::default()
            },
            log: Arc::default(),
        }
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().fetch_times.clone()
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn search_unseen(&mut self) -> Result<Vec<String>, ListError> {
        if self.mailbox.fail_search {
            return Err(ListError("BAD search".to_string()));
        }
        Ok(self.mailbox.uids.clone())
    }

    async fn fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, FetchError> {
        {
            let mut log = self.log.lock().unwrap();
            log.fetched.push(uid.to_string());
            log.fetch_times.push(Instant::now());
        }

        if self.mailbox.hang_fetch {
            std::future::pending::<()>().await;
        }
        if self.mailbox.fail_fetch.contains(uid) {
            return Err(FetchError::Command {
                uid: uid.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(raw_message(uid).into_bytes())
    }

    async fn logout(&mut self) -> Result<(), ConnectError> {
        self.log.lock().unwrap().logouts += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub mailbox: Mutex<FakeMailbox>,
    pub log: Arc<Mutex<SessionLog>>,
}

impl FakeConnector {
    pub fn with_uids(uids: &[&str]) -> Self {
        let connector = Self::default();
        connector.mailbox.lock().unwrap().uids = uids.iter().map(|uid| uid.to_string()).collect();
        connector
    }

    pub fn set_uids(&self, uids: &[&str]) {
        self.mailbox.lock().unwrap().uids = uids.iter().map(|uid| uid.to_string()).collect();
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SessionLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn open(&self, _account: &MailAccount) -> Result<Box<dyn MailboxSession>, ConnectError> {
        let mailbox = self.mailbox.lock().unwrap().clone();
        if mailbox.fail_open {
            return Err(ConnectError::Auth("invalid credentials".to_string()));
        }
        self.log.lock().unwrap().opens += 1;
        Ok(Box::new(FakeSession {
            mailbox,
            log: self.log.clone(),
        }))
    }
}

pub struct FakeAccounts {
    accounts: HashMap<Uuid, MailAccount>,
}

impl FakeAccounts {
    pub fn with(accounts: &[&MailAccount]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|account| (account.id, (*account).clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl AccountStore for FakeAccounts {
    async fn get(&self, id: Uuid) -> Result<MailAccount, AccountError> {
        self.accounts.get(&id).cloned().ok_or(AccountError::NotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub messages: Mutex<Vec<StoredMessage>>,
    pub fail_persist: Mutex<HashSet<String>>,
    /// Stored by a concurrent writer between `exists` and `persist`
    pub race_on_persist: Mutex<HashSet<String>>,
    pub fail_exists: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn uids(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.uid.clone())
            .collect()
    }
}

#[async_trait]
impl IngestionStore for MemoryStore {
    async fn exists(&self, account_id: Uuid, uid: &str) -> Result<bool, PersistenceError> {
        if self.fail_exists.lock().unwrap().contains(uid) {
            return Err(PersistenceError::MissingBlob("database unavailable".to_string()));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.account_id == account_id && message.uid == uid))
    }

    async fn persist(
        &self,
        account_id: Uuid,
        decoded: &DecodedMessage,
    ) -> Result<StoredMessage, PersistenceError> {
        if self.fail_persist.lock().unwrap().contains(&decoded.uid) {
            return Err(PersistenceError::MissingBlob("disk full".to_string()));
        }
        let raced = self.race_on_persist.lock().unwrap().contains(&decoded.uid);
        if raced || self.exists(account_id, &decoded.uid).await? {
            return Err(PersistenceError::Duplicate {
                account_id,
                uid: decoded.uid.clone(),
            });
        }

        let message = StoredMessage {
            id: Uuid::new_v4(),
            account_id,
            uid: decoded.uid.clone(),
            email_from: Some(decoded.sender.clone()),
            title: Some(decoded.subject.clone()),
            dispatch_date: decoded.sent_at,
            receipt_date: decoded.received_at,
            text: Some(decoded.body.clone()),
            msg_read: true,
            files: serde_json::to_value(decoded.files()).ok(),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(String, SyncEvent)>>,
}

impl RecordingPublisher {
    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, event)| match event {
                SyncEvent::Progress { progress } => Some((progress.count, progress.total_messages)),
                _ => None,
            })
            .collect()
    }

    pub fn email_titles(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, event)| match event {
                SyncEvent::Email { email_data } => Some(email_data.title.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn topics(&self) -> HashSet<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl ProgressPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, event: SyncEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event));
        Ok(())
    }
}
