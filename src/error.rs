//! Error types for each ingestion stage.
//!
//! Connector and account errors abort a run. Every other stage error is
//! scoped to a single message and absorbed by the orchestrator.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unsupported mail provider '{0}'")]
    UnsupportedProvider(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("login failed: {0}")]
    Auth(String),
    #[error("could not select mailbox '{mailbox}': {reason}")]
    Select { mailbox: String, reason: String },
    #[error("logout failed: {0}")]
    Logout(String),
}

#[derive(Debug, Error)]
#[error("mailbox search failed: {0}")]
pub struct ListError(pub String);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch of uid {uid} failed: {reason}")]
    Command { uid: String, reason: String },
    #[error("server returned no body for uid {0}")]
    EmptyBody(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed MIME message: {0}")]
    Mime(#[from] mailparse::MailParseError),
}

/// Failure of the fetch-and-decode step for one identifier.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("message uid {uid} already stored for account {account_id}")]
    Duplicate { account_id: Uuid, uid: String },
    #[error("blob storage failed: {0}")]
    Blob(#[from] std::io::Error),
    #[error("unknown blob '{0}'")]
    MissingBlob(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no subscribers on topic '{0}'")]
    NoSubscribers(String),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("mail account {0} not found")]
    NotFound(Uuid),
    #[error("invalid mail address '{0}'")]
    InvalidAddress(String),
    #[error("mail account '{0}' already registered")]
    AlreadyRegistered(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Run-level failure. Only these reach whoever scheduled the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("sync run cancelled")]
    Cancelled,
    #[error("sync run exceeded its deadline")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("a sync for account {0} is already queued or running")]
    AlreadyRunning(Uuid),
    #[error("sync queue is full")]
    QueueFull,
    #[error("sync queue is shut down")]
    QueueClosed,
}
