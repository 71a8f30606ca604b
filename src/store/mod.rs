//! Duplicate-safe persistence of decoded messages.
//!
//! Attachment payloads go to the blob store first; the message row and all
//! of its file rows are then inserted in a single transaction. A message row
//! therefore never exists without every attachment it was decoded with. A
//! crash between the two steps can only leave unreferenced blobs behind.

pub mod blob;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entities::{message, message_file};
use crate::error::PersistenceError;
use crate::mail::message::DecodedMessage;
use blob::BlobStore;

pub type StoredMessage = message::Model;

#[async_trait]
pub trait IngestionStore: Send + Sync {
    async fn exists(&self, account_id: Uuid, uid: &str) -> Result<bool, PersistenceError>;

    /// Insert a message that is not stored yet. Never updates.
    async fn persist(
        &self,
        account_id: Uuid,
        message: &DecodedMessage,
    ) -> Result<StoredMessage, PersistenceError>;
}

pub struct DbIngestionStore {
    db: DatabaseConnection,
    blobs: Arc<dyn BlobStore>,
}

impl DbIngestionStore {
    pub fn new(db: DatabaseConnection, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    /// One stored attachment row
    pub async fn file(&self, file_id: Uuid) -> Result<Option<message_file::Model>, DbErr> {
        message_file::Entity::find_by_id(file_id).one(&self.db).await
    }

    #[cfg(test)]
    pub async fn files_of(&self, message_id: Uuid) -> Result<Vec<message_file::Model>, DbErr> {
        message_file::Entity::find()
            .filter(message_file::Column::MessageId.eq(message_id))
            .all(&self.db)
            .await
    }
}

#[async_trait]
impl IngestionStore for DbIngestionStore {
    async fn exists(&self, account_id: Uuid, uid: &str) -> Result<bool, PersistenceError> {
        let count = message::Entity::find()
            .filter(message::Column::AccountId.eq(account_id))
            .filter(message::Column::Uid.eq(uid))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn persist(
        &self,
        account_id: Uuid,
        decoded: &DecodedMessage,
    ) -> Result<StoredMessage, PersistenceError> {
        let mut blob_refs = Vec::with_capacity(decoded.attachments.len());
        for attachment in &decoded.attachments {
            blob_refs.push(self.blobs.put(&attachment.payload).await?);
        }

        let now = Utc::now();
        let files = serde_json::to_value(decoded.files()).ok();

        let txn = self.db.begin().await?;

        let record = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account_id),
            uid: Set(decoded.uid.clone()),
            email_from: Set(Some(decoded.sender.clone())),
            title: Set(Some(decoded.subject.clone())),
            dispatch_date: Set(decoded.sent_at),
            receipt_date: Set(decoded.received_at),
            text: Set(Some(decoded.body.clone())),
            msg_read: Set(true),
            files: Set(files),
            created_at: Set(now),
        };

        let stored = record.insert(&txn).await.map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => PersistenceError::Duplicate {
                account_id,
                uid: decoded.uid.clone(),
            },
            _ => PersistenceError::Database(err),
        })?;

        for (attachment, blob_ref) in decoded.attachments.iter().zip(blob_refs) {
            message_file::ActiveModel {
                id: Set(Uuid::new_v4()),
                message_id: Set(stored.id),
                filename: Set(attachment.filename.clone()),
                content_type: Set(attachment.content_type.clone()),
                blob_ref: Set(blob_ref),
                size: Set(attachment.payload.len() as i64),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        tracing::info!(
            "Stored message uid {} for account {} ({} attachment(s))",
            stored.uid,
            account_id,
            decoded.attachments.len()
        );
        Ok(stored)
    }
}
