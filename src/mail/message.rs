use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attachment extracted from a MIME part.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// Attachment metadata as stored on the message row and sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub filename: String,
}

/// A fetched message decoded into the fields the pipeline stores.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Protocol-assigned identifier, unique within the account's mailbox
    pub uid: String,
    pub sender: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Plain text if the message has any, otherwise the HTML markup
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl DecodedMessage {
    pub fn files(&self) -> Vec<FileMeta> {
        self.attachments
            .iter()
            .map(|attachment| FileMeta {
                filename: attachment.filename.clone(),
            })
            .collect()
    }
}
