//! Progress events and the topic hub that fans them out to subscribers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::PublishError;
use crate::mail::message::FileMeta;
use crate::store::StoredMessage;

const PREVIEW_CHARS: usize = 50;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    ConnectionEstablished { message: String },
    Email { email_data: EmailPreview },
    Progress { progress: SyncProgress },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPreview {
    pub email_from: String,
    pub title: String,
    pub dispatch_date: String,
    pub receipt_date: String,
    pub text: String,
    pub files: Vec<FileMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub count: usize,
    pub total_messages: usize,
}

impl SyncEvent {
    pub fn email(message: &StoredMessage) -> Self {
        SyncEvent::Email {
            email_data: EmailPreview::from(message),
        }
    }

    pub fn progress(count: usize, total_messages: usize) -> Self {
        SyncEvent::Progress {
            progress: SyncProgress {
                count,
                total_messages,
            },
        }
    }
}

impl From<&StoredMessage> for EmailPreview {
    fn from(message: &StoredMessage) -> Self {
        let files = message
            .files
            .clone()
            .and_then(|files| serde_json::from_value(files).ok())
            .unwrap_or_default();

        Self {
            email_from: message.email_from.clone().unwrap_or_default(),
            title: preview(message.title.as_deref().unwrap_or_default()),
            dispatch_date: message.dispatch_date.format(DATE_FORMAT).to_string(),
            receipt_date: message.receipt_date.format(DATE_FORMAT).to_string(),
            text: preview(message.text.as_deref().unwrap_or_default()),
            files,
        }
    }
}

/// First 50 characters (not bytes)
fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Fire-and-forget publication to a named topic.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: SyncEvent) -> Result<(), PublishError>;
}

type Topics = Arc<Mutex<HashMap<String, broadcast::Sender<SyncEvent>>>>;

fn lock_topics(topics: &Topics) -> MutexGuard<'_, HashMap<String, broadcast::Sender<SyncEvent>>> {
    topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process pub/sub: one broadcast channel per topic.
///
/// Slow subscribers lose the oldest events rather than slowing publishers.
/// A topic lives only as long as it has subscribers.
pub struct TopicHub {
    capacity: usize,
    greeting: String,
    topics: Topics,
}

impl TopicHub {
    pub fn new(capacity: usize, greeting: impl Into<String>) -> Self {
        Self {
            capacity,
            greeting: greeting.into(),
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join a topic. The first event received is always the greeting.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = lock_topics(&self.topics);
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        tracing::debug!("Subscriber joined topic '{}'", topic);
        Subscription {
            greeting: Some(SyncEvent::ConnectionEstablished {
                message: self.greeting.clone(),
            }),
            receiver: sender.subscribe(),
            topic: topic.to_string(),
            topics: self.topics.clone(),
        }
    }
}

#[async_trait]
impl ProgressPublisher for TopicHub {
    async fn publish(&self, topic: &str, event: SyncEvent) -> Result<(), PublishError> {
        let sender = lock_topics(&self.topics)
            .get(topic)
            .cloned()
            .ok_or_else(|| PublishError::NoSubscribers(topic.to_string()))?;

        sender
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers(topic.to_string()))
    }
}

pub struct Subscription {
    greeting: Option<SyncEvent>,
    receiver: broadcast::Receiver<SyncEvent>,
    topic: String,
    topics: Topics,
}

impl Subscription {
    /// Next event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        if let Some(greeting) = self.greeting.take() {
            return Some(greeting);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Receivers are only created under this lock, so our own receiver is
        // the last one exactly when the count is 1
        let mut topics = lock_topics(&self.topics);
        let last = topics
            .get(&self.topic)
            .is_some_and(|sender| sender.receiver_count() <= 1);
        if last {
            topics.remove(&self.topic);
            tracing::debug!("Topic '{}' has no subscribers left", self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stored;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let progress = serde_json::to_value(SyncEvent::progress(1, 3)).unwrap();
        assert_eq!(
            progress,
            json!({"type": "progress", "progress": {"count": 1, "total_messages": 3}})
        );

        let greeting = serde_json::to_value(SyncEvent::ConnectionEstablished {
            message: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(greeting, json!({"type": "connection_established", "message": "hi"}));
    }

    #[test]
    fn test_email_preview() {
        let mut message = stored("5");
        message.title = Some("é".repeat(60));
        message.text = Some("x".repeat(80));
        message.files = Some(json!([{"filename": "a.pdf"}]));

        let event = serde_json::to_value(SyncEvent::email(&message)).unwrap();
        assert_eq!(event["type"], "email");

        let data = &event["email_data"];
        assert_eq!(data["title"].as_str().unwrap().chars().count(), 50);
        assert_eq!(data["text"].as_str().unwrap().len(), 50);
        assert_eq!(data["dispatch_date"], "2024-03-01 09:30:00");
        assert_eq!(data["receipt_date"], "2024-03-02 10:00:05");
        assert_eq!(data["files"], json!([{"filename": "a.pdf"}]));
        assert_eq!(data["email_from"], "sender@example.com");
    }

    #[tokio::test]
    async fn test_greeting_then_events() {
        let hub = TopicHub::new(16, "welcome");
        let mut sub = hub.subscribe("mail");

        hub.publish("mail", SyncEvent::progress(1, 1)).await.unwrap();

        assert_eq!(
            sub.recv().await,
            Some(SyncEvent::ConnectionEstablished {
                message: "welcome".to_string()
            })
        );
        assert_eq!(sub.recv().await, Some(SyncEvent::progress(1, 1)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = TopicHub::new(16, "welcome");
        let err = hub.publish("mail", SyncEvent::progress(1, 1)).await.unwrap_err();
        assert!(matches!(err, PublishError::NoSubscribers(topic) if topic == "mail"));

        // A topic whose subscribers all left behaves the same
        drop(hub.subscribe("mail"));
        assert!(hub.publish("mail", SyncEvent::progress(1, 1)).await.is_err());
    }

    #[test]
    fn test_topic_removed_with_last_subscriber() {
        let hub = TopicHub::new(16, "welcome");
        for i in 0..100 {
            drop(hub.subscribe(&format!("new_mail_group.{}", i)));
        }
        assert!(lock_topics(&hub.topics).is_empty());

        let first = hub.subscribe("mail");
        let second = hub.subscribe("mail");
        drop(first);
        assert!(lock_topics(&hub.topics).contains_key("mail"));
        drop(second);
        assert!(lock_topics(&hub.topics).is_empty());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = TopicHub::new(16, "welcome");
        let mut a = hub.subscribe("mail.a");
        let _b = hub.subscribe("mail.b");

        hub.publish("mail.b", SyncEvent::progress(1, 2)).await.unwrap();
        hub.publish("mail.a", SyncEvent::progress(2, 2)).await.unwrap();

        a.recv().await;
        assert_eq!(a.recv().await, Some(SyncEvent::progress(2, 2)));
    }
}
