//! Live sync events over WebSocket.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::config::SyncConfig;
use crate::publish::{Subscription, SyncEvent};

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// Follow a single account's topic instead of the shared one
    pub account: Option<Uuid>,
}

fn topic_of(sync: &SyncConfig, query: &SubscribeQuery) -> String {
    match query.account {
        Some(account_id) => sync.topic_for(account_id),
        None => sync.topic.clone(),
    }
}

/// GET /ws/msg
pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // Topics exist only for known accounts
    if let Some(account_id) = query.account {
        state.accounts.get(account_id).await?;
    }
    let topic = topic_of(&state.sync, &query);

    // Join before upgrading so no event published after the handshake is missed
    let subscription = state.hub.subscribe(&topic);
    Ok(ws.on_upgrade(move |socket| forward_events(socket, subscription, topic)))
}

fn frame(event: &SyncEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text)),
        Err(err) => {
            tracing::error!("Unserializable event: {}", err);
            None
        }
    }
}

async fn forward_events(mut socket: WebSocket, mut subscription: Subscription, topic: String) {
    tracing::info!("WebSocket client subscribed to '{}'", topic);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some(message) = frame(&event) else { continue };
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("WebSocket client left '{}'", topic);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_choice() {
        let shared = SyncConfig::for_tests();
        let per_account = SyncConfig {
            topic_per_account: true,
            ..SyncConfig::for_tests()
        };
        let id = Uuid::new_v4();

        let all = SubscribeQuery { account: None };
        let one = SubscribeQuery { account: Some(id) };
        assert_eq!(topic_of(&shared, &all), "new_mail_group");
        assert_eq!(topic_of(&shared, &one), "new_mail_group");
        assert_eq!(topic_of(&per_account, &all), "new_mail_group");
        assert_eq!(topic_of(&per_account, &one), format!("new_mail_group.{}", id));
    }

    #[test]
    fn test_events_are_json_text_frames() {
        let Some(Message::Text(text)) = frame(&SyncEvent::progress(2, 5)) else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["progress"]["count"], 2);
        assert_eq!(json["progress"]["total_messages"], 5);

        let greeting = SyncEvent::ConnectionEstablished {
            message: "Connection established!".to_string(),
        };
        let Some(Message::Text(text)) = frame(&greeting) else {
            panic!("expected a text frame");
        };
        assert!(text.contains("\"type\":\"connection_established\""));
    }
}
