//! Completion notifications.
//!
//! Every request that reaches `completed` or `failed` is reported exactly
//! once to the scheduler's [`CompletionSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use podfleet_state::RequestId;

/// Receives terminal request outcomes.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn notify_completed(&self, request_id: RequestId, result: &Value);

    async fn notify_failed(&self, request_id: RequestId, error: &str);
}

/// A terminal outcome as published by [`BroadcastSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RequestEvent {
    Completed { request_id: RequestId, result: Value },
    Failed { request_id: RequestId, error: String },
}

impl RequestEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            RequestEvent::Completed { request_id, .. } | RequestEvent::Failed { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Fans terminal outcomes out to any number of subscribers.
///
/// Events published while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<RequestEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: RequestEvent) {
        let request_id = event.request_id();
        if self.tx.send(event).is_err() {
            debug!(%request_id, "no subscribers for request event");
        }
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl CompletionSink for BroadcastSink {
    async fn notify_completed(&self, request_id: RequestId, result: &Value) {
        self.publish(RequestEvent::Completed {
            request_id,
            result: result.clone(),
        });
    }

    async fn notify_failed(&self, request_id: RequestId, error: &str) {
        self.publish(RequestEvent::Failed {
            request_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let sink = BroadcastSink::default();
        let mut rx = sink.subscribe();
        let id = Uuid::new_v4();

        sink.notify_completed(id, &json!({"assets": []})).await;
        sink.notify_failed(id, "boom").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            RequestEvent::Completed {
                request_id: id,
                result: json!({"assets": []})
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RequestEvent::Failed {
                request_id: id,
                error: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let sink = BroadcastSink::new(4);
        sink.notify_failed(Uuid::new_v4(), "nobody listening").await;
    }

    #[test]
    fn events_serialize_with_tag() {
        let id = Uuid::nil();
        let json = serde_json::to_value(RequestEvent::Failed {
            request_id: id,
            error: "x".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["error"], "x");
    }
}
