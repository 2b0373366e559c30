//! Notification events: what operators see when a workload moves, waits or fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::stage::ProcessingStage;
use crate::pipeline::types::WorkloadId;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NotificationEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
        }
    }

    pub fn workload(&self) -> &WorkloadId {
        match &self.kind {
            EventKind::StageAdvanced { workload, .. }
            | EventKind::WaitingForInput { workload, .. }
            | EventKind::EntityError { workload, .. }
            | EventKind::StageError { workload, .. }
            | EventKind::WorkloadFailed { workload, .. }
            | EventKind::WorkloadCompleted { workload } => workload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageAdvanced {
        workload: WorkloadId,
        from: ProcessingStage,
        to: ProcessingStage,
    },
    /// Parked until a human or an external process supplies input.
    WaitingForInput {
        workload: WorkloadId,
        stage: ProcessingStage,
        reason: String,
    },
    /// One person's enrichment, draft or send failed. The stage continues.
    EntityError {
        workload: WorkloadId,
        entity: String,
        stage: ProcessingStage,
        error: String,
    },
    /// The stage failed as a whole and will be retried.
    StageError {
        workload: WorkloadId,
        stage: ProcessingStage,
        error: String,
    },
    WorkloadFailed {
        workload: WorkloadId,
        error: String,
    },
    WorkloadCompleted {
        workload: WorkloadId,
    },
}

fn log_event(event: &NotificationEvent) {
    match &event.kind {
        EventKind::StageAdvanced { workload, from, to } => {
            info!(workload = %workload, from = %from, to = %to, "Stage advanced");
        }
        EventKind::WaitingForInput {
            workload,
            stage,
            reason,
        } => {
            info!(workload = %workload, stage = %stage, reason = %reason, "Waiting for input");
        }
        EventKind::EntityError {
            workload,
            entity,
            stage,
            error,
        } => {
            warn!(workload = %workload, entity = %entity, stage = %stage, error = %error, "Entity error");
        }
        EventKind::StageError {
            workload,
            stage,
            error,
        } => {
            warn!(workload = %workload, stage = %stage, error = %error, "Stage failed");
        }
        EventKind::WorkloadFailed { workload, error } => {
            error!(workload = %workload, error = %error, "Workload failed");
        }
        EventKind::WorkloadCompleted { workload } => {
            info!(workload = %workload, "Workload completed");
        }
    }
}

/// Receives notification events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event. Must not fail: delivery problems are logged.
    async fn notify(&self, event: NotificationEvent);

    /// Log `kind` and deliver it as a new event.
    async fn emit(&self, kind: EventKind) {
        let event = NotificationEvent::new(kind);
        log_event(&event);
        self.notify(event).await;
    }
}

/// In-process fan-out to subscribers (WebSocket clients).
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { tx })
    }

    /// Subscribe to live events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: NotificationEvent) {
        // Ok if no receivers are listening
        let _ = self.tx.send(event);
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: NotificationEvent) {
        let result = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            warn!(url = %self.url, event_id = %event.id, error = %e, "Webhook delivery failed");
        }
    }
}

/// Sends every event to each inner notifier in turn.
pub struct FanoutNotifier {
    inner: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(inner: Vec<Arc<dyn Notifier>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: NotificationEvent) {
        for notifier in &self.inner {
            notifier.notify(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Json, Router, extract::State, routing::post};
    use tokio::sync::mpsc;

    fn completed(id: &str) -> EventKind {
        EventKind::WorkloadCompleted {
            workload: WorkloadId::new(id),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = NotificationEvent::new(EventKind::StageAdvanced {
            workload: WorkloadId::new("acme.com"),
            from: ProcessingStage::NotStarted,
            to: ProcessingStage::ProfilesScraped,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_advanced");
        assert_eq!(json["workload"], "acme.com");
        assert_eq!(json["to"], "profiles_scraped");
        assert!(json["at"].is_string());

        let back: NotificationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.emit(completed("acme.com")).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.workload().as_str(), "acme.com");
        assert!(matches!(event.kind, EventKind::WorkloadCompleted { .. }));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let notifier = BroadcastNotifier::new();
        notifier.emit(completed("acme.com")).await;
    }

    #[tokio::test]
    async fn fanout_delivers_to_every_notifier() {
        let a = BroadcastNotifier::new();
        let b = BroadcastNotifier::new();
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        let inner: Vec<Arc<dyn Notifier>> = vec![a.clone(), b.clone()];
        let fanout = FanoutNotifier::new(inner);
        fanout.emit(completed("globex.com")).await;

        let ea = rx_a.recv().await.unwrap();
        let eb = rx_b.recv().await.unwrap();
        assert_eq!(ea.id, eb.id);
    }

    #[tokio::test]
    async fn webhook_posts_event_json() {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                     Json(body): Json<serde_json::Value>| async move {
                        let _ = tx.send(body);
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook"));
        notifier.emit(completed("acme.com")).await;

        let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["type"], "workload_completed");
        assert_eq!(body["workload"], "acme.com");
    }

    #[tokio::test]
    async fn webhook_failures_are_swallowed() {
        // Nothing listens on this port.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        notifier.emit(completed("acme.com")).await;
    }
}
