use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::SharedState;
use crate::events::{EventReceiver, ProjectEvent};
use crate::registry::{Project, ProjectRegistry};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `type` of the first message on every stream.
pub const STATUS_SNAPSHOT: &str = "status_snapshot";

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, project_id, state))
}

async fn handle_socket(socket: WebSocket, project_id: String, state: SharedState) {
    let registry = state.foundry.registry().clone();
    let (mut sender, receiver) = socket.split();

    // Subscribe before reading the record so nothing published in between
    // is lost; the snapshot may then trail a live event by one step at most.
    let subscription = match registry.subscribe(&project_id).await {
        Ok(subscription) => subscription,
        Err(_) => {
            debug!(project_id = %project_id, "WebSocket for unknown project");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "Unknown project".into(),
                })))
                .await;
            return;
        }
    };
    let subscriber_id = subscription.id;

    let opening = match registry.get(&project_id).await {
        Ok(project) => opening_messages(&registry, &project, &subscription.history),
        Err(_) => Vec::new(),
    };

    let mut delivered = true;
    for text in opening {
        if sender.send(Message::Text(text.into())).await.is_err() {
            delivered = false;
            break;
        }
    }

    if delivered {
        run_socket_loop(sender, receiver, subscription.receiver).await;
    }

    registry.unsubscribe(&project_id, subscriber_id);
    debug!(project_id = %project_id, subscriber_id, "WebSocket closed");
}

/// The status snapshot followed by the buffered history, serialized.
fn opening_messages(
    registry: &ProjectRegistry,
    project: &Project,
    history: &[ProjectEvent],
) -> Vec<String> {
    std::iter::once(status_snapshot(registry, project))
        .chain(history.iter().filter_map(event_json))
        .map(|value| value.to_string())
        .collect()
}

pub fn status_snapshot(registry: &ProjectRegistry, project: &Project) -> Value {
    json!({
        "project_id": project.id,
        "type": STATUS_SNAPSHOT,
        "payload": {
            "status": project.status,
            "preview_url": registry.preview_url(project),
            "created_at": project.created_at,
            "updated_at": project.updated_at,
        },
    })
}

fn event_json(event: &ProjectEvent) -> Option<Value> {
    match serde_json::to_value(event) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(project_id = %event.project_id, error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Forward live events with ping/pong keepalive until either side goes away.
///
/// The loop also ends when the event queue closes, which happens when the
/// subscriber is dropped by the bus (a full bounded queue or shutdown).
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events: EventReceiver,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(value) = event_json(&event) else { continue };
                if sender.send(Message::Text(value.to_string().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Client text is ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use crate::registry::ProjectStatus;

    #[tokio::test]
    async fn test_opening_messages_start_with_snapshot_then_history() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProjectRegistry::new(dir.path(), EventBus::new(10, None));
        let project = registry.create("prompt", None).await.unwrap();
        registry
            .update_status(&project.id, ProjectStatus::Running)
            .await
            .unwrap();
        registry.append_log(&project.id, "hello").await.unwrap();

        let subscription = registry.subscribe(&project.id).await.unwrap();
        let current = registry.get(&project.id).await.unwrap();
        let messages = opening_messages(&registry, &current, &subscription.history);

        let parsed: Vec<Value> = messages
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect();
        let types: Vec<&str> = parsed.iter().map(|m| m["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["status_snapshot", "created", "status_changed", "log"]);
        assert_eq!(parsed[0]["project_id"], project.id.as_str());
        assert_eq!(parsed[0]["payload"]["status"], "running");
        assert!(parsed[0]["payload"]["preview_url"].is_null());
        assert_eq!(parsed[3]["message"], "hello");
    }

    #[tokio::test]
    async fn test_snapshot_carries_preview_url() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            ProjectRegistry::new(dir.path(), EventBus::new(10, None)).with_api_prefix("/api");
        let project = registry.create("prompt", None).await.unwrap();
        let project = registry.set_preview(&project.id, "index.html").await.unwrap();

        let snapshot = status_snapshot(&registry, &project);
        assert_eq!(
            snapshot["payload"]["preview_url"],
            format!("/api/projects/{}/preview/index.html", project.id).as_str()
        );
        assert!(snapshot["payload"]["created_at"].is_string());
    }

    #[test]
    fn test_event_json_uses_wire_names() {
        let event = ProjectEvent::new("p1", EventKind::PreviewReady, "Preview available");
        let value = event_json(&event).unwrap();
        assert_eq!(value["type"], "preview_ready");
        assert_eq!(value["project_id"], "p1");
        assert!(value["payload"].is_object());
    }
}
