//! WebSocket seat-map stream.
//!
//! ```text
//! ws://localhost:8080/ws/restaurants/:id
//! ```
//!
//! The server subscribes to the restaurant's change feed, then sends the
//! current seat map, then every committed change. A client merges changes
//! into its copy by entity version. When the subscription lags or drops, the
//! server resubscribes and sends a fresh `snapshot`, which the client
//! adopts in place of its copy.
//!
//! ## Message Format
//!
//! ```json
//! { "type": "snapshot", "snapshot": { "restaurant_id": "…", "tables": [ … ] } }
//! { "type": "change", "event": { "cause": { … }, "changes": [ … ] } }
//! { "type": "error", "message": "…" }
//! ```
//!
//! ## Connection Limits
//!
//! - Max 1000 concurrent WebSocket connections per server instance
//! - Keep-alive: a WebSocket Ping frame every 30 seconds
//! - Idle timeout: 5 minutes without any frame from the client, Pong replies
//!   included

use crate::server::state::AppState;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, Stream, StreamExt, stream::SplitSink};
use seatbook_core::change::{ChangeEvent, seat_topic};
use seatbook_core::change_feed::{ChangeStream, FeedError};
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::types::RestaurantId;
use seatbook_runtime::retry_if;
use seatbook_web::AppError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

/// Global WebSocket connection counter.
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Maximum concurrent WebSocket connections.
const MAX_CONNECTIONS: usize = 1000;

/// Ping interval for keep-alive (30 seconds).
const PING_INTERVAL_SECS: u64 = 30;

/// Idle timeout (5 minutes).
const IDLE_TIMEOUT_SECS: u64 = 300;

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

// ============================================================================
// Message Types
// ============================================================================

/// WebSocket message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Full seat map; replaces whatever the client holds
    Snapshot {
        /// Current map
        snapshot: SeatMapSnapshot,
    },
    /// One committed mutation
    Change {
        /// What changed
        event: ChangeEvent,
    },
    /// The stream cannot continue
    Error {
        /// Error description
        message: String,
    },
}

// ============================================================================
// Handlers
// ============================================================================

/// WebSocket endpoint streaming a restaurant's seat map.
///
/// Public endpoint. Answers 404 for an unknown restaurant and 503 when the
/// connection limit is reached.
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws/restaurants/550e8400-...');
/// ws.onmessage = (event) => {
///   const msg = JSON.parse(event.data);
///   if (msg.type === 'snapshot') map.reset(msg.snapshot);
///   if (msg.type === 'change') map.apply(msg.event);
/// };
/// ```
pub async fn seat_map_updates(
    ws: WebSocketUpgrade,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Response {
    let current = ACTIVE_CONNECTIONS.load(Ordering::Relaxed);
    if current >= MAX_CONNECTIONS {
        warn!(current_connections = current, "WebSocket connection limit exceeded");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many concurrent connections. Please try again later.",
        )
            .into_response();
    }

    match state.store.get_restaurant(restaurant_id).await {
        Ok(Some(_)) => {},
        Ok(None) => return AppError::not_found("Restaurant", restaurant_id).into_response(),
        Err(error) => return AppError::from(error).into_response(),
    }

    debug!(%restaurant_id, "WebSocket connection requested");
    ws.on_upgrade(move |socket| handle_socket(socket, restaurant_id, state))
}

// ============================================================================
// Socket Handlers
// ============================================================================

async fn handle_socket(socket: WebSocket, restaurant_id: RestaurantId, state: AppState) {
    let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    info!(%restaurant_id, total_connections = count, "WebSocket connection established");

    let (sender, receiver) = socket.split();
    let sender: Sender = Arc::new(Mutex::new(sender));

    let mut event_task = tokio::spawn(stream_seat_map(restaurant_id, state, Arc::clone(&sender)));

    let ping_sender = Arc::clone(&sender);
    let mut ping_task = tokio::spawn(async move {
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;
        loop {
            ping_interval.tick().await;
            if ping_sender.lock().await.send(Message::Ping(Vec::new())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(watch_client(receiver, Duration::from_secs(IDLE_TIMEOUT_SECS)));

    tokio::select! {
        _ = (&mut event_task) => {
            ping_task.abort();
            recv_task.abort();
        },
        _ = (&mut ping_task) => {
            event_task.abort();
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            event_task.abort();
            ping_task.abort();
        },
    }

    let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(%restaurant_id, total_connections = count, "WebSocket connection closed");
}

/// Read client frames until it closes, fails or stays silent for `idle`.
///
/// Every frame restarts the idle deadline, so a client that only answers the
/// keep-alive pings stays connected.
async fn watch_client<S, E>(mut inbound: S, idle: Duration)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let timeout = tokio::time::sleep(idle);
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    timeout.as_mut().reset(tokio::time::Instant::now() + idle);
                },
                Some(Err(error)) => {
                    debug!(%error, "WebSocket receive failed");
                    break;
                },
            },
            () = &mut timeout => {
                warn!("WebSocket idle timeout");
                break;
            }
        }
    }
}

/// Forward the restaurant's changes until the client goes away.
///
/// Each pass subscribes first and reads the snapshot second, so no commit
/// falls between the two.
async fn stream_seat_map(restaurant_id: RestaurantId, state: AppState, sender: Sender) {
    let topic = seat_topic(restaurant_id);
    loop {
        let stream = match subscribe(&state, &topic).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%restaurant_id, %error, "seat map subscription failed");
                send(&sender, &LiveMessage::Error { message: error.to_string() }).await;
                return;
            },
        };
        let snapshot = match state.store.get_seat_map(restaurant_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%restaurant_id, %error, "seat map snapshot failed");
                send(&sender, &LiveMessage::Error { message: error.to_string() }).await;
                return;
            },
        };
        if !send(&sender, &LiveMessage::Snapshot { snapshot }).await {
            return;
        }

        match forward_changes(stream, &sender).await {
            Forwarded::ClientGone => return,
            Forwarded::SubscriptionLost => {
                metrics::counter!("seatbook.sync.reconciliations").increment(1);
                debug!(%restaurant_id, "resubscribing live connection");
            },
        }
    }
}

enum Forwarded {
    ClientGone,
    SubscriptionLost,
}

async fn forward_changes(mut stream: ChangeStream, sender: &Sender) -> Forwarded {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                if !send(sender, &LiveMessage::Change { event }).await {
                    return Forwarded::ClientGone;
                }
            },
            Err(FeedError::Lagged(missed)) => {
                warn!(missed, "live connection lagged behind the change feed");
                return Forwarded::SubscriptionLost;
            },
            Err(error) => {
                warn!(%error, "change feed failed");
                return Forwarded::SubscriptionLost;
            },
        }
    }
    Forwarded::SubscriptionLost
}

async fn subscribe(state: &AppState, topic: &str) -> Result<ChangeStream, FeedError> {
    retry_if(&state.sync_policy, || state.feed.subscribe(topic), |_| true).await
}

async fn send(sender: &Sender, message: &LiveMessage) -> bool {
    let Ok(json) = serde_json::to_string(message) else {
        return false;
    };
    sender.lock().await.send(Message::Text(json)).await.is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::convert::Infallible;
    use std::time::Instant;

    #[test]
    fn messages_are_tagged_by_type() {
        let json = serde_json::to_value(LiveMessage::Error { message: "gone".into() }).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "gone");
    }

    #[tokio::test]
    async fn pong_replies_keep_a_silent_client_connected() {
        let (frames, inbound) = mpsc::unbounded::<Result<Message, Infallible>>();
        let started = Instant::now();
        let watcher = tokio::spawn(watch_client(inbound, Duration::from_millis(200)));

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            frames.unbounded_send(Ok(Message::Pong(Vec::new()))).unwrap();
        }
        assert!(!watcher.is_finished());

        watcher.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(550));
        drop(frames);
    }

    #[tokio::test]
    async fn close_frame_ends_the_watch() {
        let (frames, inbound) = mpsc::unbounded::<Result<Message, Infallible>>();
        frames.unbounded_send(Ok(Message::Close(None))).unwrap();
        tokio::time::timeout(Duration::from_secs(1), watch_client(inbound, Duration::from_secs(60)))
            .await
            .unwrap();
    }
}
