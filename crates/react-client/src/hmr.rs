//! Hot-module-replacement broadcaster and WebSocket plumbing.
//!
//! Messages flow one way, server to client, fire-and-forget. The client
//! set is mutated only on accept and close; a broadcast encodes the
//! message once and walks a snapshot of the set, silently dropping
//! clients whose channel has gone away.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Wire message pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HmrMessage {
    /// A module changed; the client re-imports `path`.
    Update {
        /// Slash-normalized URL path under the source tree.
        path: String,
    },

    /// A compile or runtime error; the client shows the overlay.
    Error {
        /// Human-readable error text.
        message: String,
        /// Stack trace, when one exists.
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    /// The client performs a full page reload.
    Reload,
}

/// Fan-out hub for every open client connection.
pub struct HmrBroadcaster {
    clients: RwLock<HashMap<usize, mpsc::UnboundedSender<String>>>,
    next_id: AtomicUsize,
}

impl HmrBroadcaster {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Register a connection; returns its id and the frame source the
    /// socket task drains.
    pub fn register(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    /// Remove a connection. No further sends are attempted after this.
    pub fn unregister(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    /// Encode `message` once and write it to every open client.
    ///
    /// A failed per-client send means the socket task already went away;
    /// the entry is pruned and the failure is not an error.
    pub fn broadcast(&self, message: &HmrMessage) {
        let encoded = match serde_json::to_string(message) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!("skipping unencodable hmr message: {e}");
                return;
            }
        };

        let snapshot: Vec<(usize, mpsc::UnboundedSender<String>)> = self
            .clients
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut stale = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(encoded.clone()).is_err() {
                stale.push(id);
            }
        }
        for id in stale {
            self.unregister(id);
        }
    }

    /// Number of open connections.
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Drop every sender. Socket tasks observe the closed channel, send
    /// a close frame, and finish; no broadcast can reach a client after
    /// this returns.
    pub fn shutdown(&self) {
        self.clients.write().clear();
    }
}

impl Default for HmrBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one upgraded WebSocket until either side closes.
///
/// Outbound frames come from the broadcaster; inbound frames from the
/// browser are drained and ignored.
pub async fn handle_socket(socket: WebSocket, broadcaster: std::sync::Arc<HmrBroadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = broadcaster.register();
    debug!("hmr client {id} connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    broadcaster.unregister(id);
    debug!("hmr client {id} disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_message_encoding() {
        let msg = HmrMessage::Update {
            path: "/src/App.tsx".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"update","path":"/src/App.tsx"}"#
        );
    }

    #[test]
    fn test_error_message_omits_missing_stack() {
        let msg = HmrMessage::Error {
            message: "boom".to_string(),
            stack: None,
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"error","message":"boom"}"#
        );
    }

    #[test]
    fn test_reload_message_encoding() {
        assert_eq!(
            serde_json::to_string(&HmrMessage::Reload).unwrap(),
            r#"{"type":"reload"}"#
        );
    }

    #[test]
    fn test_broadcast_reaches_every_client_in_order() {
        let hub = HmrBroadcaster::new();
        let (_id1, mut rx1) = hub.register();
        let (_id2, mut rx2) = hub.register();

        for n in 0..3 {
            hub.broadcast(&HmrMessage::Update {
                path: format!("/src/m{n}.tsx"),
            });
        }

        for rx in [&mut rx1, &mut rx2] {
            for n in 0..3 {
                let frame = rx.try_recv().unwrap();
                assert!(frame.contains(&format!("/src/m{n}.tsx")));
            }
        }
    }

    #[test]
    fn test_closed_client_is_pruned() {
        let hub = HmrBroadcaster::new();
        let (_id1, rx1) = hub.register();
        let (_id2, _rx2) = hub.register();
        assert_eq!(hub.client_count(), 2);

        drop(rx1);
        hub.broadcast(&HmrMessage::Reload);
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn test_shutdown_clears_clients() {
        let hub = HmrBroadcaster::new();
        let (_id, mut rx) = hub.register();
        hub.shutdown();
        assert_eq!(hub.client_count(), 0);
        assert!(rx.try_recv().is_err());
    }
}
