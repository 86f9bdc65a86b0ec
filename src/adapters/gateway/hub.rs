//! Connection Hub
//!
//! Registry of live client connections, independent of the socket
//! transport. Each connection owns an outbound channel drained by its socket
//! task. A user may hold several connections; pushes fan out to all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ports::{ClientMessage, Envelope, MessageType, RealtimePush};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Close codes sent to clients
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Work for a connection's socket task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(Envelope),
    Ping,
    Close { code: u16, reason: String },
}

struct Connection {
    user_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
    connected_at: DateTime<Utc>,
}

/// Receiving side of a registered connection
pub struct ConnectionHandle {
    pub id: String,
    pub user_id: String,
    rx: mpsc::UnboundedReceiver<Outbound>,
    alive: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Any frame from the client counts as a heartbeat reply
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub per_user: BTreeMap<String, usize>,
    pub oldest_connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Connection>> {
        self.connections.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Connection>> {
        self.connections.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register an authenticated connection and queue the welcome message
    pub fn register(&self, user_id: &str) -> ConnectionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let welcome = Envelope::status(serde_json::json!({
            "status": "connected",
            "connection_id": id,
            "user_id": user_id,
        }));
        // Receiver is alive in `rx`
        let _ = tx.send(Outbound::Message(welcome));

        self.write().insert(
            id.clone(),
            Connection {
                user_id: user_id.to_string(),
                tx,
                alive: alive.clone(),
                connected_at: Utc::now(),
            },
        );
        tracing::info!("Client connected: {} (user {})", id, user_id);

        ConnectionHandle {
            id,
            user_id: user_id.to_string(),
            rx,
            alive,
        }
    }

    pub fn unregister(&self, connection_id: &str) {
        if let Some(conn) = self.write().remove(connection_id) {
            tracing::info!("Client disconnected: {} (user {})", connection_id, conn.user_id);
        }
    }

    fn send_to_connection(&self, connection_id: &str, outbound: Outbound) -> bool {
        let sent = match self.read().get(connection_id) {
            Some(conn) => conn.tx.send(outbound).is_ok(),
            None => return false,
        };
        if !sent {
            self.unregister(connection_id);
        }
        sent
    }

    /// Handle a text frame from a client
    pub fn handle_client_message(&self, connection_id: &str, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => {
                self.send_to_connection(
                    connection_id,
                    Outbound::Message(Envelope::status(serde_json::json!({"status": "pong"}))),
                );
            }
            Ok(ClientMessage::Subscribe { .. }) => {
                tracing::debug!("Subscribe from {} ignored", connection_id);
            }
            Err(e) => {
                tracing::debug!("Unrecognized message from {}: {}", connection_id, e);
                self.send_to_connection(
                    connection_id,
                    Outbound::Message(Envelope::new(
                        MessageType::Error,
                        serde_json::json!({"error": "unrecognized message"}),
                    )),
                );
            }
        }
    }

    /// Push a `status_update` to every connection
    pub fn broadcast_status(&self, data: serde_json::Value) -> usize {
        self.broadcast(Envelope::status(data))
    }

    /// Probe every connection. Connections that did not answer the previous
    /// probe are dropped. Returns the number pruned.
    pub fn heartbeat(&self) -> usize {
        let mut dead = Vec::new();
        for (id, conn) in self.read().iter() {
            let answered = conn.alive.swap(false, Ordering::AcqRel);
            if !answered || conn.tx.send(Outbound::Ping).is_err() {
                dead.push(id.clone());
            }
        }

        if !dead.is_empty() {
            let mut connections = self.write();
            for id in &dead {
                if let Some(conn) = connections.remove(id) {
                    // Dropping the sender ends the socket task
                    tracing::info!("Terminating unresponsive connection {} (user {})", id, conn.user_id);
                }
            }
        }
        dead.len()
    }

    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = hub.heartbeat();
                        if pruned > 0 {
                            tracing::debug!("Heartbeat pruned {} connections", pruned);
                        }
                    }
                }
            }
        })
    }

    /// Close every connection with 1001 and forget them
    pub fn shutdown(&self) {
        let connections: Vec<(String, Connection)> = self.write().drain().collect();
        tracing::info!("Closing {} client connections", connections.len());
        for (_, conn) in connections {
            let _ = conn.tx.send(Outbound::Close {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down".into(),
            });
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let connections = self.read();
        let mut per_user: BTreeMap<String, usize> = BTreeMap::new();
        for conn in connections.values() {
            *per_user.entry(conn.user_id.clone()).or_default() += 1;
        }
        ConnectionStats {
            total_connections: connections.len(),
            unique_users: per_user.len(),
            oldest_connected_at: connections.values().map(|c| c.connected_at).min(),
            per_user,
        }
    }

    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.read().values().any(|c| c.user_id == user_id)
    }
}

impl RealtimePush for ConnectionHub {
    fn send_to_user(&self, user_id: &str, envelope: Envelope) -> bool {
        let mut reached = 0;
        let mut dead = HashSet::new();
        for (id, conn) in self.read().iter().filter(|(_, c)| c.user_id == user_id) {
            if conn.tx.send(Outbound::Message(envelope.clone())).is_ok() {
                reached += 1;
            } else {
                dead.insert(id.clone());
            }
        }
        for id in dead {
            self.unregister(&id);
        }
        reached > 0
    }

    fn broadcast(&self, envelope: Envelope) -> usize {
        let mut reached = 0;
        let mut dead = HashSet::new();
        for (id, conn) in self.read().iter() {
            if conn.tx.send(Outbound::Message(envelope.clone())).is_ok() {
                reached += 1;
            } else {
                dead.insert(id.clone());
            }
        }
        for id in dead {
            self.unregister(&id);
        }
        reached
    }
}
