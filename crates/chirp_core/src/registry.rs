/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use chirp_protocol::ServerFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::info;

/// A live client connection bound to a user id. Cloneable; all clones
/// share the underlying sender, so `is_open` flips for every copy once
/// the socket task drops its receiver.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    pub user_id: String,
    sender: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub async fn push(&self, frame: ServerFrame) -> bool {
        self.sender.send(frame).await.is_ok()
    }
}

/// Shared user → connection map. Owned by whoever constructs it and
/// injected into both the socket layer and the dispatcher; mutations and
/// lookups race with arbitrary connect/disconnect order, so everything
/// goes through the lock.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind a user id to a connection. Last registration wins: a second
    /// register for the same user silently evicts the previous handle.
    pub async fn register(&self, user_id: &str, sender: mpsc::Sender<ServerFrame>) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.to_string(),
            sender,
        };
        let prev = self
            .connections
            .write()
            .await
            .insert(user_id.to_string(), handle.clone());
        if prev.is_some() {
            info!(user = %user_id, "connection re-registered, previous handle evicted");
        }
        handle
    }

    /// Remove the mapping for this handle. The map is keyed by user id but
    /// cleanup matches on handle identity: a newer registration under the
    /// same user must survive an older connection's close.
    pub async fn unregister(&self, handle: &ConnectionHandle) {
        let mut map = self.connections.write().await;
        let same = map
            .get(&handle.user_id)
            .map(|current| current.id == handle.id)
            .unwrap_or(false);
        if same {
            map.remove(&handle.user_id);
        }
    }

    /// Live handle for a user, or none. Never returns a handle whose
    /// transport is already closed.
    pub async fn get(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .await
            .get(user_id)
            .filter(|h| h.is_open())
            .cloned()
    }

    /// Push a frame to every live connection; returns how many accepted it.
    pub async fn broadcast(&self, frame: &ServerFrame) -> usize {
        let handles: Vec<ConnectionHandle> =
            self.connections.read().await.values().cloned().collect();
        let mut sent = 0;
        for handle in handles {
            if handle.is_open() && handle.push(frame.clone()).await {
                sent += 1;
            }
        }
        sent
    }

    pub async fn online_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|h| h.is_open())
            .count()
    }
}
