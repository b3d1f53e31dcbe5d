/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::cache::{inbox_key, Cache, INBOX_TTL_SECS};
use crate::error::Result;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredNotification {
    pub id: String,
    pub message: String,
    pub created_at_ms: i64,
}

/// Per-user notification inbox layered on the cache: a capped JSON list
/// under `notifications:{user_id}`, newest first, expiring after two days
/// so old entries clean themselves up.
pub struct NotificationInbox {
    cache: Arc<dyn Cache>,
}

impl NotificationInbox {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn append(&self, user_id: &str, message: &str) -> Result<StoredNotification> {
        let mut entries = self.list(user_id).await?;
        let entry = StoredNotification {
            id: new_id(),
            message: message.to_string(),
            created_at_ms: now_ms(),
        };
        entries.insert(0, entry.clone());
        entries.truncate(MAX_ENTRIES);
        self.save(user_id, &entries).await?;
        Ok(entry)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<StoredNotification>> {
        match self.cache.get(&inbox_key(user_id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Returns false when no entry with that id existed.
    pub async fn remove(&self, user_id: &str, notification_id: &str) -> Result<bool> {
        let mut entries = self.list(user_id).await?;
        let before = entries.len();
        entries.retain(|n| n.id != notification_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(user_id, &entries).await?;
        Ok(true)
    }

    async fn save(&self, user_id: &str, entries: &[StoredNotification]) -> Result<()> {
        let bytes = serde_json::to_vec(entries).unwrap_or_default();
        self.cache
            .put(&inbox_key(user_id), bytes, INBOX_TTL_SECS)
            .await
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn new_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}
