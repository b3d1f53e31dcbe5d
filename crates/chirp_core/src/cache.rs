/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

pub const TIMELINE_TTL_SECS: u64 = 20;
pub const TWEET_TTL_SECS: u64 = 600;
pub const INBOX_TTL_SECS: u64 = 172_800;
pub const BLACKLIST_TTL_SECS: u64 = 604_800;

pub fn timeline_key(user_id: &str) -> String {
    format!("timeline:{user_id}")
}

pub fn tweet_key(tweet_id: &str) -> String {
    format!("tweet:{tweet_id}")
}

pub fn inbox_key(user_id: &str) -> String {
    format!("notifications:{user_id}")
}

pub fn blacklist_key(token: &str) -> String {
    format!("blacklist:{token}")
}

/// Key-value store with per-entry TTL. Backs the materialized timelines,
/// the per-tweet read-through cache, the notification inboxes and the
/// token blacklist.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

fn cache_err(e: redis::RedisError) -> CoreError {
    CoreError::SourceUnavailable(format!("redis: {e}"))
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(cache_err)?;
        let manager = client.get_connection_manager().await.map_err(cache_err)?;
        info!("redis cache connected");
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await.map_err(cache_err)?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(self.key(key), value, ttl_secs.max(1))
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(self.key(key)).await.map_err(cache_err)?;
        Ok(())
    }
}

/// In-process TTL map, used in tests and cache-less development runs.
pub struct MemoryCache {
    max_entries: usize,
    entries: RwLock<HashMap<String, (i64, Vec<u8>)>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(64),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.entries.read().await;
        match map.get(key) {
            Some((expires_at_ms, value)) if now_ms() < *expires_at_ms => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let mut map = self.entries.write().await;
        if map.len() >= self.max_entries && !map.contains_key(key) {
            map.clear();
        }
        map.insert(
            key.to_string(),
            (now_ms().saturating_add(ttl_secs as i64 * 1000), value),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip_and_delete() {
        let cache = MemoryCache::new(64);
        cache.put("k", b"v".to_vec(), 30).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_cache_expires_entries() {
        let cache = MemoryCache::new(64);
        cache.put("k", b"v".to_vec(), 0).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let cache = MemoryCache::new(64);
        assert_eq!(cache.get("absent").await.unwrap(), None);
        cache.delete("absent").await.unwrap();
    }
}
