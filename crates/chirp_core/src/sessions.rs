/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::cache::{blacklist_key, Cache, BLACKLIST_TTL_SECS};
use crate::error::{CoreError, Result};
use crate::store::EntityStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Revoked-token list in the cache layer. Entries outlive any session the
/// token could still open, then expire on their own.
pub struct TokenBlacklist {
    cache: Arc<dyn Cache>,
}

impl TokenBlacklist {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.cache
            .put(&blacklist_key(token), b"revoked".to_vec(), BLACKLIST_TTL_SECS)
            .await
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        Ok(self.cache.get(&blacklist_key(token)).await?.is_some())
    }
}

/// Auth boundary: credential issuance and validation live outside the
/// core. The core only asks "who is calling, or is the request rejected".
#[async_trait]
pub trait CallerResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<String>;
}

/// Stand-in resolver for the external auth collaborator: accepts opaque
/// bearer tokens of the form `uid:<user_id>`, rejects revoked tokens and
/// unknown users. It never issues or verifies credentials.
pub struct UidTokenResolver {
    store: Arc<dyn EntityStore>,
    blacklist: Arc<TokenBlacklist>,
}

impl UidTokenResolver {
    pub fn new(store: Arc<dyn EntityStore>, blacklist: Arc<TokenBlacklist>) -> Self {
        Self { store, blacklist }
    }
}

#[async_trait]
impl CallerResolver for UidTokenResolver {
    async fn resolve(&self, token: &str) -> Result<String> {
        if self.blacklist.is_revoked(token).await? {
            return Err(CoreError::Rejected("token revoked".to_string()));
        }
        let user_id = token
            .strip_prefix("uid:")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoreError::Rejected("malformed token".to_string()))?;
        if !self.store.user_exists(user_id).await? {
            return Err(CoreError::Rejected("unknown caller".to_string()));
        }
        Ok(user_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::test_support::seeded_store;

    #[tokio::test]
    async fn blacklist_round_trip() {
        let blacklist = TokenBlacklist::new(Arc::new(MemoryCache::new(64)));
        assert!(!blacklist.is_revoked("uid:alice").await.unwrap());
        blacklist.revoke("uid:alice").await.unwrap();
        assert!(blacklist.is_revoked("uid:alice").await.unwrap());
    }

    #[tokio::test]
    async fn resolver_accepts_known_users_and_rejects_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(seeded_store(&dir).await);
        let blacklist = Arc::new(TokenBlacklist::new(Arc::new(MemoryCache::new(64))));
        let resolver = UidTokenResolver::new(store, blacklist.clone());

        assert_eq!(resolver.resolve("uid:alice").await.unwrap(), "alice");
        assert!(matches!(
            resolver.resolve("uid:nobody").await,
            Err(CoreError::Rejected(_))
        ));
        assert!(matches!(
            resolver.resolve("garbage").await,
            Err(CoreError::Rejected(_))
        ));

        blacklist.revoke("uid:alice").await.unwrap();
        assert!(matches!(
            resolver.resolve("uid:alice").await,
            Err(CoreError::Rejected(_))
        ));
    }
}
