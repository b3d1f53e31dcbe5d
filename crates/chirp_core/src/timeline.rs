/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::cache::{timeline_key, Cache, TIMELINE_TTL_SECS};
use crate::error::{CoreError, Result};
use crate::feed::{dedupe_richest, rank, TimelineItem};
use crate::store::EntityStore;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy)]
pub struct TimelineSettings {
    /// Per-source cap, keeps the four candidate queries bounded.
    pub source_limit: u32,
    /// How many trending hashtags feed the hashtag source.
    pub trending_hashtags: u32,
    pub cache_ttl_secs: u64,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            source_limit: 50,
            trending_hashtags: 10,
            cache_ttl_secs: TIMELINE_TTL_SECS,
        }
    }
}

/// Builds a user's ranked feed from four overlapping source queries,
/// behind a short-TTL cache-aside entry. Writes that change timeline
/// membership delete the entry synchronously (see the write path), so
/// TTL only bounds staleness for effects the system cannot observe.
pub struct TimelineAssembler {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn Cache>,
    settings: TimelineSettings,
}

impl TimelineAssembler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn Cache>,
        settings: TimelineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    pub async fn assemble(&self, user_id: &str) -> Result<Vec<TimelineItem>> {
        let key = timeline_key(user_id);
        if let Some(bytes) = self.cache.get(&key).await? {
            if let Ok(items) = serde_json::from_slice::<Vec<TimelineItem>>(&bytes) {
                debug!(user = %user_id, "timeline served from cache");
                return Ok(items);
            }
            // Undecodable entry: recompute and overwrite below.
        }

        if !self.store.user_exists(user_id).await? {
            return Err(CoreError::NotFound("user"));
        }

        let limit = self.settings.source_limit;
        let graph = self.store.get_follow_graph(user_id).await?;

        let own = self
            .store
            .find_tweets_by_author_in(&[user_id.to_string()], limit)
            .await?;

        let mut authors = graph.followings.clone();
        authors.push(user_id.to_string());
        let followed = self.store.find_tweets_by_author_in(&authors, limit).await?;

        let interacted = self
            .store
            .find_liked_or_retweeted_by(user_id, limit)
            .await?;

        let trending = self
            .store
            .top_hashtags(self.settings.trending_hashtags)
            .await?;
        let tagged = if trending.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_tweets_by_hashtag_in(&trending, limit)
                .await?
        };

        let merged = dedupe_richest(vec![own, followed, interacted, tagged]);

        let liked = self.store.liked_tweet_ids(user_id).await?;
        let retweeted = self.store.retweeted_original_ids(user_id).await?;
        let mut timeline: Vec<TimelineItem> = merged
            .into_iter()
            .map(|item| TimelineItem {
                is_liked: liked.contains(&item.id),
                is_retweeted: retweeted.contains(&item.id),
                is_following_author: graph.followings.iter().any(|f| *f == item.author_id),
                item,
            })
            .collect();
        rank(&mut timeline);

        let bytes = serde_json::to_vec(&timeline)
            .map_err(|e| CoreError::SourceUnavailable(format!("encode timeline: {e}")))?;
        self.cache
            .put(&key, bytes, self.settings.cache_ttl_secs)
            .await?;
        Ok(timeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::test_support::{seeded_store, tweet};
    use crate::store::SqliteStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteStore>,
        cache: Arc<MemoryCache>,
        assembler: TimelineAssembler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(seeded_store(&dir).await);
        let cache = Arc::new(MemoryCache::new(256));
        let assembler = TimelineAssembler::new(
            store.clone(),
            cache.clone(),
            TimelineSettings::default(),
        );
        Fixture {
            _dir: dir,
            store,
            cache,
            assembler,
        }
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = fixture().await;
        let err = fx.assembler.assemble("nobody").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound("user")));
    }

    #[tokio::test]
    async fn no_duplicate_ids_across_overlapping_sources() {
        let fx = fixture().await;
        // Alice's own post also surfaces from the liked and trending sources.
        let mut own = tweet("t1", "alice", 10);
        own.hashtags = vec!["rust".to_string()];
        fx.store.insert_tweet(&own).await.unwrap();
        fx.store.insert_like("alice", "t1").await.unwrap();

        let timeline = fx.assembler.assemble("alice").await.unwrap();
        let ids: Vec<&str> = timeline.iter().map(|t| t.item.id.as_str()).collect();
        assert_eq!(ids, vec!["t1"]);
        assert!(timeline[0].is_liked);
        assert!(timeline[0].item.author.is_some());
    }

    #[tokio::test]
    async fn ranking_is_engagement_then_recency() {
        let fx = fixture().await;
        fx.store.insert_tweet(&tweet("old", "alice", 10)).await.unwrap();
        fx.store.insert_tweet(&tweet("new", "alice", 20)).await.unwrap();
        fx.store.insert_tweet(&tweet("hot", "alice", 5)).await.unwrap();
        fx.store.insert_like("bob", "hot").await.unwrap();

        let timeline = fx.assembler.assemble("alice").await.unwrap();
        let ids: Vec<&str> = timeline.iter().map(|t| t.item.id.as_str()).collect();
        assert_eq!(ids, vec!["hot", "new", "old"]);
    }

    #[tokio::test]
    async fn repeat_calls_inside_the_ttl_window_hit_the_cache() {
        let fx = fixture().await;
        fx.store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();

        let first = fx.assembler.assemble("alice").await.unwrap();
        // A write the assembler does not observe: cache still short-circuits.
        fx.store.insert_tweet(&tweet("t2", "alice", 20)).await.unwrap();
        let second = fx.assembler.assemble("alice").await.unwrap();
        assert_eq!(first, second);

        // Dropping the entry makes the unobserved write visible.
        fx.cache.delete(&timeline_key("alice")).await.unwrap();
        let third = fx.assembler.assemble("alice").await.unwrap();
        assert_eq!(third.len(), 2);
    }

    #[tokio::test]
    async fn followed_author_posts_carry_the_follow_flag() {
        let fx = fixture().await;
        fx.store.insert_follow("alice", "bob").await.unwrap();
        fx.store.insert_tweet(&tweet("hello", "bob", 10)).await.unwrap();

        let timeline = fx.assembler.assemble("alice").await.unwrap();
        assert_eq!(timeline.len(), 1);
        let entry = &timeline[0];
        assert_eq!(entry.item.id, "hello");
        assert!(entry.is_following_author);
        assert!(!entry.is_liked);
        assert!(!entry.is_retweeted);
    }

    #[tokio::test]
    async fn like_then_unlike_reverts_flag_and_count() {
        let fx = fixture().await;
        fx.store.insert_tweet(&tweet("t1", "carol", 10)).await.unwrap();

        let before = fx.assembler.assemble("alice").await.unwrap();
        assert!(before.iter().all(|t| t.item.id != "t1"));

        fx.store.insert_like("alice", "t1").await.unwrap();
        fx.cache.delete(&timeline_key("alice")).await.unwrap();
        let liked = fx.assembler.assemble("alice").await.unwrap();
        let entry = liked.iter().find(|t| t.item.id == "t1").unwrap();
        assert!(entry.is_liked);
        assert_eq!(entry.item.like_count, 1);

        fx.store.remove_like("alice", "t1").await.unwrap();
        fx.cache.delete(&timeline_key("alice")).await.unwrap();
        let unliked = fx.assembler.assemble("alice").await.unwrap();
        if let Some(entry) = unliked.iter().find(|t| t.item.id == "t1") {
            assert!(!entry.is_liked);
            assert_eq!(entry.item.like_count, 0);
        }
    }

    #[tokio::test]
    async fn retweeted_originals_carry_the_retweet_flag() {
        let fx = fixture().await;
        fx.store.insert_tweet(&tweet("t1", "bob", 10)).await.unwrap();
        let mut copy = tweet("rt1", "alice", 20);
        copy.is_retweet = true;
        copy.original_id = Some("t1".to_string());
        fx.store.insert_tweet(&copy).await.unwrap();

        let timeline = fx.assembler.assemble("alice").await.unwrap();
        let original = timeline.iter().find(|t| t.item.id == "t1").unwrap();
        assert!(original.is_retweeted);
        assert_eq!(original.item.retweet_count, 1);
    }

    #[tokio::test]
    async fn concurrent_misses_recompute_independently() {
        let fx = fixture().await;
        fx.store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();

        let (a, b) = tokio::join!(
            fx.assembler.assemble("alice"),
            fx.assembler.assemble("alice")
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a, b);

        // Whatever the race left behind must still decode.
        let cached = fx.assembler.assemble("alice").await.unwrap();
        assert_eq!(cached, a);
    }
}
