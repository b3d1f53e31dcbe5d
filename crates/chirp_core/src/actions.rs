/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::cache::{timeline_key, tweet_key, Cache, TWEET_TTL_SECS};
use crate::error::{CoreError, Result};
use crate::feed::FeedItem;
use crate::queue::NotificationQueue;
use crate::registry::ConnectionRegistry;
use crate::store::{CommentRecord, EntityStore, NewTweet, UserRecord};
use chirp_protocol::ServerFrame;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

const MAX_CONTENT_CHARS: usize = 280;
const MAX_HASHTAG_CHARS: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct TweetDraft {
    pub content: String,
    pub media_ref: Option<String>,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeOutcome {
    pub liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetweetOutcome {
    pub retweeted: bool,
    pub retweet_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowOutcome {
    pub following: bool,
    pub follower_count: usize,
}

/// The write path. Every mutation persists first, then synchronously
/// drops the cache entries it made stale and enqueues fan-out events.
/// The store write alone decides success: a user-visible write must not
/// fail because best-effort fan-out infrastructure did.
pub struct Actions {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn Cache>,
    queue: NotificationQueue,
    registry: Arc<ConnectionRegistry>,
}

impl Actions {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn Cache>,
        queue: NotificationQueue,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            registry,
        }
    }

    pub async fn create_user(&self, username: &str, handle: &str) -> Result<UserRecord> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CoreError::Rejected("username cannot be empty".to_string()));
        }
        let handle = handle.trim().to_ascii_lowercase();
        let valid = (3..=15).contains(&handle.len())
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(CoreError::Rejected(
                "handle must be 3-15 characters of letters, digits or underscores".to_string(),
            ));
        }
        let user = UserRecord {
            id: new_id(),
            username: username.to_string(),
            handle,
            created_at_ms: now_ms(),
        };
        self.store.insert_user(&user).await?;
        Ok(user)
    }

    pub async fn create_tweet(&self, author_id: &str, draft: TweetDraft) -> Result<FeedItem> {
        let content = draft.content.trim().to_string();
        if content.is_empty() {
            return Err(CoreError::Rejected("content cannot be empty".to_string()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(CoreError::Rejected(format!(
                "content cannot exceed {MAX_CONTENT_CHARS} characters"
            )));
        }
        let mut hashtags: Vec<String> = draft
            .hashtags
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        hashtags.dedup();
        if hashtags.iter().any(|t| t.chars().count() > MAX_HASHTAG_CHARS) {
            return Err(CoreError::Rejected(format!(
                "hashtags cannot exceed {MAX_HASHTAG_CHARS} characters"
            )));
        }
        if !self.store.user_exists(author_id).await? {
            return Err(CoreError::NotFound("user"));
        }

        let tweet = NewTweet {
            id: new_id(),
            content,
            media_ref: draft.media_ref,
            author_id: author_id.to_string(),
            created_at_ms: now_ms(),
            is_retweet: false,
            original_id: None,
            hashtags,
        };
        self.store.insert_tweet(&tweet).await?;

        self.invalidate_timeline(author_id).await;
        self.registry
            .broadcast(&ServerFrame::NewTweet {
                tweet_id: tweet.id.clone(),
                content: tweet.content.clone(),
                author: author_id.to_string(),
            })
            .await;

        Ok(FeedItem {
            id: tweet.id,
            content: tweet.content,
            media_ref: tweet.media_ref,
            author_id: tweet.author_id,
            author: None,
            created_at_ms: tweet.created_at_ms,
            like_count: 0,
            retweet_count: 0,
            comment_ids: Vec::new(),
            is_retweet: false,
            original_id: None,
            hashtags: tweet.hashtags,
        })
    }

    pub async fn delete_tweet(&self, caller_id: &str, tweet_id: &str) -> Result<()> {
        let tweet = self
            .store
            .get_feed_item(tweet_id)
            .await?
            .ok_or(CoreError::NotFound("tweet"))?;
        if tweet.author_id != caller_id {
            return Err(CoreError::Rejected(
                "only the author can delete a tweet".to_string(),
            ));
        }
        self.store.delete_tweet(tweet_id).await?;
        self.invalidate_timeline(caller_id).await;
        self.invalidate_tweet(tweet_id).await;
        Ok(())
    }

    pub async fn toggle_like(&self, caller: &UserRecord, tweet_id: &str) -> Result<LikeOutcome> {
        let tweet = self
            .store
            .get_feed_item(tweet_id)
            .await?
            .ok_or(CoreError::NotFound("tweet"))?;

        let outcome = if self.store.remove_like(&caller.id, tweet_id).await? {
            LikeOutcome {
                liked: false,
                like_count: tweet.like_count.saturating_sub(1),
            }
        } else {
            self.store.insert_like(&caller.id, tweet_id).await?;
            if tweet.author_id != caller.id {
                self.queue.enqueue(
                    &tweet.author_id,
                    format!("{} liked your tweet!", caller.username),
                );
            }
            LikeOutcome {
                liked: true,
                like_count: tweet.like_count + 1,
            }
        };

        self.invalidate_timeline(&caller.id).await;
        self.invalidate_tweet(tweet_id).await;
        Ok(outcome)
    }

    pub async fn toggle_retweet(
        &self,
        caller: &UserRecord,
        tweet_id: &str,
    ) -> Result<RetweetOutcome> {
        let tweet = self
            .store
            .get_feed_item(tweet_id)
            .await?
            .ok_or(CoreError::NotFound("tweet"))?;

        let outcome = match self.store.find_retweet_of(&caller.id, tweet_id).await? {
            Some(copy_id) => {
                self.store.delete_tweet(&copy_id).await?;
                RetweetOutcome {
                    retweeted: false,
                    retweet_count: tweet.retweet_count.saturating_sub(1),
                }
            }
            None => {
                let copy = NewTweet {
                    id: new_id(),
                    content: tweet.content.clone(),
                    media_ref: tweet.media_ref.clone(),
                    author_id: caller.id.clone(),
                    created_at_ms: now_ms(),
                    is_retweet: true,
                    original_id: Some(tweet_id.to_string()),
                    hashtags: tweet.hashtags.clone(),
                };
                self.store.insert_tweet(&copy).await?;
                RetweetOutcome {
                    retweeted: true,
                    retweet_count: tweet.retweet_count + 1,
                }
            }
        };

        self.invalidate_timeline(&caller.id).await;
        self.invalidate_tweet(tweet_id).await;
        Ok(outcome)
    }

    pub async fn add_comment(
        &self,
        caller: &UserRecord,
        tweet_id: &str,
        content: &str,
    ) -> Result<CommentRecord> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::Rejected("content cannot be empty".to_string()));
        }
        let tweet = self
            .store
            .get_feed_item(tweet_id)
            .await?
            .ok_or(CoreError::NotFound("tweet"))?;

        let comment = CommentRecord {
            id: new_id(),
            tweet_id: tweet_id.to_string(),
            author_id: caller.id.clone(),
            content: content.to_string(),
            created_at_ms: now_ms(),
        };
        self.store.insert_comment(&comment).await?;

        if tweet.author_id != caller.id {
            self.queue.enqueue(
                &tweet.author_id,
                format!("{} commented on your tweet.", caller.username),
            );
        }
        self.invalidate_timeline(&caller.id).await;
        self.invalidate_tweet(tweet_id).await;
        Ok(comment)
    }

    pub async fn toggle_follow(
        &self,
        caller: &UserRecord,
        target_id: &str,
    ) -> Result<FollowOutcome> {
        if caller.id == target_id {
            return Err(CoreError::Rejected("cannot follow yourself".to_string()));
        }
        if !self.store.user_exists(target_id).await? {
            return Err(CoreError::NotFound("user"));
        }

        let following = if self.store.remove_follow(&caller.id, target_id).await? {
            false
        } else {
            self.store.insert_follow(&caller.id, target_id).await?;
            self.queue.enqueue(
                target_id,
                format!("{} is now following you!", caller.username),
            );
            true
        };
        self.invalidate_timeline(&caller.id).await;

        let graph = self.store.get_follow_graph(target_id).await?;
        Ok(FollowOutcome {
            following,
            follower_count: graph.followers.len(),
        })
    }

    /// Read-through single-tweet fetch: `tweet:{id}` short-circuits the
    /// store until a mutation on that tweet deletes the key.
    pub async fn get_tweet(&self, tweet_id: &str) -> Result<FeedItem> {
        let key = tweet_key(tweet_id);
        if let Some(bytes) = self.cache.get(&key).await? {
            if let Ok(item) = serde_json::from_slice::<FeedItem>(&bytes) {
                return Ok(item);
            }
        }
        let item = self
            .store
            .get_feed_item(tweet_id)
            .await?
            .ok_or(CoreError::NotFound("tweet"))?;
        if let Ok(bytes) = serde_json::to_vec(&item) {
            if let Err(e) = self.cache.put(&key, bytes, TWEET_TTL_SECS).await {
                warn!(tweet = %tweet_id, "tweet cache write failed: {e}");
            }
        }
        Ok(item)
    }

    async fn invalidate_timeline(&self, user_id: &str) {
        if let Err(e) = self.cache.delete(&timeline_key(user_id)).await {
            warn!(user = %user_id, "timeline invalidation failed: {e}");
        }
    }

    async fn invalidate_tweet(&self, tweet_id: &str) {
        if let Err(e) = self.cache.delete(&tweet_key(tweet_id)).await {
            warn!(tweet = %tweet_id, "tweet invalidation failed: {e}");
        }
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
