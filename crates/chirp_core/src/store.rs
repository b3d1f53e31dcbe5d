/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{CoreError, Result};
use crate::feed::{FeedAuthor, FeedItem};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub handle: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FollowGraph {
    pub followers: Vec<String>,
    pub followings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewTweet {
    pub id: String,
    pub content: String,
    pub media_ref: Option<String>,
    pub author_id: String,
    pub created_at_ms: i64,
    pub is_retweet: bool,
    pub original_id: Option<String>,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommentRecord {
    pub id: String,
    pub tweet_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at_ms: i64,
}

/// Durable storage boundary. The timeline assembler only needs the query
/// half; the write path needs the atomic single-row updates.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert_user(&self, user: &UserRecord) -> Result<()>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;
    async fn user_exists(&self, user_id: &str) -> Result<bool>;
    async fn get_follow_graph(&self, user_id: &str) -> Result<FollowGraph>;
    /// Returns false when the edge already existed.
    async fn insert_follow(&self, follower_id: &str, followee_id: &str) -> Result<bool>;
    /// Returns false when there was no edge to remove.
    async fn remove_follow(&self, follower_id: &str, followee_id: &str) -> Result<bool>;

    /// Tweets authored by any of `author_ids`, newest first.
    async fn find_tweets_by_author_in(
        &self,
        author_ids: &[String],
        limit: u32,
    ) -> Result<Vec<FeedItem>>;
    /// Tweets the user liked or retweeted, newest interaction first.
    async fn find_liked_or_retweeted_by(&self, user_id: &str, limit: u32)
        -> Result<Vec<FeedItem>>;
    /// Top hashtags by usage count over all posts, recomputed per call.
    async fn top_hashtags(&self, n: u32) -> Result<Vec<String>>;
    /// Tweets carrying any of `tags`, ranked by engagement.
    async fn find_tweets_by_hashtag_in(&self, tags: &[String], limit: u32)
        -> Result<Vec<FeedItem>>;

    async fn get_feed_item(&self, tweet_id: &str) -> Result<Option<FeedItem>>;
    async fn liked_tweet_ids(&self, user_id: &str) -> Result<HashSet<String>>;
    async fn retweeted_original_ids(&self, user_id: &str) -> Result<HashSet<String>>;

    async fn insert_tweet(&self, tweet: &NewTweet) -> Result<()>;
    async fn delete_tweet(&self, tweet_id: &str) -> Result<()>;
    /// Id of the caller's retweet copy of `original_id`, if any.
    async fn find_retweet_of(&self, author_id: &str, original_id: &str)
        -> Result<Option<String>>;

    async fn insert_like(&self, user_id: &str, tweet_id: &str) -> Result<bool>;
    async fn remove_like(&self, user_id: &str, tweet_id: &str) -> Result<bool>;
    async fn insert_comment(&self, comment: &CommentRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(store_err)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS users (
              id TEXT PRIMARY KEY,
              username TEXT NOT NULL UNIQUE,
              handle TEXT NOT NULL UNIQUE,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tweets (
              id TEXT PRIMARY KEY,
              content TEXT NOT NULL,
              media_ref TEXT NULL,
              author_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              like_count INTEGER NOT NULL DEFAULT 0,
              retweet_count INTEGER NOT NULL DEFAULT 0,
              is_retweet INTEGER NOT NULL DEFAULT 0,
              original_id TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tweets_author_created
              ON tweets(author_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS tweet_hashtags (
              tweet_id TEXT NOT NULL,
              tag TEXT NOT NULL,
              PRIMARY KEY(tweet_id, tag)
            );
            CREATE INDEX IF NOT EXISTS idx_hashtags_tag ON tweet_hashtags(tag);

            CREATE TABLE IF NOT EXISTS likes (
              user_id TEXT NOT NULL,
              tweet_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(user_id, tweet_id)
            );
            CREATE INDEX IF NOT EXISTS idx_likes_user_created
              ON likes(user_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS comments (
              id TEXT PRIMARY KEY,
              tweet_id TEXT NOT NULL,
              author_id TEXT NOT NULL,
              content TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_tweet ON comments(tweet_id);

            CREATE TABLE IF NOT EXISTS follows (
              follower_id TEXT NOT NULL,
              followee_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(follower_id, followee_id)
            );
            CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);
            "#,
        )
        .map_err(store_err)?;
        Ok(Self { path })
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<T> {
            let mut conn = Connection::open(path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CoreError::SourceUnavailable(format!("blocking task: {e}")))?
        .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = &e {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return CoreError::Rejected("conflicts with an existing record".to_string());
        }
    }
    CoreError::SourceUnavailable(format!("sqlite: {e}"))
}

const FEED_COLUMNS: &str = "t.id, t.content, t.media_ref, t.author_id, t.created_at_ms, \
     t.like_count, t.retweet_count, t.is_retweet, t.original_id, u.username, u.handle";

fn feed_item_from_row(row: &Row) -> rusqlite::Result<FeedItem> {
    let author_id: String = row.get(3)?;
    let username: Option<String> = row.get(9)?;
    let handle: Option<String> = row.get(10)?;
    let author = match (username, handle) {
        (Some(username), Some(handle)) => Some(FeedAuthor {
            id: author_id.clone(),
            username,
            handle,
        }),
        _ => None,
    };
    Ok(FeedItem {
        id: row.get(0)?,
        content: row.get(1)?,
        media_ref: row.get(2)?,
        author_id,
        author,
        created_at_ms: row.get(4)?,
        like_count: row.get::<_, i64>(5)?.max(0) as u64,
        retweet_count: row.get::<_, i64>(6)?.max(0) as u64,
        comment_ids: Vec::new(),
        is_retweet: row.get::<_, i64>(7)? != 0,
        original_id: row.get(8)?,
        hashtags: Vec::new(),
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn load_hashtags(conn: &Connection, items: &mut [FeedItem]) -> rusqlite::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let sql = format!(
        "SELECT tweet_id, tag FROM tweet_hashtags WHERE tweet_id IN ({}) ORDER BY tag",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(ids))?;
    let mut by_tweet: HashMap<String, Vec<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let tweet_id: String = row.get(0)?;
        by_tweet.entry(tweet_id).or_default().push(row.get(1)?);
    }
    for item in items.iter_mut() {
        if let Some(tags) = by_tweet.remove(&item.id) {
            item.hashtags = tags;
        }
    }
    Ok(())
}

fn load_comment_ids(conn: &Connection, items: &mut [FeedItem]) -> rusqlite::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let sql = format!(
        "SELECT tweet_id, id FROM comments WHERE tweet_id IN ({}) ORDER BY created_at_ms",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(ids))?;
    let mut by_tweet: HashMap<String, Vec<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let tweet_id: String = row.get(0)?;
        by_tweet.entry(tweet_id).or_default().push(row.get(1)?);
    }
    for item in items.iter_mut() {
        if let Some(comment_ids) = by_tweet.remove(&item.id) {
            item.comment_ids = comment_ids;
        }
    }
    Ok(())
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn insert_user(&self, user: &UserRecord) -> Result<()> {
        let user = user.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, handle, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![user.id, user.username, user.handle, user.created_at_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, username, handle, created_at_ms FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        handle: row.get(2)?,
                        created_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn user_exists(&self, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                params![user_id],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn get_follow_graph(&self, user_id: &str) -> Result<FollowGraph> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut graph = FollowGraph::default();
            let mut stmt =
                conn.prepare("SELECT follower_id FROM follows WHERE followee_id = ?1")?;
            let mut rows = stmt.query(params![user_id])?;
            while let Some(row) = rows.next()? {
                graph.followers.push(row.get(0)?);
            }
            let mut stmt =
                conn.prepare("SELECT followee_id FROM follows WHERE follower_id = ?1")?;
            let mut rows = stmt.query(params![user_id])?;
            while let Some(row) = rows.next()? {
                graph.followings.push(row.get(0)?);
            }
            Ok(graph)
        })
        .await
    }

    async fn insert_follow(&self, follower_id: &str, followee_id: &str) -> Result<bool> {
        let follower_id = follower_id.to_string();
        let followee_id = followee_id.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![follower_id, followee_id, now_ms()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn remove_follow(&self, follower_id: &str, followee_id: &str) -> Result<bool> {
        let follower_id = follower_id.to_string();
        let followee_id = followee_id.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower_id, followee_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn find_tweets_by_author_in(
        &self,
        author_ids: &[String],
        limit: u32,
    ) -> Result<Vec<FeedItem>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }
        let author_ids = author_ids.to_vec();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {FEED_COLUMNS} FROM tweets t JOIN users u ON u.id = t.author_id
                 WHERE t.author_id IN ({})
                 ORDER BY t.created_at_ms DESC LIMIT {limit}",
                placeholders(author_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(author_ids))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(feed_item_from_row(row)?);
            }
            load_hashtags(conn, &mut items)?;
            load_comment_ids(conn, &mut items)?;
            Ok(items)
        })
        .await
    }

    async fn find_liked_or_retweeted_by(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<FeedItem>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {FEED_COLUMNS} FROM (
                   SELECT tweet_id, MAX(interacted_at_ms) AS interacted_at_ms FROM (
                     SELECT tweet_id, created_at_ms AS interacted_at_ms
                       FROM likes WHERE user_id = ?1
                     UNION ALL
                     SELECT original_id, created_at_ms FROM tweets
                       WHERE author_id = ?1 AND is_retweet = 1 AND original_id IS NOT NULL
                   ) GROUP BY tweet_id
                 ) x
                 JOIN tweets t ON t.id = x.tweet_id
                 JOIN users u ON u.id = t.author_id
                 ORDER BY x.interacted_at_ms DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, limit])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(feed_item_from_row(row)?);
            }
            load_hashtags(conn, &mut items)?;
            load_comment_ids(conn, &mut items)?;
            Ok(items)
        })
        .await
    }

    async fn top_hashtags(&self, n: u32) -> Result<Vec<String>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tag FROM tweet_hashtags
                 GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![n])?;
            let mut tags = Vec::new();
            while let Some(row) = rows.next()? {
                tags.push(row.get(0)?);
            }
            Ok(tags)
        })
        .await
    }

    async fn find_tweets_by_hashtag_in(
        &self,
        tags: &[String],
        limit: u32,
    ) -> Result<Vec<FeedItem>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let tags = tags.to_vec();
        self.call(move |conn| {
            let sql = format!(
                "SELECT DISTINCT {FEED_COLUMNS} FROM tweets t
                 JOIN users u ON u.id = t.author_id
                 JOIN tweet_hashtags h ON h.tweet_id = t.id
                 WHERE h.tag IN ({})
                 ORDER BY (t.like_count + t.retweet_count) DESC, t.created_at_ms DESC
                 LIMIT {limit}",
                placeholders(tags.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(tags))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(feed_item_from_row(row)?);
            }
            // Engagement listing stays light: hashtags only, no comment join.
            load_hashtags(conn, &mut items)?;
            Ok(items)
        })
        .await
    }

    async fn get_feed_item(&self, tweet_id: &str) -> Result<Option<FeedItem>> {
        let tweet_id = tweet_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {FEED_COLUMNS} FROM tweets t JOIN users u ON u.id = t.author_id
                 WHERE t.id = ?1"
            );
            let item = conn
                .query_row(&sql, params![tweet_id], feed_item_from_row)
                .optional()?;
            match item {
                Some(item) => {
                    let mut items = vec![item];
                    load_hashtags(conn, &mut items)?;
                    load_comment_ids(conn, &mut items)?;
                    Ok(items.pop())
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn liked_tweet_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare("SELECT tweet_id FROM likes WHERE user_id = ?1")?;
            let mut rows = stmt.query(params![user_id])?;
            let mut ids = HashSet::new();
            while let Some(row) = rows.next()? {
                ids.insert(row.get(0)?);
            }
            Ok(ids)
        })
        .await
    }

    async fn retweeted_original_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT original_id FROM tweets
                 WHERE author_id = ?1 AND is_retweet = 1 AND original_id IS NOT NULL",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut ids = HashSet::new();
            while let Some(row) = rows.next()? {
                ids.insert(row.get(0)?);
            }
            Ok(ids)
        })
        .await
    }

    async fn insert_tweet(&self, tweet: &NewTweet) -> Result<()> {
        let tweet = tweet.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tweets (id, content, media_ref, author_id, created_at_ms,
                                     is_retweet, original_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tweet.id,
                    tweet.content,
                    tweet.media_ref,
                    tweet.author_id,
                    tweet.created_at_ms,
                    tweet.is_retweet as i64,
                    tweet.original_id
                ],
            )?;
            for tag in &tweet.hashtags {
                tx.execute(
                    "INSERT OR IGNORE INTO tweet_hashtags (tweet_id, tag) VALUES (?1, ?2)",
                    params![tweet.id, tag],
                )?;
            }
            if tweet.is_retweet {
                if let Some(original_id) = &tweet.original_id {
                    tx.execute(
                        "UPDATE tweets SET retweet_count = retweet_count + 1 WHERE id = ?1",
                        params![original_id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        let tweet_id = tweet_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let original: Option<Option<String>> = tx
                .query_row(
                    "SELECT original_id FROM tweets WHERE id = ?1 AND is_retweet = 1",
                    params![tweet_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(Some(original_id)) = original {
                tx.execute(
                    "UPDATE tweets SET retweet_count = retweet_count - 1
                     WHERE id = ?1 AND retweet_count > 0",
                    params![original_id],
                )?;
            }
            tx.execute(
                "DELETE FROM tweet_hashtags WHERE tweet_id = ?1",
                params![tweet_id],
            )?;
            tx.execute("DELETE FROM likes WHERE tweet_id = ?1", params![tweet_id])?;
            tx.execute("DELETE FROM comments WHERE tweet_id = ?1", params![tweet_id])?;
            tx.execute("DELETE FROM tweets WHERE id = ?1", params![tweet_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_retweet_of(
        &self,
        author_id: &str,
        original_id: &str,
    ) -> Result<Option<String>> {
        let author_id = author_id.to_string();
        let original_id = original_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id FROM tweets
                 WHERE author_id = ?1 AND original_id = ?2 AND is_retweet = 1",
                params![author_id, original_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn insert_like(&self, user_id: &str, tweet_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let tweet_id = tweet_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "INSERT OR IGNORE INTO likes (user_id, tweet_id, created_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![user_id, tweet_id, now_ms()],
            )?;
            if changed > 0 {
                tx.execute(
                    "UPDATE tweets SET like_count = like_count + 1 WHERE id = ?1",
                    params![tweet_id],
                )?;
            }
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    async fn remove_like(&self, user_id: &str, tweet_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let tweet_id = tweet_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND tweet_id = ?2",
                params![user_id, tweet_id],
            )?;
            if changed > 0 {
                tx.execute(
                    "UPDATE tweets SET like_count = like_count - 1
                     WHERE id = ?1 AND like_count > 0",
                    params![tweet_id],
                )?;
            }
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_comment(&self, comment: &CommentRecord) -> Result<()> {
        let comment = comment.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO comments (id, tweet_id, author_id, content, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    comment.id,
                    comment.tweet_id,
                    comment.author_id,
                    comment.content,
                    comment.created_at_ms
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}


#[cfg(test)]
mod tests {
    use super::test_support::{seeded_store, tweet, user};
    use super::*;

    #[tokio::test]
    async fn users_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        assert!(store.user_exists("alice").await.unwrap());
        assert!(!store.user_exists("nobody").await.unwrap());
        let alice = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(alice.username, "alice-name");
    }

    #[tokio::test]
    async fn duplicate_user_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let err = store.insert_user(&user("alice")).await.unwrap_err();
        assert!(matches!(err, CoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn author_query_is_newest_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        for (id, at) in [("t1", 10), ("t2", 30), ("t3", 20)] {
            store.insert_tweet(&tweet(id, "alice", at)).await.unwrap();
        }
        let items = store
            .find_tweets_by_author_in(&["alice".to_string()], 2)
            .await
            .unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);
        assert_eq!(items[0].author.as_ref().unwrap().username, "alice-name");
    }

    #[tokio::test]
    async fn top_hashtags_rank_by_usage() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let mut t1 = tweet("t1", "alice", 10);
        t1.hashtags = vec!["rust".to_string(), "news".to_string()];
        let mut t2 = tweet("t2", "bob", 20);
        t2.hashtags = vec!["rust".to_string()];
        store.insert_tweet(&t1).await.unwrap();
        store.insert_tweet(&t2).await.unwrap();

        assert_eq!(
            store.top_hashtags(1).await.unwrap(),
            vec!["rust".to_string()]
        );

        let items = store
            .find_tweets_by_hashtag_in(&["rust".to_string()], 50)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].hashtags.contains(&"rust".to_string()));
    }

    #[tokio::test]
    async fn like_counts_follow_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();

        assert!(store.insert_like("bob", "t1").await.unwrap());
        assert!(!store.insert_like("bob", "t1").await.unwrap());
        let item = store.get_feed_item("t1").await.unwrap().unwrap();
        assert_eq!(item.like_count, 1);

        assert!(store.remove_like("bob", "t1").await.unwrap());
        assert!(!store.remove_like("bob", "t1").await.unwrap());
        let item = store.get_feed_item("t1").await.unwrap().unwrap();
        assert_eq!(item.like_count, 0);
    }

    #[tokio::test]
    async fn retweet_copies_track_the_original_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();

        let mut copy = tweet("rt1", "bob", 20);
        copy.is_retweet = true;
        copy.original_id = Some("t1".to_string());
        store.insert_tweet(&copy).await.unwrap();

        let original = store.get_feed_item("t1").await.unwrap().unwrap();
        assert_eq!(original.retweet_count, 1);
        assert_eq!(
            store.find_retweet_of("bob", "t1").await.unwrap(),
            Some("rt1".to_string())
        );
        assert!(store
            .retweeted_original_ids("bob")
            .await
            .unwrap()
            .contains("t1"));

        store.delete_tweet("rt1").await.unwrap();
        let original = store.get_feed_item("t1").await.unwrap().unwrap();
        assert_eq!(original.retweet_count, 0);
        assert_eq!(store.find_retweet_of("bob", "t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn liked_or_retweeted_is_newest_interaction_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();
        store.insert_tweet(&tweet("t2", "alice", 20)).await.unwrap();

        // Like the older tweet second: interaction recency wins over post age.
        store.insert_like("bob", "t2").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.insert_like("bob", "t1").await.unwrap();

        let items = store.find_liked_or_retweeted_by("bob", 50).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn follow_graph_tracks_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        assert!(store.insert_follow("alice", "bob").await.unwrap());
        assert!(!store.insert_follow("alice", "bob").await.unwrap());
        store.insert_follow("carol", "bob").await.unwrap();

        let bob = store.get_follow_graph("bob").await.unwrap();
        assert_eq!(bob.followers.len(), 2);
        assert!(bob.followings.is_empty());

        let alice = store.get_follow_graph("alice").await.unwrap();
        assert_eq!(alice.followings, vec!["bob".to_string()]);

        assert!(store.remove_follow("alice", "bob").await.unwrap());
        let bob = store.get_follow_graph("bob").await.unwrap();
        assert_eq!(bob.followers, vec!["carol".to_string()]);
    }

    #[tokio::test]
    async fn comments_surface_as_comment_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        store.insert_tweet(&tweet("t1", "alice", 10)).await.unwrap();
        store
            .insert_comment(&CommentRecord {
                id: "c1".to_string(),
                tweet_id: "t1".to_string(),
                author_id: "bob".to_string(),
                content: "nice".to_string(),
                created_at_ms: 20,
            })
            .await
            .unwrap();

        let item = store.get_feed_item("t1").await.unwrap().unwrap();
        assert_eq!(item.comment_ids, vec!["c1".to_string()]);
    }
}
