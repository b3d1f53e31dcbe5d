/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Author summary attached to a feed item when the source query joined it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedAuthor {
    pub id: String,
    pub username: String,
    pub handle: String,
}

/// One tweet as it appears in a feed. Derived and read-mostly: the core
/// assembles these from store records and never mutates them in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub content: String,
    pub media_ref: Option<String>,
    pub author_id: String,
    /// Populated by some source queries and not others; dedup keeps the
    /// richer copy when the same tweet surfaces from several sources.
    pub author: Option<FeedAuthor>,
    pub created_at_ms: i64,
    pub like_count: u64,
    pub retweet_count: u64,
    pub comment_ids: Vec<String>,
    pub is_retweet: bool,
    pub original_id: Option<String>,
    pub hashtags: Vec<String>,
}

impl FeedItem {
    pub fn engagement(&self) -> u64 {
        self.like_count + self.retweet_count
    }

    fn richness(&self) -> u32 {
        (self.author.is_some() as u32) * 2 + (!self.comment_ids.is_empty() as u32)
    }
}

/// A feed item annotated with caller-relative flags. The flags are per
/// viewer, so they live in the per-user timeline cache entry, not on the
/// stored tweet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineItem {
    #[serde(flatten)]
    pub item: FeedItem,
    pub is_liked: bool,
    pub is_retweeted: bool,
    pub is_following_author: bool,
}

/// Union several candidate sets into one copy per tweet id, in first-seen
/// order. When the same id surfaces with different population, the copy
/// with a joined author wins, then the one carrying comment ids.
pub fn dedupe_richest(sets: Vec<Vec<FeedItem>>) -> Vec<FeedItem> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<FeedItem> = Vec::new();
    for item in sets.into_iter().flatten() {
        match slots.get(&item.id) {
            Some(&at) => {
                if item.richness() > out[at].richness() {
                    out[at] = item;
                }
            }
            None => {
                slots.insert(item.id.clone(), out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Rank by engagement (likes + retweets) descending; equal scores break
/// toward the more recently created item.
pub fn rank(items: &mut [TimelineItem]) {
    items.sort_by(|a, b| {
        b.item
            .engagement()
            .cmp(&a.item.engagement())
            .then(b.item.created_at_ms.cmp(&a.item.created_at_ms))
    });
}


#[cfg(test)]
mod tests {
    use super::test_support::item;
    use super::*;

    #[test]
    fn dedupe_keeps_one_copy_per_id() {
        let a = item("t1", "u1", 10);
        let b = item("t1", "u1", 10);
        let c = item("t2", "u2", 20);
        let merged = dedupe_richest(vec![vec![a], vec![b, c]]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "t1");
        assert_eq!(merged[1].id, "t2");
    }

    #[test]
    fn dedupe_prefers_populated_author() {
        let poor = item("t1", "u1", 10);
        let mut rich = item("t1", "u1", 10);
        rich.author = Some(FeedAuthor {
            id: "u1".to_string(),
            username: "ada".to_string(),
            handle: "ada".to_string(),
        });
        let merged = dedupe_richest(vec![vec![poor], vec![rich.clone()]]);
        assert_eq!(merged, vec![rich]);
    }

    #[test]
    fn dedupe_prefers_comment_ids_over_bare_copy() {
        let bare = item("t1", "u1", 10);
        let mut commented = item("t1", "u1", 10);
        commented.comment_ids = vec!["c1".to_string()];
        let merged = dedupe_richest(vec![vec![commented.clone()], vec![bare]]);
        assert_eq!(merged, vec![commented]);
    }

    #[test]
    fn rank_orders_by_engagement_then_recency() {
        let mut low = item("t1", "u1", 100);
        low.like_count = 1;
        let mut high = item("t2", "u1", 50);
        high.like_count = 2;
        high.retweet_count = 3;
        let mut tied_old = item("t3", "u1", 10);
        tied_old.like_count = 1;

        let wrap = |item: FeedItem| TimelineItem {
            item,
            is_liked: false,
            is_retweeted: false,
            is_following_author: false,
        };
        let mut items = vec![wrap(tied_old), wrap(low), wrap(high)];
        rank(&mut items);
        let ids: Vec<&str> = items.iter().map(|t| t.item.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t3"]);
    }
}
