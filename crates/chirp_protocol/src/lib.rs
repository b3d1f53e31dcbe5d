/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// Frames a client may send over its socket. Until a `register` frame
/// arrives the connection is inert and receives nothing targeted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "register", rename_all = "camelCase")]
    Register { user_id: String },
}

/// Frames the server pushes to connected clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "notification")]
    Notification { message: String },
    #[serde(rename = "NEW_TWEET", rename_all = "camelCase")]
    NewTweet {
        tweet_id: String,
        content: String,
        author: String,
    },
}
