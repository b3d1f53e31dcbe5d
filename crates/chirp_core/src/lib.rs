/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod actions;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod inbox;
pub mod queue;
pub mod registry;
pub mod sessions;
pub mod store;
pub mod timeline;
