/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Error surface of the core.
///
/// `NotFound` and `Rejected` are caller mistakes and never retried.
/// `SourceUnavailable` means the entity store or cache layer could not be
/// reached; read paths surface it rather than return a partial result.
/// `DeliveryFailed` is transient and only ever seen by the notification
/// queue, which retries it up to the configured attempt cap.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
