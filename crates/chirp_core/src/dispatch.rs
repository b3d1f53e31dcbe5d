/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{CoreError, Result};
use crate::inbox::NotificationInbox;
use crate::queue::{Deliver, DeliveryOutcome, NotificationJob};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use chirp_protocol::ServerFrame;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves a job's recipient to a live connection and pushes the event.
/// Offline recipients simply miss the live push; the inbox entry written
/// here is what they see on their next fetch.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    inbox: Arc<NotificationInbox>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, inbox: Arc<NotificationInbox>) -> Self {
        Self { registry, inbox }
    }
}

#[async_trait]
impl Deliver for Dispatcher {
    async fn deliver(&self, job: &NotificationJob) -> Result<DeliveryOutcome> {
        // Inbox write only on the first attempt, so retries cannot duplicate it.
        if job.attempts_made <= 1 {
            if let Err(e) = self.inbox.append(&job.recipient_id, &job.message).await {
                warn!(recipient = %job.recipient_id, "inbox append failed: {e}");
            }
        }

        let Some(handle) = self.registry.get(&job.recipient_id).await else {
            debug!(recipient = %job.recipient_id, "recipient offline, push dropped");
            return Ok(DeliveryOutcome::Dropped);
        };
        let frame = ServerFrame::Notification {
            message: job.message.clone(),
        };
        if handle.push(frame).await {
            Ok(DeliveryOutcome::Delivered)
        } else {
            Err(CoreError::DeliveryFailed(
                "connection closed mid-send".to_string(),
            ))
        }
    }
}
