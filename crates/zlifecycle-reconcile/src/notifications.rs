// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator notifications: persistence plus live fan-out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{NewNotification, Notification};
use crate::notify::NotificationHub;
use crate::store::NotificationStore;

/// Page size of [`NotificationService::recent_notifications`].
pub const RECENT_NOTIFICATIONS_LIMIT: i64 = 20;

/// Saves, replays and acknowledges operator notifications.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    hub: NotificationHub,
}

impl NotificationService {
    /// Create a notification service.
    pub fn new(store: Arc<dyn NotificationStore>, hub: NotificationHub) -> Self {
        Self { store, hub }
    }

    /// Persist a notification and publish it on the message channel.
    pub async fn save_notification(&self, new: &NewNotification) -> Result<Notification> {
        let timestamp = new.timestamp.unwrap_or_else(Utc::now);
        let saved = self.store.insert_notification(new, timestamp).await?;

        info!(
            notification_id = saved.notification_id,
            company_id = %saved.company_id,
            team_name = %saved.team_name,
            message_type = %saved.message_type,
            "Saved notification"
        );

        self.hub.publish_message(saved.clone());
        Ok(saved)
    }

    /// Re-publish every unseen notification of a team. Returns how many were sent.
    pub async fn replay_unseen(&self, company_id: &str, team_name: &str) -> Result<usize> {
        let unseen = self
            .store
            .list_unseen_notifications(company_id, team_name)
            .await?;
        let count = unseen.len();

        for notification in unseen {
            self.hub.publish_message(notification);
        }

        debug!(company_id = %company_id, team_name = %team_name, count, "Replayed unseen notifications");
        Ok(count)
    }

    /// The newest notifications of a team, newest first.
    pub async fn recent_notifications(
        &self,
        company_id: &str,
        team_name: &str,
    ) -> Result<Vec<Notification>> {
        self.store
            .list_recent_notifications(company_id, team_name, RECENT_NOTIFICATIONS_LIMIT)
            .await
    }

    /// Acknowledge a notification.
    pub async fn mark_seen(&self, notification_id: i64) -> Result<()> {
        if !self.store.mark_notification_seen(notification_id).await? {
            return Err(Error::not_found("notification", notification_id));
        }
        debug!(notification_id, "Marked notification seen");
        Ok(())
    }
}
