//! Notification Manager
//!
//! Creates user notifications and fans them out: persist, enqueue for
//! at-least-once delivery, then push to live connections. Reading a
//! notification acknowledges its queue entry.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{NewNotification, Notification, QueueEntry, DEFAULT_PRIORITY};
use crate::ports::{Envelope, ListOptions, NotificationStore, RealtimePush, StoreError};
use super::queue::DeliveryQueue;

/// Read notifications older than this are eligible for cleanup
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_role: BTreeMap<String, usize>,
    pub recent_24h: usize,
}

/// A queued delivery joined with its notification
#[derive(Debug, Clone, Serialize)]
pub struct PendingDelivery {
    pub entry: QueueEntry,
    pub notification: Notification,
}

pub struct NotificationManager {
    store: Arc<dyn NotificationStore>,
    queue: Arc<DeliveryQueue>,
    push: Arc<dyn RealtimePush>,
    default_priority: u8,
}

impl NotificationManager {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: Arc<DeliveryQueue>,
        push: Arc<dyn RealtimePush>,
    ) -> Self {
        Self {
            store,
            queue,
            push,
            default_priority: DEFAULT_PRIORITY,
        }
    }

    /// Queue priority for notifications that did not ask for one
    pub fn with_default_priority(mut self, priority: u8) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// Persist, enqueue, then push. An offline user is not an error; the
    /// queue entry stays until the notification is read.
    pub async fn create(&self, new: NewNotification) -> Result<Notification, NotificationError> {
        let priority = new.priority.unwrap_or(self.default_priority);
        let notification = Notification::from_new(new);

        self.store.insert(notification.clone()).await?;
        self.queue
            .enqueue(QueueEntry::new(
                notification.user_id.clone(),
                notification.id.clone(),
                priority,
            ))
            .await?;

        match serde_json::to_value(&notification) {
            Ok(data) => {
                let delivered = self
                    .push
                    .send_to_user(&notification.user_id, Envelope::notification(data));
                if !delivered {
                    tracing::debug!(
                        "User {} offline, notification {} left queued",
                        notification.user_id,
                        notification.id
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to encode notification {}: {}", notification.id, e),
        }

        tracing::debug!(
            "Notification {} created for {}: {}",
            notification.id,
            notification.user_id,
            notification.title
        );
        Ok(notification)
    }

    pub async fn list(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, NotificationError> {
        Ok(self.store.list(user_id, options).await?)
    }

    /// Mark one notification read and acknowledge its delivery.
    /// No-op if already read or owned by someone else.
    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> Result<bool, NotificationError> {
        let flipped = self.store.mark_read(notification_id, user_id).await?;
        if flipped {
            self.queue.remove(user_id, notification_id).await?;
        }
        Ok(flipped)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<usize, NotificationError> {
        let count = self.store.mark_all_read(user_id).await?;
        self.queue.clear_user(user_id).await?;
        Ok(count)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize, NotificationError> {
        Ok(self.store.unread_count(user_id).await?)
    }

    pub async fn stats(&self, user_id: &str) -> Result<NotificationStats, NotificationError> {
        let all = self.store.list(user_id, &ListOptions::default()).await?;
        let day_ago = Utc::now() - ChronoDuration::hours(24);

        let mut stats = NotificationStats {
            total: all.len(),
            ..NotificationStats::default()
        };
        for notification in &all {
            if !notification.is_read {
                stats.unread += 1;
            }
            if notification.created_at >= day_ago {
                stats.recent_24h += 1;
            }
            *stats
                .by_type
                .entry(notification.notification_type().to_string())
                .or_default() += 1;
            *stats
                .by_role
                .entry(notification.account_role.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    /// Delete read notifications older than `retention_days`
    pub async fn cleanup_old(&self, retention_days: i64) -> Result<usize, NotificationError> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let removed = self.store.remove_read_before(cutoff).await?;
        if removed > 0 {
            tracing::info!("Removed {} read notifications older than {} days", removed, retention_days);
        }
        Ok(removed)
    }

    /// Queue order for `user_id`, joined with the notifications still on record
    pub async fn pending(&self, user_id: &str, limit: usize) -> Result<Vec<PendingDelivery>, NotificationError> {
        let mut deliveries = Vec::new();
        for entry in self.queue.pending(user_id, limit).await {
            if let Some(notification) = self.store.get(&entry.notification_id).await? {
                deliveries.push(PendingDelivery { entry, notification });
            }
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::MemoryNotificationStore;
    use crate::domain::{AccountRole, NotificationPayload, DEFAULT_PRIORITY, HIGH_PRIORITY};
    use crate::ports::fakes::RecordingPush;
    use crate::ports::MessageType;

    fn manager() -> (NotificationManager, Arc<RecordingPush>, Arc<DeliveryQueue>) {
        let push = Arc::new(RecordingPush::new());
        let queue = Arc::new(DeliveryQueue::new());
        let manager = NotificationManager::new(
            Arc::new(MemoryNotificationStore::new()),
            queue.clone(),
            push.clone(),
        );
        (manager, push, queue)
    }

    fn info(user: &str) -> NewNotification {
        NewNotification::new(user, AccountRole::Owner, "Info", "hello", NotificationPayload::Info { summary: None })
    }

    fn error(user: &str) -> NewNotification {
        NewNotification::new(
            user,
            AccountRole::Slave,
            "Auto-close failed",
            "boom",
            NotificationPayload::Error { error: "boom".into() },
        )
    }

    #[tokio::test]
    async fn test_create_persists_enqueues_and_pushes() {
        let (manager, push, queue) = manager();
        push.set_online("u1", true);

        let created = manager.create(info("u1")).await.unwrap();

        let sent = push.sent_to("u1");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::Notification);
        assert_eq!(sent[0].data["id"], created.id.as_str());

        // Pushed but unread stays queued
        let pending = queue.pending("u1", 10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification_id, created.id);
    }

    #[tokio::test]
    async fn test_offline_user_can_pull_unread() {
        let (manager, push, _) = manager();
        let created = manager.create(info("u1")).await.unwrap();
        assert_eq!(push.sent_to("u1").len(), 1);

        let unread = manager.list("u1", &ListOptions::unread()).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, created.id);
    }

    #[tokio::test]
    async fn test_mark_read_acknowledges_queue_entry() {
        let (manager, _, queue) = manager();
        let created = manager.create(info("u1")).await.unwrap();

        assert!(!manager.mark_read(&created.id, "u2").await.unwrap());
        assert_eq!(queue.pending("u1", 10).await.len(), 1);

        assert!(manager.mark_read(&created.id, "u1").await.unwrap());
        assert!(queue.pending("u1", 10).await.is_empty());
        assert!(manager.list("u1", &ListOptions::unread()).await.unwrap().is_empty());

        // Second read is a silent no-op
        assert!(!manager.mark_read(&created.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_all_read_clears_queue() {
        let (manager, _, queue) = manager();
        manager.create(info("u1")).await.unwrap();
        manager.create(error("u1")).await.unwrap();
        manager.create(info("u2")).await.unwrap();

        assert_eq!(manager.mark_all_read("u1").await.unwrap(), 2);
        assert_eq!(manager.unread_count("u1").await.unwrap(), 0);
        assert!(queue.pending("u1", 10).await.is_empty());
        assert_eq!(queue.pending("u2", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_delivered_first() {
        let (manager, _, _) = manager();
        manager.create(info("u1")).await.unwrap();
        let err = manager.create(error("u1")).await.unwrap();

        let pending = manager.pending("u1", 10).await.unwrap();
        assert_eq!(pending[0].notification.id, err.id);
        assert_eq!(pending[0].entry.priority, HIGH_PRIORITY);
    }

    #[tokio::test]
    async fn test_configured_default_priority_keeps_explicit_requests() {
        let queue = Arc::new(DeliveryQueue::new());
        let manager = NotificationManager::new(
            Arc::new(MemoryNotificationStore::new()),
            queue.clone(),
            Arc::new(RecordingPush::new()),
        )
        .with_default_priority(2);

        let unset = manager.create(info("u1")).await.unwrap();
        let pinned = manager
            .create(info("u1").with_priority(DEFAULT_PRIORITY))
            .await
            .unwrap();
        let err = manager.create(error("u1")).await.unwrap();

        let priority_of = |id: &str, pending: &[QueueEntry]| {
            pending
                .iter()
                .find(|e| e.notification_id == id)
                .map(|e| e.priority)
        };
        let pending = queue.pending("u1", 10).await;
        assert_eq!(priority_of(&unset.id, &pending), Some(2));
        assert_eq!(priority_of(&pinned.id, &pending), Some(DEFAULT_PRIORITY));
        assert_eq!(priority_of(&err.id, &pending), Some(HIGH_PRIORITY));
    }

    #[tokio::test]
    async fn test_stats_groups_by_type_and_role() {
        let (manager, _, _) = manager();
        let first = manager.create(info("u1")).await.unwrap();
        manager.create(info("u1")).await.unwrap();
        manager.create(error("u1")).await.unwrap();
        manager.mark_read(&first.id, "u1").await.unwrap();

        let stats = manager.stats("u1").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 2);
        assert_eq!(stats.recent_24h, 3);
        assert_eq!(stats.by_type["info"], 2);
        assert_eq!(stats.by_type["error"], 1);
        assert_eq!(stats.by_role["slave"], 1);
    }

    #[tokio::test]
    async fn test_cleanup_old_keeps_recent() {
        let (manager, _, _) = manager();
        let created = manager.create(info("u1")).await.unwrap();
        manager.mark_read(&created.id, "u1").await.unwrap();

        assert_eq!(manager.cleanup_old(DEFAULT_RETENTION_DAYS).await.unwrap(), 0);
        assert_eq!(manager.list("u1", &ListOptions::default()).await.unwrap().len(), 1);
    }
}
