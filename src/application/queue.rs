//! Delivery Queue
//!
//! At-least-once queue of pending notification deliveries. An entry leaves
//! the queue only when its notification is read (or the user's queue is
//! cleared), never because a push was attempted. Entries that exhaust their
//! retries are purged by a periodic cleanup task.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::store::SnapshotFile;
use crate::domain::{QueueEntry, HIGH_PRIORITY};
use crate::ports::StoreResult;

/// Default retry ceiling before an entry is purged
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_pending: usize,
    pub high_priority: usize,
    pub with_retries: usize,
    pub oldest_pending: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: RwLock<Vec<QueueEntry>>,
    snapshot: Option<SnapshotFile>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(snapshot: SnapshotFile) -> StoreResult<Self> {
        let saved: Vec<QueueEntry> = snapshot.load()?.unwrap_or_default();
        Ok(Self {
            entries: RwLock::new(saved),
            snapshot: Some(snapshot),
        })
    }

    /// Save `next`, then swap it in. A failed save keeps the current entries.
    fn commit(&self, current: &mut Vec<QueueEntry>, next: Vec<QueueEntry>) -> StoreResult<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(&next)?;
        }
        *current = next;
        Ok(())
    }

    /// Keep only entries matching `keep`. Returns how many were dropped.
    async fn retain<F>(&self, keep: F) -> StoreResult<usize>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let mut entries = self.entries.write().await;
        let next: Vec<QueueEntry> = entries.iter().filter(|e| keep(e)).cloned().collect();
        let dropped = entries.len() - next.len();
        if dropped > 0 {
            self.commit(&mut entries, next)?;
        }
        Ok(dropped)
    }

    /// Apply `f` to the entry for (user, notification). Returns false if absent.
    async fn update<F>(&self, user_id: &str, notification_id: &str, f: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        match next
            .iter_mut()
            .find(|e| e.user_id == user_id && e.notification_id == notification_id)
        {
            Some(entry) => f(entry),
            None => return Ok(false),
        }
        self.commit(&mut entries, next)?;
        Ok(true)
    }

    pub async fn enqueue(&self, entry: QueueEntry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        tracing::debug!(
            "Queued notification {} for {} (priority {})",
            entry.notification_id,
            entry.user_id,
            entry.priority
        );
        let mut next = entries.clone();
        next.push(entry);
        self.commit(&mut entries, next)
    }

    /// Acknowledge delivery of one notification
    pub async fn remove(&self, user_id: &str, notification_id: &str) -> StoreResult<bool> {
        let removed = self
            .retain(|e| !(e.user_id == user_id && e.notification_id == notification_id))
            .await?;
        Ok(removed > 0)
    }

    pub async fn clear_user(&self, user_id: &str) -> StoreResult<usize> {
        self.retain(|e| e.user_id != user_id).await
    }

    /// Pending entries for `user_id`, highest priority first, then oldest schedule
    pub async fn pending(&self, user_id: &str, limit: usize) -> Vec<QueueEntry> {
        let mut pending: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_for.cmp(&b.scheduled_for))
        });
        pending.truncate(limit);
        pending
    }

    pub async fn update_priority(
        &self,
        user_id: &str,
        notification_id: &str,
        priority: u8,
    ) -> StoreResult<bool> {
        self.update(user_id, notification_id, |e| e.priority = priority)
            .await
    }

    pub async fn increment_retry_count(&self, user_id: &str, notification_id: &str) -> StoreResult<bool> {
        self.update(user_id, notification_id, |e| e.retry_count += 1)
            .await
    }

    /// Push the entry `delay_minutes` into the future and count a retry
    pub async fn reschedule(
        &self,
        user_id: &str,
        notification_id: &str,
        delay_minutes: i64,
    ) -> StoreResult<bool> {
        let scheduled_for = Utc::now() + ChronoDuration::minutes(delay_minutes);
        self.update(user_id, notification_id, |e| {
            e.scheduled_for = scheduled_for;
            e.retry_count += 1;
        })
        .await
    }

    /// Purge entries with `retry_count >= max_retries`
    pub async fn cleanup_failed(&self, max_retries: u32) -> StoreResult<usize> {
        let purged = self.retain(|e| e.retry_count < max_retries).await?;
        if purged > 0 {
            tracing::warn!("Purged {} queue entries after {} retries", purged, max_retries);
        }
        Ok(purged)
    }

    pub async fn stats(&self, user_id: Option<&str>) -> QueueStats {
        let entries = self.entries.read().await;
        let scoped: Vec<&QueueEntry> = entries
            .iter()
            .filter(|e| user_id.map_or(true, |u| e.user_id == u))
            .collect();

        QueueStats {
            total_pending: scoped.len(),
            high_priority: scoped.iter().filter(|e| e.priority >= HIGH_PRIORITY).count(),
            with_retries: scoped.iter().filter(|e| e.retry_count > 0).count(),
            oldest_pending: scoped.iter().map(|e| e.scheduled_for).min(),
        }
    }

    /// Run `cleanup_failed` every `interval` until `cancel` fires
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        max_retries: u32,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = queue.cleanup_failed(max_retries).await {
                            tracing::error!("Queue cleanup failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Queue cleanup task stopped");
        })
    }
}
