//! In-Memory Stores
//!
//! Map-backed implementations of the storage ports. Each store optionally
//! mirrors its state into a JSON snapshot file and reloads it on open, so a
//! restart keeps tracked positions and notifications. A write reaches memory
//! only after its snapshot is saved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{
    AccountRole, Association, AssociationKind, Notification, PositionKey, PositionSnapshot, PositionStatus,
    TrackedPosition,
};
use crate::ports::{
    AssociationStore, ListOptions, NotificationStore, PositionCounts, PositionStore, StoreResult,
};
use super::snapshot::SnapshotFile;

/// Tracked positions keyed by (account, position id)
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: RwLock<HashMap<PositionKey, TrackedPosition>>,
    snapshot: Option<SnapshotFile>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted to `snapshot`, loading any existing state
    pub fn open(snapshot: SnapshotFile) -> StoreResult<Self> {
        let saved: Vec<TrackedPosition> = snapshot.load()?.unwrap_or_default();
        tracing::info!(
            "Loaded {} tracked positions from {}",
            saved.len(),
            snapshot.path().display()
        );
        let positions = saved.into_iter().map(|p| (p.key.clone(), p)).collect();
        Ok(Self {
            positions: RwLock::new(positions),
            snapshot: Some(snapshot),
        })
    }

    /// Save the map with `staged` applied, then apply it in memory.
    /// A failed save leaves the map untouched.
    fn commit(
        &self,
        positions: &mut HashMap<PositionKey, TrackedPosition>,
        staged: TrackedPosition,
    ) -> StoreResult<()> {
        if let Some(snapshot) = &self.snapshot {
            let mut rows: Vec<&TrackedPosition> = positions
                .values()
                .filter(|p| p.key != staged.key)
                .chain(std::iter::once(&staged))
                .collect();
            rows.sort_by(|a, b| a.key.cmp(&b.key));
            snapshot.save(&rows)?;
        }
        positions.insert(staged.key.clone(), staged);
        Ok(())
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn get(&self, key: &PositionKey) -> StoreResult<Option<TrackedPosition>> {
        Ok(self.positions.read().await.get(key).cloned())
    }

    async fn insert_if_absent(&self, position: TrackedPosition) -> StoreResult<bool> {
        let mut positions = self.positions.write().await;
        if positions.contains_key(&position.key) {
            return Ok(false);
        }
        self.commit(&mut positions, position)?;
        Ok(true)
    }

    async fn refresh(&self, key: &PositionKey, snapshot: PositionSnapshot) -> StoreResult<bool> {
        let mut positions = self.positions.write().await;
        let mut staged = match positions.get(key) {
            Some(position) => position.clone(),
            None => return Ok(false),
        };
        if staged.refresh(snapshot).is_err() {
            return Ok(false);
        }
        self.commit(&mut positions, staged)?;
        Ok(true)
    }

    async fn close_if_open(&self, key: &PositionKey, snapshot: PositionSnapshot) -> StoreResult<bool> {
        let mut positions = self.positions.write().await;
        let mut staged = match positions.get(key) {
            Some(position) => position.clone(),
            None => return Ok(false),
        };
        if staged.close(snapshot).is_err() {
            return Ok(false);
        }
        self.commit(&mut positions, staged)?;
        Ok(true)
    }

    async fn counts(&self) -> StoreResult<PositionCounts> {
        let positions = self.positions.read().await;
        let open = positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .count();
        Ok(PositionCounts {
            open,
            closed: positions.len() - open,
            total: positions.len(),
        })
    }
}

/// Association graph. Written by the external trade-entry flow.
#[derive(Debug, Default)]
pub struct MemoryAssociationStore {
    associations: RwLock<Vec<Association>>,
    snapshot: Option<SnapshotFile>,
}

impl MemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(snapshot: SnapshotFile) -> StoreResult<Self> {
        let saved: Vec<Association> = snapshot.load()?.unwrap_or_default();
        let mut valid = Vec::with_capacity(saved.len());
        for association in saved {
            match association.validate() {
                Ok(()) => valid.push(association),
                Err(e) => tracing::warn!("Dropping stored association {}: {}", association.id, e),
            }
        }
        Ok(Self {
            associations: RwLock::new(valid),
            snapshot: Some(snapshot),
        })
    }

    pub async fn len(&self) -> usize {
        self.associations.read().await.len()
    }

    /// Save `next`, then swap it in. A failed save keeps the current list.
    fn commit(&self, current: &mut Vec<Association>, next: Vec<Association>) -> StoreResult<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(&next)?;
        }
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl AssociationStore for MemoryAssociationStore {
    async fn insert(&self, association: Association) -> StoreResult<()> {
        association.validate()?;
        let mut associations = self.associations.write().await;
        let mut next = associations.clone();
        next.push(association);
        self.commit(&mut associations, next)
    }

    async fn find_by_position(
        &self,
        user_id: &str,
        role: AccountRole,
        position_id: &str,
    ) -> StoreResult<Vec<Association>> {
        Ok(self
            .associations
            .read()
            .await
            .iter()
            .filter(|a| a.user_id == user_id && a.references(role, position_id))
            .cloned()
            .collect())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        kind: Option<AssociationKind>,
    ) -> StoreResult<Vec<Association>> {
        let mut found: Vec<Association> = self
            .associations
            .read()
            .await
            .iter()
            .filter(|a| a.user_id == user_id && kind.map_or(true, |k| a.kind == k))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn remove(&self, user_id: &str, association_id: &str) -> StoreResult<bool> {
        let mut associations = self.associations.write().await;
        let next: Vec<Association> = associations
            .iter()
            .filter(|a| !(a.id == association_id && a.user_id == user_id))
            .cloned()
            .collect();
        if next.len() == associations.len() {
            return Ok(false);
        }
        self.commit(&mut associations, next)?;
        Ok(true)
    }
}

/// Notifications in creation order
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
    snapshot: Option<SnapshotFile>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(snapshot: SnapshotFile) -> StoreResult<Self> {
        let saved: Vec<Notification> = snapshot.load()?.unwrap_or_default();
        Ok(Self {
            notifications: RwLock::new(saved),
            snapshot: Some(snapshot),
        })
    }

    /// Save `next`, then swap it in. A failed save keeps the current list.
    fn commit(&self, current: &mut Vec<Notification>, next: Vec<Notification>) -> StoreResult<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(&next)?;
        }
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> StoreResult<()> {
        let mut notifications = self.notifications.write().await;
        let mut next = notifications.clone();
        next.push(notification);
        self.commit(&mut notifications, next)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Notification>> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn list(&self, user_id: &str, options: &ListOptions) -> StoreResult<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        let mut matching: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .filter(|n| !options.unread_only || !n.is_read)
            .filter(|n| options.account_role.map_or(true, |role| n.account_role == role))
            .cloned()
            .collect();

        // Stable sort keeps insertion order for equal timestamps; reverse for newest first
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.reverse();

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(options.offset).take(limit).collect())
    }

    async fn mark_read(&self, id: &str, user_id: &str) -> StoreResult<bool> {
        let mut notifications = self.notifications.write().await;
        let mut next = notifications.clone();
        match next
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id && !n.is_read)
        {
            Some(notification) => notification.is_read = true,
            None => return Ok(false),
        }
        self.commit(&mut notifications, next)?;
        Ok(true)
    }

    async fn mark_all_read(&self, user_id: &str) -> StoreResult<usize> {
        let mut notifications = self.notifications.write().await;
        let mut next = notifications.clone();
        let mut count = 0;
        for notification in next
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            count += 1;
        }
        if count > 0 {
            self.commit(&mut notifications, next)?;
        }
        Ok(count)
    }

    async fn unread_count(&self, user_id: &str) -> StoreResult<usize> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count())
    }

    async fn remove_read_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut notifications = self.notifications.write().await;
        let next: Vec<Notification> = notifications
            .iter()
            .filter(|n| !(n.is_read && n.created_at < cutoff))
            .cloned()
            .collect();
        let removed = notifications.len() - next.len();
        if removed > 0 {
            self.commit(&mut notifications, next)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewNotification, NotificationPayload};
    use crate::ports::fakes::open_snapshot;
    use crate::ports::StoreError;
    use chrono::Duration;
    use tempfile::tempdir;

    fn tracked(account: &str, id: &str) -> TrackedPosition {
        TrackedPosition::open(account, "user-1", AccountRole::Owner, open_snapshot(id))
    }

    fn note(user: &str, role: AccountRole) -> Notification {
        Notification::from_new(NewNotification::new(
            user,
            role,
            "Trade opened",
            "msg",
            NotificationPayload::Info { summary: None },
        ))
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() {
        let store = MemoryPositionStore::new();
        assert!(store.insert_if_absent(tracked("acc", "p1")).await.unwrap());
        assert!(!store.insert_if_absent(tracked("acc", "p1")).await.unwrap());
        // Same id on another account is a different key
        assert!(store.insert_if_absent(tracked("acc2", "p1")).await.unwrap());
        assert_eq!(store.counts().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_close_if_open_transitions_once() {
        let store = MemoryPositionStore::new();
        store.insert_if_absent(tracked("acc", "p1")).await.unwrap();
        let key = PositionKey::new("acc", "p1");

        assert!(store.close_if_open(&key, open_snapshot("p1")).await.unwrap());
        assert!(!store.close_if_open(&key, open_snapshot("p1")).await.unwrap());
        assert!(!store.refresh(&key, open_snapshot("p1")).await.unwrap());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts, PositionCounts { open: 0, closed: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_closed_position_never_reinserted() {
        let store = MemoryPositionStore::new();
        store.insert_if_absent(tracked("acc", "p1")).await.unwrap();
        let key = PositionKey::new("acc", "p1");
        store.close_if_open(&key, open_snapshot("p1")).await.unwrap();

        assert!(!store.insert_if_absent(tracked("acc", "p1")).await.unwrap());
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_unknown_position_is_noop() {
        let store = MemoryPositionStore::new();
        let key = PositionKey::new("acc", "ghost");
        assert!(!store.close_if_open(&key, open_snapshot("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_position_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::in_dir(dir.path(), "positions.json");
        {
            let store = MemoryPositionStore::open(file.clone()).unwrap();
            store.insert_if_absent(tracked("acc", "p1")).await.unwrap();
            store
                .close_if_open(&PositionKey::new("acc", "p1"), open_snapshot("p1"))
                .await
                .unwrap();
        }

        let reopened = MemoryPositionStore::open(file).unwrap();
        let stored = reopened.get(&PositionKey::new("acc", "p1")).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_association_insert_validates_kind() {
        let store = MemoryAssociationStore::new();
        let mut bad = Association::new("u1", AssociationKind::SlaveToOwner, "L1", "P1");
        bad.shadow_position_id = Some("S1".into());

        let result = store.insert(bad).await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_find_by_position_matches_role_slot_and_user() {
        let store = MemoryAssociationStore::new();
        store
            .insert(Association::new("u1", AssociationKind::ShadowToOwner, "S1", "P1"))
            .await
            .unwrap();
        store
            .insert(Association::new("u1", AssociationKind::SlaveToOwner, "L1", "P1"))
            .await
            .unwrap();
        store
            .insert(Association::new("u2", AssociationKind::SlaveToOwner, "L9", "P1"))
            .await
            .unwrap();

        let found = store.find_by_position("u1", AccountRole::Owner, "P1").await.unwrap();
        assert_eq!(found.len(), 2);

        // P1 is not in any shadow slot
        let found = store.find_by_position("u1", AccountRole::Shadow, "P1").await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_remove_association() {
        let store = MemoryAssociationStore::new();
        let assoc = Association::new("u1", AssociationKind::SlaveToShadow, "L1", "S1");
        let id = assoc.id.clone();
        store.insert(assoc).await.unwrap();

        // Only the owner may remove it
        assert!(!store.remove("u2", &id).await.unwrap());
        assert!(store.remove("u1", &id).await.unwrap());
        assert!(!store.remove("u1", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_associations_by_user_and_kind() {
        let store = MemoryAssociationStore::new();
        let mut older = Association::new("u1", AssociationKind::ShadowToOwner, "S1", "P1");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = Association::new("u1", AssociationKind::SlaveToOwner, "L1", "P1");
        store.insert(older.clone()).await.unwrap();
        store.insert(newer.clone()).await.unwrap();
        store
            .insert(Association::new("u2", AssociationKind::SlaveToOwner, "L9", "P9"))
            .await
            .unwrap();

        let all = store.list_for_user("u1", None).await.unwrap();
        assert_eq!(all.iter().map(|a| a.id.clone()).collect::<Vec<_>>(), vec![newer.id.clone(), older.id.clone()]);

        let slaves = store
            .list_for_user("u1", Some(AssociationKind::SlaveToOwner))
            .await
            .unwrap();
        assert_eq!(slaves.len(), 1);
        assert_eq!(slaves[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages_newest_first() {
        let store = MemoryNotificationStore::new();
        let mut first = note("u1", AccountRole::Owner);
        first.created_at = Utc::now() - Duration::minutes(5);
        let second = note("u1", AccountRole::Shadow);
        let other = note("u2", AccountRole::Owner);
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();
        store.insert(other).await.unwrap();

        let all = store.list("u1", &ListOptions::default()).await.unwrap();
        assert_eq!(all.iter().map(|n| n.id.clone()).collect::<Vec<_>>(), vec![second.id.clone(), first.id.clone()]);

        let shadow_only = ListOptions {
            account_role: Some(AccountRole::Shadow),
            ..ListOptions::default()
        };
        assert_eq!(store.list("u1", &shadow_only).await.unwrap().len(), 1);

        let paged = ListOptions {
            limit: Some(1),
            offset: 1,
            ..ListOptions::default()
        };
        let page = store.list("u1", &paged).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
    }

    #[tokio::test]
    async fn test_mark_read_requires_owner() {
        let store = MemoryNotificationStore::new();
        let n = note("u1", AccountRole::Owner);
        let id = n.id.clone();
        store.insert(n).await.unwrap();

        assert!(!store.mark_read(&id, "intruder").await.unwrap());
        assert!(store.mark_read(&id, "u1").await.unwrap());
        assert!(!store.mark_read(&id, "u1").await.unwrap());
        assert_eq!(store.unread_count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_cleanup() {
        let store = MemoryNotificationStore::new();
        let mut old = note("u1", AccountRole::Owner);
        old.created_at = Utc::now() - Duration::days(40);
        store.insert(old).await.unwrap();
        store.insert(note("u1", AccountRole::Owner)).await.unwrap();

        let mut old_unread = note("u2", AccountRole::Owner);
        old_unread.created_at = Utc::now() - Duration::days(40);
        store.insert(old_unread).await.unwrap();

        assert_eq!(store.mark_all_read("u1").await.unwrap(), 2);

        let removed = store
            .remove_read_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        // Unread notifications survive regardless of age
        assert_eq!(store.unread_count("u2").await.unwrap(), 1);
    }

    /// Put a directory on the snapshot's temp path so every save fails
    fn block_saves(file: &SnapshotFile) -> std::path::PathBuf {
        let blocker = file.path().with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();
        blocker
    }

    #[tokio::test]
    async fn test_failed_save_leaves_position_open() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::in_dir(dir.path(), "positions.json");
        let store = MemoryPositionStore::open(file.clone()).unwrap();
        store.insert_if_absent(tracked("acc", "p1")).await.unwrap();
        let key = PositionKey::new("acc", "p1");

        let blocker = block_saves(&file);
        assert!(matches!(
            store.close_if_open(&key, open_snapshot("p1")).await,
            Err(StoreError::Persistence(_))
        ));
        assert!(store.insert_if_absent(tracked("acc", "p2")).await.is_err());
        assert_eq!(store.get(&key).await.unwrap().unwrap().status, PositionStatus::Open);
        assert_eq!(store.counts().await.unwrap(), PositionCounts { open: 1, closed: 0, total: 1 });

        // Once saves work again the same transition goes through
        std::fs::remove_dir(&blocker).unwrap();
        assert!(store.close_if_open(&key, open_snapshot("p1")).await.unwrap());
        assert!(store.insert_if_absent(tracked("acc", "p2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_notifications_untouched() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::in_dir(dir.path(), "notifications.json");
        let store = MemoryNotificationStore::open(file.clone()).unwrap();
        let n = note("u1", AccountRole::Owner);
        let id = n.id.clone();
        store.insert(n).await.unwrap();

        let blocker = block_saves(&file);
        assert!(store.insert(note("u1", AccountRole::Slave)).await.is_err());
        assert!(store.mark_read(&id, "u1").await.is_err());
        assert!(store.mark_all_read("u1").await.is_err());
        assert_eq!(store.unread_count("u1").await.unwrap(), 1);
        assert_eq!(store.list("u1", &ListOptions::default()).await.unwrap().len(), 1);

        std::fs::remove_dir(&blocker).unwrap();
        assert!(store.mark_read(&id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_associations_untouched() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::in_dir(dir.path(), "associations.json");
        let store = MemoryAssociationStore::open(file.clone()).unwrap();
        let kept = Association::new("u1", AssociationKind::SlaveToOwner, "L1", "P1");
        let id = kept.id.clone();
        store.insert(kept).await.unwrap();

        let _blocker = block_saves(&file);
        assert!(store
            .insert(Association::new("u1", AssociationKind::ShadowToOwner, "S1", "P1"))
            .await
            .is_err());
        assert!(store.remove("u1", &id).await.is_err());
        assert_eq!(store.len().await, 1);
    }
}
