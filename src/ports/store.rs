//! Storage Ports
//!
//! Durable state the engine reads and writes. Implementations must be safe
//! under concurrent per-account access; keys are disjoint across accounts so
//! row-level atomicity is enough.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    AccountRole, Association, AssociationError, AssociationKind, Notification, PositionKey, PositionSnapshot,
    TrackedPosition,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Persistence failed: {0}")]
    Persistence(String),
    #[error("Invalid record: {0}")]
    Invalid(String),
}

impl From<AssociationError> for StoreError {
    fn from(e: AssociationError) -> Self {
        StoreError::Invalid(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCounts {
    pub open: usize,
    pub closed: usize,
    pub total: usize,
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, key: &PositionKey) -> StoreResult<Option<TrackedPosition>>;

    /// Insert unless the key exists (open or closed). Returns true if inserted.
    async fn insert_if_absent(&self, position: TrackedPosition) -> StoreResult<bool>;

    /// Refresh the snapshot of an open position. Returns false if missing or closed.
    async fn refresh(&self, key: &PositionKey, snapshot: PositionSnapshot) -> StoreResult<bool>;

    /// Atomically move open -> closed. Only the caller that performed the
    /// transition gets `true`.
    async fn close_if_open(&self, key: &PositionKey, snapshot: PositionSnapshot) -> StoreResult<bool>;

    async fn counts(&self) -> StoreResult<PositionCounts>;
}

#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Validates slots against the kind before storing
    async fn insert(&self, association: Association) -> StoreResult<()>;

    /// Associations of `user_id` holding `position_id` in the `role` slot
    async fn find_by_position(
        &self,
        user_id: &str,
        role: AccountRole,
        position_id: &str,
    ) -> StoreResult<Vec<Association>>;

    /// A user's associations, newest first, optionally of one kind
    async fn list_for_user(
        &self,
        user_id: &str,
        kind: Option<AssociationKind>,
    ) -> StoreResult<Vec<Association>>;

    /// Removes only an association owned by `user_id`
    async fn remove(&self, user_id: &str, association_id: &str) -> StoreResult<bool>;
}

/// Filters for listing a user's notifications
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub account_role: Option<AccountRole>,
}

impl ListOptions {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Notification>>;

    /// Newest first, filtered and paged per `options`
    async fn list(&self, user_id: &str, options: &ListOptions) -> StoreResult<Vec<Notification>>;

    /// Flip `is_read` if unread and owned by `user_id`. Returns true if flipped.
    async fn mark_read(&self, id: &str, user_id: &str) -> StoreResult<bool>;

    async fn mark_all_read(&self, user_id: &str) -> StoreResult<usize>;

    async fn unread_count(&self, user_id: &str) -> StoreResult<usize>;

    /// Delete read notifications created before `cutoff`
    async fn remove_read_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
