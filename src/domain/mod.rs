//! Domain Layer - Core types and rules for linked-account cascade closing
//!
//! This module contains pure domain types and logic with no external dependencies.
//! All external interactions happen through the ports layer.
//!
//! - `account`: Owner/Shadow/Slave roles and per-role config
//! - `position`: Tracked positions and the open -> closed transition
//! - `association`: Cross-role position links
//! - `cascade`: The fixed cascade rule table and decision function
//! - `decision`: Audit records for cascade attempts
//! - `notification`: User notifications and delivery queue entries

pub mod account;
pub mod position;
pub mod association;
pub mod cascade;
pub mod decision;
pub mod notification;

pub use account::{find_account, AccountConfig, AccountRole, ActiveAccount};
pub use position::{PositionError, PositionKey, PositionSnapshot, PositionStatus, Side, TrackedPosition};
pub use association::{Association, AssociationError, AssociationKind};
pub use cascade::{decide, CascadeTarget};
pub use decision::{CascadeAction, CascadeDecision, PositionRef};
pub use notification::{
    CascadeCounts, NewNotification, Notification, NotificationPayload, NotificationType,
    QueueEntry, TradeFigures, DEFAULT_PRIORITY, HIGH_PRIORITY,
};
