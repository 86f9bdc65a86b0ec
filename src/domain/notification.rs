//! Notifications
//!
//! User-facing events. Each notification type carries a fixed payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::account::AccountRole;
use super::decision::PositionRef;
use super::position::PositionSnapshot;

/// Default queue priority for notifications
pub const DEFAULT_PRIORITY: u8 = 1;

/// Priority at or above which a queue entry counts as high priority
pub const HIGH_PRIORITY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TradeOpened,
    TradeClosed,
    Warning,
    Error,
    Info,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::TradeOpened => "trade_opened",
            NotificationType::TradeClosed => "trade_closed",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
            NotificationType::Info => "info",
        };
        f.write_str(s)
    }
}

/// Trade figures shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFigures {
    pub quantity: f64,
    pub margin: f64,
    pub fees: f64,
    pub pnl: f64,
    pub net_pnl: f64,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeFigures {
    pub fn from_snapshot(snapshot: &PositionSnapshot) -> Self {
        Self {
            quantity: snapshot.quantity,
            margin: snapshot.margin,
            fees: snapshot.total_fees(),
            pnl: snapshot.realized_pnl,
            net_pnl: snapshot.net_pnl(),
            closed_at: snapshot.closed_at,
        }
    }

    /// Opened positions only count the opening fee
    pub fn opened(snapshot: &PositionSnapshot) -> Self {
        Self {
            fees: snapshot.opening_fee,
            net_pnl: snapshot.realized_pnl - snapshot.opening_fee,
            closed_at: None,
            ..Self::from_snapshot(snapshot)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CascadeCounts {
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Payload per notification type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NotificationPayload {
    TradeOpened {
        trade: TradeFigures,
    },
    TradeClosed {
        trade: TradeFigures,
        auto_close: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger: Option<PositionRef>,
    },
    Warning {
        detail: String,
    },
    Error {
        error: String,
    },
    Info {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<CascadeCounts>,
    },
}

impl NotificationPayload {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            NotificationPayload::TradeOpened { .. } => NotificationType::TradeOpened,
            NotificationPayload::TradeClosed { .. } => NotificationType::TradeClosed,
            NotificationPayload::Warning { .. } => NotificationType::Warning,
            NotificationPayload::Error { .. } => NotificationType::Error,
            NotificationPayload::Info { .. } => NotificationType::Info,
        }
    }

    pub fn is_auto_close(&self) -> bool {
        matches!(self, NotificationPayload::TradeClosed { auto_close: true, .. })
    }
}

/// Input to `NotificationManager::create`
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub position_id: Option<String>,
    pub account_role: AccountRole,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    /// Queue priority; `None` defers to the manager's configured default
    pub priority: Option<u8>,
}

impl NewNotification {
    /// Errors go out at high priority, everything else at the manager's default
    pub fn new(
        user_id: impl Into<String>,
        account_role: AccountRole,
        title: impl Into<String>,
        message: impl Into<String>,
        payload: NotificationPayload,
    ) -> Self {
        let priority = match payload {
            NotificationPayload::Error { .. } => Some(HIGH_PRIORITY),
            _ => None,
        };
        Self {
            user_id: user_id.into(),
            position_id: None,
            account_role,
            title: title.into(),
            message: message.into(),
            payload,
            priority,
        }
    }

    pub fn for_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub position_id: Option<String>,
    pub account_role: AccountRole,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_new(new: NewNotification) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            position_id: new.position_id,
            account_role: new.account_role,
            title: new.title,
            message: new.message,
            payload: new.payload,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        self.payload.notification_type()
    }
}

/// Pending delivery of one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: String,
    pub notification_id: String,
    pub priority: u8,
    pub retry_count: u32,
    pub scheduled_for: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(user_id: impl Into<String>, notification_id: impl Into<String>, priority: u8) -> Self {
        Self {
            user_id: user_id.into(),
            notification_id: notification_id.into(),
            priority,
            retry_count: 0,
            scheduled_for: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::sample_snapshot;

    #[test]
    fn test_payload_determines_type() {
        let payload = NotificationPayload::Warning { detail: "x".into() };
        assert_eq!(payload.notification_type(), NotificationType::Warning);

        let payload = NotificationPayload::TradeClosed {
            trade: TradeFigures::from_snapshot(&sample_snapshot("p1")),
            auto_close: true,
            trigger: None,
        };
        assert_eq!(payload.notification_type(), NotificationType::TradeClosed);
        assert!(payload.is_auto_close());
    }

    #[test]
    fn test_payload_serializes_tagged() {
        let payload = NotificationPayload::Error { error: "boom".into() };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["error"], "boom");
    }

    #[test]
    fn test_error_notifications_default_high_priority() {
        let err = NewNotification::new(
            "u1",
            AccountRole::Owner,
            "t",
            "m",
            NotificationPayload::Error { error: "e".into() },
        );
        assert_eq!(err.priority, Some(HIGH_PRIORITY));

        let info = NewNotification::new("u1", AccountRole::Owner, "t", "m", NotificationPayload::Info { summary: None });
        assert_eq!(info.priority, None);
        assert_eq!(info.with_priority(DEFAULT_PRIORITY).priority, Some(DEFAULT_PRIORITY));
    }

    #[test]
    fn test_opened_figures_only_count_opening_fee() {
        let mut snap = sample_snapshot("p1");
        snap.closing_fee = 3.0;
        let figures = TradeFigures::opened(&snap);
        assert_eq!(figures.fees, 5.0);
        assert_eq!(figures.net_pnl, -5.0);
    }
}
