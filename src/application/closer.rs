//! Position Closer
//!
//! Executes one cascade close against the venue. The target is re-verified
//! open before the close call so a position closed by the user (or by a
//! sibling cascade) is skipped rather than failed. Every attempt is settled
//! with exactly one audit record; closes and failures also notify the user.

use std::sync::Arc;

use crate::domain::{
    CascadeAction, CascadeDecision, NewNotification, NotificationPayload, PositionRef,
    PositionSnapshot, TradeFigures,
};
use crate::ports::{VenueClient, VenueError};
use super::audit::AuditLog;
use super::notifications::NotificationManager;

pub const REASON_ALREADY_CLOSED: &str = "already closed";
pub const REASON_CLOSE_FAILED: &str = "close failed";
pub const REASON_ACCOUNT_NOT_FOUND: &str = "account not found";

/// The close that started a cascade
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub user_id: String,
    pub trigger: PositionRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub action: CascadeAction,
    pub reason: String,
    /// Venue snapshot of the closed position
    pub snapshot: Option<PositionSnapshot>,
    pub error: Option<String>,
}

impl CloseOutcome {
    pub fn closed(reason: impl Into<String>, snapshot: PositionSnapshot) -> Self {
        Self {
            action: CascadeAction::Closed,
            reason: reason.into(),
            snapshot: Some(snapshot),
            error: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            action: CascadeAction::Skipped,
            reason: reason.into(),
            snapshot: None,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: CascadeAction::Failed,
            reason: reason.into(),
            snapshot: None,
            error: Some(error.into()),
        }
    }
}

pub struct PositionCloser {
    audit: Arc<AuditLog>,
    notifications: Arc<NotificationManager>,
}

impl PositionCloser {
    pub fn new(audit: Arc<AuditLog>, notifications: Arc<NotificationManager>) -> Self {
        Self {
            audit,
            notifications,
        }
    }

    /// Re-verify, close and settle. Failures are terminal for this trigger.
    pub async fn attempt_close(
        &self,
        venue: &dyn VenueClient,
        target: PositionRef,
        context: &TriggerContext,
    ) -> CloseOutcome {
        let outcome = self.execute(venue, &target, context).await;
        self.settle(target, context, outcome).await
    }

    async fn execute(
        &self,
        venue: &dyn VenueClient,
        target: &PositionRef,
        context: &TriggerContext,
    ) -> CloseOutcome {
        let open = match venue.list_open_positions().await {
            Ok(open) => open,
            Err(e) => return CloseOutcome::failed(REASON_CLOSE_FAILED, e.to_string()),
        };

        if !open.iter().any(|p| p.id == target.position_id) {
            return CloseOutcome::skipped(REASON_ALREADY_CLOSED);
        }

        match venue.close_position(&target.position_id).await {
            Ok(snapshot) => CloseOutcome::closed(
                format!(
                    "closed after {} trade {}",
                    context.trigger.role, context.trigger.position_id
                ),
                snapshot,
            ),
            // Lost the race between re-fetch and close
            Err(VenueError::AlreadyClosed(_)) => CloseOutcome::skipped(REASON_ALREADY_CLOSED),
            Err(e) => CloseOutcome::failed(REASON_CLOSE_FAILED, e.to_string()),
        }
    }

    /// Record the audit decision for `outcome` and notify the user.
    ///
    /// Also used for verdicts that never reach the venue (rule skips,
    /// missing target accounts).
    pub async fn settle(
        &self,
        target: PositionRef,
        context: &TriggerContext,
        outcome: CloseOutcome,
    ) -> CloseOutcome {
        let mut decision = CascadeDecision::new(
            context.user_id.clone(),
            context.trigger.clone(),
            target.clone(),
            outcome.action,
            outcome.reason.clone(),
        );
        if let Some(error) = &outcome.error {
            decision = decision.with_error(error.clone());
        }
        self.audit.record(decision).await;

        let notification = match (&outcome.action, &outcome.snapshot) {
            (CascadeAction::Closed, Some(snapshot)) => Some(
                NewNotification::new(
                    context.user_id.clone(),
                    target.role,
                    format!("{} auto-closed", target.role.as_str().to_uppercase()),
                    format!(
                        "{} trade {} closed following {} trade {}",
                        target.role, target.position_id, context.trigger.role, context.trigger.position_id
                    ),
                    NotificationPayload::TradeClosed {
                        trade: TradeFigures::from_snapshot(snapshot),
                        auto_close: true,
                        trigger: Some(context.trigger.clone()),
                    },
                )
                .for_position(target.position_id.clone()),
            ),
            (CascadeAction::Failed, _) => Some(
                NewNotification::new(
                    context.user_id.clone(),
                    target.role,
                    "Auto-close failed",
                    format!("Failed to auto-close {} trade {}", target.role, target.position_id),
                    NotificationPayload::Error {
                        error: outcome.error.clone().unwrap_or_else(|| outcome.reason.clone()),
                    },
                )
                .for_position(target.position_id.clone()),
            ),
            _ => None,
        };

        if let Some(notification) = notification {
            if let Err(e) = self.notifications.create(notification).await {
                tracing::error!("Failed to notify {} about {}: {}", context.user_id, target, e);
            }
        }

        outcome
    }
}
