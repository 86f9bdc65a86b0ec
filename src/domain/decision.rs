//! Cascade Decisions
//!
//! Append-only audit records: one per (trigger, target) per cascade attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::account::AccountRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeAction {
    Closed,
    Skipped,
    Failed,
}

impl fmt::Display for CascadeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CascadeAction::Closed => "closed",
            CascadeAction::Skipped => "skipped",
            CascadeAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A position on a specific account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionRef {
    pub account_id: String,
    pub role: AccountRole,
    pub position_id: String,
}

impl PositionRef {
    pub fn new(account_id: impl Into<String>, role: AccountRole, position_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            role,
            position_id: position_id.into(),
        }
    }
}

impl fmt::Display for PositionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.position_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDecision {
    pub id: String,
    pub user_id: String,
    pub trigger: PositionRef,
    pub target: PositionRef,
    pub action: CascadeAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CascadeDecision {
    pub fn new(
        user_id: impl Into<String>,
        trigger: PositionRef,
        target: PositionRef,
        action: CascadeAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            trigger,
            target,
            action,
            reason: reason.into(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// `owner_to_slave` style label used in breakdowns
    pub fn edge(&self) -> String {
        format!("{}_to_{}", self.trigger.role, self.target.role)
    }
}
