use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::AccountRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Venue-reported state of a single position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: String,
    pub side: Side,
    pub quantity: f64,
    pub margin: f64,
    pub leverage: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub realized_pnl: f64,
    pub opening_fee: f64,
    pub closing_fee: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionSnapshot {
    pub fn total_fees(&self) -> f64 {
        self.opening_fee + self.closing_fee
    }

    /// Realized PnL net of opening and closing fees
    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.total_fees()
    }
}

/// Store key: positions are unique per (account, venue position id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub account_id: String,
    pub position_id: String,
}

impl PositionKey {
    pub fn new(account_id: impl Into<String>, position_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            position_id: position_id.into(),
        }
    }
}

/// A position the engine is tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub key: PositionKey,
    pub user_id: String,
    pub role: AccountRole,
    pub status: PositionStatus,
    pub snapshot: PositionSnapshot,
    pub first_seen: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Position is already closed")]
    AlreadyClosed,
    #[error("Snapshot id {got} does not match tracked position {expected}")]
    IdMismatch { expected: String, got: String },
}

impl TrackedPosition {
    /// Start tracking a position first observed open
    pub fn open(
        account_id: impl Into<String>,
        user_id: impl Into<String>,
        role: AccountRole,
        snapshot: PositionSnapshot,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: PositionKey::new(account_id, snapshot.id.clone()),
            user_id: user_id.into(),
            role,
            status: PositionStatus::Open,
            snapshot,
            first_seen: now,
            last_checked: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Replace the snapshot of an open position
    pub fn refresh(&mut self, snapshot: PositionSnapshot) -> Result<(), PositionError> {
        self.check_id(&snapshot)?;
        if !self.is_open() {
            return Err(PositionError::AlreadyClosed);
        }
        self.snapshot = snapshot;
        self.last_checked = Utc::now();
        Ok(())
    }

    /// Transition open -> closed. Closed positions never reopen.
    pub fn close(&mut self, snapshot: PositionSnapshot) -> Result<(), PositionError> {
        self.check_id(&snapshot)?;
        if !self.is_open() {
            return Err(PositionError::AlreadyClosed);
        }
        self.status = PositionStatus::Closed;
        self.snapshot = snapshot;
        self.last_checked = Utc::now();
        Ok(())
    }

    fn check_id(&self, snapshot: &PositionSnapshot) -> Result<(), PositionError> {
        if snapshot.id != self.key.position_id {
            return Err(PositionError::IdMismatch {
                expected: self.key.position_id.clone(),
                got: snapshot.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(id: &str) -> PositionSnapshot {
    PositionSnapshot {
        id: id.to_string(),
        side: Side::Buy,
        quantity: 100.0,
        margin: 2_000.0,
        leverage: 10.0,
        entry_price: 60_000.0,
        exit_price: None,
        realized_pnl: 0.0,
        opening_fee: 5.0,
        closing_fee: 0.0,
        opened_at: Utc::now(),
        closed_at: None,
    }
}
