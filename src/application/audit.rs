//! Audit Log
//!
//! Append-only record of every cascade decision. Recent decisions live in a
//! bounded ring buffer; when a file is configured every record is also
//! appended as a JSON line and the buffer is refilled from it on startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

use crate::adapters::store::SnapshotFile;
use crate::domain::{CascadeAction, CascadeDecision};
use crate::ports::StoreResult;

/// Default ring buffer capacity
pub const DEFAULT_CAPACITY: usize = 1000;

/// Outcome counts over a set of decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// closed / (closed + failed) as a percentage, two decimals
    pub success_rate: f64,
}

impl AuditStats {
    fn tally<'a>(decisions: impl Iterator<Item = &'a CascadeDecision>) -> Self {
        let mut stats = Self::default();
        for decision in decisions {
            stats.total += 1;
            match decision.action {
                CascadeAction::Closed => stats.closed += 1,
                CascadeAction::Skipped => stats.skipped += 1,
                CascadeAction::Failed => stats.failed += 1,
            }
        }
        let attempted = stats.closed + stats.failed;
        if attempted > 0 {
            let rate = stats.closed as f64 / attempted as f64 * 100.0;
            stats.success_rate = (rate * 100.0).round() / 100.0;
        }
        stats
    }
}

pub struct AuditLog {
    entries: RwLock<VecDeque<CascadeDecision>>,
    capacity: usize,
    file: Option<SnapshotFile>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Open a durable log, reloading the newest `capacity` records from `file`
    pub fn open(capacity: usize, file: SnapshotFile) -> StoreResult<Self> {
        let capacity = capacity.max(1);
        let saved: Vec<CascadeDecision> = file.read_lines()?;
        let skip = saved.len().saturating_sub(capacity);
        let entries: VecDeque<CascadeDecision> = saved.into_iter().skip(skip).collect();

        tracing::info!(
            "Audit log reloaded {} decisions from {}",
            entries.len(),
            file.path().display()
        );

        Ok(Self {
            entries: RwLock::new(entries),
            capacity,
            file: Some(file),
        })
    }

    /// Append a decision, evicting the oldest once the buffer is full.
    ///
    /// A failed file append is logged; the in-memory record is kept.
    pub async fn record(&self, decision: CascadeDecision) {
        match decision.action {
            CascadeAction::Failed => tracing::error!(
                "Auto-close failed: {} -> {} ({}){}",
                decision.trigger,
                decision.target,
                decision.reason,
                decision
                    .error
                    .as_deref()
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            ),
            _ => tracing::info!(
                "Auto-close {}: {} -> {} ({})",
                decision.action,
                decision.trigger,
                decision.target,
                decision.reason
            ),
        }

        let mut entries = self.entries.write().await;
        if let Some(file) = &self.file {
            if let Err(e) = file.append_line(&decision) {
                tracing::error!("Failed to persist audit record {}: {}", decision.id, e);
            }
        }
        entries.push_back(decision);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Newest first, optionally filtered to one user
    pub async fn decisions(&self, user_id: Option<&str>, limit: usize) -> Vec<CascadeDecision> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|d| user_id.map_or(true, |u| d.user_id == u))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self, user_id: Option<&str>) -> AuditStats {
        let entries = self.entries.read().await;
        AuditStats::tally(
            entries
                .iter()
                .filter(|d| user_id.map_or(true, |u| d.user_id == u)),
        )
    }

    /// Stats restricted to decisions at or after `since`
    pub async fn stats_since(&self, user_id: Option<&str>, since: DateTime<Utc>) -> AuditStats {
        let entries = self.entries.read().await;
        AuditStats::tally(
            entries
                .iter()
                .filter(|d| user_id.map_or(true, |u| d.user_id == u))
                .filter(|d| d.timestamp >= since),
        )
    }

    /// Counts per `trigger_to_target` edge
    pub async fn breakdown(&self, user_id: Option<&str>) -> BTreeMap<String, AuditStats> {
        let entries = self.entries.read().await;
        let mut grouped: BTreeMap<String, Vec<&CascadeDecision>> = BTreeMap::new();
        for decision in entries
            .iter()
            .filter(|d| user_id.map_or(true, |u| d.user_id == u))
        {
            grouped.entry(decision.edge()).or_default().push(decision);
        }
        grouped
            .into_iter()
            .map(|(edge, decisions)| (edge, AuditStats::tally(decisions.into_iter())))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
