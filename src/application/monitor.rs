//! Trade Monitor
//!
//! Periodically reconciles venue state with the position store. Each cycle
//! reads the active accounts fresh from the vault, checks accounts in
//! parallel (bounded) and handles every account's positions sequentially.
//! A close is acted on only by the caller that moves the stored position
//! from open to closed, so overlapping observations never cascade twice.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AccountRole, ActiveAccount, NewNotification, NotificationPayload, PositionKey,
    PositionSnapshot, TrackedPosition, TradeFigures,
};
use crate::ports::{
    CredentialVault, Envelope, PositionCounts, PositionStore, RealtimePush, VaultError,
    VenueClient, VenueConnector,
};
use super::auto_close::AutoCloseService;
use super::notifications::NotificationManager;

/// Default polling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Default number of accounts checked in parallel
pub const DEFAULT_MAX_CONCURRENT_ACCOUNTS: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    #[error("Monitor is already running")]
    AlreadyRunning,
    #[error("Monitor is not running")]
    NotRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub max_concurrent_accounts: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_concurrent_accounts: DEFAULT_MAX_CONCURRENT_ACCOUNTS,
        }
    }
}

/// Summary of one monitor cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub accounts: usize,
    pub opened: usize,
    pub refreshed: usize,
    pub closed: usize,
    pub failed_accounts: usize,
    /// Another cycle was in flight; nothing was done
    pub skipped: bool,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, account: AccountReport) {
        self.opened += account.opened;
        self.refreshed += account.refreshed;
        self.closed += account.closed;
        if account.failed {
            self.failed_accounts += 1;
        }
    }
}

#[derive(Debug, Default)]
struct AccountReport {
    opened: usize,
    refreshed: usize,
    closed: usize,
    failed: bool,
}

impl AccountReport {
    fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

/// Active accounts per role seen in the last cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    pub owner: usize,
    pub shadow: usize,
    pub slave: usize,
}

impl RoleCounts {
    fn count(accounts: &[ActiveAccount]) -> Self {
        let mut counts = Self::default();
        for account in accounts {
            match account.role {
                AccountRole::Owner => counts.owner += 1,
                AccountRole::Shadow => counts.shadow += 1,
                AccountRole::Slave => counts.slave += 1,
            }
        }
        counts
    }
}

/// Result of testing one account's venue credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub account_id: String,
    pub user_id: String,
    pub role: AccountRole,
    /// None when the venue accepted the credentials
    pub error: Option<String>,
}

impl ConnectionCheck {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub is_active: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub active_roles: RoleCounts,
    pub tracked: PositionCounts,
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the single-flight flag when a cycle ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TradeMonitor {
    vault: Arc<dyn CredentialVault>,
    connector: Arc<dyn VenueConnector>,
    positions: Arc<dyn PositionStore>,
    notifications: Arc<NotificationManager>,
    auto_close: Arc<AutoCloseService>,
    push: Arc<dyn RealtimePush>,
    settings: MonitorSettings,
    runner: Mutex<Option<Runner>>,
    is_active: RwLock<bool>,
    cycle_in_flight: AtomicBool,
    last_check: RwLock<Option<DateTime<Utc>>>,
    active_roles: RwLock<RoleCounts>,
}

impl TradeMonitor {
    pub fn new(
        vault: Arc<dyn CredentialVault>,
        connector: Arc<dyn VenueConnector>,
        positions: Arc<dyn PositionStore>,
        notifications: Arc<NotificationManager>,
        auto_close: Arc<AutoCloseService>,
        push: Arc<dyn RealtimePush>,
    ) -> Self {
        Self {
            vault,
            connector,
            positions,
            notifications,
            auto_close,
            push,
            settings: MonitorSettings::default(),
            runner: Mutex::new(None),
            is_active: RwLock::new(false),
            cycle_in_flight: AtomicBool::new(false),
            last_check: RwLock::new(None),
            active_roles: RwLock::new(RoleCounts::default()),
        }
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = MonitorSettings {
            max_concurrent_accounts: settings.max_concurrent_accounts.max(1),
            ..settings
        };
        self
    }

    /// Run one cycle now, then every interval until `stop`
    pub async fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        tracing::info!(
            "Starting trade monitor - interval: {:?}, max concurrent accounts: {}",
            self.settings.interval,
            self.settings.max_concurrent_accounts
        );
        *self.is_active.write().await = true;

        self.run_cycle().await;

        let cancel = CancellationToken::new();
        let handle = self.spawn_loop(cancel.clone());
        *runner = Some(Runner { cancel, handle });
        Ok(())
    }

    /// Cancel the timer and wait for an in-flight cycle to finish
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let runner = self
            .runner
            .lock()
            .await
            .take()
            .ok_or(MonitorError::NotRunning)?;

        runner.cancel.cancel();
        *self.is_active.write().await = false;
        if let Err(e) = runner.handle.await {
            tracing::error!("Monitor loop ended abnormally: {}", e);
        }

        tracing::info!("Trade monitor stopped");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        *self.is_active.read().await
    }

    pub async fn status(&self) -> MonitorStatus {
        let tracked = match self.positions.counts().await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!("Failed to count tracked positions: {}", e);
                PositionCounts::default()
            }
        };
        MonitorStatus {
            is_active: *self.is_active.read().await,
            last_check_time: *self.last_check.read().await,
            active_roles: *self.active_roles.read().await,
            tracked,
        }
    }

    /// Test every active account's venue connection, in vault order
    pub async fn test_connections(&self) -> Result<Vec<ConnectionCheck>, VaultError> {
        let accounts = self.vault.active_accounts().await?;
        let checks = accounts.iter().map(|account| async move {
            let result = match self.connect(account).await {
                Ok(venue) => venue.test_connection().await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::warn!("Connection test failed for {} account {}: {}", account.role, account.account_id, e);
            }
            ConnectionCheck {
                account_id: account.account_id.clone(),
                user_id: account.user_id.clone(),
                role: account.role,
                error: result.err(),
            }
        });
        Ok(stream::iter(checks)
            .buffered(self.settings.max_concurrent_accounts)
            .collect()
            .await)
    }

    fn spawn_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = self.settings.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    // A started cycle runs to completion even if cancelled meanwhile
                    _ = ticker.tick() => {
                        monitor.run_cycle().await;
                    }
                }
            }
        })
    }

    /// Run a single reconciliation cycle.
    ///
    /// Single-flight: returns a skipped report if another cycle is running.
    /// Never fails; per-account problems become `error` notifications.
    pub async fn run_cycle(&self) -> CycleReport {
        if self
            .cycle_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Monitor cycle already in flight, skipping");
            return CycleReport::skipped();
        }
        let _guard = InFlight(&self.cycle_in_flight);

        let started = std::time::Instant::now();
        let mut report = CycleReport::default();

        let accounts = match self.vault.active_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!("Failed to load active accounts: {}", e);
                *self.last_check.write().await = Some(Utc::now());
                return report;
            }
        };
        report.accounts = accounts.len();
        *self.active_roles.write().await = RoleCounts::count(&accounts);

        let checks: Vec<_> = accounts
            .iter()
            .map(|account| self.check_account(account, &accounts))
            .collect();
        let results: Vec<AccountReport> = stream::iter(checks)
            .buffer_unordered(self.settings.max_concurrent_accounts)
            .collect()
            .await;
        for result in results {
            report.absorb(result);
        }

        *self.last_check.write().await = Some(Utc::now());
        tracing::info!(
            "Monitor cycle done in {:?}: {} accounts, {} opened, {} refreshed, {} closed, {} failed",
            started.elapsed(),
            report.accounts,
            report.opened,
            report.refreshed,
            report.closed,
            report.failed_accounts
        );
        report
    }

    async fn check_account(&self, account: &ActiveAccount, accounts: &[ActiveAccount]) -> AccountReport {
        let venue = match self.connect(account).await {
            Ok(venue) => venue,
            Err(e) => {
                self.report_account_error(account, e).await;
                return AccountReport::failed();
            }
        };

        // Sequential within an account
        let open = match venue.list_open_positions().await {
            Ok(open) => open,
            Err(e) => {
                self.report_account_error(account, e.to_string()).await;
                return AccountReport::failed();
            }
        };
        let closed = match venue.list_closed_positions().await {
            Ok(closed) => closed,
            Err(e) => {
                self.report_account_error(account, e.to_string()).await;
                return AccountReport::failed();
            }
        };

        let mut report = AccountReport::default();
        for snapshot in open {
            self.observe_open(account, snapshot, &mut report).await;
        }
        for snapshot in closed {
            self.observe_closed(account, snapshot, accounts, &mut report).await;
        }
        report
    }

    async fn connect(&self, account: &ActiveAccount) -> Result<Arc<dyn VenueClient>, String> {
        let credentials = self
            .vault
            .credentials(&account.account_id)
            .await
            .map_err(|e| e.to_string())?;
        self.connector
            .connect(account, &credentials)
            .map_err(|e| e.to_string())
    }

    async fn observe_open(&self, account: &ActiveAccount, snapshot: PositionSnapshot, report: &mut AccountReport) {
        let key = PositionKey::new(account.account_id.clone(), snapshot.id.clone());
        let tracked = match self.positions.get(&key).await {
            Ok(tracked) => tracked,
            Err(e) => {
                tracing::error!("Position store read failed for {}/{}: {}", key.account_id, key.position_id, e);
                return;
            }
        };

        match tracked {
            None => {
                let position_id = snapshot.id.clone();
                let figures = TradeFigures::opened(&snapshot);
                let position = TrackedPosition::open(
                    account.account_id.clone(),
                    account.user_id.clone(),
                    account.role,
                    snapshot,
                );
                match self.positions.insert_if_absent(position).await {
                    Ok(true) => {
                        report.opened += 1;
                        tracing::info!("New {} trade {} on {}", account.role, position_id, account.account_id);
                        self.notify(
                            NewNotification::new(
                                account.user_id.clone(),
                                account.role,
                                "Trade opened",
                                format!(
                                    "{} trade {} opened: quantity {}, margin {}",
                                    account.role, position_id, figures.quantity, figures.margin
                                ),
                                NotificationPayload::TradeOpened { trade: figures },
                            )
                            .for_position(position_id),
                        )
                        .await;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::error!("Failed to track {} trade {}: {}", account.role, position_id, e),
                }
            }
            Some(position) if position.is_open() => match self.positions.refresh(&key, snapshot).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to refresh {}/{}: {}", key.account_id, key.position_id, e),
            },
            // Closed positions never reopen
            Some(_) => {}
        }
    }

    async fn observe_closed(
        &self,
        account: &ActiveAccount,
        snapshot: PositionSnapshot,
        accounts: &[ActiveAccount],
        report: &mut AccountReport,
    ) {
        let key = PositionKey::new(account.account_id.clone(), snapshot.id.clone());
        match self.positions.get(&key).await {
            Ok(Some(position)) if position.is_open() => {}
            // Untracked or already processed
            Ok(_) => return,
            Err(e) => {
                tracing::error!("Position store read failed for {}/{}: {}", key.account_id, key.position_id, e);
                return;
            }
        }

        let position_id = snapshot.id.clone();
        let figures = TradeFigures::from_snapshot(&snapshot);
        match self.positions.close_if_open(&key, snapshot).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!("Failed to close {}/{}: {}", key.account_id, key.position_id, e);
                return;
            }
        }
        report.closed += 1;

        let outcome = if figures.net_pnl >= 0.0 { "profit" } else { "loss" };
        tracing::info!(
            "{} trade {} closed on {} (net PnL {:.2})",
            account.role,
            position_id,
            account.account_id,
            figures.net_pnl
        );

        let net_pnl = figures.net_pnl;
        self.notify(
            NewNotification::new(
                account.user_id.clone(),
                account.role,
                format!("Trade closed with {}", outcome),
                format!("{} trade {} closed, net PnL {:.2}", account.role, position_id, net_pnl),
                NotificationPayload::TradeClosed {
                    trade: figures,
                    auto_close: false,
                    trigger: None,
                },
            )
            .for_position(position_id.clone()),
        )
        .await;

        self.push.send_to_user(
            &account.user_id,
            Envelope::status(serde_json::json!({
                "event": "trade_closed",
                "user_id": account.user_id,
                "account_role": account.role,
                "position_id": position_id,
                "net_pnl": net_pnl,
            })),
        );

        self.auto_close
            .on_position_closed(account, &position_id, accounts)
            .await;
    }

    async fn report_account_error(&self, account: &ActiveAccount, error: String) {
        tracing::warn!(
            "Check failed for {} account {} (user {}): {}",
            account.role,
            account.account_id,
            account.user_id,
            error
        );
        self.notify(NewNotification::new(
            account.user_id.clone(),
            account.role,
            "Monitoring error",
            format!("Failed to check {} account: {}", account.role, error),
            NotificationPayload::Error { error },
        ))
        .await;
    }

    async fn notify(&self, notification: NewNotification) {
        if let Err(e) = self.notifications.create(notification).await {
            tracing::error!("Failed to create notification: {}", e);
        }
    }
}
