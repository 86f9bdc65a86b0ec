//! Service Wiring
//!
//! Builds the stores, services and gateway state from a loaded `Config`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::gateway::{AppState, ConnectionHub, TokenSigner};
use crate::adapters::store::snapshot::{
    ASSOCIATIONS_FILE, AUDIT_FILE, NOTIFICATIONS_FILE, POSITIONS_FILE, QUEUE_FILE,
};
use crate::adapters::store::{
    MemoryAssociationStore, MemoryNotificationStore, MemoryPositionStore, SnapshotFile,
};
use crate::adapters::vault::FileVault;
use crate::adapters::venue::{HttpVenueConnector, VenueSettings};
use crate::application::{
    AuditLog, AutoCloseService, DeliveryQueue, MonitorSettings, NotificationManager,
    PositionCloser, TradeMonitor,
};
use crate::config::Config;
use crate::ports::{AssociationStore, NotificationStore, PositionStore};

/// How often read notifications past retention are purged
const RETENTION_SWEEP: Duration = Duration::from_secs(3600);

pub struct Services {
    pub hub: Arc<ConnectionHub>,
    pub queue: Arc<DeliveryQueue>,
    pub audit: Arc<AuditLog>,
    pub notifications: Arc<NotificationManager>,
    pub associations: Arc<dyn AssociationStore>,
    pub monitor: Arc<TradeMonitor>,
}

struct Stores {
    positions: Arc<dyn PositionStore>,
    associations: Arc<dyn AssociationStore>,
    notifications: Arc<dyn NotificationStore>,
    queue: Arc<DeliveryQueue>,
    audit: Arc<AuditLog>,
}

impl Stores {
    fn in_memory(config: &Config) -> Self {
        Self {
            positions: Arc::new(MemoryPositionStore::new()),
            associations: Arc::new(MemoryAssociationStore::new()),
            notifications: Arc::new(MemoryNotificationStore::new()),
            queue: Arc::new(DeliveryQueue::new()),
            audit: Arc::new(AuditLog::new(config.audit.capacity)),
        }
    }

    fn persistent(config: &Config, dir: &Path) -> Result<Self> {
        let file = |name: &str| SnapshotFile::in_dir(dir, name);
        Ok(Self {
            positions: Arc::new(
                MemoryPositionStore::open(file(POSITIONS_FILE)).context("Failed to open position store")?,
            ),
            associations: Arc::new(
                MemoryAssociationStore::open(file(ASSOCIATIONS_FILE))
                    .context("Failed to open association store")?,
            ),
            notifications: Arc::new(
                MemoryNotificationStore::open(file(NOTIFICATIONS_FILE))
                    .context("Failed to open notification store")?,
            ),
            queue: Arc::new(DeliveryQueue::open(file(QUEUE_FILE)).context("Failed to open delivery queue")?),
            audit: Arc::new(
                AuditLog::open(config.audit.capacity, file(AUDIT_FILE)).context("Failed to open audit log")?,
            ),
        })
    }
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        let stores = if config.storage.persist {
            let dir = config.storage.data_path();
            tracing::info!("Persisting state under {}", dir.display());
            Stores::persistent(config, &dir)?
        } else {
            tracing::warn!("Persistence disabled - state is lost on restart");
            Stores::in_memory(config)
        };

        let hub = Arc::new(ConnectionHub::new());
        let vault = Arc::new(FileVault::new(config.accounts.file_path()));
        let connector = Arc::new(
            HttpVenueConnector::new(VenueSettings::from(config)).context("Failed to create venue client")?,
        );

        let notifications = Arc::new(
            NotificationManager::new(stores.notifications, stores.queue.clone(), hub.clone())
                .with_default_priority(config.queue.default_priority),
        );
        let closer = PositionCloser::new(stores.audit.clone(), notifications.clone());
        let auto_close = Arc::new(AutoCloseService::new(
            stores.associations.clone(),
            vault.clone(),
            connector.clone(),
            closer,
            notifications.clone(),
        ));
        let monitor = Arc::new(
            TradeMonitor::new(
                vault,
                connector,
                stores.positions,
                notifications.clone(),
                auto_close,
                hub.clone(),
            )
            .with_settings(MonitorSettings::from(config)),
        );

        Ok(Self {
            hub,
            queue: stores.queue,
            audit: stores.audit,
            notifications,
            associations: stores.associations,
            monitor,
        })
    }

    pub fn app_state(&self, signer: Arc<TokenSigner>) -> AppState {
        AppState {
            hub: self.hub.clone(),
            signer,
            monitor: self.monitor.clone(),
            audit: self.audit.clone(),
            notifications: self.notifications.clone(),
            associations: self.associations.clone(),
        }
    }

    /// Purge read notifications older than `retention_days` every hour
    pub fn spawn_retention(&self, retention_days: i64, cancel: CancellationToken) -> JoinHandle<()> {
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = notifications.cleanup_old(retention_days).await {
                            tracing::error!("Notification cleanup failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
