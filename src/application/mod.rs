//! Application Layer - Services wired at process start
//!
//! - `monitor`: the polling loop that detects opens and closes
//! - `auto_close`: cascades a detected close to linked positions
//! - `closer`: executes and settles a single cascade close
//! - `audit`: queryable record of every cascade decision
//! - `notifications`: user notifications and their fan-out
//! - `queue`: at-least-once delivery queue

pub mod audit;
pub mod auto_close;
pub mod closer;
pub mod monitor;
pub mod notifications;
pub mod queue;

pub use audit::{AuditLog, AuditStats};
pub use auto_close::{AutoCloseService, CascadeReport};
pub use closer::{CloseOutcome, PositionCloser, TriggerContext};
pub use monitor::{ConnectionCheck, CycleReport, MonitorError, MonitorSettings, MonitorStatus, RoleCounts, TradeMonitor};
pub use notifications::{NotificationError, NotificationManager, NotificationStats, PendingDelivery};
pub use queue::{DeliveryQueue, QueueStats};
