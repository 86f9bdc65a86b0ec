//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - The trading venue (list/close positions)
//! - The credential vault (active accounts, credentials)
//! - Durable stores (positions, associations, notifications)
//! - Realtime push to connected clients

pub mod venue;
pub mod vault;
pub mod store;
pub mod realtime;
#[cfg(test)]
pub mod fakes;

pub use venue::{VenueClient, VenueConnector, VenueError};
pub use vault::{CredentialVault, Credentials, VaultError};
pub use store::{
    AssociationStore, ListOptions, NotificationStore, PositionCounts, PositionStore, StoreError,
    StoreResult,
};
pub use realtime::{ClientMessage, Envelope, MessageType, RealtimePush};
