//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Venue: signed REST client for the futures venue
//! - Vault: TOML account registry with credentials
//! - Store: in-memory stores with JSON snapshot durability
//! - Gateway: websocket hub, tokens and the HTTP control surface
//! - CLI: Command-line interface and service wiring

pub mod venue;
pub mod vault;
pub mod store;
pub mod gateway;
pub mod cli;

pub use venue::{FuturesClient, HttpVenueConnector, VenueSettings};
pub use vault::FileVault;
pub use gateway::{ApiServer, ConnectionHub, TokenSigner};
pub use cli::CliApp;
