//! Venue Port
//!
//! The trading venue as consumed by the engine: list positions and close one.
//! No business logic lives behind this trait.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{ActiveAccount, PositionSnapshot};
use super::vault::Credentials;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VenueError {
    /// Network failure, timeout or 5xx. Isolated per account, retried next cycle.
    #[error("Venue unreachable: {0}")]
    Unreachable(String),

    /// The venue refused the request
    #[error("Venue rejected request: {0}")]
    Rejected(String),

    /// Close raced with an independent close
    #[error("Position {0} already closed")]
    AlreadyClosed(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unexpected venue response: {0}")]
    Decode(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn test_connection(&self) -> Result<(), VenueError>;

    async fn list_open_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError>;

    async fn list_closed_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError>;

    async fn close_position(&self, position_id: &str) -> Result<PositionSnapshot, VenueError>;
}

/// Builds a venue client for an account from its credentials
pub trait VenueConnector: Send + Sync {
    fn connect(
        &self,
        account: &ActiveAccount,
        credentials: &Credentials,
    ) -> Result<Arc<dyn VenueClient>, VenueError>;
}
