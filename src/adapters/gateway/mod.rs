//! Realtime gateway: signed tokens, connection hub and the axum server

pub mod hub;
pub mod server;
pub mod token;

pub use hub::{ConnectionHandle, ConnectionHub, ConnectionStats, Outbound};
pub use server::{ApiServer, AppState};
pub use token::{Claims, TokenError, TokenSigner};
