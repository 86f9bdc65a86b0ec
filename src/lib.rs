//! Shadowtrade - Linked-Account Trade Monitor Library
//!
//! Watches Owner, Shadow and Slave accounts on a futures venue and cascades
//! position closes across linked accounts.
//!
//! # Modules
//!
//! - `domain`: Core types and rules (roles, positions, associations, cascade table)
//! - `ports`: Trait abstractions (VenueClient, CredentialVault, stores, RealtimePush)
//! - `adapters`: External implementations (venue HTTP, file vault, stores, gateway, CLI)
//! - `application`: Monitor loop, auto-close, audit, notifications and delivery queue
//! - `config`: Configuration loading and validation

#[cfg(test)]
extern crate self as shadowtrade;

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
