//! Vault adapter: file-backed account registry

pub mod file;

pub use file::{FileVault, RegistrySummary};
