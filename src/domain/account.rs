//! Linked Accounts
//!
//! The three account roles a user can link and the per-role configuration
//! the cascade rules read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role of a linked brokerage account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    /// Originating account
    Owner,
    /// Conditionally mirrors Owner's closes
    Shadow,
    /// Always mirrors Owner's and Shadow's closes
    Slave,
}

impl AccountRole {
    pub const ALL: [AccountRole; 3] = [AccountRole::Owner, AccountRole::Shadow, AccountRole::Slave];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Owner => "owner",
            AccountRole::Shadow => "shadow",
            AccountRole::Slave => "slave",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown account role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for AccountRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(AccountRole::Owner),
            "shadow" => Ok(AccountRole::Shadow),
            "slave" => Ok(AccountRole::Slave),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Per-role configuration flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Shadow only: close shadow positions when the owner closes
    #[serde(default)]
    pub shadow_close: bool,
    /// Shadow only: take profit percentage
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    /// Slave/shadow: quantity used when mirroring entries
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// An active account as reported by the credential vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAccount {
    pub account_id: String,
    pub user_id: String,
    pub role: AccountRole,
    #[serde(default)]
    pub config: AccountConfig,
}

impl ActiveAccount {
    pub fn new(account_id: impl Into<String>, user_id: impl Into<String>, role: AccountRole) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            role,
            config: AccountConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AccountConfig) -> Self {
        self.config = config;
        self
    }
}

/// Find the active account for `(user, role)`.
///
/// At most one active account exists per pair, so the first match wins.
pub fn find_account<'a>(
    accounts: &'a [ActiveAccount],
    user_id: &str,
    role: AccountRole,
) -> Option<&'a ActiveAccount> {
    accounts
        .iter()
        .find(|a| a.user_id == user_id && a.role == role)
}
