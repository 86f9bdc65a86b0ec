//! Credential Vault Port

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::domain::ActiveAccount;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Vault unavailable: {0}")]
    Unavailable(String),
}

/// Opaque venue credentials. Never printed.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

fn mask(value: &str) -> String {
    if value.chars().count() <= 4 {
        return "***".to_string();
    }
    format!("{}***", value.chars().take(4).collect::<String>())
}

#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Active accounts, read fresh on every call
    async fn active_accounts(&self) -> Result<Vec<ActiveAccount>, VaultError>;

    async fn credentials(&self, account_id: &str) -> Result<Credentials, VaultError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_masks_secrets() {
        let creds = Credentials {
            api_key: "abcdef123".into(),
            api_secret: "topsecret".into(),
            passphrase: "pass".into(),
        };
        let out = format!("{:?}", creds);
        assert!(out.contains("abcd***"));
        assert!(!out.contains("topsecret"));
        assert!(!out.contains("pass\""));
    }
}
