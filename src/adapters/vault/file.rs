//! File Vault
//!
//! Account registry kept in a TOML file. The file is re-read on every call so
//! accounts can be linked, deactivated or re-keyed without a restart.
//! Credential values may reference environment variables (`${LNM_SECRET}`),
//! which keeps secrets in `.env` instead of the registry.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::{AccountConfig, AccountRole, ActiveAccount};
use crate::ports::{CredentialVault, Credentials, VaultError};

#[derive(Debug, Clone, Deserialize)]
struct Registry {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountEntry {
    account_id: String,
    user_id: String,
    role: AccountRole,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    config: AccountConfig,
    api_key: String,
    api_secret: String,
    #[serde(default)]
    passphrase: String,
}

fn default_active() -> bool {
    true
}

impl AccountEntry {
    fn to_account(&self) -> ActiveAccount {
        ActiveAccount::new(&self.account_id, &self.user_id, self.role).with_config(self.config.clone())
    }

    fn credentials(&self) -> Result<Credentials, VaultError> {
        Ok(Credentials {
            api_key: expand_env(&self.account_id, &self.api_key)?,
            api_secret: expand_env(&self.account_id, &self.api_secret)?,
            passphrase: expand_env(&self.account_id, &self.passphrase)?,
        })
    }
}

fn expand_env(account_id: &str, raw: &str) -> Result<String, VaultError> {
    shellexpand::env(raw)
        .map(|v| v.into_owned())
        .map_err(|e| VaultError::Unavailable(format!("account {}: {}", account_id, e)))
}

/// Registry summary used by `validate`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub users: usize,
}

pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Registry, VaultError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            VaultError::Unavailable(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            VaultError::Unavailable(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Load the registry and check that every active account resolves its
    /// credentials and no user has two active accounts in one role.
    pub fn validate(&self) -> Result<RegistrySummary, VaultError> {
        let registry = self.read()?;
        let mut seen = std::collections::HashSet::new();
        let mut users = std::collections::HashSet::new();
        let mut active = 0;

        for entry in registry.accounts.iter().filter(|e| e.active) {
            entry.credentials()?;
            if !seen.insert((entry.user_id.as_str(), entry.role)) {
                return Err(VaultError::Unavailable(format!(
                    "user {} has more than one active {} account",
                    entry.user_id, entry.role
                )));
            }
            users.insert(entry.user_id.as_str());
            active += 1;
        }

        Ok(RegistrySummary {
            total: registry.accounts.len(),
            active,
            users: users.len(),
        })
    }
}

#[async_trait]
impl CredentialVault for FileVault {
    async fn active_accounts(&self) -> Result<Vec<ActiveAccount>, VaultError> {
        let registry = self.read()?;
        let accounts: Vec<ActiveAccount> = registry
            .accounts
            .iter()
            .filter(|e| e.active)
            .map(AccountEntry::to_account)
            .collect();
        tracing::debug!("Loaded {} active accounts from {}", accounts.len(), self.path.display());
        Ok(accounts)
    }

    async fn credentials(&self, account_id: &str) -> Result<Credentials, VaultError> {
        let registry = self.read()?;
        registry
            .accounts
            .iter()
            .find(|e| e.account_id == account_id && e.active)
            .ok_or_else(|| VaultError::AccountNotFound(account_id.to_string()))?
            .credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REGISTRY: &str = r#"
[[accounts]]
account_id = "acc-owner"
user_id = "u1"
role = "owner"
api_key = "owner-key"
api_secret = "owner-secret"
passphrase = "owner-pass"

[[accounts]]
account_id = "acc-shadow"
user_id = "u1"
role = "shadow"
api_key = "shadow-key"
api_secret = "shadow-secret"

[accounts.config]
shadow_close = true
take_profit_pct = 2.5

[[accounts]]
account_id = "acc-old"
user_id = "u1"
role = "slave"
active = false
api_key = "old"
api_secret = "old"
"#;

    fn registry_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_active_accounts_skip_inactive() {
        let file = registry_file(REGISTRY);
        let vault = FileVault::new(file.path());

        let accounts = vault.active_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].role, AccountRole::Owner);
        assert!(accounts[1].config.shadow_close);
        assert_eq!(accounts[1].config.take_profit_pct, Some(2.5));
    }

    #[tokio::test]
    async fn test_credentials_lookup() {
        let file = registry_file(REGISTRY);
        let vault = FileVault::new(file.path());

        let creds = vault.credentials("acc-owner").await.unwrap();
        assert_eq!(creds.api_key, "owner-key");
        assert_eq!(creds.passphrase, "owner-pass");

        let shadow = vault.credentials("acc-shadow").await.unwrap();
        assert_eq!(shadow.passphrase, "");

        assert!(matches!(
            vault.credentials("acc-old").await,
            Err(VaultError::AccountNotFound(_))
        ));
        assert!(matches!(
            vault.credentials("missing").await,
            Err(VaultError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_reread_on_each_call() {
        let mut file = registry_file(REGISTRY);
        let vault = FileVault::new(file.path());
        assert_eq!(vault.active_accounts().await.unwrap().len(), 2);

        file.write_all(
            br#"
[[accounts]]
account_id = "acc-slave"
user_id = "u2"
role = "slave"
api_key = "k"
api_secret = "s"
"#,
        )
        .unwrap();
        file.flush().unwrap();

        assert_eq!(vault.active_accounts().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_or_invalid_file_is_unavailable() {
        let vault = FileVault::new("/nonexistent/accounts.toml");
        assert!(matches!(vault.active_accounts().await, Err(VaultError::Unavailable(_))));

        let file = registry_file("[[accounts]]\naccount_id = 1\n");
        let vault = FileVault::new(file.path());
        assert!(matches!(vault.active_accounts().await, Err(VaultError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_credentials_expand_env() {
        std::env::set_var("SHADOWTRADE_TEST_VAULT_SECRET", "from-env");
        let file = registry_file(
            r#"
[[accounts]]
account_id = "acc"
user_id = "u1"
role = "owner"
api_key = "key"
api_secret = "${SHADOWTRADE_TEST_VAULT_SECRET}"
"#,
        );
        let vault = FileVault::new(file.path());
        assert_eq!(vault.credentials("acc").await.unwrap().api_secret, "from-env");
    }

    #[test]
    fn test_validate_summary_and_duplicates() {
        let file = registry_file(REGISTRY);
        let summary = FileVault::new(file.path()).validate().unwrap();
        assert_eq!(
            summary,
            RegistrySummary {
                total: 3,
                active: 2,
                users: 1
            }
        );

        let duplicate = format!(
            "{}\n[[accounts]]\naccount_id = \"acc-owner-2\"\nuser_id = \"u1\"\nrole = \"owner\"\napi_key = \"k\"\napi_secret = \"s\"\n",
            REGISTRY
        );
        let file = registry_file(&duplicate);
        assert!(FileVault::new(file.path()).validate().is_err());
    }
}
