use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::helpers::expand_home;
use crate::error::ConfigError;
use crate::settings::{AccountSettings, Settings};

/// A validated cloud account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub name: String,
    pub user: String,
    pub fingerprint: String,
    pub tenancy: String,
    pub region: String,
    /// Defaults to the tenancy when not configured.
    pub compartment_id: String,
    pub key_file: PathBuf,
}

impl AccountConfig {
    fn from_settings(raw: &AccountSettings) -> Result<Self, ConfigError> {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "accounts.name".to_string(),
                message: "account name must not be empty".to_string(),
            });
        }
        if name.contains(':') {
            return Err(ConfigError::InvalidValue {
                key: format!("accounts.{name}"),
                message: "account name must not contain ':'".to_string(),
            });
        }

        let required = |field: &str, value: &str| -> Result<String, ConfigError> {
            let value = value.trim();
            if value.is_empty() {
                Err(ConfigError::InvalidValue {
                    key: format!("accounts.{name}.{field}"),
                    message: "is required".to_string(),
                })
            } else {
                Ok(value.to_string())
            }
        };

        let tenancy = required("tenancy", &raw.tenancy)?;
        let compartment_id = raw
            .compartment_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| tenancy.clone());

        Ok(Self {
            name: name.to_string(),
            user: required("user", &raw.user)?,
            fingerprint: required("fingerprint", &raw.fingerprint)?,
            region: required("region", &raw.region)?,
            key_file: expand_home(&required("key_file", &raw.key_file)?),
            tenancy,
            compartment_id,
        })
    }

    /// `name (region)`, used on account buttons.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.region)
    }
}

/// Validate every configured account, in file order.
pub(crate) fn resolve_accounts(settings: &Settings) -> Result<Vec<AccountConfig>, ConfigError> {
    if settings.accounts.is_empty() {
        return Err(ConfigError::MissingRequired {
            key: "accounts".to_string(),
            hint: "Add at least one [[accounts]] table (or [name] section in a legacy conf)"
                .to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut accounts = Vec::with_capacity(settings.accounts.len());
    for raw in &settings.accounts {
        let account = AccountConfig::from_settings(raw)?;
        if !seen.insert(account.name.clone()) {
            return Err(ConfigError::InvalidValue {
                key: format!("accounts.{}", account.name),
                message: "duplicate account name".to_string(),
            });
        }
        accounts.push(account);
    }
    Ok(accounts)
}
