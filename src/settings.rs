//! On-disk settings.
//!
//! Two formats are accepted. The native one is TOML at
//! `~/.ipreserve/config.toml`:
//!
//! ```toml
//! [telegram]
//! token = "123456:ABC..."
//! admin_id = 987654321
//!
//! [classifier]
//! auto_check = true
//!
//! [[accounts]]
//! name = "tokyo"
//! user = "ocid1.user.oc1..aaaa"
//! fingerprint = "12:34:..."
//! tenancy = "ocid1.tenancy.oc1..aaaa"
//! region = "ap-tokyo-1"
//! key_file = "~/.oci/tokyo.pem"
//! ```
//!
//! The legacy INI-style `conf` file (global `token`, `chat_id`,
//! `auto_check_ip`, then one `[section]` per account) is read for any path
//! without a `.toml` extension.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::helpers::is_toml_path;
use crate::error::ConfigError;

/// Raw settings as read from a file. Validation happens in `Config`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub telegram: TelegramSettings,

    #[serde(default)]
    pub classifier: ClassifierSettings,

    #[serde(default)]
    pub automation: AutomationSettings,

    #[serde(default, alias = "account")]
    pub accounts: Vec<AccountSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramSettings {
    #[serde(default)]
    pub token: Option<String>,

    /// The only user allowed to operate the bot.
    #[serde(default, alias = "chat_id")]
    pub admin_id: Option<i64>,

    #[serde(default = "default_telegram_api_base")]
    pub api_base_url: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: None,
            admin_id: None,
            api_base_url: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierSettings {
    /// Report URL template; `{ip}` is replaced with the address.
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    /// Classify freshly created addresses from `/newip`.
    #[serde(default, alias = "auto_check_ip")]
    pub auto_check: bool,

    /// Manual `/checkip` and `/newip` classification budget.
    #[serde(default = "default_manual_timeout_secs")]
    pub manual_timeout_secs: u64,
}

fn default_classifier_endpoint() -> String {
    "https://ippure.com/?ip={ip}".to_string()
}

fn default_manual_timeout_secs() -> u64 {
    30
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            auto_check: false,
            manual_timeout_secs: default_manual_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationSettings {
    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_ready_poll_secs")]
    pub ready_poll_secs: u64,

    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,

    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,

    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,

    /// Keep an address whose classification failed instead of deleting it.
    #[serde(default = "default_true")]
    pub retain_on_classifier_error: bool,

    /// Consecutive classifier failures after which failed addresses are
    /// deleted even when retaining is on.
    #[serde(default = "default_classifier_failure_limit")]
    pub classifier_failure_limit: u32,
}

fn default_create_timeout_secs() -> u64 {
    120
}

fn default_ready_timeout_secs() -> u64 {
    60
}

fn default_ready_poll_secs() -> u64 {
    2
}

fn default_classify_timeout_secs() -> u64 {
    60
}

fn default_delete_timeout_secs() -> u64 {
    30
}

fn default_list_timeout_secs() -> u64 {
    30
}

fn default_classifier_failure_limit() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            create_timeout_secs: default_create_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            ready_poll_secs: default_ready_poll_secs(),
            classify_timeout_secs: default_classify_timeout_secs(),
            delete_timeout_secs: default_delete_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
            retain_on_classifier_error: true,
            classifier_failure_limit: default_classifier_failure_limit(),
        }
    }
}

/// One cloud account. Field names follow the OCI CLI config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AccountSettings {
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub tenancy: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default)]
    pub key_file: String,
}

impl Settings {
    /// Default config path: `~/.ipreserve/config.toml`.
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::ipreserve_dir().join("config.toml")
    }

    /// Resolve and read the settings file.
    ///
    /// An explicit path must exist. Without one, `~/.ipreserve/config.toml`
    /// is tried, then a legacy `./conf`; if neither exists the defaults are
    /// returned and validation reports what is missing.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            return Self::load_file(path)?.ok_or_else(|| {
                ConfigError::ParseError(format!("Config file not found: {}", path.display()))
            });
        }

        for candidate in [Self::default_toml_path(), PathBuf::from("conf")] {
            if let Some(settings) = Self::load_file(&candidate)? {
                tracing::debug!("Loaded config from {}", candidate.display());
                return Ok(settings);
            }
        }

        tracing::warn!(
            "No config file found at {}; relying on environment",
            Self::default_toml_path().display()
        );
        Ok(Self::default())
    }

    /// Read one file, picking the format from its extension.
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let settings = if is_toml_path(path) {
            toml::from_str(&data).map_err(|e| {
                ConfigError::ParseError(format!("invalid TOML in {}: {}", path.display(), e))
            })?
        } else {
            Self::parse_conf(&data)
        };
        Ok(Some(settings))
    }

    /// Parse the legacy INI-style format.
    ///
    /// Lines before the first section are global; unknown keys are ignored,
    /// as are lines without `=`.
    pub fn parse_conf(data: &str) -> Self {
        let mut settings = Self::default();
        let mut current: Option<AccountSettings> = None;

        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some(done) = current.take() {
                    settings.accounts.push(done);
                }
                current = Some(AccountSettings {
                    name: name.trim().to_string(),
                    ..Default::default()
                });
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().to_string();

            match current.as_mut() {
                Some(account) => match key {
                    "user" => account.user = value,
                    "fingerprint" => account.fingerprint = value,
                    "tenancy" => account.tenancy = value,
                    "region" => account.region = value,
                    "compartment_id" if !value.is_empty() => {
                        account.compartment_id = Some(value)
                    }
                    "key_file" => account.key_file = value,
                    _ => {}
                },
                None => match key {
                    "token" if !value.is_empty() => settings.telegram.token = Some(value),
                    "chat_id" => settings.telegram.admin_id = value.parse().ok(),
                    "auto_check_ip" => {
                        settings.classifier.auto_check = value == "true" || value == "1"
                    }
                    _ => {}
                },
            }
        }

        if let Some(done) = current {
            settings.accounts.push(done);
        }
        settings
    }
}
