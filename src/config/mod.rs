//! Configuration for ipreserve.
//!
//! Settings are loaded with priority: env var > config file > default.
//! Secrets may live in `~/.ipreserve/.env` (loaded via dotenvy early in
//! startup). The config file is `~/.ipreserve/config.toml` unless `-c`
//! names another one; non-TOML files are read in the legacy conf format.

mod accounts;
mod automation;
mod channels;
pub(crate) mod helpers;

use std::path::Path;

use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::accounts::AccountConfig;
pub use self::automation::{AutomationConfig, ClassifierConfig};
pub use self::channels::TelegramConfig;

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub classifier: ClassifierConfig,
    pub automation: AutomationConfig,
    pub accounts: Vec<AccountConfig>,
}

impl Config {
    /// Load `.env` files, read the settings file and resolve env overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_ipreserve_env();
        let settings = Settings::load(config_path)?;
        Self::build(&settings)
    }

    /// Resolve and validate settings. Env vars win over file values.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            telegram: TelegramConfig::resolve(settings)?,
            classifier: ClassifierConfig::resolve(settings)?,
            automation: AutomationConfig::resolve(settings)?,
            accounts: accounts::resolve_accounts(settings)?,
        })
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AccountSettings;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;
    use std::time::Duration;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("IPRESERVE_TELEGRAM_TOKEN");
            std::env::remove_var("IPRESERVE_ADMIN_ID");
            std::env::remove_var("IPRESERVE_AUTO_CHECK_IP");
            std::env::remove_var("IPRESERVE_CLASSIFIER_ENDPOINT");
        }
    }

    fn sample_settings() -> Settings {
        let mut settings = Settings::default();
        settings.telegram.token = Some("file-token".to_string());
        settings.telegram.admin_id = Some(42);
        settings.accounts.push(AccountSettings {
            name: "tokyo".to_string(),
            user: "u".to_string(),
            fingerprint: "f".to_string(),
            tenancy: "t".to_string(),
            region: "ap-tokyo-1".to_string(),
            compartment_id: None,
            key_file: "/keys/tokyo.pem".to_string(),
        });
        settings
    }

    #[test]
    fn builds_with_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let config = Config::build(&sample_settings()).expect("config");
        assert_eq!(config.telegram.token.expose_secret(), "file-token");
        assert_eq!(config.telegram.admin_id, 42);
        assert!(!config.classifier.auto_check);
        assert_eq!(config.automation, AutomationConfig::default());
        assert_eq!(config.classifier.manual_timeout, Duration::from_secs(30));
        assert_eq!(config.account_names(), vec!["tokyo".to_string()]);
        assert!(config.account("tokyo").is_some());
        assert!(config.account("osaka").is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("IPRESERVE_TELEGRAM_TOKEN", "env-token");
            std::env::set_var("IPRESERVE_ADMIN_ID", "7");
            std::env::set_var("IPRESERVE_AUTO_CHECK_IP", "1");
            std::env::set_var(
                "IPRESERVE_CLASSIFIER_ENDPOINT",
                "http://127.0.0.1:9000/report?ip={ip}",
            );
        }

        let config = Config::build(&sample_settings()).expect("config");
        assert_eq!(config.telegram.token.expose_secret(), "env-token");
        assert_eq!(config.telegram.admin_id, 7);
        assert!(config.classifier.auto_check);
        assert_eq!(
            config.classifier.report_link("1.2.3.4"),
            "http://127.0.0.1:9000/report?ip=1.2.3.4"
        );

        clear_env();
    }

    #[test]
    fn missing_token_and_admin_are_reported() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let mut settings = sample_settings();
        settings.telegram.token = None;
        match Config::build(&settings).unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "telegram.token"),
            other => panic!("unexpected error: {other}"),
        }

        let mut settings = sample_settings();
        settings.telegram.admin_id = Some(0);
        match Config::build(&settings).unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "telegram.admin_id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_env_and_endpoint() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("IPRESERVE_ADMIN_ID", "not-a-number");
        }
        match Config::build(&sample_settings()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "IPRESERVE_ADMIN_ID"),
            other => panic!("unexpected error: {other}"),
        }
        clear_env();

        let mut settings = sample_settings();
        settings.classifier.endpoint = "https://ippure.com/".to_string();
        assert!(Config::build(&settings).is_err());

        let mut settings = sample_settings();
        settings.automation.ready_poll_secs = 0;
        assert!(Config::build(&settings).is_err());

        let mut settings = sample_settings();
        settings.automation.classifier_failure_limit = 0;
        match Config::build(&settings).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "automation.classifier_failure_limit")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
