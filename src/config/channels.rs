use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, positive_secs};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Telegram channel configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: SecretString,
    /// The only user allowed to operate the bot.
    pub admin_id: i64,
    pub api_base_url: String,
    pub poll_timeout: Duration,
}

impl TelegramConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let token = optional_env("IPRESERVE_TELEGRAM_TOKEN")?
            .or_else(|| settings.telegram.token.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "telegram.token".to_string(),
                hint: "Set IPRESERVE_TELEGRAM_TOKEN or [telegram] token".to_string(),
            })?;

        let admin_id = match optional_env("IPRESERVE_ADMIN_ID")? {
            Some(raw) => Some(raw.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "IPRESERVE_ADMIN_ID".to_string(),
                message: format!("must be a Telegram user id: {e}"),
            })?),
            None => settings.telegram.admin_id,
        };
        let admin_id = match admin_id {
            Some(id) if id != 0 => id,
            _ => {
                return Err(ConfigError::MissingRequired {
                    key: "telegram.admin_id".to_string(),
                    hint: "Set IPRESERVE_ADMIN_ID or [telegram] admin_id (send /id to the bot to find it)"
                        .to_string(),
                });
            }
        };

        Ok(Self {
            token: SecretString::from(token),
            admin_id,
            api_base_url: settings.telegram.api_base_url.trim_end_matches('/').to_string(),
            poll_timeout: positive_secs(
                settings.telegram.poll_timeout_secs,
                "telegram.poll_timeout_secs",
            )?,
        })
    }
}
