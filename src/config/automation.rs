use std::time::Duration;

use crate::config::helpers::{optional_bool_env, optional_env, positive_secs};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Purity classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// URL template with an `{ip}` placeholder.
    pub endpoint: String,
    /// Classify addresses created by `/newip`.
    pub auto_check: bool,
    /// Transport timeout; the controller applies its own bound on top.
    pub timeout: Duration,
    /// Budget for operator-triggered checks.
    pub manual_timeout: Duration,
}

impl ClassifierConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let endpoint = optional_env("IPRESERVE_CLASSIFIER_ENDPOINT")?
            .unwrap_or_else(|| settings.classifier.endpoint.clone());
        if !endpoint.contains("{ip}") {
            return Err(ConfigError::InvalidValue {
                key: "classifier.endpoint".to_string(),
                message: format!("must contain an {{ip}} placeholder, got '{endpoint}'"),
            });
        }
        url::Url::parse(&endpoint.replace("{ip}", "0.0.0.0")).map_err(|e| {
            ConfigError::InvalidValue {
                key: "classifier.endpoint".to_string(),
                message: format!("not a valid URL: {e}"),
            }
        })?;

        let auto_check =
            optional_bool_env("IPRESERVE_AUTO_CHECK_IP")?.unwrap_or(settings.classifier.auto_check);

        Ok(Self {
            endpoint,
            auto_check,
            timeout: positive_secs(
                settings.automation.classify_timeout_secs,
                "automation.classify_timeout_secs",
            )?,
            manual_timeout: positive_secs(
                settings.classifier.manual_timeout_secs,
                "classifier.manual_timeout_secs",
            )?,
        })
    }

    /// Link an operator can open to see the full report.
    pub fn report_link(&self, address: &str) -> String {
        self.endpoint.replace("{ip}", address)
    }
}

/// Timeouts and switches for the acquisition loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationConfig {
    pub create_timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
    pub classify_timeout: Duration,
    pub delete_timeout: Duration,
    pub list_timeout: Duration,
    pub retain_on_classifier_error: bool,
    /// After this many classifier failures in a row, failed addresses are
    /// deleted regardless of `retain_on_classifier_error`.
    pub classifier_failure_limit: u32,
}

impl AutomationConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let a = &settings.automation;
        let ready_timeout = positive_secs(a.ready_timeout_secs, "automation.ready_timeout_secs")?;
        let ready_poll = positive_secs(a.ready_poll_secs, "automation.ready_poll_secs")?;
        if ready_poll > ready_timeout {
            return Err(ConfigError::InvalidValue {
                key: "automation.ready_poll_secs".to_string(),
                message: "must not exceed automation.ready_timeout_secs".to_string(),
            });
        }

        if a.classifier_failure_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "automation.classifier_failure_limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            create_timeout: positive_secs(a.create_timeout_secs, "automation.create_timeout_secs")?,
            ready_timeout,
            ready_poll,
            classify_timeout: positive_secs(
                a.classify_timeout_secs,
                "automation.classify_timeout_secs",
            )?,
            delete_timeout: positive_secs(a.delete_timeout_secs, "automation.delete_timeout_secs")?,
            list_timeout: positive_secs(a.list_timeout_secs, "automation.list_timeout_secs")?,
            retain_on_classifier_error: a.retain_on_classifier_error,
            classifier_failure_limit: a.classifier_failure_limit,
        })
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            create_timeout: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(60),
            ready_poll: Duration::from_secs(2),
            classify_timeout: Duration::from_secs(60),
            delete_timeout: Duration::from_secs(30),
            list_timeout: Duration::from_secs(30),
            retain_on_classifier_error: true,
            classifier_failure_limit: 3,
        }
    }
}
