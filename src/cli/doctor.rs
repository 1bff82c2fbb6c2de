//! `ipreserve doctor` - active health diagnostics.
//!
//! Validates configuration and probes every external dependency (Telegram,
//! the purity classifier, each OCI account) so problems show up before the
//! bot is started. Each check reports pass/fail with guidance on failures.

use std::path::Path;
use std::time::Duration;

use crate::channels::TelegramChannel;
use crate::config::{AccountConfig, Config};
use crate::provider::{OciClient, Provisioner, RequestSigner, bounded};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Address used to probe the classifier endpoint.
const PROBE_ADDRESS: &str = "1.1.1.1";

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("ipreserve doctor");
    println!("================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = Config::load(config_path);
    check(
        "Configuration",
        match &config {
            Ok(config) => CheckResult::Pass(format!("{} account(s)", config.accounts.len())),
            Err(e) => CheckResult::Fail(e.to_string()),
        },
        &mut passed,
        &mut failed,
    );

    match &config {
        Ok(config) => {
            for account in &config.accounts {
                check(
                    &format!("Signing key [{}]", account.name),
                    check_signing_key(account),
                    &mut passed,
                    &mut failed,
                );
            }

            check(
                "Telegram Bot API",
                check_telegram(config).await,
                &mut passed,
                &mut failed,
            );

            check(
                "Purity classifier",
                probe_http_endpoint(
                    "classifier",
                    &config.classifier.report_link(PROBE_ADDRESS),
                    PROBE_TIMEOUT,
                )
                .await,
                &mut passed,
                &mut failed,
            );

            for account in &config.accounts {
                check(
                    &format!("OCI listing [{}]", account.name),
                    check_account_listing(account, config.automation.list_timeout).await,
                    &mut passed,
                    &mut failed,
                );
            }
        }
        Err(_) => {
            for name in ["Signing keys", "Telegram Bot API", "Purity classifier", "OCI listing"] {
                check(
                    name,
                    CheckResult::Skip("configuration did not load".to_string()),
                    &mut passed,
                    &mut failed,
                );
            }
        }
    }

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Fix the failed checks before running the bot.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_signing_key(account: &AccountConfig) -> CheckResult {
    if !account.key_file.exists() {
        return CheckResult::Fail(format!(
            "{} does not exist (set key_file for [{}])",
            account.key_file.display(),
            account.name
        ));
    }
    let key_id = format!("{}/{}/{}", account.tenancy, account.user, account.fingerprint);
    match RequestSigner::from_file(key_id, &account.key_file) {
        Ok(_) => CheckResult::Pass(account.key_file.display().to_string()),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

async fn check_telegram(config: &Config) -> CheckResult {
    let channel = match TelegramChannel::new(&config.telegram) {
        Ok(channel) => channel,
        Err(e) => return CheckResult::Fail(e.to_string()),
    };
    match tokio::time::timeout(PROBE_TIMEOUT, channel.get_me()).await {
        Ok(Ok(username)) => CheckResult::Pass(format!("authorized as @{username}")),
        Ok(Err(e)) => CheckResult::Fail(format!("{e} (check the bot token)")),
        Err(_) => CheckResult::Fail(format!(
            "no answer within {}s from {}",
            PROBE_TIMEOUT.as_secs(),
            redact_url_for_display(&config.telegram.api_base_url)
        )),
    }
}

async fn check_account_listing(account: &AccountConfig, timeout: Duration) -> CheckResult {
    let client = match OciClient::new(account) {
        Ok(client) => client,
        Err(e) => return CheckResult::Skip(format!("client unavailable: {e}")),
    };
    match bounded("list", timeout, client.list()).await {
        Ok(resources) => CheckResult::Pass(format!(
            "{} reserved IP(s) in {}",
            resources.len(),
            account.region
        )),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

async fn probe_http_endpoint(label: &str, endpoint: &str, timeout: Duration) -> CheckResult {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return CheckResult::Fail(format!("{label} endpoint is empty"));
    }

    let url = match reqwest::Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            return CheckResult::Fail(format!(
                "{label} endpoint URL is invalid ({}): {e}",
                redact_url_for_display(endpoint)
            ));
        }
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    match client.get(url.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                CheckResult::Fail(format!(
                    "{label} reachable but unhealthy ({} at {})",
                    status,
                    redact_url_for_display(url.as_str())
                ))
            } else {
                CheckResult::Pass(format!(
                    "{} ({status})",
                    redact_url_for_display(url.as_str())
                ))
            }
        }
        Err(e) => CheckResult::Fail(format!(
            "{label} unreachable ({}): {e}",
            redact_url_for_display(url.as_str())
        )),
    }
}

fn redact_url_for_display(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
