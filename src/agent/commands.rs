//! Manual commands: account selection and one-off address operations.

use std::cmp::max;
use std::net::IpAddr;

use crate::agent::Agent;
use crate::agent::router::Command;
use crate::channels::OutgoingMessage;
use crate::error::{ProviderError, ValidationError};
use crate::provider::{bounded, display_name};
use crate::render;

/// Display-name prefix for addresses created by `/newip`.
const MANUAL_NAME_PREFIX: &str = "tg";

/// Names offered when an unknown command is typed.
const COMMAND_SUGGESTIONS: &[&str] = &[
    "accounts", "autoip", "checkip", "delip", "help", "id", "listip", "newip", "start", "stopauto",
    "use",
];

fn canonicalize_command_name(command: &str) -> String {
    let lower = command.trim().trim_start_matches('/').to_ascii_lowercase();
    match lower.as_str() {
        "account" | "acc" => "accounts".to_string(),
        "list" | "ls" | "ips" => "listip".to_string(),
        "new" | "create" => "newip".to_string(),
        "del" | "delete" | "rm" => "delip".to_string(),
        "check" => "checkip".to_string(),
        "auto" => "autoip".to_string(),
        "stop" => "stopauto".to_string(),
        _ => lower,
    }
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (curr[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

fn command_suggestions(command: &str) -> Vec<&'static str> {
    let normalized = canonicalize_command_name(command);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(&'static str, usize)> = COMMAND_SUGGESTIONS
        .iter()
        .map(|candidate| (*candidate, levenshtein_distance(&normalized, candidate)))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let threshold = if normalized.len() <= 4 {
        1
    } else if normalized.len() <= 8 {
        2
    } else {
        max(3, normalized.len() / 3)
    };

    ranked
        .into_iter()
        .filter(|(candidate, distance)| {
            *distance <= threshold
                || candidate.starts_with(&normalized)
                || normalized.starts_with(*candidate)
        })
        .take(3)
        .map(|(candidate, _)| candidate)
        .collect()
}

fn unknown_command_message(command: &str) -> String {
    let suggestions = command_suggestions(command);
    if suggestions.is_empty() {
        return format!("Unknown command: /{}. Try /help", command);
    }

    if suggestions.len() == 1 {
        return format!(
            "Unknown command: /{}. Did you mean /{}? Try /help",
            command, suggestions[0]
        );
    }

    let formatted = suggestions
        .iter()
        .map(|suggestion| format!("/{}", suggestion))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Unknown command: /{}. Did you mean one of: {}? Try /help",
        command, formatted
    )
}

impl Agent {
    pub(super) async fn handle_command(&self, chat_id: i64, sender_id: i64, command: Command) {
        match command {
            Command::Start | Command::Help => self.help(chat_id).await,
            Command::Accounts | Command::Use(None) => self.show_accounts(chat_id).await,
            Command::Use(Some(name)) => self.use_account(chat_id, &name).await,
            Command::NewIp => self.new_ip(chat_id).await,
            Command::ListIp | Command::DelIp(None) => self.list_ip(chat_id, None).await,
            Command::DelIp(Some(address)) => self.delete_ip(chat_id, &address).await,
            Command::CheckIp(Some(address)) => self.check_ip(chat_id, &address, false).await,
            Command::CheckIp(None) => {
                self.reply(chat_id, "Usage: /checkip <IP>\nExample: /checkip 8.8.8.8")
                    .await
            }
            Command::AutoIp => self.start_wizard(chat_id).await,
            Command::StopAuto => self.stop_automation(chat_id).await,
            Command::Id => self.reply(chat_id, format!("Your ID: {sender_id}")).await,
            Command::Unknown(name) => self.reply(chat_id, unknown_command_message(&name)).await,
        }
    }

    async fn help(&self, chat_id: i64) {
        let account = self.session.current_account().await;
        let region = self
            .providers
            .get(&account)
            .map(|p| p.region().to_string())
            .unwrap_or_default();
        let task = self.session.task_status().await;
        self.send(OutgoingMessage::markdown(
            chat_id,
            render::help(&account, &region, task.as_ref()),
        ))
        .await;
    }

    async fn show_accounts(&self, chat_id: i64) {
        let current = self.session.current_account().await;
        self.send(render::accounts_menu(chat_id, &self.account_choices(), &current))
            .await;
    }

    pub(super) async fn use_account(&self, chat_id: i64, name: &str) {
        if !self.providers.contains(name) {
            let err = ValidationError::UnknownAccount(name.to_string());
            self.reply(chat_id, format!("❌ {err}")).await;
            return;
        }
        self.session.set_current_account(name).await;
        tracing::info!(account = %name, "Switched account");
        self.list_ip(chat_id, None).await;
    }

    /// Show the current account's addresses, optionally marking one as new.
    pub(super) async fn list_ip(&self, chat_id: i64, highlight: Option<&str>) {
        let Some(p) = self.current_provider().await else {
            return;
        };
        match bounded("list", self.automation.list_timeout, p.list()).await {
            Ok(resources) => {
                let cached = self
                    .session
                    .cached_many(resources.iter().map(|r| r.address.as_str()))
                    .await;
                self.send(render::address_list(
                    chat_id,
                    p.account_name(),
                    p.region(),
                    &resources,
                    &cached,
                    highlight,
                ))
                .await;
            }
            Err(e) => self.reply(chat_id, format!("❌ {e}")).await,
        }
    }

    pub(super) async fn new_ip(&self, chat_id: i64) {
        let Some(p) = self.current_provider().await else {
            return;
        };
        self.reply(chat_id, format!("⏳ [{}] creating...", p.account_name()))
            .await;

        let name = display_name(MANUAL_NAME_PREFIX);
        let created = async {
            let resource = p.create(&name).await?;
            p.wait_ready(
                &resource.id,
                self.automation.ready_timeout,
                self.automation.ready_poll,
            )
            .await
        };
        let resource = match bounded("create", self.automation.create_timeout, created).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!(account = %p.account_name(), "Manual create failed: {}", e);
                self.reply(chat_id, format!("❌ {e}")).await;
                return;
            }
        };
        tracing::info!(account = %p.account_name(), address = %resource.address, "Manual create succeeded");

        let link = self.classifier_config.report_link(&resource.address);
        if !self.classifier_config.auto_check {
            self.send(render::created(
                chat_id,
                &resource.address,
                p.account_name(),
                p.region(),
                &link,
            ))
            .await;
            return;
        }

        self.send(OutgoingMessage::markdown(
            chat_id,
            format!("✅ IP created: `{}`\n🔍 Checking purity...", resource.address),
        ))
        .await;
        let message = match self.classify(&resource.address).await {
            Ok(classification) => {
                let message = render::created_classified(
                    chat_id,
                    &classification,
                    p.account_name(),
                    p.region(),
                );
                self.session.cache_classification(classification).await;
                message
            }
            Err(e) => render::created_unclassified(
                chat_id,
                &resource.address,
                &e,
                p.account_name(),
                p.region(),
                &link,
            ),
        };
        self.send(message).await;
    }

    pub(super) async fn delete_ip(&self, chat_id: i64, address: &str) {
        let Some(p) = self.current_provider().await else {
            return;
        };
        let resource = match bounded("list", self.automation.list_timeout, p.find_by_address(address)).await {
            Ok(resource) => resource,
            Err(ProviderError::AddressNotFound(_)) => {
                self.reply(chat_id, format!("❌ Not found: {address}")).await;
                return;
            }
            Err(e) => {
                self.reply(chat_id, format!("❌ {e}")).await;
                return;
            }
        };

        if let Err(e) = bounded("delete", self.automation.delete_timeout, p.delete(&resource.id)).await {
            self.reply(chat_id, format!("❌ {e}")).await;
            return;
        }
        tracing::info!(account = %p.account_name(), %address, "Manual delete succeeded");
        self.reply(chat_id, format!("✅ Deleted: {address}")).await;
        self.list_ip(chat_id, None).await;
    }

    /// Classify one address. From a list button the list is refreshed after.
    pub(super) async fn check_ip(&self, chat_id: i64, address: &str, from_list: bool) {
        if address.parse::<IpAddr>().is_err() {
            let err = ValidationError::InvalidAddress(address.to_string());
            self.reply(chat_id, format!("❌ {err}")).await;
            return;
        }

        self.reply(chat_id, format!("🔍 Checking {address} ...")).await;
        let classification = match self.classify(address).await {
            Ok(c) => c,
            Err(e) => {
                self.reply(chat_id, format!("❌ Check failed: {e}")).await;
                return;
            }
        };

        let title = if from_list {
            "✅ *Check complete*"
        } else {
            "🔍 *IP purity check*"
        };
        let text = render::classification_report(title, &classification);
        self.session.cache_classification(classification).await;
        self.send(OutgoingMessage::markdown(chat_id, text)).await;

        if from_list {
            self.list_ip(chat_id, None).await;
        }
    }

    /// Operator-triggered classification under the manual budget.
    async fn classify(&self, address: &str) -> Result<crate::classify::Classification, String> {
        let timeout = self.classifier_config.manual_timeout;
        match tokio::time::timeout(timeout, self.classifier.classify(address)).await {
            Ok(Ok(classification)) => Ok(classification),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(crate::error::ClassifierError::Timeout(timeout).to_string()),
        }
    }
}
