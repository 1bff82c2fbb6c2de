//! Operator-facing text and keyboards.
//!
//! Everything the bot shows in the chat is built here so handlers and the
//! controller stay free of formatting. Messages flagged `markdown` use the
//! Telegram legacy Markdown dialect.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::agent::router::{AutomationAction, AutomationKind, CallbackAction};
use crate::channels::{Button, OutgoingMessage};
use crate::classify::Classification;
use crate::policy::{MatchMode, OriginRequirement, ScoreThreshold};
use crate::provider::Resource;
use crate::session::TaskStatus;
use crate::wizard::{LaunchRequest, WizardStepKind};

/// Steps shown to the operator. Confirm is not counted.
const WIZARD_STEPS: u8 = 5;

const THRESHOLD_CHOICES: &[ScoreThreshold] = &[
    ScoreThreshold::AtMost(10),
    ScoreThreshold::AtMost(20),
    ScoreThreshold::AtMost(30),
    ScoreThreshold::AtMost(50),
    ScoreThreshold::Unlimited,
];

/// Escape the characters legacy Markdown treats as entity delimiters.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn callback(label: impl Into<String>, action: CallbackAction) -> Button {
    Button::callback(label, action.encode())
}

fn automation(label: impl Into<String>, kind: AutomationKind, generation: u64) -> Button {
    callback(
        label,
        CallbackAction::Automation(AutomationAction { kind, generation }),
    )
}

fn cancel_row(generation: u64) -> Vec<Button> {
    vec![automation("❌ Cancel", AutomationKind::Cancel, generation)]
}

/// `/help` text with the current account and automation status.
pub fn help(account: &str, region: &str, task: Option<&TaskStatus>) -> String {
    let mut out = String::from("🤖 *Reserved IP Bot*\n\n");
    out.push_str("/accounts - choose account\n");
    out.push_str("/newip - create a reserved IP\n");
    out.push_str("/listip - list reserved IPs\n");
    out.push_str("/delip <IP> - delete a reserved IP\n");
    out.push_str("/checkip <IP> - check IP purity\n");
    out.push_str("/autoip - acquire an IP automatically\n");
    out.push_str("/stopauto - stop automatic acquisition\n");
    out.push_str("/id - show your user id\n\n");
    let _ = writeln!(
        out,
        "📍 *Current:* \\[{}] {}",
        escape_markdown(account),
        escape_markdown(region)
    );
    match task {
        Some(task) => {
            let _ = write!(
                out,
                "🔄 *Automation:* running on \\[{}], {} attempt(s) since {}",
                escape_markdown(&task.request.account),
                task.attempts,
                task.started_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        None => out.push_str("🔄 *Automation:* idle"),
    }
    out
}

/// Account picker for `/accounts` and `/use` without arguments.
pub fn accounts_menu(chat_id: i64, accounts: &[(String, String)], current: &str) -> OutgoingMessage {
    let buttons = accounts
        .iter()
        .map(|(name, region)| {
            let mut label = format!("{name} ({region})");
            if name == current {
                label = format!("✅ {label}");
            }
            vec![callback(label, CallbackAction::Use(name.clone()))]
        })
        .collect();
    OutgoingMessage::markdown(chat_id, "👤 *Choose an account*").with_buttons(buttons)
}

/// Reserved-address list with per-address check/delete buttons.
///
/// `highlight` marks a freshly acquired address.
pub fn address_list(
    chat_id: i64,
    account: &str,
    region: &str,
    resources: &[Resource],
    cached: &HashMap<String, Classification>,
    highlight: Option<&str>,
) -> OutgoingMessage {
    let mut text = format!(
        "📋 *\\[{}]*\n{}\n\n",
        escape_markdown(account),
        escape_markdown(region)
    );
    let new_row = || callback("➕ New IP", CallbackAction::NewIp);

    if resources.is_empty() {
        text.push_str("No reserved IPs");
        return OutgoingMessage::markdown(chat_id, text).with_buttons(vec![vec![new_row()]]);
    }

    let mut buttons = Vec::with_capacity(resources.len() + 1);
    for resource in resources {
        if resource.address.is_empty() {
            let _ = writeln!(text, "• _provisioning_ ({})", escape_markdown(&resource.display_name));
            continue;
        }
        let marker = if highlight == Some(resource.address.as_str()) {
            "🆕"
        } else {
            "•"
        };
        match cached.get(&resource.address) {
            Some(c) => {
                let _ = writeln!(
                    text,
                    "{marker} `{}` ({})",
                    resource.address,
                    escape_markdown(&c.short_label())
                );
            }
            None => {
                let _ = writeln!(text, "{marker} `{}`", resource.address);
            }
        }
        buttons.push(vec![
            callback("🔍 Check", CallbackAction::Check(resource.address.clone())),
            callback("🗑 Delete", CallbackAction::Delete(resource.address.clone())),
        ]);
    }
    buttons.push(vec![new_row(), callback("🔄 Refresh", CallbackAction::Refresh)]);
    OutgoingMessage::markdown(chat_id, text).with_buttons(buttons)
}

/// Titled classification report for one address.
pub fn classification_report(title: &str, classification: &Classification) -> String {
    format!(
        "{title}\n\nIP: `{}`\n\n{}",
        classification.address,
        escape_markdown_summary(classification)
    )
}

fn escape_markdown_summary(c: &Classification) -> String {
    let escaped = Classification {
        address: c.address.clone(),
        score: c.score,
        level: escape_markdown(&c.level),
        category: escape_markdown(&c.category),
        origin: c.origin.clone(),
    };
    escaped.summary()
}

fn location(account: &str, region: &str) -> String {
    format!("📍 \\[{}] {}", escape_markdown(account), escape_markdown(region))
}

/// Manual creation succeeded; no classification attempted.
pub fn created(chat_id: i64, address: &str, account: &str, region: &str, report_url: &str) -> OutgoingMessage {
    let text = format!(
        "✅ *Created*\n\nIP: `{address}`\n\n{}",
        location(account, region)
    );
    OutgoingMessage::markdown(chat_id, text).with_buttons(vec![
        vec![Button::link("🔍 Check origin", report_url)],
        vec![callback("📋 View list", CallbackAction::Refresh)],
    ])
}

/// Manual creation succeeded and the address was classified.
pub fn created_classified(
    chat_id: i64,
    classification: &Classification,
    account: &str,
    region: &str,
) -> OutgoingMessage {
    let text = format!(
        "{}\n\n{}",
        classification_report("✅ *Created*", classification),
        location(account, region)
    );
    OutgoingMessage::markdown(chat_id, text)
        .with_buttons(vec![vec![callback("📋 View list", CallbackAction::Refresh)]])
}

/// Manual creation succeeded but classification failed.
pub fn created_unclassified(
    chat_id: i64,
    address: &str,
    error: &str,
    account: &str,
    region: &str,
    report_url: &str,
) -> OutgoingMessage {
    let text = format!(
        "✅ *Created*\n\nIP: `{address}`\n\n⚠️ Purity check failed: {}\n\n{}",
        escape_markdown(error),
        location(account, region)
    );
    OutgoingMessage::markdown(chat_id, text).with_buttons(vec![
        vec![Button::link("🔍 Check manually", report_url)],
        vec![callback("📋 View list", CallbackAction::Refresh)],
    ])
}

fn wizard_header(kind: WizardStepKind) -> String {
    format!(
        "🔄 *Automatic IP acquisition* ({}/{WIZARD_STEPS})\n\n",
        kind.ordinal().min(WIZARD_STEPS)
    )
}

/// Prompt for the account step.
pub fn wizard_accounts(chat_id: i64, generation: u64, accounts: &[(String, String)]) -> OutgoingMessage {
    let mut buttons: Vec<Vec<Button>> = accounts
        .iter()
        .map(|(name, region)| {
            vec![automation(
                format!("{name} ({region})"),
                AutomationKind::Account(name.clone()),
                generation,
            )]
        })
        .collect();
    buttons.push(cancel_row(generation));
    let text = format!("{}Choose an account:", wizard_header(WizardStepKind::Account));
    OutgoingMessage::markdown(chat_id, text).with_buttons(buttons)
}

/// Prompt for the step the wizard just advanced to.
pub fn wizard_prompt(chat_id: i64, generation: u64, kind: WizardStepKind) -> OutgoingMessage {
    let header = wizard_header(kind);
    let (text, mut buttons) = match kind {
        WizardStepKind::PurityThreshold => {
            let choices: Vec<Button> = THRESHOLD_CHOICES
                .iter()
                .map(|t| {
                    let label = match t {
                        ScoreThreshold::AtMost(limit) => format!("{limit}%"),
                        ScoreThreshold::Unlimited => "Unlimited".to_string(),
                    };
                    automation(label, AutomationKind::Threshold(*t), generation)
                })
                .collect();
            (
                format!("{header}Choose the purity threshold (lower is cleaner):"),
                choices.chunks(3).map(<[Button]>::to_vec).collect(),
            )
        }
        WizardStepKind::OriginRequirement => (
            format!("{header}Choose the origin requirement:"),
            vec![
                vec![
                    automation(
                        "🏠 Native IP",
                        AutomationKind::Origin(OriginRequirement::Required(
                            crate::classify::ORIGIN_NATIVE.to_string(),
                        )),
                        generation,
                    ),
                    automation(
                        "📡 Non-native IP",
                        AutomationKind::Origin(OriginRequirement::Required(
                            crate::classify::ORIGIN_NON_NATIVE.to_string(),
                        )),
                        generation,
                    ),
                ],
                vec![automation(
                    "🔓 Any",
                    AutomationKind::Origin(OriginRequirement::Any),
                    generation,
                )],
            ],
        ),
        WizardStepKind::MatchMode => (
            format!("{header}Choose the match mode:"),
            vec![
                vec![automation(
                    "✅ Meet all conditions",
                    AutomationKind::Mode(MatchMode::All),
                    generation,
                )],
                vec![automation(
                    "☑️ Meet any condition",
                    AutomationKind::Mode(MatchMode::Any),
                    generation,
                )],
            ],
        ),
        WizardStepKind::Interval => (
            format!(
                "{header}Enter the wait between attempts (seconds):\n\n\
                 • a single number: `200`\n\
                 • or a range: `200-300` (random wait)\n\n\
                 _Just send it as a message_"
            ),
            Vec::new(),
        ),
        WizardStepKind::Account | WizardStepKind::Confirm => (header, Vec::new()),
    };
    buttons.push(cancel_row(generation));
    OutgoingMessage::markdown(chat_id, text).with_buttons(buttons)
}

/// Summary of a completed wizard with start/cancel buttons.
pub fn wizard_confirm(chat_id: i64, generation: u64, request: &LaunchRequest) -> OutgoingMessage {
    let text = format!(
        "✅ *Confirm automatic acquisition*\n\n\
         📍 *Account:* {}\n\
         📊 *Purity:* {}\n\
         🌐 *Origin:* {}\n\
         🔀 *Match mode:* {}\n\
         ⏱ *Interval:* {}\n\n\
         Start now?",
        escape_markdown(&request.account),
        request.policy.threshold,
        escape_markdown(&request.policy.origin.to_string()),
        request.policy.mode,
        request.interval,
    );
    OutgoingMessage::markdown(chat_id, text).with_buttons(vec![
        vec![automation("▶️ Start", AutomationKind::Confirm, generation)],
        cancel_row(generation),
    ])
}

/// Reconciliation prompt when the target account already holds addresses.
pub fn existing_resources(
    chat_id: i64,
    generation: u64,
    account: &str,
    resources: &[Resource],
) -> OutgoingMessage {
    let mut text = format!(
        "⚠️ *Account \\[{}] already has {} IP(s):*\n\n",
        escape_markdown(account),
        resources.len()
    );
    for r in resources {
        let _ = writeln!(text, "• `{}`", r.address);
    }
    text.push_str("\nChoose an action:");
    OutgoingMessage::markdown(chat_id, text).with_buttons(vec![
        vec![automation("🗑 Delete all, then start", AutomationKind::Purge, generation)],
        vec![automation("▶️ Keep and start", AutomationKind::Keep, generation)],
        cancel_row(generation),
    ])
}

pub fn task_started(chat_id: i64, account: &str) -> OutgoingMessage {
    OutgoingMessage::markdown(
        chat_id,
        format!(
            "🚀 *Automation started*\n\nAccount: {}\nUse /stopauto to stop",
            escape_markdown(account)
        ),
    )
}

pub fn task_stopped(chat_id: i64, status: &TaskStatus) -> OutgoingMessage {
    OutgoingMessage::plain(
        chat_id,
        format!(
            "⏹ Stopped automatic acquisition on [{}] after {} attempt(s)",
            status.request.account, status.attempts
        ),
    )
}

/// Sent once when the classifier keeps failing and addresses stop being kept.
pub fn classifier_unavailable(chat_id: i64, failures: u32) -> OutgoingMessage {
    OutgoingMessage::plain(
        chat_id,
        format!(
            "⚠️ Purity check failed {failures} times in a row. Addresses that cannot be checked are now deleted until the checker recovers"
        ),
    )
}

/// Match notification sent by the controller.
pub fn match_found(chat_id: i64, classification: &Classification, attempts: u32) -> OutgoingMessage {
    let text = format!(
        "🎉 *Found a matching IP!*\n\nIP: `{}`\n\n{}\n🔢 *Attempts:* {attempts}",
        classification.address,
        escape_markdown_summary(classification)
    );
    OutgoingMessage::markdown(chat_id, text)
}
