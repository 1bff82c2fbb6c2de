//! Input routing: slash commands and inline-button callback data.
//!
//! Manual buttons use `{action}:{value}`. Automation buttons use
//! `autoip:{subaction}:{value}:{generation}`, where the trailing generation
//! identifies the wizard run the button was rendered for.

use crate::error::ValidationError;
use crate::policy::{MatchMode, OriginRequirement, ScoreThreshold};

/// A recognised slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Accounts,
    Use(Option<String>),
    NewIp,
    ListIp,
    DelIp(Option<String>),
    CheckIp(Option<String>),
    AutoIp,
    StopAuto,
    Id,
    Unknown(String),
}

/// What a text message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Text(String),
}

/// Classify a text message. `/cmd@botname arg` is accepted.
pub fn parse_input(content: &str) -> Input {
    let trimmed = content.trim();
    let Some(without_prefix) = trimmed.strip_prefix('/') else {
        return Input::Text(trimmed.to_string());
    };

    let mut parts = without_prefix.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::to_string);

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "accounts" => Command::Accounts,
        "use" => Command::Use(arg),
        "newip" => Command::NewIp,
        "listip" => Command::ListIp,
        "delip" => Command::DelIp(arg),
        "checkip" => Command::CheckIp(arg),
        "autoip" => Command::AutoIp,
        "stopauto" => Command::StopAuto,
        "id" => Command::Id,
        _ => Command::Unknown(name),
    };
    Input::Command(command)
}

/// Automation sub-actions carried in button data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationKind {
    Account(String),
    Threshold(ScoreThreshold),
    Origin(OriginRequirement),
    Mode(MatchMode),
    Confirm,
    Cancel,
    Purge,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationAction {
    pub kind: AutomationKind,
    pub generation: u64,
}

/// Parsed callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Use(String),
    Delete(String),
    Check(String),
    NewIp,
    Refresh,
    Automation(AutomationAction),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            Self::Use(name) => format!("use:{name}"),
            Self::Delete(address) => format!("del:{address}"),
            Self::Check(address) => format!("check:{address}"),
            Self::NewIp => "newip:1".to_string(),
            Self::Refresh => "refresh:1".to_string(),
            Self::Automation(AutomationAction { kind, generation }) => {
                let (sub, value) = match kind {
                    AutomationKind::Account(name) => ("account", name.clone()),
                    AutomationKind::Threshold(t) => ("threshold", t.token()),
                    AutomationKind::Origin(o) => ("origin", o.token().to_string()),
                    AutomationKind::Mode(m) => ("mode", m.token().to_string()),
                    AutomationKind::Confirm => ("confirm", String::new()),
                    AutomationKind::Cancel => ("cancel", String::new()),
                    AutomationKind::Purge => ("purge", String::new()),
                    AutomationKind::Keep => ("keep", String::new()),
                };
                format!("autoip:{sub}:{value}:{generation}")
            }
        }
    }
}

/// Parse callback data.
///
/// Automation data without a generation is treated as stale rather than
/// malformed, so buttons from an older message never act.
pub fn parse_callback(data: &str) -> Result<CallbackAction, ValidationError> {
    let malformed = || ValidationError::MalformedCallback(data.to_string());
    let (action, rest) = data.split_once(':').ok_or_else(malformed)?;

    match action {
        "use" if !rest.is_empty() => Ok(CallbackAction::Use(rest.to_string())),
        "del" if !rest.is_empty() => Ok(CallbackAction::Delete(rest.to_string())),
        "check" if !rest.is_empty() => Ok(CallbackAction::Check(rest.to_string())),
        "newip" => Ok(CallbackAction::NewIp),
        "refresh" => Ok(CallbackAction::Refresh),
        "autoip" => parse_automation(rest, data).map(CallbackAction::Automation),
        _ => Err(malformed()),
    }
}

fn parse_automation(rest: &str, data: &str) -> Result<AutomationAction, ValidationError> {
    let malformed = || ValidationError::MalformedCallback(data.to_string());
    let parts: Vec<&str> = rest.split(':').collect();
    let (sub, value, generation) = match parts.as_slice() {
        [sub, value, generation] => (*sub, *value, *generation),
        [_, _] | [_] => return Err(ValidationError::StaleCallback),
        _ => return Err(malformed()),
    };
    let generation: u64 = generation.parse().map_err(|_| malformed())?;

    let kind = match sub {
        "account" if !value.is_empty() => AutomationKind::Account(value.to_string()),
        "threshold" => AutomationKind::Threshold(ScoreThreshold::parse(value).ok_or_else(malformed)?),
        "origin" => AutomationKind::Origin(OriginRequirement::parse(value).ok_or_else(malformed)?),
        "mode" => AutomationKind::Mode(MatchMode::parse(value).ok_or_else(malformed)?),
        "confirm" => AutomationKind::Confirm,
        "cancel" => AutomationKind::Cancel,
        "purge" => AutomationKind::Purge,
        "keep" => AutomationKind::Keep,
        _ => return Err(malformed()),
    };
    Ok(AutomationAction { kind, generation })
}
