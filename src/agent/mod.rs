//! The bot's event loop.
//!
//! Events are handled one at a time. Only the automation controller runs
//! in the background; everything else completes before the next event is
//! read.

mod automation;
mod commands;
pub mod router;

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::channels::{Channel, EventKind, IncomingEvent, Notifier, OutgoingMessage, notify};
use crate::classify::Classifier;
use crate::config::{AutomationConfig, ClassifierConfig};
use crate::error::{ConfigError, Error};
use crate::provider::{Provisioner, ProviderRegistry};
use crate::session::SessionState;

use self::router::{CallbackAction, Input, parse_callback, parse_input};

/// Commands published in the client's command menu.
pub const COMMAND_MENU: &[(&str, &str)] = &[
    ("accounts", "List accounts"),
    ("use", "Switch account"),
    ("newip", "Create a reserved IP"),
    ("listip", "List reserved IPs"),
    ("delip", "Delete a reserved IP"),
    ("checkip", "Check IP purity"),
    ("autoip", "Acquire an IP automatically"),
    ("stopauto", "Stop automatic acquisition"),
    ("help", "Help"),
];

/// Everything the agent needs, assembled by the binary or by tests.
pub struct AgentDeps {
    pub channel: Arc<dyn Channel>,
    pub providers: ProviderRegistry,
    pub classifier: Arc<dyn Classifier>,
    pub classifier_config: ClassifierConfig,
    pub automation: AutomationConfig,
    pub admin_id: i64,
}

/// Routes chat events to manual commands and the automation flow.
pub struct Agent {
    channel: Arc<dyn Channel>,
    providers: ProviderRegistry,
    classifier: Arc<dyn Classifier>,
    classifier_config: ClassifierConfig,
    automation: AutomationConfig,
    admin_id: i64,
    session: Arc<SessionState>,
}

impl Agent {
    /// The first usable account becomes the current one.
    pub fn new(deps: AgentDeps) -> Result<Self, Error> {
        let first = deps.providers.first().ok_or_else(|| ConfigError::MissingRequired {
            key: "accounts".to_string(),
            hint: "No usable OCI account: check key files and account settings".to_string(),
        })?;
        let session = Arc::new(SessionState::new(first.account_name()));

        Ok(Self {
            channel: deps.channel,
            providers: deps.providers,
            classifier: deps.classifier,
            classifier_config: deps.classifier_config,
            automation: deps.automation,
            admin_id: deps.admin_id,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Process events until the stream ends or `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        if let Err(e) = self.channel.register_commands(COMMAND_MENU).await {
            tracing::warn!("Failed to register command menu: {}", e);
        }

        let mut events = self.channel.start().await?;
        tracing::info!(channel = %self.channel.name(), "Bot is running, waiting for commands");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!("Event stream closed");
                        break;
                    }
                },
            }
        }

        self.session.shutdown().await;
        Ok(())
    }

    /// Handle a single event to completion.
    pub async fn handle_event(&self, event: IncomingEvent) {
        match event.kind {
            EventKind::Text(text) => {
                tracing::debug!(sender = event.sender_id, "Message: {}", text);
                if event.sender_id != self.admin_id {
                    self.reply(
                        event.chat_id,
                        format!("⛔ Unauthorized\nYour ID: {}", event.sender_id),
                    )
                    .await;
                    return;
                }
                match parse_input(&text) {
                    Input::Command(command) => {
                        self.handle_command(event.chat_id, event.sender_id, command)
                            .await
                    }
                    Input::Text(text) => self.handle_text(event.chat_id, &text).await,
                }
            }
            EventKind::Callback { id, data } => {
                if event.sender_id != self.admin_id {
                    tracing::debug!(sender = event.sender_id, "Ignoring callback from non-admin");
                    return;
                }
                tracing::debug!("Callback: {}", data);
                if let Err(e) = self.channel.answer_callback(&id).await {
                    tracing::warn!("Failed to acknowledge callback: {}", e);
                }
                match parse_callback(&data) {
                    Ok(action) => self.handle_callback(event.chat_id, action).await,
                    Err(e) => self.reply(event.chat_id, format!("⚠️ {e}")).await,
                }
            }
        }
    }

    async fn handle_callback(&self, chat_id: i64, action: CallbackAction) {
        match action {
            CallbackAction::Use(name) => self.use_account(chat_id, &name).await,
            CallbackAction::Delete(address) => self.delete_ip(chat_id, &address).await,
            CallbackAction::Check(address) => self.check_ip(chat_id, &address, true).await,
            CallbackAction::NewIp => self.new_ip(chat_id).await,
            CallbackAction::Refresh => self.list_ip(chat_id, None).await,
            CallbackAction::Automation(action) => self.handle_automation(chat_id, action).await,
        }
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.channel.clone()
    }

    async fn send(&self, message: OutgoingMessage) {
        notify(self.channel.as_ref(), message).await;
    }

    async fn reply(&self, chat_id: i64, text: impl Into<String>) {
        self.send(OutgoingMessage::plain(chat_id, text)).await;
    }

    /// `(name, region)` for every loaded account.
    fn account_choices(&self) -> Vec<(String, String)> {
        self.providers
            .iter()
            .map(|p| (p.account_name().to_string(), p.region().to_string()))
            .collect()
    }

    async fn current_provider(&self) -> Option<Arc<dyn Provisioner>> {
        let name = self.session.current_account().await;
        self.providers.get(&name)
    }
}
