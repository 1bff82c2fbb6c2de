//! Telegram Bot API channel (long polling).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{
    Button, Channel, EventStream, IncomingEvent, Notifier, OutgoingMessage,
};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "telegram";
/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Extra time on top of the long-poll timeout before the HTTP call gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

impl Update {
    fn into_event(self) -> Option<IncomingEvent> {
        if let Some(cb) = self.callback_query {
            let data = cb.data?;
            let chat_id = cb.message.map(|m| m.chat.id).unwrap_or(cb.from.id);
            return Some(IncomingEvent::callback(chat_id, cb.from.id, cb.id, data));
        }
        let message = self.message?;
        let sender = message.from?;
        let text = message.text?;
        Some(IncomingEvent::text(message.chat.id, sender.id, text))
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboard<'a>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard<'a> {
    inline_keyboard: Vec<Vec<KeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct KeyboardButton<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl<'a> From<&'a Button> for KeyboardButton<'a> {
    fn from(button: &'a Button) -> Self {
        match button {
            Button::Callback { label, data } => Self {
                text: label,
                callback_data: Some(data),
                url: None,
            },
            Button::Link { label, url } => Self {
                text: label,
                callback_data: None,
                url: Some(url),
            },
        }
    }
}

fn send_payload(message: &OutgoingMessage, markdown: bool) -> SendMessage<'_> {
    let reply_markup = (!message.buttons.is_empty()).then(|| InlineKeyboard {
        inline_keyboard: message
            .buttons
            .iter()
            .map(|row| row.iter().map(KeyboardButton::from).collect())
            .collect(),
    });
    SendMessage {
        chat_id: message.chat_id,
        text: &message.text,
        parse_mode: markdown.then_some("Markdown"),
        disable_web_page_preview: true,
        reply_markup,
    }
}

/// Raw Bot API access shared by the channel and its poll task.
struct BotApi {
    http: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl BotApi {
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token.expose_secret(), method)
    }

    /// Call a Bot API method. Errors never carry the URL, which holds the token.
    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.without_url()))?;

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.without_url()))?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(ChannelError::InvalidResponse {
                name: CHANNEL_NAME.to_string(),
                reason: format!(
                    "{} failed: {}",
                    method,
                    parsed.description.unwrap_or_else(|| "no description".to_string())
                ),
            }),
        }
    }
}

/// Telegram channel for the bot's single operator.
pub struct TelegramChannel {
    api: Arc<BotApi>,
    poll_timeout: Duration,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            api: Arc::new(BotApi {
                http,
                token: config.token.clone(),
                base_url: config.api_base_url.clone(),
            }),
            poll_timeout: config.poll_timeout,
        })
    }

    /// Bot username, used to verify the token.
    pub async fn get_me(&self) -> Result<String, ChannelError> {
        let me: User = self
            .api
            .call("getMe", &serde_json::json!({}), SEND_TIMEOUT)
            .await?;
        Ok(me.username.unwrap_or_else(|| me.id.to_string()))
    }

    async fn send_message(&self, message: &OutgoingMessage, markdown: bool) -> Result<(), ChannelError> {
        let payload = send_payload(message, markdown);
        let _: serde_json::Value = self.api.call("sendMessage", &payload, SEND_TIMEOUT).await?;
        Ok(())
    }
}

async fn poll_loop(api: Arc<BotApi>, poll_timeout: Duration, tx: mpsc::Sender<IncomingEvent>) {
    let mut offset: i64 = 0;
    let request_timeout = poll_timeout + POLL_GRACE;
    tracing::info!("Telegram polling started");

    loop {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        let result: Result<Vec<Update>, ChannelError> = tokio::select! {
            _ = tx.closed() => break,
            r = api.call("getUpdates", &body, request_timeout) => r,
        };

        let updates = match result {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Telegram poll failed: {}", e);
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(event) = update.into_event()
                && tx.send(event).await.is_err()
            {
                tracing::debug!("Event receiver dropped");
                return;
            }
        }
    }
    tracing::info!("Telegram polling stopped");
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        if !message.markdown {
            return self.send_message(&message, false).await;
        }
        match self.send_message(&message, true).await {
            Err(ChannelError::InvalidResponse { reason, .. }) if reason.contains("can't parse entities") => {
                tracing::warn!("Markdown rejected, resending as plain text: {}", reason);
                self.send_message(&message, false).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(poll_loop(Arc::clone(&self.api), self.poll_timeout, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        let _: bool = self.api.call("answerCallbackQuery", &body, SEND_TIMEOUT).await?;
        Ok(())
    }

    async fn register_commands(&self, commands: &[(&str, &str)]) -> Result<(), ChannelError> {
        let commands: Vec<serde_json::Value> = commands
            .iter()
            .map(|(command, description)| {
                serde_json::json!({ "command": command, "description": description })
            })
            .collect();
        let _: bool = self
            .api
            .call("setMyCommands", &serde_json::json!({ "commands": commands }), SEND_TIMEOUT)
            .await?;
        tracing::info!("Bot command menu configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn converts_text_and_callback_updates() {
        let raw = r#"[
            {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 5}, "from": {"id": 7, "is_bot": false}, "text": "/listip"}},
            {"update_id": 11, "callback_query": {"id": "cb1", "from": {"id": 7}, "message": {"message_id": 2, "chat": {"id": 5}}, "data": "refresh:1"}},
            {"update_id": 12, "message": {"message_id": 3, "chat": {"id": 5}, "from": {"id": 7}}}
        ]"#;
        let updates: Vec<Update> = serde_json::from_str(raw).unwrap();
        let events: Vec<IncomingEvent> = updates.into_iter().filter_map(Update::into_event).collect();
        assert_eq!(
            events,
            vec![
                IncomingEvent::text(5, 7, "/listip"),
                IncomingEvent::callback(5, 7, "cb1", "refresh:1"),
            ]
        );
    }

    #[test]
    fn serializes_inline_keyboard() {
        let message = OutgoingMessage::markdown(5, "*hi*").with_buttons(vec![vec![
            Button::callback("🔄 Refresh", "refresh:1"),
            Button::link("Open", "https://ippure.com/?ip=1.2.3.4"),
        ]]);
        let value = serde_json::to_value(send_payload(&message, true)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "chat_id": 5,
                "text": "*hi*",
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
                "reply_markup": {"inline_keyboard": [[
                    {"text": "🔄 Refresh", "callback_data": "refresh:1"},
                    {"text": "Open", "url": "https://ippure.com/?ip=1.2.3.4"}
                ]]}
            })
        );

        let plain = serde_json::to_value(send_payload(&OutgoingMessage::plain(5, "x"), false)).unwrap();
        assert!(plain.get("parse_mode").is_none());
        assert!(plain.get("reply_markup").is_none());
    }

    #[test]
    fn error_responses_keep_description() {
        let raw = r#"{"ok": false, "error_code": 400, "description": "Bad Request: can't parse entities"}"#;
        let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(raw).unwrap();
        assert!(!parsed.ok);
        assert!(parsed.result.is_none());
        assert_eq!(
            parsed.description.as_deref(),
            Some("Bad Request: can't parse entities")
        );
    }
}
