//! Chat channels: outgoing notifications and the incoming event stream.

pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

pub use self::telegram::TelegramChannel;

/// Stream of incoming events from a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = IncomingEvent> + Send>>;

/// One event received from the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A plain message or a `/command`.
    Text(String),
    /// An inline button press.
    Callback { id: String, data: String },
}

impl IncomingEvent {
    pub fn text(chat_id: i64, sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id,
            kind: EventKind::Text(text.into()),
        }
    }

    pub fn callback(
        chat_id: i64,
        sender_id: i64,
        id: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            chat_id,
            sender_id,
            kind: EventKind::Callback {
                id: id.into(),
                data: data.into(),
            },
        }
    }
}

/// Inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Callback { label: String, data: String },
    Link { label: String, url: String },
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Link {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Callback { label, .. } | Self::Link { label, .. } => label,
        }
    }
}

/// A message to send to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    /// Render `text` as Telegram legacy Markdown.
    pub markdown: bool,
    /// Inline keyboard rows.
    pub buttons: Vec<Vec<Button>>,
}

impl OutgoingMessage {
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            markdown: false,
            buttons: Vec::new(),
        }
    }

    pub fn markdown(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            markdown: true,
            ..Self::plain(chat_id, text)
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }

    /// Every callback data string on the keyboard, row by row.
    pub fn callback_data(&self) -> Vec<&str> {
        self.buttons
            .iter()
            .flatten()
            .filter_map(|b| match b {
                Button::Callback { data, .. } => Some(data.as_str()),
                Button::Link { .. } => None,
            })
            .collect()
    }
}

/// Sends messages to the operator. Used by the controller and reconciliation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError>;
}

/// A bidirectional chat channel.
#[async_trait]
pub trait Channel: Notifier {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Acknowledge a button press so the client stops showing a spinner.
    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError>;

    /// Publish the command menu as `(command, description)` pairs.
    async fn register_commands(&self, commands: &[(&str, &str)]) -> Result<(), ChannelError>;
}

/// Send and log failures. Notifications never abort the caller.
pub async fn notify(notifier: &dyn Notifier, message: OutgoingMessage) {
    if let Err(e) = notifier.send(message).await {
        tracing::warn!("Failed to deliver notification: {}", e);
    }
}
