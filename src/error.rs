//! Error types for ipreserve.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid response from channel {name}: {reason}")]
    InvalidResponse { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Provisioning collaborator errors. Never fatal to the controller.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("[{account}] {operation} failed: {reason}")]
    RequestFailed {
        account: String,
        operation: &'static str,
        reason: String,
    },

    #[error("[{account}] {operation} returned HTTP {status}: {message}")]
    Status {
        account: String,
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Failed to load signing key {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("Invalid response for {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("Address not found: {0}")]
    AddressNotFound(String),
}

/// Classification collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classification request failed: {0}")]
    RequestFailed(String),

    #[error("Classifier returned HTTP {status}")]
    Status { status: u16 },

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unreadable classification report: {0}")]
    InvalidReport(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        ClassifierError::RequestFailed(e.to_string())
    }
}

/// Operator input that was rejected. Surfaced immediately, no state mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid number: '{token}'. Enter 200 or 200-300")]
    InvalidInterval { token: String },

    #[error("Interval must be at least {floor} seconds (got {min})")]
    IntervalBelowFloor { min: u64, floor: u64 },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("No automation setup in progress. Start with /autoip")]
    NoActiveWizard,

    #[error("This menu has expired. Start again with /autoip")]
    StaleCallback,

    #[error("Unexpected input at step {step}: expected {expected}")]
    UnexpectedInput {
        step: u8,
        expected: &'static str,
    },

    #[error("Malformed button data: {0}")]
    MalformedCallback(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
}

/// Session-level conflicts around the single automation task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("An automation task is already running on [{account}]. Use /stopauto first")]
    TaskAlreadyRunning { account: String },

    #[error("The automation task on [{account}] is still stopping. Try again in a moment")]
    TaskStopping { account: String },

    #[error("No automation task is running")]
    NoRunningTask,

    #[error("No confirmed automation is waiting to start. Start again with /autoip")]
    NoPendingLaunch,
}

pub type Result<T> = std::result::Result<T, Error>;
