//! ipreserve: a Telegram bot that manages OCI reserved public IPs and can
//! keep creating them until one classifies as clean.

pub mod agent;
pub mod bootstrap;
pub mod channels;
pub mod classify;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod interval;
pub mod policy;
pub mod provider;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod settings;
pub mod wizard;

pub use error::{Error, Result};
