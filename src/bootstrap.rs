//! Bootstrap helpers for ipreserve.
//!
//! Secrets such as the bot token can live in `~/.ipreserve/.env` (standard
//! dotenvy format) instead of the config file.

use std::path::PathBuf;

/// Base directory: `~/.ipreserve`.
pub fn ipreserve_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ipreserve")
}

/// Path to the ipreserve-specific `.env` file: `~/.ipreserve/.env`.
pub fn ipreserve_env_path() -> PathBuf {
    ipreserve_dir().join(".env")
}

/// Load `./.env`, then `~/.ipreserve/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.ipreserve/.env`
pub fn load_ipreserve_env() {
    let _ = dotenvy::dotenv();

    let path = ipreserve_env_path();
    if path.exists() {
        match dotenvy::from_path(&path) {
            Ok(()) => tracing::debug!("Loaded env from {}", path.display()),
            Err(e) => tracing::warn!("Failed to load {}: {}", path.display(), e),
        }
    }
}
