//! Command-line interface.

pub mod doctor;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::classify::{Classifier, IppureClassifier};
use crate::config::ClassifierConfig;
use crate::settings::Settings;

pub use self::doctor::run_doctor_command;

/// Telegram-operated OCI reserved-IP manager.
#[derive(Parser, Debug)]
#[command(name = "ipreserve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (TOML, or the legacy conf format for other extensions)
    #[arg(short, long, global = true, env = "IPRESERVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the bot (default)
    Run,

    /// Classify one address and print the report
    CheckIp {
        /// IPv4 or IPv6 address
        ip: String,
    },

    /// Check configuration and external dependencies
    Doctor {
        /// Exit non-zero when any check fails
        #[arg(long)]
        strict: bool,
    },
}

/// One-off classification. Only the classifier settings are needed, so a
/// config without Telegram or accounts still works.
pub async fn run_check_ip(config_path: Option<&Path>, ip: &str) -> anyhow::Result<()> {
    let address: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid IP address: {ip}"))?;

    crate::bootstrap::load_ipreserve_env();
    let settings = Settings::load(config_path)?;
    let config = ClassifierConfig::resolve(&settings)?;
    let classifier = IppureClassifier::new(&config)?;

    println!("Checking {address} ...");
    let classification = tokio::time::timeout(
        config.manual_timeout,
        classifier.classify(&address.to_string()),
    )
    .await
    .map_err(|_| anyhow::anyhow!("classification timed out after {:?}", config.manual_timeout))??;

    println!();
    println!("  IP:      {}", classification.address);
    println!(
        "  Purity:  {} ({})",
        classification.score_label(),
        classification.level
    );
    println!("  Type:    {}", classification.category);
    println!(
        "  Origin:  {}",
        crate::classify::origin_display(&classification.origin)
    );
    println!("  Report:  {}", config.report_link(&classification.address));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_global_config() {
        let cli = Cli::try_parse_from(["ipreserve", "check-ip", "8.8.8.8", "-c", "/tmp/conf"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/conf")));
        assert!(matches!(cli.command, Some(Command::CheckIp { ref ip }) if ip == "8.8.8.8"));

        let cli = Cli::try_parse_from(["ipreserve", "doctor", "--strict"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Doctor { strict: true })));

        let cli = Cli::try_parse_from(["ipreserve"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[tokio::test]
    async fn check_ip_rejects_invalid_address() {
        let err = run_check_ip(None, "not-an-ip").await.unwrap_err();
        assert!(err.to_string().contains("invalid IP address"));
    }
}
