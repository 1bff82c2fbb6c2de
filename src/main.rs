use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ipreserve::agent::{Agent, AgentDeps};
use ipreserve::channels::TelegramChannel;
use ipreserve::classify::IppureClassifier;
use ipreserve::cli::{Cli, Command, run_check_ip, run_doctor_command};
use ipreserve::config::Config;
use ipreserve::provider::ProviderRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_bot(config_path).await,
        Command::CheckIp { ip } => run_check_ip(config_path, &ip).await,
        Command::Doctor { strict } => run_doctor_command(config_path, strict).await,
    }
}

/// `RUST_LOG` wins; otherwise info for this crate. `IPRESERVE_LOG_FORMAT=json`
/// switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ipreserve=info"));
    let json = std::env::var("IPRESERVE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn run_bot(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    let providers = ProviderRegistry::from_accounts(&config.accounts);
    tracing::info!(
        loaded = providers.len(),
        configured = config.accounts.len(),
        "Accounts ready"
    );

    let channel = Arc::new(TelegramChannel::new(&config.telegram)?);
    let classifier = Arc::new(IppureClassifier::new(&config.classifier)?);

    let agent = Agent::new(AgentDeps {
        channel,
        providers,
        classifier,
        classifier_config: config.classifier.clone(),
        automation: config.automation.clone(),
        admin_id: config.telegram.admin_id,
    })?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    agent.run(shutdown).await?;
    tracing::info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
