//! Pre-flight gate before an automation task starts.
//!
//! If the target account already holds reserved addresses the operator must
//! decide between deleting them first or keeping them. The purge itself
//! runs inside the background task so it can be cancelled like any other
//! phase.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channels::{Notifier, OutgoingMessage, notify};
use crate::error::ProviderError;
use crate::interval::{BackoffInterval, sleep_or_cancel};
use crate::provider::{Provisioner, Resource, bounded};

/// Result of the pre-flight listing.
#[derive(Debug)]
pub enum Preflight {
    /// Nothing to reconcile; start right away.
    Clear,
    /// The operator has to choose.
    Existing(Vec<Resource>),
    /// The listing failed; start as keep-and-start after warning.
    Unavailable(ProviderError),
}

/// List the account's resources under a deadline.
pub async fn preflight(provisioner: &dyn Provisioner, timeout: Duration) -> Preflight {
    match bounded("list", timeout, provisioner.list()).await {
        Ok(resources) if resources.is_empty() => Preflight::Clear,
        Ok(resources) => Preflight::Existing(resources),
        Err(e) => {
            tracing::warn!(account = %provisioner.account_name(), "Pre-flight listing failed: {}", e);
            Preflight::Unavailable(e)
        }
    }
}

/// The operator's reconciliation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileChoice {
    PurgeThenStart,
    KeepAndStart,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
    /// Cancellation was observed before every resource was handled.
    pub cancelled: bool,
}

/// Delete `resources` one by one with progress notifications.
///
/// Failures are reported and skipped. Between two deletions the purge waits
/// a sampled `interval`, racing `token`.
pub async fn purge(
    provisioner: &dyn Provisioner,
    notifier: &dyn Notifier,
    chat_id: i64,
    resources: &[Resource],
    interval: &BackoffInterval,
    delete_timeout: Duration,
    token: &CancellationToken,
) -> PurgeReport {
    let mut report = PurgeReport::default();
    let total = resources.len();

    for (i, resource) in resources.iter().enumerate() {
        if token.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        notify(
            notifier,
            OutgoingMessage::plain(
                chat_id,
                format!("🗑 Deleting ({}/{}): {}", i + 1, total, resource.address),
            ),
        )
        .await;

        match bounded("delete", delete_timeout, provisioner.delete(&resource.id)).await {
            Ok(()) => {
                tracing::info!(address = %resource.address, "Purged existing resource");
                report.deleted += 1;
            }
            Err(e) => {
                tracing::warn!(address = %resource.address, "Purge delete failed: {}", e);
                report.failed += 1;
                notify(
                    notifier,
                    OutgoingMessage::plain(chat_id, format!("⚠️ Delete failed: {e}")),
                )
                .await;
            }
        }

        if i + 1 < total {
            let pause = interval.sample();
            notify(
                notifier,
                OutgoingMessage::plain(
                    chat_id,
                    format!("⏳ Waiting {} seconds...", pause.as_secs()),
                ),
            )
            .await;
            if !sleep_or_cancel(pause, token).await {
                report.cancelled = true;
                return report;
            }
        }
    }

    notify(
        notifier,
        OutgoingMessage::plain(chat_id, "✅ All deleted, starting automatic acquisition..."),
    )
    .await;
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ChannelError;
    use crate::provider::ResourceState;

    struct Account {
        live: Mutex<Vec<Resource>>,
        fail_list: bool,
        fail_delete: &'static str,
    }

    impl Account {
        fn with(addresses: &[&str]) -> Self {
            Self {
                live: Mutex::new(addresses.iter().map(|a| resource(a)).collect()),
                fail_list: false,
                fail_delete: "",
            }
        }
    }

    fn resource(address: &str) -> Resource {
        Resource {
            id: format!("id-{address}"),
            address: address.to_string(),
            display_name: "old".to_string(),
            state: ResourceState::Available,
        }
    }

    #[async_trait]
    impl Provisioner for Account {
        fn account_name(&self) -> &str {
            "tokyo"
        }

        fn region(&self) -> &str {
            "ap-tokyo-1"
        }

        async fn create(&self, _display_name: &str) -> Result<Resource, ProviderError> {
            unreachable!()
        }

        async fn get(&self, _id: &str) -> Result<Resource, ProviderError> {
            unreachable!()
        }

        async fn list(&self) -> Result<Vec<Resource>, ProviderError> {
            if self.fail_list {
                return Err(ProviderError::AddressNotFound("listing".to_string()));
            }
            Ok(self.live.lock().unwrap().clone())
        }

        async fn delete(&self, id: &str) -> Result<(), ProviderError> {
            if id.ends_with(self.fail_delete) && !self.fail_delete.is_empty() {
                return Err(ProviderError::AddressNotFound(id.to_string()));
            }
            self.live.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Inbox(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Inbox {
        async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push(message.text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn preflight_outcomes() {
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            preflight(&Account::with(&[]), timeout).await,
            Preflight::Clear
        ));
        match preflight(&Account::with(&["198.51.100.1"]), timeout).await {
            Preflight::Existing(found) => assert_eq!(found, vec![resource("198.51.100.1")]),
            other => panic!("unexpected {other:?}"),
        }
        let broken = Account {
            fail_list: true,
            ..Account::with(&[])
        };
        assert!(matches!(
            preflight(&broken, timeout).await,
            Preflight::Unavailable(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_skips_failures_and_reports_progress() {
        let account = Account {
            fail_delete: "198.51.100.2",
            ..Account::with(&["198.51.100.1", "198.51.100.2", "198.51.100.3"])
        };
        let existing = account.list().await.unwrap();
        let inbox = Inbox::default();

        let report = purge(
            &account,
            &inbox,
            1,
            &existing,
            &BackoffInterval::new(10, 10),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            report,
            PurgeReport {
                deleted: 2,
                failed: 1,
                cancelled: false
            }
        );
        assert_eq!(account.list().await.unwrap(), vec![resource("198.51.100.2")]);
        let sent = inbox.0.lock().unwrap().clone();
        assert_eq!(sent[0], "🗑 Deleting (1/3): 198.51.100.1");
        assert_eq!(
            sent.iter().filter(|t| t.starts_with("⏳ Waiting 10 seconds")).count(),
            2
        );
        assert!(sent.iter().any(|t| t.starts_with("⚠️ Delete failed")));
        assert_eq!(
            sent.last().map(String::as_str),
            Some("✅ All deleted, starting automatic acquisition...")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn purge_stops_when_cancelled() {
        let account = Account::with(&["198.51.100.1", "198.51.100.2"]);
        let existing = account.list().await.unwrap();
        let inbox = Inbox::default();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let report = purge(
            &account,
            &inbox,
            1,
            &existing,
            &BackoffInterval::new(30, 30),
            Duration::from_secs(5),
            &token,
        )
        .await;

        assert!(report.cancelled);
        assert_eq!(report.deleted, 1);
        assert_eq!(account.list().await.unwrap().len(), 1);
    }
}
