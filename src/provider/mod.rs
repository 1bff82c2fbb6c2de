//! Provisioning collaborator: reserved public addresses per cloud account.

mod oci;
mod signer;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::error::ProviderError;

pub use self::oci::OciClient;
pub use self::signer::RequestSigner;

/// Lifecycle of a provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Provisioning,
    Available,
    Deleted,
    /// Any other provider state (e.g. ASSIGNED); not acted upon.
    Other(String),
}

impl ResourceState {
    pub fn from_provider(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "PROVISIONING" => Self::Provisioning,
            "AVAILABLE" => Self::Available,
            "TERMINATED" | "DELETED" => Self::Deleted,
            _ => Self::Other(label.to_string()),
        }
    }
}

/// A reserved address owned by one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: String,
    /// Empty while the provider has not assigned one yet.
    pub address: String,
    pub display_name: String,
    pub state: ResourceState,
}

/// Cloud operations the bot needs for one account.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn account_name(&self) -> &str;

    fn region(&self) -> &str;

    async fn create(&self, display_name: &str) -> Result<Resource, ProviderError>;

    async fn get(&self, id: &str) -> Result<Resource, ProviderError>;

    async fn list(&self) -> Result<Vec<Resource>, ProviderError>;

    async fn delete(&self, id: &str) -> Result<(), ProviderError>;

    /// Poll `get` every `poll` until the resource is available or `timeout`
    /// elapses. A failed `get` ends the wait.
    async fn wait_ready(
        &self,
        id: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Resource, ProviderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let resource = self.get(id).await?;
            if resource.state == ResourceState::Available {
                return Ok(resource);
            }
            if tokio::time::Instant::now() + poll > deadline {
                return Err(ProviderError::Timeout {
                    operation: "wait_ready",
                    timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Find a resource by its address.
    async fn find_by_address(&self, address: &str) -> Result<Resource, ProviderError> {
        self.list()
            .await?
            .into_iter()
            .find(|r| r.address == address)
            .ok_or_else(|| ProviderError::AddressNotFound(address.to_string()))
    }
}

/// Run a provider call under a deadline.
pub async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout { operation, timeout }),
    }
}

/// Display name for resources created by the bot: `{prefix}-{unix seconds}`.
pub fn display_name(prefix: &str) -> String {
    format!("{}-{}", prefix, chrono::Utc::now().timestamp())
}

/// Provisioners for every configured account, in configuration order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<Arc<dyn Provisioner>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build OCI clients for all accounts. Accounts whose key cannot be
    /// loaded are skipped with a warning.
    pub fn from_accounts(accounts: &[AccountConfig]) -> Self {
        let mut registry = Self::new();
        for account in accounts {
            match OciClient::new(account) {
                Ok(client) => {
                    tracing::info!(account = %account.name, region = %account.region, "Loaded account");
                    registry.register(Arc::new(client));
                }
                Err(e) => {
                    tracing::warn!(account = %account.name, "Skipping account: {}", e);
                }
            }
        }
        registry
    }

    pub fn register(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.entries.push(provisioner);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provisioner>> {
        self.entries
            .iter()
            .find(|p| p.account_name() == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|p| p.account_name() == name)
    }

    pub fn first(&self) -> Option<Arc<dyn Provisioner>> {
        self.entries.first().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provisioner>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Becomes available after `ready_after` polls.
    struct SlowProvisioner {
        ready_after: usize,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for SlowProvisioner {
        fn account_name(&self) -> &str {
            "slow"
        }

        fn region(&self) -> &str {
            "test-1"
        }

        async fn create(&self, _display_name: &str) -> Result<Resource, ProviderError> {
            unreachable!()
        }

        async fn get(&self, id: &str) -> Result<Resource, ProviderError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let state = if n >= self.ready_after {
                ResourceState::Available
            } else {
                ResourceState::Provisioning
            };
            Ok(Resource {
                id: id.to_string(),
                address: "198.51.100.4".to_string(),
                display_name: "auto".to_string(),
                state,
            })
        }

        async fn list(&self) -> Result<Vec<Resource>, ProviderError> {
            Ok(vec![self.get("ocid1.publicip.x").await?])
        }

        async fn delete(&self, _id: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_polls_until_available() {
        let p = SlowProvisioner {
            ready_after: 3,
            polls: AtomicUsize::new(0),
        };
        let r = p
            .wait_ready("ocid1.publicip.x", Duration::from_secs(60), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(r.state, ResourceState::Available);
        assert_eq!(p.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_times_out() {
        let p = SlowProvisioner {
            ready_after: usize::MAX,
            polls: AtomicUsize::new(0),
        };
        let err = p
            .wait_ready("ocid1.publicip.x", Duration::from_secs(10), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { operation: "wait_ready", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let err = bounded("create", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProviderError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "create timed out after 1s");
    }

    #[tokio::test]
    async fn find_by_address_reports_missing() {
        let p = SlowProvisioner {
            ready_after: 1,
            polls: AtomicUsize::new(0),
        };
        assert!(p.find_by_address("198.51.100.4").await.is_ok());
        assert!(matches!(
            p.find_by_address("203.0.113.1").await,
            Err(ProviderError::AddressNotFound(_))
        ));
    }

    #[test]
    fn maps_provider_states() {
        assert_eq!(ResourceState::from_provider("AVAILABLE"), ResourceState::Available);
        assert_eq!(ResourceState::from_provider("provisioning"), ResourceState::Provisioning);
        assert_eq!(ResourceState::from_provider("TERMINATED"), ResourceState::Deleted);
        assert_eq!(
            ResourceState::from_provider("ASSIGNED"),
            ResourceState::Other("ASSIGNED".to_string())
        );
    }
}
