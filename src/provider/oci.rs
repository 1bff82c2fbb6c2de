//! OCI Core Services client for reserved public IPs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::config::AccountConfig;
use crate::error::ProviderError;
use crate::provider::signer::{RequestSigner, content_sha256, http_date};
use crate::provider::{Provisioner, Resource, ResourceState};

const API_VERSION: &str = "20160918";
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIp {
    id: String,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    lifecycle_state: String,
}

impl From<PublicIp> for Resource {
    fn from(ip: PublicIp) -> Self {
        Resource {
            id: ip.id,
            address: ip.ip_address.unwrap_or_default(),
            display_name: ip.display_name.unwrap_or_default(),
            state: ResourceState::from_provider(&ip.lifecycle_state),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Reserved-IP operations for one OCI account.
pub struct OciClient {
    http: reqwest::Client,
    signer: RequestSigner,
    account: String,
    region: String,
    compartment_id: String,
    host: String,
}

impl OciClient {
    pub fn new(account: &AccountConfig) -> Result<Self, ProviderError> {
        let key_id = format!(
            "{}/{}/{}",
            account.tenancy, account.user, account.fingerprint
        );
        let signer = RequestSigner::from_file(key_id, &account.key_file)?;
        Self::with_signer(account, signer)
    }

    pub fn with_signer(account: &AccountConfig, signer: RequestSigner) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                account: account.name.clone(),
                operation: "init",
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            signer,
            account: account.name.clone(),
            region: account.region.clone(),
            compartment_id: account.compartment_id.clone(),
            host: format!("iaas.{}.oraclecloud.com", account.region),
        })
    }

    fn request_failed(&self, operation: &'static str, reason: impl ToString) -> ProviderError {
        ProviderError::RequestFailed {
            account: self.account.clone(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Send a signed request and fail on non-2xx statuses.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("https://{}{}", self.host, path_and_query);
        let date = http_date(chrono::Utc::now());
        let body = body
            .map(|b| serde_json::to_vec(&b))
            .transpose()
            .map_err(|e| self.request_failed(operation, e))?;

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("date", &date)
            .header("accept", "application/json");

        let authorization = match &body {
            Some(bytes) => {
                let length = bytes.len().to_string();
                let digest = content_sha256(bytes);
                let headers = [
                    ("date", date.as_str()),
                    ("host", self.host.as_str()),
                    ("content-length", length.as_str()),
                    ("content-type", "application/json"),
                    ("x-content-sha256", digest.as_str()),
                ];
                let auth =
                    self.signer
                        .authorization(method.as_str(), path_and_query, &headers, true);
                request = request
                    .header("content-type", "application/json")
                    .header("x-content-sha256", digest)
                    .header("opc-retry-token", uuid::Uuid::new_v4().simple().to_string())
                    .body(bytes.clone());
                auth
            }
            None => {
                let headers = [("date", date.as_str()), ("host", self.host.as_str())];
                self.signer
                    .authorization(method.as_str(), path_and_query, &headers, false)
            }
        };

        tracing::debug!(account = %self.account, %method, path = %path_and_query, "OCI request");
        let response = request
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| self.request_failed(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiError>(&text) {
            Ok(err) if !err.message.is_empty() => format!("{}: {}", err.code, err.message),
            _ => text,
        };
        Err(ProviderError::Status {
            account: self.account.clone(),
            operation,
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                operation,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Provisioner for OciClient {
    fn account_name(&self) -> &str {
        &self.account
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn create(&self, display_name: &str) -> Result<Resource, ProviderError> {
        let body = json!({
            "compartmentId": self.compartment_id,
            "lifetime": "RESERVED",
            "displayName": display_name,
        });
        let path = format!("/{API_VERSION}/publicIps");
        let response = self.send("create", Method::POST, &path, Some(body)).await?;
        let ip: PublicIp = Self::decode("create", response).await?;
        tracing::info!(account = %self.account, id = %ip.id, "Reserved IP created");
        Ok(ip.into())
    }

    async fn get(&self, id: &str) -> Result<Resource, ProviderError> {
        let path = format!("/{API_VERSION}/publicIps/{}", urlencoding::encode(id));
        let response = self.send("get", Method::GET, &path, None).await?;
        let ip: PublicIp = Self::decode("get", response).await?;
        Ok(ip.into())
    }

    async fn list(&self) -> Result<Vec<Resource>, ProviderError> {
        let mut resources = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut path = format!(
                "/{API_VERSION}/publicIps?scope=REGION&lifetime=RESERVED&compartmentId={}",
                urlencoding::encode(&self.compartment_id)
            );
            if let Some(token) = &page {
                path.push_str("&page=");
                path.push_str(&urlencoding::encode(token));
            }

            let response = self.send("list", Method::GET, &path, None).await?;
            let next = response
                .headers()
                .get("opc-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let items: Vec<PublicIp> = Self::decode("list", response).await?;
            resources.extend(items.into_iter().map(Resource::from));

            match next {
                Some(token) if !token.is_empty() => page = Some(token),
                _ => break,
            }
        }
        Ok(resources)
    }

    async fn delete(&self, id: &str) -> Result<(), ProviderError> {
        let path = format!("/{API_VERSION}/publicIps/{}", urlencoding::encode(id));
        self.send("delete", Method::DELETE, &path, None).await?;
        tracing::info!(account = %self.account, %id, "Reserved IP deleted");
        Ok(())
    }
}
