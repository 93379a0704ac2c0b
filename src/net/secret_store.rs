//! Secret-store client (A5, §6): fetch a BMC password by host uuid, via an
//! opaque reference indirection. Never cached to disk.

use async_trait::async_trait;

use crate::core::error::{CoreError, CoreResult};

#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Fetch the current BMC password for a host. Two hops internally: get
    /// an opaque reference for `host_uuid`, then fetch the payload it names.
    async fn fetch_password(&self, host_uuid: &str) -> CoreResult<String>;
}

pub struct HttpSecretStoreClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpSecretStoreClient {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), auth_token: auth_token.into() }
    }
}

#[derive(serde::Deserialize)]
struct SecretRef {
    reference: String,
}

#[derive(serde::Deserialize)]
struct SecretPayload {
    payload: String,
}

#[async_trait]
impl SecretStoreClient for HttpSecretStoreClient {
    async fn fetch_password(&self, host_uuid: &str) -> CoreResult<String> {
        let reference_url = format!("{}/v1/secrets/{host_uuid}", self.base_url);
        let reference: SecretRef = self
            .http
            .get(&reference_url)
            .header("X-Auth-Token", &self.auth_token)
            .send()
            .await
            .map_err(|e| CoreError::Timeout(format!("secret reference fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| CoreError::Protocol(format!("malformed secret reference response: {e}")))?;

        let payload_url = format!("{}/v1/secrets/payload/{}", self.base_url, reference.reference);
        let payload: SecretPayload = self
            .http
            .get(&payload_url)
            .header("X-Auth-Token", &self.auth_token)
            .send()
            .await
            .map_err(|e| CoreError::Timeout(format!("secret payload fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| CoreError::Protocol(format!("malformed secret payload response: {e}")))?;

        Ok(payload.payload)
    }
}

/// Test double, grounded in the same inject-a-fake seam as `FakeBmcClient`.
#[derive(Default)]
pub struct FakeSecretStoreClient {
    pub password: std::sync::Mutex<String>,
}

#[async_trait]
impl SecretStoreClient for FakeSecretStoreClient {
    async fn fetch_password(&self, _host_uuid: &str) -> CoreResult<String> {
        Ok(self.password.lock().expect("fake secret store lock poisoned").clone())
    }
}
