//! Outbound inventory/orchestration HTTP client (A5, §6), driven exclusively
//! through the C6 work queue: `transmit`/`poll` bridge `queue::tick_request`'s
//! synchronous closures to a backing `reqwest` call running on its own task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

use crate::core::error::{CoreError, CoreResult, HttpStatusError};
use crate::core::queue::HttpMethod;

const USER_AGENT: &str = "hwmon/1.0";

type PendingSlot = Arc<Mutex<Option<Result<(), HttpStatusError>>>>;

pub struct InventoryClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: RwLock<String>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
}

impl InventoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: RwLock::new(String::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_auth_token(&self, token: String) {
        *self.auth_token.write().expect("auth token lock poisoned") = token;
    }

    fn auth_token(&self) -> String {
        self.auth_token.read().expect("auth token lock poisoned").clone()
    }

    /// `queue::tick_request`'s `transmit` closure: issue the call on a
    /// background task and return immediately. A "local error" here means
    /// the request could not even be built (malformed URL); everything else
    /// resolves later through `poll`.
    pub fn transmit(&self, sequence: u64, method: HttpMethod, path: &str, payload: serde_json::Value) -> Result<(), HttpStatusError> {
        let url = format!("{}{}", self.base_url, path);
        let reqwest_method = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let slot: PendingSlot = Arc::new(Mutex::new(None));
        self.pending.lock().expect("pending map lock poisoned").insert(sequence, slot.clone());

        let client = self.http.clone();
        let token = self.auth_token();
        tokio::spawn(async move {
            let mut request = client.request(reqwest_method, &url).header("User-Agent", USER_AGENT).header("X-Auth-Token", token);
            if !payload.is_null() {
                request = request.json(&payload);
            }
            let result = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        Ok(())
                    } else {
                        Err(HttpStatusError::from_status(status))
                    }
                }
                Err(e) => {
                    warn!(error = %e, url = %url, "inventory request transport error");
                    Err(HttpStatusError::ZeroStatus)
                }
            };
            *slot.lock().expect("pending slot lock poisoned") = Some(result);
        });

        Ok(())
    }

    /// `queue::tick_request`'s `poll` closure: non-blocking check of the
    /// background task's result slot.
    pub fn poll(&self, sequence: u64) -> Option<Result<(), HttpStatusError>> {
        let mut pending = self.pending.lock().expect("pending map lock poisoned");
        let Some(slot) = pending.get(&sequence) else { return None };
        let mut guard = slot.lock().expect("pending slot lock poisoned");
        let result = guard.take();
        if result.is_some() {
            drop(guard);
            pending.remove(&sequence);
        }
        result
    }

    /// DELETE a resource and wait for the result (§4.4.3 relearn teardown,
    /// which must know a delete succeeded before moving to the next entry).
    /// Bridges into the async call via `block_in_place`, valid only because
    /// the caller runs on a multi-threaded runtime.
    pub fn delete_blocking(&self, path: &str) -> CoreResult<()> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.delete(path)))
    }

    async fn delete(&self, path: &str) -> CoreResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .delete(&url)
            .header("User-Agent", USER_AGENT)
            .header("X-Auth-Token", self.auth_token())
            .send()
            .await
            .map_err(|e| CoreError::Timeout(format!("inventory delete failed: {e}")))?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::HttpStatus(HttpStatusError::from_status(status)))
        }
    }
}

/// RFC-6902-style single-field replace patch body (§6).
pub fn replace_patch(path: &str, value: impl serde::Serialize) -> serde_json::Value {
    serde_json::json!([{ "path": format!("/{path}"), "value": value, "op": "replace" }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_patch_shape_matches_rfc6902_single_field() {
        let body = replace_patch("actions_major_group", "log");
        assert_eq!(body, serde_json::json!([{ "path": "/actions_major_group", "value": "log", "op": "replace" }]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_blocking_surfaces_transport_error_for_unreachable_host() {
        let client = InventoryClient::new("http://127.0.0.1:1");
        let result = client.delete_blocking("/v1/isensors/u1");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn poll_before_transmit_completes_returns_none() {
        let client = InventoryClient::new("http://localhost:6385");
        client.transmit(1, HttpMethod::Get, "/v1/ihosts/u1/isensors", serde_json::Value::Null).unwrap();
        // The spawned task races with this poll; either outcome (pending or
        // already resolved with a transport error against an unreachable
        // host) is a valid non-panicking result.
        let _ = client.poll(1);
    }
}
