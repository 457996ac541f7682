// crates/vigil-engine/src/ledger.rs
//
// JSON-RPC client for the ledger gateway.
//
// Two read-only methods are used (names configurable):
//   - progress:   result = {"currentIndex": u64, "sessionLength": u64, "sessionProgress": u64}
//   - validators: result = ["<address>", ...]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use vigil_core::{LedgerSource, SessionProgress, VigilError};

/// JSON-RPC 2.0 response envelope.
#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// `LedgerSource` over HTTP JSON-RPC.
#[derive(Debug)]
pub struct JsonRpcLedger {
    endpoint: String,
    progress_method: String,
    validators_method: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(
        endpoint: impl Into<String>,
        progress_method: impl Into<String>,
        validators_method: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            endpoint: endpoint.into(),
            progress_method: progress_method.into(),
            validators_method: validators_method.into(),
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str) -> Result<T, VigilError> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": []
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| VigilError::LedgerUnreachable(format!("HTTP error: {}", e)))?;

        let rpc_resp: JsonRpcResponse = resp.json().await.map_err(|e| {
            VigilError::LedgerUnreachable(format!("Failed to parse response: {}", e))
        })?;

        if let Some(err) = rpc_resp.error {
            return Err(VigilError::LedgerUnreachable(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }

        let result = rpc_resp.result.ok_or_else(|| {
            VigilError::LedgerUnreachable(format!("No result in {} response", method))
        })?;

        serde_json::from_value(result).map_err(|e| {
            VigilError::LedgerUnreachable(format!("Failed to parse {} result: {}", method, e))
        })
    }
}

#[async_trait]
impl LedgerSource for JsonRpcLedger {
    async fn session_progress(&self) -> Result<SessionProgress, VigilError> {
        self.call(&self.progress_method).await
    }

    async fn active_validators(&self) -> Result<Vec<String>, VigilError> {
        self.call(&self.validators_method).await
    }
}
