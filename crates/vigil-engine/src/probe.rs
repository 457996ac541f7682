// crates/vigil-engine/src/probe.rs
//
// HTTP reachability probe of a validator's helper process.
//
// The helper answers `GET <health_url>` with a JSON body whose
// `status.result` is either the string "Inactive" or
// `{"Active": {"expires_at": <unix ms>}}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use vigil_core::{ReachabilityProbe, VigilError};

/// `ReachabilityProbe` backed by a shared reqwest client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpHelperProbe {
    client: reqwest::Client,
}

impl HttpHelperProbe {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

/// Interpret a helper status body. `now_ms` is the current unix time in ms.
///
/// An Active status whose `expires_at` already passed counts as inactive.
pub fn parse_helper_status(body: &Value, now_ms: i64) -> Result<bool, VigilError> {
    let result = body
        .get("status")
        .and_then(|s| s.get("result"))
        .ok_or_else(|| VigilError::ProbeFailure("response has no status.result".to_string()))?;

    match result {
        Value::String(s) if s.eq_ignore_ascii_case("inactive") => Ok(false),
        Value::Object(fields) => match fields.get("Active") {
            Some(active) => {
                let expires_at = active.get("expires_at").and_then(Value::as_i64);
                Ok(expires_at.map_or(true, |expires| expires > now_ms))
            }
            None => Err(VigilError::ProbeFailure(format!(
                "unrecognized status.result {}",
                result
            ))),
        },
        other => Err(VigilError::ProbeFailure(format!(
            "unrecognized status.result {}",
            other
        ))),
    }
}

#[async_trait]
impl ReachabilityProbe for HttpHelperProbe {
    async fn probe(&self, url: &str) -> Result<bool, VigilError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VigilError::ProbeFailure(format!("HTTP error from {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(VigilError::ProbeFailure(format!(
                "{} returned HTTP {}",
                url,
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| VigilError::ProbeFailure(format!("Failed to parse response from {}: {}", url, e)))?;

        parse_helper_status(&body, chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inactive_string() {
        let body = json!({ "status": { "result": "Inactive" } });
        assert!(!parse_helper_status(&body, 0).unwrap());
    }

    #[test]
    fn test_active_not_expired() {
        let body = json!({ "status": { "result": { "Active": { "expires_at": 2_000 } } } });
        assert!(parse_helper_status(&body, 1_000).unwrap());
    }

    #[test]
    fn test_active_but_expired() {
        let body = json!({ "status": { "result": { "Active": { "expires_at": 2_000 } } } });
        assert!(!parse_helper_status(&body, 3_000).unwrap());
    }

    #[test]
    fn test_missing_result_is_probe_failure() {
        let body = json!({ "auth": {} });
        assert!(matches!(
            parse_helper_status(&body, 0),
            Err(VigilError::ProbeFailure(_))
        ));
    }
}
