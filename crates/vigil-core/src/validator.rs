// crates/vigil-core/src/validator.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a tracked validator: a ledger address or a configured name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorKey(String);

impl ValidatorKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ValidatorKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ValidatorKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ValidatorKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
