// crates/vigil-engine/src/roster.rs
//
// Roster of tracked validators, maintained outside the engine.
//
// File shape: a JSON object keyed by an operator-chosen contact id.
//
//   { "<contact>": { "name": "...", "address": "hmp...", "ip": "10.0.0.5",
//                    "port": 3000, "status": "active" } }
//
// Every field is optional per entry, but an entry must carry an address or a
// name to be keyed. `host` (or `ip`) and `port` together give the helper
// health-check address; `status` is an explicit reachability override.
// Entries are decoded one by one so a malformed entry only costs itself.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use vigil_core::{ValidatorKey, VigilError};

/// Raw roster entry as found in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RosterEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Accepts a number or a numeric string.
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A roster entry resolved into what the sampler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterContact {
    pub key: ValidatorKey,
    /// Full helper health-check URL, if the entry has host and port.
    pub health_url: Option<String>,
    /// Explicit status override, lowercased.
    pub status: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_port(port: &Value) -> Option<u16> {
    match port {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RosterEntry {
    /// Resolve into a contact. The validator key is the address, falling
    /// back to the name.
    pub fn resolve(&self, contact_id: &str, probe_path: &str) -> Result<RosterContact, VigilError> {
        let key = non_empty(&self.address)
            .or_else(|| non_empty(&self.name))
            .ok_or_else(|| {
                VigilError::InvalidRosterEntry(format!(
                    "entry {} has neither address nor name",
                    contact_id
                ))
            })?;

        let host = non_empty(&self.host).or_else(|| non_empty(&self.ip));
        let health_url = match (host, &self.port) {
            (Some(host), Some(port)) => match parse_port(port) {
                Some(port) => Some(format!("http://{}:{}{}", host, port, probe_path)),
                None => {
                    tracing::warn!("Roster entry {} has an invalid port {}", contact_id, port);
                    None
                }
            },
            _ => None,
        };

        Ok(RosterContact {
            key: ValidatorKey::new(key),
            health_url,
            status: non_empty(&self.status).map(str::to_lowercase),
        })
    }
}

/// Parse roster file contents. Invalid entries are skipped with a warning;
/// duplicate keys keep the first entry.
pub fn parse_roster(raw: &str, probe_path: &str) -> Result<Vec<RosterContact>, VigilError> {
    let entries: serde_json::Map<String, Value> = serde_json::from_str(raw)?;

    let mut contacts: Vec<RosterContact> = Vec::with_capacity(entries.len());
    for (contact_id, value) in entries {
        let resolved = serde_json::from_value::<RosterEntry>(value)
            .map_err(|e| {
                VigilError::InvalidRosterEntry(format!("entry {} is malformed: {}", contact_id, e))
            })
            .and_then(|entry| entry.resolve(&contact_id, probe_path));
        match resolved {
            Ok(contact) => {
                if contacts.iter().any(|c| c.key == contact.key) {
                    tracing::warn!(
                        "Roster entry {} duplicates validator {}; skipping",
                        contact_id,
                        contact.key
                    );
                    continue;
                }
                contacts.push(contact);
            }
            Err(e) => tracing::warn!("Skipping roster entry: {}", e),
        }
    }
    Ok(contacts)
}

/// Read and parse the roster file. A missing or unreadable roster yields an
/// empty list.
pub fn load_roster(path: &Path, probe_path: &str) -> Vec<RosterContact> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Failed to read roster {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match parse_roster(&raw, probe_path) {
        Ok(contacts) => {
            tracing::debug!("Loaded {} roster contacts from {}", contacts.len(), path.display());
            contacts
        }
        Err(e) => {
            tracing::warn!("Failed to parse roster {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_preferred_over_name() {
        let contacts = parse_roster(
            r#"{ "c1": { "name": "node-a", "address": "hmpAAA", "ip": "10.0.0.5", "port": 3000 } }"#,
            "/cek",
        )
        .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].key.as_str(), "hmpAAA");
        assert_eq!(contacts[0].health_url.as_deref(), Some("http://10.0.0.5:3000/cek"));
    }

    #[test]
    fn test_name_used_when_address_missing() {
        let contacts = parse_roster(r#"{ "c1": { "name": "node-b", "status": "Active" } }"#, "/cek").unwrap();
        assert_eq!(contacts[0].key.as_str(), "node-b");
        assert_eq!(contacts[0].status.as_deref(), Some("active"));
        assert!(contacts[0].health_url.is_none());
    }

    #[test]
    fn test_string_port_accepted() {
        let contacts =
            parse_roster(r#"{ "c1": { "address": "hmpB", "ip": "host", "port": "8080" } }"#, "/cek").unwrap();
        assert_eq!(contacts[0].health_url.as_deref(), Some("http://host:8080/cek"));
    }

    #[test]
    fn test_invalid_entry_skipped() {
        let contacts = parse_roster(
            r#"{ "bad": { "ip": "10.0.0.9", "port": 1 }, "good": { "address": "hmpC" } }"#,
            "/cek",
        )
        .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].key.as_str(), "hmpC");
    }

    #[test]
    fn test_mistyped_entry_does_not_drop_roster() {
        let contacts = parse_roster(
            r#"{ "bad": { "address": 12345 },
                 "good": { "address": "hmpGood", "ip": "10.0.0.7", "port": 3000 },
                 "odd": "not an object" }"#,
            "/cek",
        )
        .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].key.as_str(), "hmpGood");
        assert_eq!(contacts[0].health_url.as_deref(), Some("http://10.0.0.7:3000/cek"));
    }

    #[test]
    fn test_host_preferred_over_ip() {
        let contacts = parse_roster(
            r#"{ "c1": { "address": "hmpD", "ip": "10.0.0.8", "host": "helper.local", "port": 80 },
                 "c2": { "address": "hmpE" } }"#,
            "/cek",
        )
        .unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].health_url.as_deref(), Some("http://helper.local:80/cek"));
    }

    #[test]
    fn test_missing_roster_is_empty() {
        let path = std::env::temp_dir().join(format!("vigil_roster_{}.json", uuid::Uuid::now_v7()));
        assert!(load_roster(&path, "/cek").is_empty());
    }
}
