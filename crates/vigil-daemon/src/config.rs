// crates/vigil-daemon/src/config.rs
//
// Runtime configuration for the Vigil daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use vigil_engine::EngineConfig;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Root directory for phrase snapshots, metadata, and the engine cursor.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Roster of tracked validators. Re-read on every sampler tick.
    #[serde(default = "default_roster_path")]
    pub roster_path: String,

    /// JSON-RPC endpoint of the ledger gateway.
    #[serde(default = "default_ledger_endpoint")]
    pub ledger_endpoint: String,

    /// RPC method returning the current session index and progress.
    #[serde(default = "default_ledger_progress_method")]
    pub ledger_progress_method: String,

    /// RPC method returning the active validator set.
    #[serde(default = "default_ledger_validators_method")]
    pub ledger_validators_method: String,

    #[serde(default = "default_first_phrase_start_epoch")]
    pub first_phrase_start_epoch: u64,

    #[serde(default = "default_phrase_length_epochs")]
    pub phrase_length_epochs: u64,

    /// Inactive seconds above which an epoch is FAIL.
    #[serde(default = "default_epoch_fail_threshold_secs")]
    pub epoch_fail_threshold_secs: u64,

    #[serde(default = "default_avg_block_time_secs")]
    pub avg_block_time_secs: u64,

    /// Nominal epoch length, used for the current epoch's start estimate.
    #[serde(default = "default_nominal_epoch_duration_secs")]
    pub nominal_epoch_duration_secs: u64,

    /// Interval of the epoch loop.
    #[serde(default = "default_epoch_check_interval_secs")]
    pub epoch_check_interval_secs: u64,

    /// Interval of the sampler loop.
    #[serde(default = "default_sampler_interval_secs")]
    pub sampler_interval_secs: u64,

    /// Timeout per helper probe and per ledger call.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Path appended to a roster entry's host:port.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Also track every member of the ledger's active set.
    #[serde(default)]
    pub track_active_set: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> String {
    "~/.vigil/data".to_string()
}

fn default_roster_path() -> String {
    "~/.vigil/roster.json".to_string()
}

fn default_ledger_endpoint() -> String {
    "http://127.0.0.1:9933".to_string()
}

fn default_ledger_progress_method() -> String {
    "vigil_sessionProgress".to_string()
}

fn default_ledger_validators_method() -> String {
    "vigil_sessionValidators".to_string()
}

fn default_first_phrase_start_epoch() -> u64 {
    5450
}

fn default_phrase_length_epochs() -> u64 {
    84
}

fn default_epoch_fail_threshold_secs() -> u64 {
    7200
}

fn default_avg_block_time_secs() -> u64 {
    6
}

fn default_nominal_epoch_duration_secs() -> u64 {
    4 * 60 * 60
}

fn default_epoch_check_interval_secs() -> u64 {
    60
}

fn default_sampler_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_probe_path() -> String {
    "/cek".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            roster_path: default_roster_path(),
            ledger_endpoint: default_ledger_endpoint(),
            ledger_progress_method: default_ledger_progress_method(),
            ledger_validators_method: default_ledger_validators_method(),
            first_phrase_start_epoch: default_first_phrase_start_epoch(),
            phrase_length_epochs: default_phrase_length_epochs(),
            epoch_fail_threshold_secs: default_epoch_fail_threshold_secs(),
            avg_block_time_secs: default_avg_block_time_secs(),
            nominal_epoch_duration_secs: default_nominal_epoch_duration_secs(),
            epoch_check_interval_secs: default_epoch_check_interval_secs(),
            sampler_interval_secs: default_sampler_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            probe_path: default_probe_path(),
            track_active_set: false,
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The subset of settings the engine itself consumes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            first_phrase_start_epoch: self.first_phrase_start_epoch,
            phrase_length_epochs: self.phrase_length_epochs,
            epoch_fail_threshold_secs: self.epoch_fail_threshold_secs,
            avg_block_time_secs: self.avg_block_time_secs,
            nominal_epoch_duration_secs: self.nominal_epoch_duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        assert_eq!(DaemonConfig::default().engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            ledger_endpoint = "http://10.0.0.2:9933"
            epoch_fail_threshold_secs = 3600
            track_active_set = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ledger_endpoint, "http://10.0.0.2:9933");
        assert_eq!(cfg.epoch_fail_threshold_secs, 3600);
        assert!(cfg.track_active_set);
        assert_eq!(cfg.phrase_length_epochs, 84);
        assert_eq!(cfg.probe_path, "/cek");
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(DaemonConfig::load("/nonexistent/vigil/config.toml").is_err());
    }
}
