// crates/vigil-store/src/lib.rs
//
// vigil-store: Durable state for the Vigil uptime engine.
//
// One JSON snapshot file per phrase number, one metadata file per phrase,
// and a small cursor file remembering the last epoch the engine processed.
// Snapshot entries carry an explicit schema version; older layouts are
// upgraded on load by pure migration functions.

pub mod cursor;
pub mod schema;
pub mod snapshot;

// Re-export key types for ergonomic access from downstream crates.
pub use cursor::EngineCursor;
pub use schema::{migrate_v1_to_v2, upgrade_phrase_entry, CURRENT_SCHEMA_VERSION};
pub use snapshot::SnapshotStore;
