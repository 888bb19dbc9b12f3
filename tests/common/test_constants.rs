//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Node name used by scenarios; nodes are named after their instance.
pub const NODE: &str = "i-node-a";

/// Options naming `vol-1` with an ext4 filesystem.
pub const VOL1_OPTIONS: &str = r#"{"VolumeID":"vol-1","FSType":"ext4"}"#;

/// Options that are not valid JSON.
pub const MALFORMED_OPTIONS: &str = r#"{"VolumeID":"vol-1""#;
