//! Error types for the provisioning core: configuration load failures
//! (fatal to startup) and session-level internal errors.

use thiserror::Error;

/// Load-time configuration errors. Fatal: the caller aborts startup
/// with a diagnostic.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read from disk.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// Path that failed to open or read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not well-formed YAML.
    #[error("malformed configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `version` was present but not `1`.
    #[error("unsupported configuration version: {0}")]
    UnsupportedVersion(i64),

    /// A legacy-format backup file already exists at the computed path.
    #[error("refusing to overwrite existing backup file: {0}")]
    BackupAlreadyExists(String),

    /// A node entry is missing a field required by its method.
    #[error("node {node:?} is missing required field {field:?}")]
    MissingField {
        /// Name of the offending node entry.
        node: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field was present but its value could not be interpreted.
    #[error("node {node:?} field {field:?} is invalid: {detail}")]
    InvalidFieldValue {
        /// Name of the offending node entry.
        node: String,
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        detail: String,
    },

    /// A fixed-length byte field did not meet its required length.
    #[error("node {node:?} field {field:?} must be {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Name of the offending node entry.
        node: String,
        /// Name of the offending field.
        field: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Observed length in bytes.
        actual: usize,
    },

    /// `uid` was not 1..79 bytes.
    #[error("node {node:?} uid must be 1..=79 bytes, got {actual}")]
    InvalidUidLength {
        /// Name of the offending node entry.
        node: String,
        /// Observed length in bytes.
        actual: usize,
    },

    /// `node_id` fell outside the allowed ranges.
    #[error(
        "node {node:?} node_id {value:#010x} is not in [0x00000001..0x7FFFFFFF] or \
         [0x81000000..0xFFFFFFFD]"
    )]
    InvalidNodeId {
        /// Name of the offending node entry.
        node: String,
        /// Observed value.
        value: u32,
    },

    /// `role` was not one of the allowed values.
    #[error("node {node:?} role {value:#04x} is not an allowed role value")]
    InvalidRole {
        /// Name of the offending node entry.
        node: String,
        /// Observed value.
        value: u8,
    },

    /// A `user_specific` key fell outside `[128..255]`, the only
    /// range that cannot collide with the reserved system keys `0..5`.
    #[error("node {node:?} user_specific index {index} must be in 128..=255")]
    InvalidUserSpecificIndex {
        /// Name of the offending node entry.
        node: String,
        /// Observed index.
        index: i64,
    },

    /// Two nodes declared the same canonical UID.
    #[error("duplicate uid {uid} (nodes {first:?} and {second:?})")]
    DuplicateUid {
        /// Hex-encoded UID.
        uid: String,
        /// First node to claim this UID.
        first: String,
        /// Second node to claim this UID.
        second: String,
    },

    /// A node referenced a network name that was not defined.
    #[error("node {node:?} references unknown network {network:?}")]
    UnknownNetwork {
        /// Name of the offending node entry.
        node: String,
        /// Network name it referenced.
        network: String,
    },
}

/// Internal session-dispatch errors, distinct from the observable
/// terminal [`crate::session::SessionStatus`] values. These never
/// reach the finish callback; they indicate a programming/dispatch
/// mistake (e.g. an event delivered to an already-terminated session).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// An event arrived for a session that had already reached a
    /// terminal status; the event is ignored.
    #[error("session already terminated with status {status:?}")]
    AlreadyTerminated {
        /// The terminal status the session had already reached.
        status: crate::session::SessionStatus,
    },
}
