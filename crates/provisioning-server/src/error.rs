//! Server-shell error type: wraps configuration load failures and
//! transport wiring failures that can abort startup.

use thiserror::Error;

/// Errors the server shell can surface. Distinct from
/// `provisioning_core::SessionError`, which never escapes a session's
/// own event loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed to load; fatal to startup.
    #[error("failed to load configuration: {0}")]
    Config(#[from] provisioning_core::ConfigError),

    /// The transport refused to register an uplink.
    #[error("transport refused to register uplink on endpoints {src_ep}/{dst_ep}: {result:?}")]
    UplinkRegistration {
        /// Request-side source endpoint.
        src_ep: u8,
        /// Request-side destination endpoint.
        dst_ep: u8,
        /// Result code the transport returned.
        result: provisioning_core::ResultCode,
    },

    /// The OS shutdown-signal listener could not be installed.
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ServerError {
    /// Whether retrying the operation that produced this error might
    /// succeed, versus it being a permanent misconfiguration.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::UplinkRegistration { result, .. } => {
                matches!(result, provisioning_core::ResultCode::GwResTimeout | provisioning_core::ResultCode::GwResInternalError)
            },
            Self::Signal(_) => false,
        }
    }
}
