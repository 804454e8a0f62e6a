//! Session state machine, configuration model, and router for the
//! mesh provisioning authority.
//!
//! This crate has no network or file-format concerns beyond loading
//! the configuration file: it owns what a node's provisioning
//! session looks like (`session`), where its whitelist comes from
//! (`config`), and how inbound frames find the session they belong
//! to (`router`). The mesh transport itself is a capability consumed
//! through the `transport` trait, not implemented here.

pub mod config;
pub mod env;
pub mod error;
pub mod router;
pub mod session;
pub mod transport;

pub use config::{Config, Network, Node};
pub use env::Environment;
pub use error::{ConfigError, SessionError};
pub use router::Router;
pub use session::{Event, Session, SessionHandle, SessionKey, SessionState, SessionStatus};
pub use transport::{ReceivedDataEvent, ResultCode, Transport};
