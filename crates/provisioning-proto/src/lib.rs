//! Wire codec for the mesh provisioning protocol.
//!
//! Exposes pure `encode`/`decode` operations on [`frame::Frame`]; no
//! I/O, no session logic. The [`envelope::Envelope`] type carries the
//! transport metadata that travels alongside a decoded frame.

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::Envelope;
pub use error::CodecError;
pub use frame::{Frame, MessageType, Method, NackReason};
