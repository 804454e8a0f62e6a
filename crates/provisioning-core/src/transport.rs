//! Mesh transport capability consumed by the session state machine.
//!
//! The provisioning authority never owns a radio or an MQTT client
//! directly; it registers for inbound data on an endpoint pair and
//! pushes outbound frames through whatever bridge a deployment wires
//! up. This workspace supplies the trait contract and an in-memory
//! double (see `provisioning-server::transport`); no production MQTT
//! client is included.

use async_trait::async_trait;

/// Outcome of a [`Transport::send`] call. Only `GwResOk` counts as
/// success; every other variant consumes one retry of the session's
/// send-retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// The gateway accepted the frame for delivery.
    GwResOk,
    /// A parameter of the send request was invalid.
    GwResInvalidParam,
    /// The destination endpoint does not exist.
    GwResInvalidDestEndpoint,
    /// The source endpoint does not exist.
    GwResInvalidSourceEndpoint,
    /// The payload exceeded what the link can carry.
    GwResInvalidSduSize,
    /// The sink denied the request.
    GwResAccessDenied,
    /// An unspecified internal error occurred.
    GwResInternalError,
    /// The send timed out before a result was observed.
    GwResTimeout,
}

impl ResultCode {
    /// Whether this result counts as success for the retry protocol.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::GwResOk)
    }
}

/// An inbound frame as reported by the transport, before wire-codec
/// decoding.
#[derive(Debug, Clone)]
pub struct ReceivedDataEvent {
    /// Mesh address of the node that sent this frame, if known.
    pub source_address: Option<u32>,
    /// Endpoint the frame arrived on.
    pub source_endpoint: u8,
    /// Endpoint the frame was addressed to.
    pub destination_endpoint: u8,
    /// Gateway that relayed the frame.
    pub gw_id: String,
    /// Sink within the gateway that relayed the frame.
    pub sink_id: String,
    /// Epoch milliseconds the gateway received the frame.
    pub rx_time_ms_epoch: i64,
    /// Estimated milliseconds the frame spent in flight.
    pub travel_time_ms: i64,
    /// Raw frame bytes, to be passed to [`provisioning_proto::Frame::decode`].
    pub data_payload: Vec<u8>,
}

/// Capability the server shell and session state machine depend on
/// to exchange frames with the mesh.
///
/// Implementations must be internally thread-safe: `send` is called
/// concurrently from every session task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register a callback invoked for every inbound frame arriving
    /// on the given request endpoint pair.
    async fn register_uplink(
        &self,
        on_data: Box<dyn Fn(ReceivedDataEvent) + Send + Sync>,
        src_ep: u8,
        dst_ep: u8,
    ) -> ResultCode;

    /// Send `payload` to `dest` via `(gw_id, sink_id)` on the given
    /// endpoint pair, at the requested QoS.
    async fn send(
        &self,
        gw_id: &str,
        sink_id: &str,
        dest: u32,
        src_ep: u8,
        dst_ep: u8,
        qos: u8,
        payload: Vec<u8>,
    ) -> ResultCode;
}
