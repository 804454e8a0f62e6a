//! Transport-level metadata carried alongside a decoded frame.

/// Metadata the transport attaches to an inbound packet, and that the
/// session state machine needs in order to route a response and judge
/// recency (the "origin update" rule in the session state machine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Address of the node that sent the packet, if the transport
    /// supplied one. A frame decoded from an envelope lacking this is
    /// dropped before it reaches the router (see `msg_id` uniqueness
    /// in the design notes).
    pub source_address: Option<u32>,
    /// Gateway that relayed the packet.
    pub gw_id: Option<String>,
    /// Sink (radio) on the gateway that relayed the packet.
    pub sink_id: Option<String>,
    /// `rx_time_ms_epoch - travel_time_ms`: an estimate of when the
    /// node actually transmitted, used to order observations from
    /// multiple gateways.
    pub tx_time: Option<i64>,
}

impl Envelope {
    /// Construct an envelope with no transport hints, as used in
    /// tests that only care about frame content.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            source_address: None,
            gw_id: None,
            sink_id: None,
            tx_time: None,
        }
    }
}
