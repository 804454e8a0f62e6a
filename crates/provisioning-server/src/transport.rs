//! In-memory `Transport` implementation.
//!
//! No production mesh/MQTT gateway client ships in this workspace;
//! this gives the server shell something concrete to run against, and
//! gives tests a way to feed inbound frames and observe outbound ones
//! without a real gateway.

#![allow(clippy::expect_used, reason = "in-memory mutex poisoning should cause a panic")]

use std::sync::Mutex;

use async_trait::async_trait;
use provisioning_core::{ReceivedDataEvent, ResultCode, Transport};

type Uplink = Box<dyn Fn(ReceivedDataEvent) + Send + Sync>;

/// A single outbound send recorded by [`InMemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// Gateway the send was addressed to.
    pub gw_id: String,
    /// Sink within the gateway the send was addressed to.
    pub sink_id: String,
    /// Mesh destination address.
    pub dest: u32,
    /// Source endpoint tag.
    pub src_ep: u8,
    /// Destination endpoint tag.
    pub dst_ep: u8,
    /// Quality-of-service level requested.
    pub qos: u8,
    /// Encoded frame bytes.
    pub payload: Vec<u8>,
}

/// Records every outbound send and lets a caller drive inbound
/// traffic directly via [`InMemoryTransport::deliver`], standing in
/// for a real gateway bridge.
#[derive(Default)]
pub struct InMemoryTransport {
    uplinks: Mutex<Vec<(u8, u8, Uplink)>>,
    sent: Mutex<Vec<SentFrame>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an inbound frame to every uplink registered on its
    /// endpoint pair, as a real gateway would after receiving it over
    /// the radio.
    pub fn deliver(&self, event: ReceivedDataEvent) {
        let uplinks = self.uplinks.lock().expect("uplinks mutex is never poisoned");
        for (src_ep, dst_ep, callback) in uplinks.iter() {
            if *src_ep == event.source_endpoint && *dst_ep == event.destination_endpoint {
                callback(event.clone());
            }
        }
    }

    /// All frames sent so far, in send order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().expect("sent mutex is never poisoned").clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn register_uplink(
        &self,
        on_data: Box<dyn Fn(ReceivedDataEvent) + Send + Sync>,
        src_ep: u8,
        dst_ep: u8,
    ) -> ResultCode {
        self.uplinks.lock().expect("uplinks mutex is never poisoned").push((src_ep, dst_ep, on_data));
        ResultCode::GwResOk
    }

    async fn send(
        &self,
        gw_id: &str,
        sink_id: &str,
        dest: u32,
        src_ep: u8,
        dst_ep: u8,
        qos: u8,
        payload: Vec<u8>,
    ) -> ResultCode {
        self.sent
            .lock()
            .expect("sent mutex is never poisoned")
            .push(SentFrame { gw_id: gw_id.to_string(), sink_id: sink_id.to_string(), dest, src_ep, dst_ep, qos, payload });
        ResultCode::GwResOk
    }
}
