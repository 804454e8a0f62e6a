//! Per-node provisioning session: one instance per `(source_address,
//! node_address, session_id)` triple, driven by its own event queue.

use std::{sync::Arc, time::Duration};

use provisioning_crypto::{apply_keystream, compute_icb, compute_mic};
use provisioning_proto::{Envelope, Frame, MessageType, Method, NackReason};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, Node},
    env::Environment,
    transport::{ResultCode, Transport},
};

/// Default number of additional send attempts after the first.
pub const DEFAULT_RETRY: i32 = 1;
/// Default retransmission timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Source endpoint used for outbound DATA/NACK frames.
pub const RESPONSE_SRC_ENDPOINT: u8 = 255;
/// Destination endpoint used for outbound DATA/NACK frames.
pub const RESPONSE_DST_ENDPOINT: u8 = 246;
const QOS: u8 = 1;

/// Routing key for a session: `(source_address, node_address,
/// session_id)`. A frame whose envelope carries no `source_address`
/// never reaches a session, so the field is required here, not
/// optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Mesh address the inbound frame's envelope reported as its source.
    pub source_address: u32,
    /// Node address carried in the frame itself.
    pub node_address: [u8; 4],
    /// Session identifier chosen by the node.
    pub session_id: u8,
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for an initial or retransmitted START.
    Idle,
    /// DATA or NACK sent; waiting for DATA_ACK, NACK, or a retransmitted
    /// START, with the retransmission timer armed.
    WaitResponse,
}

/// Observable terminal outcomes, plus the non-terminal `Ongoing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session has not yet reached a terminal state.
    Ongoing,
    /// DATA_ACK received; provisioning succeeded.
    Success,
    /// The UID was not in the whitelist.
    ErrorNotAuthorized,
    /// The first frame for a new key was not a START.
    ErrorNotStart,
    /// A NACK arrived while awaiting a response.
    ErrorNackReceived,
    /// The retransmission timer fired with no response.
    ErrorNoResponse,
    /// Sending DATA failed after exhausting retries.
    ErrorSendingData,
    /// Sending NACK failed after exhausting retries.
    ErrorSendingNack,
    /// A frame arrived that is invalid for the current state.
    ErrorInvalidState,
}

impl SessionStatus {
    /// Whether this status ends the session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}

/// Inputs to the session event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded frame addressed to this session, with its transport
    /// envelope.
    PacketReceived(Frame, Envelope),
    /// The retransmission timer fired.
    Timeout,
}

/// Sending half of a session's event queue, held by the router.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    /// Enqueue an event. Returns `false` if the session has already
    /// exited its loop (its receiver dropped); the caller should then
    /// treat the key as unknown.
    pub fn enqueue(&self, event: Event) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Build the 9-byte DATA "to-be-authenticated" header: the DATA frame
/// layout with no MIC.
fn data_auth_header(node_address: [u8; 4], session_id: u8, key_index: u8, counter: u16) -> Vec<u8> {
    let mut header = Vec::with_capacity(9);
    header.push(MessageType::Data as u8);
    header.extend_from_slice(&node_address);
    header.push(session_id);
    header.push(key_index);
    header.extend_from_slice(&counter.to_le_bytes());
    header
}

/// A single provisioning session. Owns its event queue and runs to
/// completion on its own task, as one of many parallel workers.
pub struct Session<E: Environment, T: Transport> {
    key: SessionKey,
    env: E,
    transport: Arc<T>,
    config: Arc<Config>,
    state: SessionState,
    status: SessionStatus,
    counter: u16,
    tx_time: Option<i64>,
    gw_id: Option<String>,
    sink_id: Option<String>,
    retry: i32,
    timeout: Duration,
    node: Option<Arc<Node>>,
    iv: [u8; 16],
    events: mpsc::UnboundedReceiver<Event>,
}

impl<E: Environment, T: Transport> Session<E, T> {
    /// Create a new session and the handle used to feed it events.
    /// The session is not yet running; call [`Session::run`] on a
    /// task.
    #[must_use]
    pub fn new(key: SessionKey, env: E, transport: Arc<T>, config: Arc<Config>) -> (Self, SessionHandle) {
        let (sender, events) = mpsc::unbounded_channel();
        let counter = env.random_u16();
        let session = Self {
            key,
            env,
            transport,
            config,
            state: SessionState::Idle,
            status: SessionStatus::Ongoing,
            counter,
            tx_time: None,
            gw_id: None,
            sink_id: None,
            retry: DEFAULT_RETRY,
            timeout: DEFAULT_TIMEOUT,
            node: None,
            iv: [0u8; 16],
            events,
        };
        (session, SessionHandle { sender })
    }

    /// Run the session's event loop to completion, then invoke
    /// `finish` with the terminal status.
    pub async fn run(mut self, finish: impl FnOnce(SessionKey, SessionStatus) + Send) {
        while self.status == SessionStatus::Ongoing {
            let event = match self.state {
                SessionState::WaitResponse => {
                    tokio::select! {
                        biased;
                        event = self.events.recv() => event,
                        () = self.env.sleep(self.timeout) => Some(Event::Timeout),
                    }
                },
                SessionState::Idle => self.events.recv().await,
            };

            let Some(event) = event else {
                debug!(key = ?self.key, "session queue closed, abandoning");
                return;
            };

            match (self.state, event) {
                (SessionState::Idle, Event::PacketReceived(frame, envelope)) => {
                    self.handle_idle(frame, envelope).await;
                },
                (SessionState::WaitResponse, Event::PacketReceived(frame, envelope)) => {
                    self.handle_wait_response(frame, envelope).await;
                },
                (SessionState::WaitResponse, Event::Timeout) => {
                    self.status = SessionStatus::ErrorNoResponse;
                },
                (SessionState::Idle, Event::Timeout) => {
                    // The timer is only armed in WAIT_RESPONSE; a
                    // Timeout here would mean it fired after a
                    // transition back to IDLE, which never happens.
                    // Ignore defensively rather than panic.
                },
            }
        }

        info!(key = ?self.key, status = ?self.status, "session terminated");
        finish(self.key, self.status);
    }

    async fn handle_idle(&mut self, frame: Frame, envelope: Envelope) {
        self.update_origin(&envelope);

        let Frame::Start { node_address, session_id, method, iv, uid } = frame else {
            self.status = SessionStatus::ErrorNotStart;
            return;
        };

        let Some(node) = self.config.lookup(&uid).cloned() else {
            warn!(key = ?self.key, "unknown uid, refusing");
            let sent = self.send_nack(node_address, session_id, NackReason::NotAuthorized).await;
            self.status = if sent { SessionStatus::ErrorNotAuthorized } else { SessionStatus::ErrorSendingNack };
            return;
        };

        if node.method != method {
            warn!(key = ?self.key, "method mismatch, refusing");
            let sent = self.send_nack(node_address, session_id, NackReason::MethodNotSupported).await;
            self.status = if sent { SessionStatus::ErrorNotAuthorized } else { SessionStatus::ErrorSendingNack };
            return;
        }

        self.node = Some(node);
        self.iv = iv;
        let sent = self.send_data(node_address, session_id).await;
        if sent {
            self.state = SessionState::WaitResponse;
        } else {
            self.status = SessionStatus::ErrorSendingData;
        }
    }

    async fn handle_wait_response(&mut self, frame: Frame, envelope: Envelope) {
        self.update_origin(&envelope);

        match frame {
            Frame::Start { node_address, session_id, iv, .. } => {
                debug!(key = ?self.key, "retransmitted START, re-sending DATA");
                self.iv = iv;
                let sent = self.send_data(node_address, session_id).await;
                if !sent {
                    self.status = SessionStatus::ErrorSendingData;
                }
                // On success the state stays WAIT_RESPONSE; the
                // timer restarts because `run`'s select re-arms it
                // on the next loop iteration.
            },
            Frame::DataAck { .. } => {
                self.status = SessionStatus::Success;
            },
            Frame::Nack { .. } => {
                self.status = SessionStatus::ErrorNackReceived;
            },
            Frame::Data { .. } => {
                warn!(key = ?self.key, "unexpected DATA while awaiting response");
                self.status = SessionStatus::ErrorInvalidState;
            },
        }
    }

    /// Adopt `envelope`'s origin hints if they are more recent than
    /// any seen so far.
    fn update_origin(&mut self, envelope: &Envelope) {
        let adopt = match (envelope.tx_time, self.tx_time) {
            (Some(new), Some(current)) => new > current,
            (Some(_), None) => true,
            _ => false,
        };
        if adopt {
            self.tx_time = envelope.tx_time;
            if envelope.gw_id.is_some() {
                self.gw_id.clone_from(&envelope.gw_id);
            }
            if envelope.sink_id.is_some() {
                self.sink_id.clone_from(&envelope.sink_id);
            }
        }
    }

    /// Encrypt (if required) and send the configuration bundle,
    /// retrying per the send-retry protocol.
    async fn send_data(&mut self, node_address: [u8; 4], session_id: u8) -> bool {
        let frame = self.build_data_frame(node_address, session_id);
        self.send_with_retry(&frame).await
    }

    async fn send_nack(&mut self, node_address: [u8; 4], session_id: u8, reason: NackReason) -> bool {
        let frame = Frame::Nack { node_address, session_id, reason };
        self.send_with_retry(&frame).await
    }

    #[allow(clippy::expect_used, reason = "node is always set before this is reached")]
    fn build_data_frame(&mut self, node_address: [u8; 4], session_id: u8) -> Frame {
        self.counter = self.counter.wrapping_add(1);
        let node = self.node.clone().expect("node resolved before any DATA is built");

        if node.method == Method::Unsecured {
            return Frame::Data {
                node_address,
                session_id,
                key_index: 0,
                counter: self.counter,
                data: node.canonical_cbor(),
                mic: Vec::new(),
            };
        }

        let key_index = 1;
        let plaintext = node.canonical_cbor();
        let factory_key = node
            .factory_key
            .as_ref()
            .expect("SECURED/EXTENDED nodes always carry a factory_key (config-load invariant)");

        let header = data_auth_header(node_address, session_id, key_index, self.counter);
        let mut to_auth = header;
        to_auth.extend_from_slice(&plaintext);
        let mic = compute_mic(factory_key.auth_key(), &to_auth);

        let icb = compute_icb(self.counter, &self.iv);
        let mut buf = plaintext;
        buf.extend_from_slice(&mic);
        apply_keystream(factory_key.enc_key(), &icb, &mut buf);

        let split_at = buf.len() - 5;
        let mic_out = buf.split_off(split_at);

        Frame::Data { node_address, session_id, key_index, counter: self.counter, data: buf, mic: mic_out }
    }

    async fn send_with_retry(&mut self, frame: &Frame) -> bool {
        let payload = frame.encode();
        let dest = u32::from_be_bytes(frame.node_address());
        let gw_id = self.gw_id.clone().unwrap_or_default();
        let sink_id = self.sink_id.clone().unwrap_or_default();

        loop {
            let result = self
                .transport
                .send(&gw_id, &sink_id, dest, RESPONSE_SRC_ENDPOINT, RESPONSE_DST_ENDPOINT, QOS, payload.clone())
                .await;
            if result.is_ok() {
                return true;
            }
            warn!(key = ?self.key, ?result, retry = self.retry, "send failed");
            self.retry -= 1;
            if self.retry < 0 {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use provisioning_proto::Method as ProtoMethod;

    use super::*;

    #[derive(Clone)]
    struct TestEnv {
        seed: Arc<Mutex<u16>>,
    }

    impl Environment for TestEnv {
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            // Never resolves: these tests never rely on the timeout
            // branch firing. A dedicated timeout test swaps in a
            // zero-duration variant by setting `timeout` directly on
            // the session before calling `run`.
            std::future::pending()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }

        fn wall_clock_secs(&self) -> u64 {
            0
        }

        fn random_u16(&self) -> u16 {
            *self.seed.lock().unwrap()
        }
    }

    #[derive(Clone)]
    struct ImmediateTimeoutEnv;

    impl Environment for ImmediateTimeoutEnv {
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }

        fn wall_clock_secs(&self) -> u64 {
            0
        }
    }

    struct RecordingTransport {
        sent: Mutex<Vec<Frame>>,
        results: Mutex<VecDeque<ResultCode>>,
    }

    impl RecordingTransport {
        fn always_ok() -> Self {
            Self { sent: Mutex::new(Vec::new()), results: Mutex::new(VecDeque::new()) }
        }

        fn with_results(results: Vec<ResultCode>) -> Self {
            Self { sent: Mutex::new(Vec::new()), results: Mutex::new(results.into()) }
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn register_uplink(
            &self,
            _on_data: Box<dyn Fn(crate::transport::ReceivedDataEvent) + Send + Sync>,
            _src_ep: u8,
            _dst_ep: u8,
        ) -> ResultCode {
            ResultCode::GwResOk
        }

        async fn send(
            &self,
            _gw_id: &str,
            _sink_id: &str,
            _dest: u32,
            _src_ep: u8,
            _dst_ep: u8,
            _qos: u8,
            payload: Vec<u8>,
        ) -> ResultCode {
            let frame = Frame::decode(&payload).expect("session must emit valid frames");
            self.sent.lock().unwrap().push(frame);
            self.results.lock().unwrap().pop_front().unwrap_or(ResultCode::GwResOk)
        }
    }

    fn secured_config() -> Arc<Config> {
        // Build a Config through its public load() path via a
        // temp file, to exercise the real validation/parse path.
        let yaml = r#"
version: 1
networks:
  net_a:
    address: 100
    channel: 5
    authentication_key: "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"
    encryption_key: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
nodes:
  node_a:
    network: net_a
    method: 1
    uid: "0x00111213"
    factory_key: "0xAA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99AA99"
"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        Arc::new(Config::load(file.path(), &env).unwrap())
    }

    fn start_envelope(tx_time: i64, gw: &str, sink: &str) -> Envelope {
        Envelope {
            source_address: Some(0xCAFE_BABE),
            gw_id: Some(gw.to_string()),
            sink_id: Some(sink.to_string()),
            tx_time: Some(tx_time),
        }
    }

    fn start_frame(uid: &[u8], method: ProtoMethod) -> Frame {
        Frame::Start { node_address: [1, 2, 3, 4], session_id: 0x42, method, iv: [0u8; 16], uid: uid.to_vec() }
    }

    #[tokio::test]
    async fn unknown_uid_yields_nack_and_terminal_status() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(1)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport.clone(), config);

        handle.enqueue(Event::PacketReceived(
            start_frame(&[0xFF, 0xFF], ProtoMethod::Secured),
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorNotAuthorized);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Frame::Nack { reason: NackReason::NotAuthorized, .. }));
    }

    #[tokio::test]
    async fn method_mismatch_yields_nack() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(1)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport.clone(), config);

        handle.enqueue(Event::PacketReceived(
            start_frame(&hex::decode("00111213").unwrap(), ProtoMethod::Unsecured),
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorNotAuthorized);

        let sent = transport.sent.lock().unwrap();
        assert!(matches!(sent[0], Frame::Nack { reason: NackReason::MethodNotSupported, .. }));
    }

    #[tokio::test]
    async fn happy_path_secured_session_succeeds() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport.clone(), config);

        handle.enqueue(Event::PacketReceived(
            start_frame(&hex::decode("00111213").unwrap(), ProtoMethod::Secured),
            start_envelope(1000, "g1", "s1"),
        ));
        handle.enqueue(Event::PacketReceived(
            Frame::DataAck { node_address: [1, 2, 3, 4], session_id: 0x42 },
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::Success);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Frame::Data { key_index, counter, mic, .. } => {
                assert_eq!(*key_index, 1);
                assert_eq!(*counter, 8); // seed 7 + 1
                assert_eq!(mic.len(), 5);
            },
            other => panic!("expected Data frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsecured_session_sends_plaintext_with_key_index_zero() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(1)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        // Re-point the node's method for this test by loading a
        // purpose-built unsecured config instead of reusing secured_config().
        let yaml = r#"
version: 1
networks:
  net_a:
    authentication_key: "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"
    encryption_key: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
nodes:
  node_a:
    network: net_a
    method: 0
    uid: "0x00111213"
"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();
        let unsecured_config = Arc::new(Config::load(file.path(), &env).unwrap());
        let _ = config;

        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport.clone(), unsecured_config.clone());
        handle.enqueue(Event::PacketReceived(
            start_frame(&hex::decode("00111213").unwrap(), ProtoMethod::Unsecured),
            start_envelope(1000, "g1", "s1"),
        ));
        handle.enqueue(Event::PacketReceived(
            Frame::DataAck { node_address: [1, 2, 3, 4], session_id: 0x42 },
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::Success);

        let sent = transport.sent.lock().unwrap();
        match &sent[0] {
            Frame::Data { key_index, mic, data, .. } => {
                assert_eq!(*key_index, 0);
                assert!(mic.is_empty());
                let node = unsecured_config.lookup(&hex::decode("00111213").unwrap()).unwrap();
                assert_eq!(*data, node.canonical_cbor());
            },
            other => panic!("expected Data frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retransmitted_start_increments_counter_again() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport.clone(), config);

        let uid = hex::decode("00111213").unwrap();
        handle.enqueue(Event::PacketReceived(start_frame(&uid, ProtoMethod::Secured), start_envelope(1000, "g1", "s1")));
        handle.enqueue(Event::PacketReceived(start_frame(&uid, ProtoMethod::Secured), start_envelope(1000, "g1", "s1")));
        handle.enqueue(Event::PacketReceived(
            Frame::DataAck { node_address: [1, 2, 3, 4], session_id: 0x42 },
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::Success);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let counters: Vec<u16> = sent
            .iter()
            .map(|f| match f {
                Frame::Data { counter, .. } => *counter,
                _ => panic!("expected Data frame"),
            })
            .collect();
        assert_eq!(counters, vec![8, 9]);
    }

    #[tokio::test]
    async fn nack_received_in_wait_response_is_terminal() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport, config);

        let uid = hex::decode("00111213").unwrap();
        handle.enqueue(Event::PacketReceived(start_frame(&uid, ProtoMethod::Secured), start_envelope(1000, "g1", "s1")));
        handle.enqueue(Event::PacketReceived(
            Frame::Nack { node_address: [1, 2, 3, 4], session_id: 0x42, reason: NackReason::InvalidData },
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorNackReceived);
    }

    #[tokio::test]
    async fn packet_received_in_idle_that_is_not_start_is_terminal_error() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport, config);

        handle.enqueue(Event::PacketReceived(
            Frame::DataAck { node_address: [1, 2, 3, 4], session_id: 0x42 },
            start_envelope(1000, "g1", "s1"),
        ));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorNotStart);
    }

    #[tokio::test]
    async fn origin_update_adopts_later_tx_time() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (mut session, _handle) = Session::new(key, env, transport, config);

        session.update_origin(&start_envelope(1000, "g1", "s1"));
        assert_eq!(session.gw_id.as_deref(), Some("g1"));

        // An older observation must not overwrite the newer one.
        session.update_origin(&start_envelope(500, "stale", "stale"));
        assert_eq!(session.gw_id.as_deref(), Some("g1"));

        session.update_origin(&start_envelope(2000, "g2", "s2"));
        assert_eq!(session.gw_id.as_deref(), Some("g2"));
        assert_eq!(session.sink_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn exhausted_retries_yield_error_sending_data() {
        let config = secured_config();
        let env = TestEnv { seed: Arc::new(Mutex::new(7)) };
        let transport = Arc::new(RecordingTransport::with_results(vec![
            ResultCode::GwResInternalError,
            ResultCode::GwResInternalError,
        ]));
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (session, handle) = Session::new(key, env, transport, config);

        let uid = hex::decode("00111213").unwrap();
        handle.enqueue(Event::PacketReceived(start_frame(&uid, ProtoMethod::Secured), start_envelope(1000, "g1", "s1")));
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorSendingData);
    }

    #[tokio::test]
    async fn timeout_fires_when_no_response_arrives() {
        let config = secured_config();
        let env = ImmediateTimeoutEnv;
        let transport = Arc::new(RecordingTransport::always_ok());
        let key = SessionKey { source_address: 0xCAFE_BABE, node_address: [1, 2, 3, 4], session_id: 0x42 };
        let (mut session, handle) = Session::new(key, env, transport, config);
        session.timeout = Duration::from_millis(0);

        let uid = hex::decode("00111213").unwrap();
        handle.enqueue(Event::PacketReceived(start_frame(&uid, ProtoMethod::Secured), start_envelope(1000, "g1", "s1")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.run(move |k, status| tx.send((k, status)).unwrap()).await;
        let (_, status) = rx.recv().await.unwrap();
        assert_eq!(status, SessionStatus::ErrorNoResponse);
    }
}
