//! Session router: dispatches inbound frames to the session they
//! belong to, spawning a new session on an unseen key.

#![allow(clippy::expect_used, reason = "session table mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use provisioning_proto::{Envelope, Frame};
use tracing::{debug, warn};

use crate::{
    config::Config,
    env::Environment,
    session::{Event, Session, SessionHandle, SessionKey, SessionStatus},
    transport::Transport,
};

/// Routes decoded frames to per-key sessions, spawning new ones on
/// demand. The table is guarded by a single mutex, held only across
/// the brief map lookup/insert/remove; enqueuing to an already-known
/// session never blocks on it beyond that.
pub struct Router<E: Environment, T: Transport> {
    env: E,
    transport: Arc<T>,
    config: Arc<Config>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    self_ref: Weak<Self>,
}

impl<E: Environment, T: Transport> Router<E, T> {
    /// Build a router over `transport`, serving sessions against
    /// `config`, ready to receive frames via
    /// [`Router::on_data_received`].
    #[must_use]
    pub fn new(env: E, transport: Arc<T>, config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            env,
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Decode and dispatch a raw inbound frame. Frames whose envelope
    /// carries no `source_address`, or that fail to decode, are
    /// dropped and logged.
    pub fn on_data_received(&self, raw: &[u8], envelope: Envelope) {
        let Some(source_address) = envelope.source_address else {
            warn!("dropping frame with no source_address in its envelope");
            return;
        };

        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                return;
            },
        };

        let key = SessionKey { source_address, node_address: frame.node_address(), session_id: frame.session_id() };
        self.dispatch(key, frame, envelope);
    }

    fn dispatch(&self, key: SessionKey, frame: Frame, envelope: Envelope) {
        let mut sessions = self.sessions.lock().expect("session table mutex is never poisoned");

        if let Some(handle) = sessions.get(&key) {
            if handle.enqueue(Event::PacketReceived(frame, envelope)) {
                return;
            }
            // The session already finished and dropped its receiver;
            // fall through and spawn a fresh one for this key.
            sessions.remove(&key);
        }

        debug!(?key, "spawning new session");
        let (session, handle) = Session::new(key, self.env.clone(), self.transport.clone(), self.config.clone());
        handle.enqueue(Event::PacketReceived(frame, envelope));
        sessions.insert(key, handle);
        drop(sessions);

        let router = self.self_ref.upgrade().expect("router outlives every session it spawns");
        tokio::spawn(async move {
            session.run(move |key, status| router.finish(key, status)).await;
        });
    }

    fn finish(&self, key: SessionKey, status: SessionStatus) {
        let _ = status;
        self.sessions.lock().expect("session table mutex is never poisoned").remove(&key);
    }

    /// Number of sessions currently tracked, for tests and diagnostics.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session table mutex is never poisoned").len()
    }
}
