//! Provisioning authority server shell: wires a mesh [`Transport`] to
//! the session [`Router`].
//!
//! The shell itself owns nothing about provisioning semantics; it
//! loads the configuration, hands it and a transport to a `Router`,
//! registers the router on the provisioning request endpoint pair,
//! and blocks until an interrupt. All protocol logic lives in
//! `provisioning-core`.

#![forbid(unsafe_code)]

pub mod error;
pub mod system_env;
pub mod transport;

use std::{path::PathBuf, sync::Arc};

use provisioning_core::{Config, Environment, ReceivedDataEvent, Router, Transport};
use tracing::info;

pub use error::ServerError;
pub use system_env::SystemEnv;
pub use transport::InMemoryTransport;

/// Source endpoint inbound provisioning traffic arrives on.
pub const REQUEST_SRC_ENDPOINT: u8 = 246;
/// Destination endpoint inbound provisioning traffic arrives on.
pub const REQUEST_DST_ENDPOINT: u8 = 255;

/// Everything [`Server::bind`] needs besides the transport and
/// environment, which are supplied separately so tests can swap in
/// an in-memory transport and a deterministic environment.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Path to the YAML configuration file.
    pub config_path: PathBuf,
}

/// The provisioning authority: a loaded [`Config`] bound to a
/// [`provisioning_core::Router`] over a [`Transport`].
pub struct Server<E: Environment, T: Transport> {
    router: Arc<Router<E, T>>,
    transport: Arc<T>,
}

impl<E: Environment, T: Transport> Server<E, T> {
    /// Load configuration and build the router. Does not touch the
    /// transport yet; call [`Server::run`] to register the uplink and
    /// block until shutdown.
    pub fn bind(runtime_config: ServerRuntimeConfig, env: E, transport: Arc<T>) -> Result<Self, ServerError> {
        let config = Arc::new(Config::load(&runtime_config.config_path, &env)?);
        info!(nodes = config.node_count(), path = %runtime_config.config_path.display(), "configuration loaded");
        let router = Router::new(env, Arc::clone(&transport), config);
        Ok(Self { router, transport })
    }

    /// Register the router on the provisioning request endpoint pair,
    /// then block until an interrupt.
    pub async fn run(self) -> Result<(), ServerError> {
        let router = Arc::clone(&self.router);
        let result = self
            .transport
            .register_uplink(
                Box::new(move |event: ReceivedDataEvent| {
                    router.on_data_received(&event.data_payload, event_to_envelope(&event));
                }),
                REQUEST_SRC_ENDPOINT,
                REQUEST_DST_ENDPOINT,
            )
            .await;

        if !result.is_ok() {
            return Err(ServerError::UplinkRegistration { src_ep: REQUEST_SRC_ENDPOINT, dst_ep: REQUEST_DST_ENDPOINT, result });
        }

        info!("provisioning server running");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received, abandoning in-flight sessions");
        Ok(())
    }

    /// The router backing this server, for tests driving traffic
    /// directly.
    #[must_use]
    pub fn router(&self) -> &Arc<Router<E, T>> {
        &self.router
    }
}

fn event_to_envelope(event: &ReceivedDataEvent) -> provisioning_proto::Envelope {
    provisioning_proto::Envelope {
        source_address: event.source_address,
        gw_id: Some(event.gw_id.clone()),
        sink_id: Some(event.sink_id.clone()),
        tx_time: Some(event.rx_time_ms_epoch - event.travel_time_ms),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use provisioning_core::Environment;
    use provisioning_proto::{Frame, Method};

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::pending()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }

        fn wall_clock_secs(&self) -> u64 {
            0
        }
    }

    fn config_file() -> tempfile::NamedTempFile {
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
        file
    }

    #[tokio::test]
    async fn bind_loads_configuration() {
        let file = config_file();
        let runtime_config = ServerRuntimeConfig { config_path: file.path().to_path_buf() };
        let server = Server::bind(runtime_config, TestEnv, Arc::new(InMemoryTransport::new())).unwrap();
        assert_eq!(server.router().session_count(), 0);
    }

    #[tokio::test]
    async fn end_to_end_unsecured_start_reaches_the_router() {
        let file = config_file();
        let runtime_config = ServerRuntimeConfig { config_path: file.path().to_path_buf() };
        let transport = Arc::new(InMemoryTransport::new());
        let server = Server::bind(runtime_config, TestEnv, Arc::clone(&transport)).unwrap();
        let router = Arc::clone(server.router());

        transport
            .register_uplink(
                Box::new(move |event| router.on_data_received(&event.data_payload, event_to_envelope(&event))),
                REQUEST_SRC_ENDPOINT,
                REQUEST_DST_ENDPOINT,
            )
            .await;

        let frame = Frame::Start {
            node_address: [1, 2, 3, 4],
            session_id: 0x42,
            method: Method::Unsecured,
            iv: [0u8; 16],
            uid: hex::decode("00111213").unwrap(),
        };
        transport.deliver(ReceivedDataEvent {
            source_address: Some(0xCAFE_BABE),
            source_endpoint: REQUEST_SRC_ENDPOINT,
            destination_endpoint: REQUEST_DST_ENDPOINT,
            gw_id: "g1".to_string(),
            sink_id: "s1".to_string(),
            rx_time_ms_epoch: 1000,
            travel_time_ms: 0,
            data_payload: frame.encode(),
        });

        tokio::task::yield_now().await;
        assert_eq!(server.router().session_count(), 1);
        assert_eq!(transport.sent_frames().len(), 1);
    }
}
