//! Provisioning authority server binary.
//!
//! # Usage
//!
//! ```bash
//! provisioning-server --config whitelist.yml
//! ```
//!
//! Every flag falls back to an environment variable
//! (`WM_PROV_CONFIG`, `WM_PROV_LOG_LEVEL`), since this binary is
//! typically launched from a container with configuration injected
//! via the environment rather than flags.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use provisioning_server::{Server, ServerRuntimeConfig, SystemEnv, InMemoryTransport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Mesh provisioning authority
#[derive(Parser, Debug)]
#[command(name = "provisioning-server")]
#[command(about = "Server-side provisioning authority for a low-power wireless mesh")]
#[command(version)]
struct Args {
    /// Path to the whitelist configuration file (YAML).
    #[arg(short, long, env = "WM_PROV_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WM_PROV_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("provisioning authority starting");

    let runtime_config = ServerRuntimeConfig { config_path: args.config };

    // No production MQTT gateway client ships in this workspace; the
    // in-memory transport is the only concrete Transport available to
    // wire up here.
    let transport = Arc::new(InMemoryTransport::new());
    let server = Server::bind(runtime_config, SystemEnv::new(), transport)?;

    server.run().await?;

    Ok(())
}
