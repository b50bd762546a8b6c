//! Arbor server binary.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use arbor_runtime::abort::{AbortRegistry, InMemoryAbortSource};
use arbor_server::config::ServerConfig;
use arbor_server::server::ArborServer;
use arbor_server::{dev, shutdown};

/// Command-line overrides for the server configuration.
#[derive(Debug, Parser)]
#[command(name = "arbor-server", about = "Streaming chat server")]
struct Args {
    /// Bind host.
    #[arg(long)]
    host: Option<String>,

    /// Bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    arbor_core::logging::init_subscriber(&config.log_level);

    let abort_source = Arc::new(InMemoryAbortSource::default());
    let abort = AbortRegistry::start(abort_source.clone());

    let server = ArborServer::new(
        config.clone(),
        dev::collaborators(),
        Arc::clone(&abort),
        abort_source,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "arbor server listening");

    axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    abort.shutdown();
    info!("shutdown complete");
    Ok(())
}
