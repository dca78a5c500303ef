//! DeviceGrid Coordinator Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devicegrid_coordinator::{http, Config, Coordinator};
use devicegrid_core::{CompletionPolicy, DependencyPolicy};

/// DeviceGrid coordinator: hands task inputs to polling devices.
#[derive(Parser, Debug)]
#[command(name = "devicegrid-coordinator", about = "DeviceGrid coordinator server")]
struct Args {
    /// HTTP server address
    #[arg(long, env = "DEVICEGRID_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Port to listen on, overriding the port of the bind address
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Seconds between liveness sweeps
    #[arg(long, env = "DEVICEGRID_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Seconds of silence before a device is disconnected
    #[arg(long, env = "DEVICEGRID_LIVENESS_TIMEOUT_SECS")]
    liveness_timeout_secs: Option<u64>,

    /// Seconds before an unresulted lease is reclaimed
    #[arg(long, env = "DEVICEGRID_LEASE_TIMEOUT_SECS")]
    lease_timeout_secs: Option<u64>,

    /// Task dependency handling: ignore or require-done
    #[arg(long, env = "DEVICEGRID_DEPENDENCY_POLICY")]
    dependency_policy: Option<DependencyPolicy>,

    /// Task completion rule: total-results or every-input
    #[arg(long, env = "DEVICEGRID_COMPLETION_POLICY")]
    completion_policy: Option<CompletionPolicy>,

    /// Base URL that code references are served from
    #[arg(long, env = "DEVICEGRID_CODE_BASE_URL")]
    code_base_url: Option<String>,
}

impl Args {
    /// Overlay the arguments on the default config.
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = Config::default();
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(port) = self.port {
            let mut addr: SocketAddr = config.bind_addr.parse()?;
            addr.set_port(port);
            config.bind_addr = addr.to_string();
        }
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval_secs = secs;
        }
        if let Some(secs) = self.liveness_timeout_secs {
            config.liveness_timeout_secs = secs;
        }
        if let Some(secs) = self.lease_timeout_secs {
            config.lease_timeout_secs = secs;
        }
        if let Some(policy) = self.dependency_policy {
            config.dependency_policy = policy;
        }
        if let Some(policy) = self.completion_policy {
            config.completion_policy = policy;
        }
        if self.code_base_url.is_some() {
            config.code_base_url = self.code_base_url;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Args::parse().into_config()?;
    let addr: SocketAddr = config.bind_addr.parse()?;

    info!(
        addr = %addr,
        dependency_policy = %config.dependency_policy,
        completion_policy = %config.completion_policy,
        "Starting DeviceGrid coordinator"
    );

    let coordinator = Arc::new(Coordinator::in_memory(config));

    // Background liveness monitor
    let shutdown = CancellationToken::new();
    let monitor = coordinator.monitor().spawn(shutdown.clone());

    let router = http::create_router(coordinator);
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let token = shutdown.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = token.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = monitor.await {
        warn!(error = %e, "Liveness monitor did not stop cleanly");
    }

    result?;
    info!("DeviceGrid coordinator stopped");
    Ok(())
}
