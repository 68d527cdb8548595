use anyhow::Context;
use clap::Parser;
use cloudvol_csi::{config::NodeConfig, server, NodeServer, Readiness};
use csi_mount_utils::DefaultMounter;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn init_tracing() {
  let env_filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::INFO.into())
    .from_env_lossy();

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_filter(env_filter);

  tracing_subscriber::registry().with(stderr_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = NodeConfig::parse();
  init_tracing();

  info!(
    version = cloudvol_csi::DRIVER_VERSION,
    node_id = %config.node_id,
    location = %config.location,
    "starting node plugin"
  );

  let mounter = DefaultMounter::new()
    .await
    .context("failed to set up the mounter")?;

  let service = Arc::new(
    NodeServer::new(
      mounter,
      config.node_id.clone(),
      config.location.clone(),
      Arc::new(Readiness::new()),
    )
    .with_max_volumes(config.max_volumes_per_node),
  );

  let shutdown = async {
    if let Err(e) = server::shutdown_signal().await {
      error!(error = %e, "failed to listen for shutdown signals");
      std::future::pending::<()>().await;
    }
  };

  server::run_node(&config.endpoint, service, shutdown)
    .await
    .with_context(|| format!("failed to serve on {}", config.endpoint))?;

  Ok(())
}
