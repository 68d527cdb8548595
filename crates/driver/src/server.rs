use crate::{gateway::VolumeGateway, ControllerServer, NodeServer};
use csi_mount_utils::Mounter;
use csi_proto::{serve_controller, serve_node, Endpoint, ServeError};
use std::{future::Future, io, sync::Arc};
use tracing::info;

/// Binds `endpoint`, marks the plugin ready, and serves Identity and
/// Controller until `shutdown` resolves.
pub async fn run_controller<G, F>(
  endpoint: &Endpoint,
  service: Arc<ControllerServer<G>>,
  shutdown: F,
) -> Result<(), ServeError>
where
  G: VolumeGateway,
  F: Future<Output = ()>,
{
  let listener = endpoint.bind().await?;
  service.readiness().set_ready();
  info!(endpoint = %endpoint, "serving controller");

  serve_controller(listener, service, shutdown).await
}

/// Binds `endpoint`, marks the plugin ready, and serves Identity and Node
/// until `shutdown` resolves.
pub async fn run_node<M, F>(
  endpoint: &Endpoint,
  service: Arc<NodeServer<M>>,
  shutdown: F,
) -> Result<(), ServeError>
where
  M: Mounter + 'static,
  F: Future<Output = ()>,
{
  let listener = endpoint.bind().await?;
  service.readiness().set_ready();
  info!(endpoint = %endpoint, "serving node");

  serve_node(listener, service, shutdown).await
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() -> io::Result<()> {
  use tokio::signal::unix::{signal, SignalKind};

  let mut terminate = signal(SignalKind::terminate())?;
  tokio::select! {
    result = tokio::signal::ctrl_c() => result?,
    _ = terminate.recv() => (),
  }

  info!("shutdown requested");
  Ok(())
}
