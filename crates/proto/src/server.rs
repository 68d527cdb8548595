use crate::{
  controller::Controller, identity::Identity, node::Node, proto, ControllerService, NodeService,
};
use futures::TryStreamExt;
use std::{
  fmt,
  future::Future,
  io,
  net::SocketAddr,
  path::{Path, PathBuf},
  pin::Pin,
  str::FromStr,
  sync::Arc,
  task::{Context, Poll},
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::{server::Connected, Server};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ServeError {
  #[error("invalid endpoint '{0}'")]
  InvalidEndpoint(String),

  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Transport(#[from] tonic::transport::Error),
}

/// Address the plugin listens on: `unix:///path`, `unix:/path` or
/// `tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Unix(PathBuf),
  Tcp(SocketAddr),
}

impl FromStr for Endpoint {
  type Err = ServeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ServeError::InvalidEndpoint(s.to_owned());

    if let Some(rest) = s.strip_prefix("unix:") {
      // unix:///run/csi.sock and unix:/run/csi.sock name the same socket
      let path = match rest.strip_prefix("//") {
        Some(path) => path,
        None => rest,
      };

      if !path.starts_with('/') {
        return Err(invalid());
      }

      return Ok(Endpoint::Unix(PathBuf::from(path)));
    }

    if let Some(addr) = s.strip_prefix("tcp://") {
      return addr.parse().map(Endpoint::Tcp).map_err(|_| invalid());
    }

    Err(invalid())
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
      Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
    }
  }
}

/// A bound listener. Binding separately from serving lets the caller flip
/// its readiness flag once the socket accepts connections.
#[derive(Debug)]
pub enum Listener {
  Unix(tokio::net::UnixListener),
  Tcp(tokio::net::TcpListener),
}

impl Endpoint {
  pub async fn bind(&self) -> Result<Listener, ServeError> {
    match self {
      Endpoint::Unix(path) => {
        remove_stale_socket(path).await?;
        if let Some(parent) = path.parent() {
          tokio::fs::create_dir_all(parent).await?;
        }

        let listener = tokio::net::UnixListener::bind(path)?;
        info!(endpoint = %self, "listening");
        Ok(Listener::Unix(listener))
      }
      Endpoint::Tcp(addr) => {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(endpoint = %self, "listening");
        Ok(Listener::Tcp(listener))
      }
    }
  }
}

async fn remove_stale_socket(path: &Path) -> io::Result<()> {
  match tokio::fs::remove_file(path).await {
    Ok(()) => {
      debug!(path = %path.display(), "removed stale socket");
      Ok(())
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

#[derive(Debug)]
struct UnixStream(tokio::net::UnixStream);

impl Connected for UnixStream {}

impl AsyncRead for UnixStream {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_read(cx, buf)
  }
}

impl AsyncWrite for UnixStream {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.0).poll_write(cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_shutdown(cx)
  }
}

macro_rules! serve_on {
  ($router:expr, $listener:expr, $shutdown:expr) => {
    match $listener {
      Listener::Unix(listener) => {
        let incoming = UnixListenerStream::new(listener).map_ok(UnixStream);
        $router
          .serve_with_incoming_shutdown(incoming, $shutdown)
          .await?
      }
      Listener::Tcp(listener) => {
        let incoming = TcpListenerStream::new(listener);
        $router
          .serve_with_incoming_shutdown(incoming, $shutdown)
          .await?
      }
    }
  };
}

/// Serve the Identity and Controller services until `shutdown` resolves.
pub async fn serve_controller<T, F>(
  listener: Listener,
  service: Arc<T>,
  shutdown: F,
) -> Result<(), ServeError>
where
  T: ControllerService,
  F: Future<Output = ()>,
{
  let identity = proto::identity_server::IdentityServer::new(Identity::new(service.clone(), true));
  let controller = proto::controller_server::ControllerServer::new(Controller(service));

  serve_on!(
    Server::builder().add_service(identity).add_service(controller),
    listener,
    shutdown
  );

  info!("controller server stopped");
  Ok(())
}

/// Serve the Identity and Node services until `shutdown` resolves.
pub async fn serve_node<T, F>(listener: Listener, service: Arc<T>, shutdown: F) -> Result<(), ServeError>
where
  T: NodeService,
  F: Future<Output = ()>,
{
  let identity = proto::identity_server::IdentityServer::new(Identity::new(service.clone(), false));
  let node = proto::node_server::NodeServer::new(Node(service));

  serve_on!(
    Server::builder().add_service(identity).add_service(node),
    listener,
    shutdown
  );

  info!("node server stopped");
  Ok(())
}
