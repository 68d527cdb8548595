macro_rules! unsupported {
  ($name:expr) => {{
    ::tracing::error!("Unsupported method {} called", $name);
    return Err(
      ::tonic::Status::new(
        ::tonic::Code::Unimplemented,
        format!("Unsupported method {} called", $name),
      )
      .into(),
    );
  }};
}

pub mod controller;
pub mod node;
pub mod proto;
pub mod volume;

mod identity;
mod secrets;
mod server;
mod utils;

use std::collections::HashMap;

use lazy_static::lazy_static;

pub use controller::ControllerService;
pub use node::NodeService;
pub use server::{serve_controller, serve_node, Endpoint, Listener, ServeError};

#[derive(Eq, Clone, Copy, PartialEq, Debug, Hash)]
pub enum VolumeExpansionSupport {
  None,
  Offline,
  Online,
}

/// Plugin metadata shared by the controller and the node services.
pub trait IdentityService: Send + Sync + 'static {
  /// Plugin name in domain name notation, at most 63 characters.
  fn name(&self) -> &str;

  /// Plugin version. Opaque to the orchestrator.
  fn version(&self) -> &str;

  /// Whether volumes carry topology segments the scheduler must honor.
  #[inline]
  fn volume_accessibility_constraints_support(&self) -> bool {
    false
  }

  #[inline]
  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::None
  }

  /// Answer to `Probe`.
  #[inline]
  fn ready(&self) -> bool {
    true
  }

  #[inline]
  fn manifest(&self) -> &HashMap<String, String> {
    lazy_static! {
      static ref EMPTY_MANIFEST: HashMap<String, String> = HashMap::new();
    }

    &EMPTY_MANIFEST
  }
}
