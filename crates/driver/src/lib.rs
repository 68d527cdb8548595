/// Implements `IdentityService` for a service holding a `readiness:
/// Arc<Readiness>` field.
macro_rules! plugin_identity {
  ($ty:ident, $param:ident: $bound:path) => {
    impl<$param: $bound + 'static> ::csi_proto::IdentityService for $ty<$param> {
      #[inline]
      fn name(&self) -> &str {
        crate::DRIVER_NAME
      }

      #[inline]
      fn version(&self) -> &str {
        crate::DRIVER_VERSION
      }

      #[inline]
      fn volume_accessibility_constraints_support(&self) -> bool {
        true
      }

      #[inline]
      fn volume_expansion_support(&self) -> ::csi_proto::VolumeExpansionSupport {
        ::csi_proto::VolumeExpansionSupport::Online
      }

      #[inline]
      fn ready(&self) -> bool {
        self.readiness.is_ready()
      }
    }
  };
}

pub mod config;
pub mod controller;
pub mod gateway;
pub mod identity;
pub mod node;
pub mod server;
pub mod volume;
pub mod volumes;

pub use controller::ControllerServer;
pub use identity::Readiness;
pub use node::NodeServer;
pub use volume::{CreateOpts, ServerId, Volume, VolumeError, VolumeId};

/// Plugin name reported through the Identity service.
pub const DRIVER_NAME: &str = "csi.cloudvol.io";

pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Topology segment carrying the location of volumes and nodes.
pub const TOPOLOGY_KEY: &str = "csi.cloudvol.io/location";

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Size in GiB of volumes created without a required capacity.
pub const DEFAULT_VOLUME_SIZE: u64 = 10;

/// Smallest volume the provider creates, in GiB.
pub const MIN_VOLUME_SIZE: u64 = 10;

/// Volume context key carrying extra `mkfs` arguments.
pub const FS_FORMAT_OPTIONS_KEY: &str = "fsFormatOptions";

/// Publish context key carrying the device path of an attached volume.
pub const DEVICE_PATH_KEY: &str = "devicePath";
