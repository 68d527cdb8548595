use crate::{
  volumes::{MountOpts, MountService, VolumeMountError},
  Readiness, DEVICE_PATH_KEY, FS_FORMAT_OPTIONS_KEY, TOPOLOGY_KEY,
};
use async_trait::async_trait;
use csi_mount_utils::Mounter;
use csi_proto::node::{
  AccessType, NodeCapabilities, NodeExpandVolumeError, NodeExpandVolumeRequest,
  NodeExpandVolumeResponse, NodeGetInfoResponse, NodeGetVolumeStatsError,
  NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeError,
  NodePublishVolumeRequest, NodeService, NodeUnpublishVolumeError, NodeUnpublishVolumeRequest,
  Topology, VolumeUsage,
};
use std::{path::Path, sync::Arc};
use tracing::info;

/// Request secret holding the LUKS passphrase of an encrypted volume.
pub const ENCRYPTION_PASSPHRASE_SECRET: &str = "encryption-passphrase";

pub const DEFAULT_MAX_VOLUMES_PER_NODE: u32 = 16;

fn mount_status(error: VolumeMountError) -> tonic::Status {
  match error {
    VolumeMountError::FormatOptions(_) => tonic::Status::invalid_argument(error.to_string()),
    error => tonic::Status::internal(error.to_string()),
  }
}

pub struct NodeServer<M: Mounter> {
  volumes: MountService<M>,
  node_id: String,
  location: String,
  max_volumes: u32,
  readiness: Arc<Readiness>,
}

impl<M: Mounter> NodeServer<M> {
  pub fn new(
    mounter: M,
    node_id: impl Into<String>,
    location: impl Into<String>,
    readiness: Arc<Readiness>,
  ) -> Self {
    NodeServer {
      volumes: MountService::new(mounter),
      node_id: node_id.into(),
      location: location.into(),
      max_volumes: DEFAULT_MAX_VOLUMES_PER_NODE,
      readiness,
    }
  }

  pub fn with_max_volumes(mut self, max_volumes: u32) -> Self {
    self.max_volumes = max_volumes;
    self
  }

  #[inline]
  pub fn readiness(&self) -> &Arc<Readiness> {
    &self.readiness
  }

  #[inline]
  pub fn volumes(&self) -> &MountService<M> {
    &self.volumes
  }

  fn require_path(&self, path: &Path) -> Result<(), String> {
    if self.volumes.path_exists(path) {
      Ok(())
    } else {
      Err(format!("volume path {} does not exist", path.display()))
    }
  }
}

plugin_identity!(NodeServer, M: Mounter);

#[async_trait]
impl<M: Mounter + 'static> NodeService for NodeServer<M> {
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::GET_VOLUME_STATS
      | NodeCapabilities::EXPAND_VOLUME
      | NodeCapabilities::SINGLE_NODE_MULTI_WRITER
  }

  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError> {
    let device = match request.publish_context().get(DEVICE_PATH_KEY) {
      Some(device) if !device.is_empty() => Path::new(device),
      _ => {
        return Err(
          tonic::Status::invalid_argument(format!("missing {} in publish context", DEVICE_PATH_KEY))
            .into(),
        )
      }
    };

    let capability = request.volume_capability();
    let mut opts = MountOpts {
      block_volume: capability.is_block(),
      readonly: request.readonly(),
      encryption_passphrase: request.secrets().get(ENCRYPTION_PASSPHRASE_SECRET).cloned(),
      fs_format_options: request.volume_context().get(FS_FORMAT_OPTIONS_KEY).cloned(),
      ..MountOpts::default()
    };

    if let AccessType::Mount(mount) = capability.access_type() {
      opts.fs_type = mount.fs_type().unwrap_or_default().to_owned();
      opts.additional_flags = mount.mount_flags().to_vec();
    }

    self
      .volumes
      .publish(device, request.target_path(), &opts)
      .await
      .map_err(mount_status)?;

    info!(
      volume_id = request.volume_id(),
      target = %request.target_path().display(),
      "published volume on node"
    );
    Ok(())
  }

  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError> {
    self
      .volumes
      .unpublish(request.target_path())
      .await
      .map_err(mount_status)?;

    info!(
      volume_id = request.volume_id(),
      target = %request.target_path().display(),
      "unpublished volume on node"
    );
    Ok(())
  }

  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse, NodeGetVolumeStatsError> {
    self
      .require_path(request.volume_path())
      .map_err(NodeGetVolumeStatsError::VolumeNotFound)?;

    let stats = self
      .volumes
      .stats(request.volume_path())
      .await
      .map_err(mount_status)?;

    Ok(NodeGetVolumeStatsResponse::new(vec![
      VolumeUsage::bytes(stats.available_bytes, stats.total_bytes, stats.used_bytes),
      VolumeUsage::inodes(
        stats.available_inodes,
        stats.total_inodes,
        stats.used_inodes,
      ),
    ]))
  }

  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    self
      .require_path(request.volume_path())
      .map_err(NodeExpandVolumeError::VolumeNotFound)?;

    // a raw block device grows with the disk
    if request.volume_capability().map_or(false, |c| c.is_block()) {
      return Ok(NodeExpandVolumeResponse::new(None));
    }

    self
      .volumes
      .resize(request.volume_path())
      .await
      .map_err(mount_status)?;

    info!(
      volume_id = request.volume_id(),
      path = %request.volume_path().display(),
      "expanded volume on node"
    );
    Ok(NodeExpandVolumeResponse::new(None))
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, tonic::Status> {
    let mut topology = Topology::new();
    topology.insert(TOPOLOGY_KEY.to_owned(), self.location.clone());

    Ok(
      NodeGetInfoResponse::new(self.node_id.clone())
        .with_max_volumes_per_node(self.max_volumes)
        .with_accessible_topology(topology),
    )
  }
}
