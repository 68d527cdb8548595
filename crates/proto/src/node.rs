mod capabilities;
mod expand_volume;
mod get_info;
mod get_volume_stats;
mod publish_volume;
mod unpublish_volume;

use crate::{
  proto,
  utils::{record_request, Record},
  IdentityService,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use expand_volume::*;
pub use get_info::*;
pub use get_volume_stats::*;
pub use publish_volume::*;
pub use unpublish_volume::*;

/// Node half of a CSI plugin, running on every host that consumes volumes.
///
/// The plugin publishes straight from the attached device to the target
/// path, so the staging RPCs are always answered with `Unimplemented`.
#[async_trait]
pub trait NodeService: IdentityService {
  #[inline]
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// Make the volume available at the target path. Publishing to a path
  /// the volume is already published at is a success.
  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError>;

  /// Undo `NodePublishVolume`. A target path that is gone is a success.
  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError>;

  #[allow(unused_variables)]
  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse, NodeGetVolumeStatsError> {
    unsupported!("NodeGetVolumeStats")
  }

  #[allow(unused_variables)]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    unsupported!("NodeExpandVolume")
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, tonic::Status>;
}

pub(crate) struct Node<T: NodeService>(pub(crate) Arc<T>);

#[async_trait]
impl<T: NodeService> proto::node_server::Node for Node<T> {
  async fn node_stage_volume(
    &self,
    _request: tonic::Request<proto::NodeStageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeStageVolumeResponse>, tonic::Status> {
    unsupported!("NodeStageVolume")
  }

  async fn node_unstage_volume(
    &self,
    _request: tonic::Request<proto::NodeUnstageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnstageVolumeResponse>, tonic::Status> {
    unsupported!("NodeUnstageVolume")
  }

  #[instrument(name = "node.node_publish_volume", skip(self, request), fields(request))]
  async fn node_publish_volume(
    &self,
    request: tonic::Request<proto::NodePublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodePublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_publish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn node_unpublish_volume(
    &self,
    request: tonic::Request<proto::NodeUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_unpublish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_get_volume_stats",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_get_volume_stats(
    &self,
    request: tonic::Request<proto::NodeGetVolumeStatsRequest>,
  ) -> Result<tonic::Response<proto::NodeGetVolumeStatsResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .node_get_volume_stats(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_expand_volume(
    &self,
    request: tonic::Request<proto::NodeExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .node_expand_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_capabilities(
    &self,
    _request: tonic::Request<proto::NodeGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::NodeGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "node.node_get_info", skip(self, _request), fields(response))]
  async fn node_get_info(
    &self,
    _request: tonic::Request<proto::NodeGetInfoRequest>,
  ) -> Result<tonic::Response<proto::NodeGetInfoResponse>, tonic::Status> {
    let response = self
      .0
      .node_get_info()
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }
}
