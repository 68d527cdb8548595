mod capabilities;
mod create_volume;
mod delete_volume;
mod expand_volume;
mod list_volumes;
mod publish_volume;
mod unpublish_volume;
mod validate_volume_capabilities;

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
pub use create_volume::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use list_volumes::*;
pub use publish_volume::*;
pub use unpublish_volume::*;
pub use validate_volume_capabilities::*;

/// Control-plane half of a CSI plugin.
///
/// Every RPC must be idempotent: the orchestrator retries after timeouts
/// without knowing whether the previous attempt took effect. Methods that
/// are not overridden answer `Unimplemented`; advertise only what is
/// implemented through [`ControllerService::capabilities`].
#[async_trait]
pub trait ControllerService: IdentityService {
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// Provision a volume. A volume with the same `name` that satisfies the
  /// request must be returned as if it had just been created.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    unsupported!("CreateVolume")
  }

  /// Deprovision a volume. A volume that no longer exists is a success.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    unsupported!("DeleteVolume")
  }

  /// Make a volume available on a node (attach).
  #[allow(unused_variables)]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    unsupported!("ControllerPublishVolume")
  }

  /// Reverse of `ControllerPublishVolume` (detach). A volume that is not
  /// attached to the node, or no longer exists, is a success.
  #[allow(unused_variables)]
  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    unsupported!("ControllerUnpublishVolume")
  }

  /// Confirm only when every requested capability is supported.
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError>;

  #[allow(unused_variables)]
  async fn list_volumes(
    &self,
    request: ListVolumesRequest,
  ) -> Result<ListVolumesResponse, ListVolumesError> {
    unsupported!("ListVolumes")
  }

  /// Grow a volume. A volume that is already at least the requested size
  /// is a success.
  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    unsupported!("ControllerExpandVolume")
  }
}

pub(crate) struct Controller<T: ControllerService>(pub(crate) Arc<T>);

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: tonic::Request<proto::CreateVolumeRequest>,
  ) -> Result<tonic::Response<proto::CreateVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .create_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.delete_volume",
    skip(self, request),
    fields(request)
  )]
  async fn delete_volume(
    &self,
    request: tonic::Request<proto::DeleteVolumeRequest>,
  ) -> Result<tonic::Response<proto::DeleteVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.delete_volume(request).await?;
    Ok(tonic::Response::new(proto::DeleteVolumeResponse {}))
  }

  #[instrument(
    name = "controller.controller_publish_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_publish_volume(
    &self,
    request: tonic::Request<proto::ControllerPublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerPublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .controller_publish_volume(request)
      .await?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: tonic::Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.controller_unpublish_volume(request).await?;
    Ok(tonic::Response::new(
      proto::ControllerUnpublishVolumeResponse {},
    ))
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: tonic::Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ValidateVolumeCapabilitiesResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .validate_volume_capabilities(request)
      .await?
      .record_response()
      .into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.list_volumes",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_volumes(
    &self,
    request: tonic::Request<proto::ListVolumesRequest>,
  ) -> Result<tonic::Response<proto::ListVolumesResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .list_volumes(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  async fn get_capacity(
    &self,
    _request: tonic::Request<proto::GetCapacityRequest>,
  ) -> Result<tonic::Response<proto::GetCapacityResponse>, tonic::Status> {
    unsupported!("GetCapacity")
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: tonic::Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  async fn create_snapshot(
    &self,
    _request: tonic::Request<proto::CreateSnapshotRequest>,
  ) -> Result<tonic::Response<proto::CreateSnapshotResponse>, tonic::Status> {
    unsupported!("CreateSnapshot")
  }

  async fn delete_snapshot(
    &self,
    _request: tonic::Request<proto::DeleteSnapshotRequest>,
  ) -> Result<tonic::Response<proto::DeleteSnapshotResponse>, tonic::Status> {
    unsupported!("DeleteSnapshot")
  }

  async fn list_snapshots(
    &self,
    _request: tonic::Request<proto::ListSnapshotsRequest>,
  ) -> Result<tonic::Response<proto::ListSnapshotsResponse>, tonic::Status> {
    unsupported!("ListSnapshots")
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: tonic::Request<proto::ControllerExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .controller_expand_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  async fn controller_get_volume(
    &self,
    _request: tonic::Request<proto::ControllerGetVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetVolumeResponse>, tonic::Status> {
    unsupported!("ControllerGetVolume")
  }
}
