use super::VolumeCapability;
use crate::{proto, secrets::Secrets, utils::require};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerPublishVolumeRequest {
  volume_id: String,
  node_id: String,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl ControllerPublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Matches the node ID returned by `NodeGetInfo`.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// Context returned by `CreateVolume`.
  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::ControllerPublishVolumeRequest> for ControllerPublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerPublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(
      value.volume_id,
      "ControllerPublishVolumeRequest.volume_id is empty",
    )?;
    let node_id = require(
      value.node_id,
      "ControllerPublishVolumeRequest.node_id is empty",
    )?;

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "ControllerPublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(ControllerPublishVolumeRequest {
      volume_id,
      node_id,
      volume_capability,
      readonly: value.readonly,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerPublishVolumeResponse {
  publish_context: HashMap<String, String>,
}

impl ControllerPublishVolumeResponse {
  /// `publish_context` is passed verbatim to `NodePublishVolume`.
  pub fn new(publish_context: HashMap<String, String>) -> Self {
    ControllerPublishVolumeResponse { publish_context }
  }

  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }
}

impl From<ControllerPublishVolumeResponse> for proto::ControllerPublishVolumeResponse {
  fn from(value: ControllerPublishVolumeResponse) -> Self {
    proto::ControllerPublishVolumeResponse {
      publish_context: value.publish_context,
    }
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerPublishVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeDoesNotExist(String),

  #[error("Node does not exist: {0}")]
  NodeDoesNotExist(String),

  /// The volume is attached to another node.
  #[error("Volume published to another node: {0}")]
  PublishedToAnotherNode(String),

  /// The node cannot take any more volumes until one is detached.
  #[error("Max volumes attached: {0}")]
  MaxVolumesAttached(String),

  /// The node is busy with another operation; retry later.
  #[error("Node locked: {0}")]
  NodeLocked(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerPublishVolumeError> for tonic::Status {
  fn from(value: ControllerPublishVolumeError) -> tonic::Status {
    use tonic::{Code, Status};

    match value {
      ControllerPublishVolumeError::VolumeDoesNotExist(v) => Status::new(Code::NotFound, v),
      ControllerPublishVolumeError::NodeDoesNotExist(v) => Status::new(Code::NotFound, v),
      ControllerPublishVolumeError::PublishedToAnotherNode(v) => {
        Status::new(Code::FailedPrecondition, v)
      }
      ControllerPublishVolumeError::MaxVolumesAttached(v) => {
        Status::new(Code::ResourceExhausted, v)
      }
      ControllerPublishVolumeError::NodeLocked(v) => Status::new(Code::Unavailable, v),
      ControllerPublishVolumeError::Other(v) => v,
    }
  }
}
