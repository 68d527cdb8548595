use crate::{
  proto,
  secrets::Secrets,
  utils::{optional, require},
};
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerUnpublishVolumeRequest {
  volume_id: String,
  node_id: Option<String>,
  secrets: Secrets,
}

impl ControllerUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// `None` means the volume is to be unpublished from every node.
  #[inline]
  pub fn node_id(&self) -> Option<&str> {
    self.node_id.as_deref()
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ControllerUnpublishVolumeRequest> for ControllerUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(
      value.volume_id,
      "ControllerUnpublishVolumeRequest.volume_id is empty",
    )?;

    Ok(ControllerUnpublishVolumeRequest {
      volume_id,
      node_id: optional(value.node_id),
      secrets: value.secrets.into(),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerUnpublishVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeDoesNotExist(String),

  #[error("Node does not exist: {0}")]
  NodeDoesNotExist(String),

  #[error("Node locked: {0}")]
  NodeLocked(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerUnpublishVolumeError> for tonic::Status {
  fn from(value: ControllerUnpublishVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      ControllerUnpublishVolumeError::VolumeDoesNotExist(v) => Status::new(Code::NotFound, v),
      ControllerUnpublishVolumeError::NodeDoesNotExist(v) => Status::new(Code::NotFound, v),
      ControllerUnpublishVolumeError::NodeLocked(v) => Status::new(Code::Unavailable, v),
      ControllerUnpublishVolumeError::Other(v) => v,
    }
  }
}
