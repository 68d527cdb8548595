use crate::{
  proto,
  utils::{require, require_absolute},
};
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeUnpublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
}

impl NodeUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The plugin removes whatever it created at this path.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }
}

impl TryFrom<proto::NodeUnpublishVolumeRequest> for NodeUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(
      value.volume_id,
      "NodeUnpublishVolumeRequest.volume_id is empty",
    )?;
    let target_path = require_absolute(
      value.target_path,
      "NodeUnpublishVolumeRequest.target_path is empty",
      "NodeUnpublishVolumeRequest.target_path is not absolute",
    )?;

    Ok(NodeUnpublishVolumeRequest {
      volume_id,
      target_path,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeUnpublishVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeUnpublishVolumeError> for tonic::Status {
  fn from(value: NodeUnpublishVolumeError) -> Self {
    match value {
      NodeUnpublishVolumeError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeUnpublishVolumeError::Other(v) => v,
    }
  }
}
