use super::{CapacityRange, VolumeCapability};
use crate::{
  proto,
  utils::{optional_absolute, require, require_absolute},
};
use std::{
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeExpandVolumeRequest {
  volume_id: String,
  volume_path: PathBuf,
  capacity_range: Option<CapacityRange>,
  staging_target_path: Option<PathBuf>,
  volume_capability: Option<VolumeCapability>,
}

impl NodeExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// When present, tells a block volume (nothing to grow on the node)
  /// apart from a mounted one.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::NodeExpandVolumeRequest> for NodeExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(value.volume_id, "NodeExpandVolumeRequest.volume_id is empty")?;
    let volume_path = require_absolute(
      value.volume_path,
      "NodeExpandVolumeRequest.volume_path is empty",
      "NodeExpandVolumeRequest.volume_path is not absolute",
    )?;
    let staging_target_path = optional_absolute(
      value.staging_target_path,
      "NodeExpandVolumeRequest.staging_target_path is not absolute",
    )?;

    let volume_capability = value
      .volume_capability
      .map(TryInto::try_into)
      .transpose()?;

    Ok(NodeExpandVolumeRequest {
      volume_id,
      volume_path,
      capacity_range: value.capacity_range.map(Into::into),
      staging_target_path,
      volume_capability,
    })
  }
}

#[derive(Debug, Clone, Default)]
pub struct NodeExpandVolumeResponse {
  capacity_bytes: Option<u64>,
}

impl NodeExpandVolumeResponse {
  pub fn new(capacity_bytes: Option<u64>) -> Self {
    NodeExpandVolumeResponse { capacity_bytes }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> Option<u64> {
    self.capacity_bytes
  }
}

impl TryFrom<NodeExpandVolumeResponse> for proto::NodeExpandVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeExpandVolumeResponse) -> Result<Self, Self::Error> {
    let capacity_bytes = match value.capacity_bytes {
      None => 0,
      Some(v) => i64::try_from(v)
        .map_err(|_| tonic::Status::out_of_range("capacity_bytes does not fit in an i64"))?,
    };

    Ok(proto::NodeExpandVolumeResponse { capacity_bytes })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeExpandVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error("Unsupported capacity_range: {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeExpandVolumeError> for tonic::Status {
  fn from(value: NodeExpandVolumeError) -> Self {
    match value {
      NodeExpandVolumeError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeExpandVolumeError::UnsupportedCapacityRange(v) => tonic::Status::out_of_range(v),
      NodeExpandVolumeError::Other(v) => v,
    }
  }
}
