use super::VolumeUsage;
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
pub struct NodeGetVolumeStatsRequest {
  volume_id: String,
  volume_path: PathBuf,
  staging_target_path: Option<PathBuf>,
}

impl NodeGetVolumeStatsRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Any path the volume is published at.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }
}

impl TryFrom<proto::NodeGetVolumeStatsRequest> for NodeGetVolumeStatsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeGetVolumeStatsRequest) -> Result<Self, Self::Error> {
    let volume_id = require(value.volume_id, "NodeGetVolumeStatsRequest.volume_id is empty")?;
    let volume_path = require_absolute(
      value.volume_path,
      "NodeGetVolumeStatsRequest.volume_path is empty",
      "NodeGetVolumeStatsRequest.volume_path is not absolute",
    )?;
    let staging_target_path = optional_absolute(
      value.staging_target_path,
      "NodeGetVolumeStatsRequest.staging_target_path is not absolute",
    )?;

    Ok(NodeGetVolumeStatsRequest {
      volume_id,
      volume_path,
      staging_target_path,
    })
  }
}

#[derive(Debug, Clone, Default)]
pub struct NodeGetVolumeStatsResponse {
  usage: Vec<VolumeUsage>,
}

impl NodeGetVolumeStatsResponse {
  pub fn new(usage: Vec<VolumeUsage>) -> Self {
    NodeGetVolumeStatsResponse { usage }
  }

  #[inline]
  pub fn usage(&self) -> &[VolumeUsage] {
    &self.usage
  }
}

impl TryFrom<NodeGetVolumeStatsResponse> for proto::NodeGetVolumeStatsResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeGetVolumeStatsResponse) -> Result<Self, Self::Error> {
    let usage = value
      .usage
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;

    Ok(proto::NodeGetVolumeStatsResponse {
      usage,
      volume_condition: None,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeGetVolumeStatsError {
  /// Nothing exists at the volume path.
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeGetVolumeStatsError> for tonic::Status {
  fn from(value: NodeGetVolumeStatsError) -> Self {
    match value {
      NodeGetVolumeStatsError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeGetVolumeStatsError::Other(v) => v,
    }
  }
}
