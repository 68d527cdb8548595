use super::VolumeCapability;
use crate::{
  proto,
  secrets::Secrets,
  utils::{optional_absolute, require, require_absolute},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodePublishVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  staging_target_path: Option<PathBuf>,
  target_path: PathBuf,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Context returned by `ControllerPublishVolume`.
  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// Only set when the plugin advertises `STAGE_UNSTAGE_VOLUME`.
  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// Absolute path the volume is published at. A block volume is placed
  /// at this path as a file, a mounted volume as a directory. The plugin
  /// creates the path itself.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
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

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodePublishVolumeRequest> for NodePublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodePublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(value.volume_id, "NodePublishVolumeRequest.volume_id is empty")?;
    let target_path = require_absolute(
      value.target_path,
      "NodePublishVolumeRequest.target_path is empty",
      "NodePublishVolumeRequest.target_path is not absolute",
    )?;
    let staging_target_path = optional_absolute(
      value.staging_target_path,
      "NodePublishVolumeRequest.staging_target_path is not absolute",
    )?;

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(NodePublishVolumeRequest {
      volume_id,
      publish_context: value.publish_context,
      staging_target_path,
      target_path,
      volume_capability,
      readonly: value.readonly,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodePublishVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  /// Already published at the target path with an incompatible capability
  /// or readonly flag.
  #[error("Volume published but is incompatible: {0}")]
  IncompatibleVolumePublished(String),

  #[error("Exceeds capabilities: {0}")]
  ExceedsCapabilities(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodePublishVolumeError> for tonic::Status {
  fn from(value: NodePublishVolumeError) -> Self {
    use tonic::{Code, Status};

    let code = match &value {
      NodePublishVolumeError::VolumeNotFound(_) => Code::NotFound,
      NodePublishVolumeError::IncompatibleVolumePublished(_) => Code::AlreadyExists,
      NodePublishVolumeError::ExceedsCapabilities(_) => Code::FailedPrecondition,
      NodePublishVolumeError::Other(_) => Code::Internal,
    };

    match value {
      NodePublishVolumeError::Other(v) => v,
      value => Status::new(code, value.to_string()),
    }
  }
}
