use crate::{proto, secrets::Secrets, utils::require};
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct DeleteVolumeRequest {
  volume_id: String,
  secrets: Secrets,
}

impl DeleteVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::DeleteVolumeRequest> for DeleteVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(value.volume_id, "DeleteVolumeRequest.volume_id is empty")?;

    Ok(DeleteVolumeRequest {
      volume_id,
      secrets: value.secrets.into(),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DeleteVolumeError {
  /// The volume is still attached and cannot be deleted.
  #[error("Volume in use: {0}")]
  VolumeInUse(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<DeleteVolumeError> for tonic::Status {
  fn from(value: DeleteVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      DeleteVolumeError::VolumeInUse(v) => Status::new(Code::FailedPrecondition, v),
      DeleteVolumeError::Other(v) => v,
    }
  }
}
