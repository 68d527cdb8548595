use super::{CapacityRange, TopologyRequirement, VolumeCapability};
use crate::{proto, secrets::Secrets, utils::require};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
  accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeRequest {
  /// Suggested name, the idempotency key of the call.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// `None` lets the plugin pick a size.
  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  /// Never empty.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// Opaque storage class parameters.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn accessibility_requirements(&self) -> Option<&TopologyRequirement> {
    self.accessibility_requirements.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = require(value.name, "CreateVolumeRequest.name is empty")?;

    if value.volume_capabilities.is_empty() {
      return Err(tonic::Status::invalid_argument(
        "CreateVolumeRequest.volume_capabilities is empty",
      ));
    }

    if value.volume_content_source.is_some() {
      return Err(tonic::Status::invalid_argument(
        "CreateVolumeRequest.volume_content_source is not supported",
      ));
    }

    let volume_capabilities = value
      .volume_capabilities
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;

    Ok(CreateVolumeRequest {
      name,
      capacity_range: value.capacity_range.map(Into::into),
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
      accessibility_requirements: value.accessibility_requirements.map(Into::into),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CreateVolumeError {
  /// A volume with the same name exists but does not match the request.
  #[error("Volume already exists: {0}")]
  AlreadyExists(String),

  /// The capacity range is invalid or cannot be satisfied.
  #[error("Unsupported capacity range: {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<CreateVolumeError> for tonic::Status {
  fn from(value: CreateVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      CreateVolumeError::AlreadyExists(v) => Status::new(Code::AlreadyExists, v),
      CreateVolumeError::UnsupportedCapacityRange(v) => Status::new(Code::OutOfRange, v),
      CreateVolumeError::Other(v) => v,
    }
  }
}
