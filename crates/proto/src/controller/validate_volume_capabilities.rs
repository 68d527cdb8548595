use super::VolumeCapability;
use crate::{proto, secrets::Secrets, utils::require};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct ValidateVolumeCapabilitiesRequest {
  volume_id: String,
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
}

impl ValidateVolumeCapabilitiesRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  /// Never empty.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ValidateVolumeCapabilitiesRequest> for ValidateVolumeCapabilitiesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ValidateVolumeCapabilitiesRequest) -> Result<Self, Self::Error> {
    let volume_id = require(
      value.volume_id,
      "ValidateVolumeCapabilitiesRequest.volume_id is empty",
    )?;

    if value.volume_capabilities.is_empty() {
      return Err(tonic::Status::invalid_argument(
        "ValidateVolumeCapabilitiesRequest.volume_capabilities is empty",
      ));
    }

    let volume_capabilities = value
      .volume_capabilities
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;

    Ok(ValidateVolumeCapabilitiesRequest {
      volume_id,
      volume_context: value.volume_context,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug, Clone)]
pub enum ValidateVolumeCapabilitiesResponse {
  /// Every requested capability is supported. The fields echo the ones
  /// that were validated.
  Confirmed {
    volume_context: HashMap<String, String>,
    volume_capabilities: Vec<VolumeCapability>,
    parameters: HashMap<String, String>,
  },

  /// At least one capability is not supported.
  NotConfirmed(String),
}

impl ValidateVolumeCapabilitiesResponse {
  pub fn confirmed(request: &ValidateVolumeCapabilitiesRequest) -> Self {
    ValidateVolumeCapabilitiesResponse::Confirmed {
      volume_context: request.volume_context.clone(),
      volume_capabilities: request.volume_capabilities.clone(),
      parameters: request.parameters.clone(),
    }
  }

  pub fn not_confirmed(message: impl Into<String>) -> Self {
    ValidateVolumeCapabilitiesResponse::NotConfirmed(message.into())
  }

  #[inline]
  pub fn is_confirmed(&self) -> bool {
    matches!(self, ValidateVolumeCapabilitiesResponse::Confirmed { .. })
  }
}

impl From<ValidateVolumeCapabilitiesResponse> for proto::ValidateVolumeCapabilitiesResponse {
  fn from(value: ValidateVolumeCapabilitiesResponse) -> Self {
    match value {
      ValidateVolumeCapabilitiesResponse::Confirmed {
        volume_context,
        volume_capabilities,
        parameters,
      } => proto::ValidateVolumeCapabilitiesResponse {
        confirmed: Some(proto::validate_volume_capabilities_response::Confirmed {
          volume_context,
          volume_capabilities: volume_capabilities.into_iter().map(Into::into).collect(),
          parameters,
        }),
        message: String::new(),
      },
      ValidateVolumeCapabilitiesResponse::NotConfirmed(message) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: None,
          message,
        }
      }
    }
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ValidateVolumeCapabilitiesError {
  #[error("Volume does not exist: {0}")]
  VolumeDoesNotExist(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ValidateVolumeCapabilitiesError> for tonic::Status {
  fn from(value: ValidateVolumeCapabilitiesError) -> Self {
    match value {
      ValidateVolumeCapabilitiesError::VolumeDoesNotExist(v) => tonic::Status::not_found(v),
      ValidateVolumeCapabilitiesError::Other(v) => v,
    }
  }
}
