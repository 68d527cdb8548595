use super::{CapacityRange, VolumeCapability};
use crate::{proto, secrets::Secrets, utils::require};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerExpandVolumeRequest {
  volume_id: String,
  capacity_range: Option<CapacityRange>,
  secrets: Secrets,
  volume_capability: Option<VolumeCapability>,
}

impl ControllerExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::ControllerExpandVolumeRequest> for ControllerExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require(
      value.volume_id,
      "ControllerExpandVolumeRequest.volume_id is empty",
    )?;

    let volume_capability = value
      .volume_capability
      .map(TryInto::try_into)
      .transpose()?;

    Ok(ControllerExpandVolumeRequest {
      volume_id,
      capacity_range: value.capacity_range.map(Into::into),
      secrets: value.secrets.into(),
      volume_capability,
    })
  }
}

#[derive(Debug, Clone)]
pub struct ControllerExpandVolumeResponse {
  capacity_bytes: u64,
  node_expansion_required: bool,
}

impl ControllerExpandVolumeResponse {
  pub fn new(capacity_bytes: u64, node_expansion_required: bool) -> Self {
    ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required,
    }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn node_expansion_required(&self) -> bool {
    self.node_expansion_required
  }
}

impl TryFrom<ControllerExpandVolumeResponse> for proto::ControllerExpandVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: ControllerExpandVolumeResponse) -> Result<Self, Self::Error> {
    let capacity_bytes = i64::try_from(value.capacity_bytes)
      .map_err(|_| tonic::Status::out_of_range("capacity_bytes does not fit in an i64"))?;

    Ok(proto::ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required: value.node_expansion_required,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerExpandVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeDoesNotExist(String),

  #[error("Unsupported capacity range: {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerExpandVolumeError> for tonic::Status {
  fn from(value: ControllerExpandVolumeError) -> Self {
    match value {
      ControllerExpandVolumeError::VolumeDoesNotExist(v) => tonic::Status::not_found(v),
      ControllerExpandVolumeError::UnsupportedCapacityRange(v) => tonic::Status::out_of_range(v),
      ControllerExpandVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn capacity_range_is_passed_through() {
    let request = ControllerExpandVolumeRequest::try_from(proto::ControllerExpandVolumeRequest {
      volume_id: "3".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 20,
        limit_bytes: 0,
      }),
      ..Default::default()
    })
    .expect("valid request");

    assert_eq!(request.capacity_range(), Some(&CapacityRange::new(20, 0)));
    assert!(request.volume_capability().is_none());
  }

  #[test]
  fn response_converts() {
    let response =
      proto::ControllerExpandVolumeResponse::try_from(ControllerExpandVolumeResponse::new(1024, true))
        .expect("convertible");

    assert_eq!(response.capacity_bytes, 1024);
    assert!(response.node_expansion_required);
  }
}
