use super::Volume;
use crate::{proto, utils::optional};
use std::convert::{TryFrom, TryInto};
use thiserror::Error;

#[derive(Debug)]
pub struct ListVolumesRequest {
  max_entries: u32,
  starting_token: Option<String>,
}

impl ListVolumesRequest {
  /// Zero means no limit.
  #[inline]
  pub fn max_entries(&self) -> u32 {
    self.max_entries
  }

  /// Token from a previous `ListVolumesResponse::next_token`.
  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }
}

impl TryFrom<proto::ListVolumesRequest> for ListVolumesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListVolumesRequest) -> Result<Self, Self::Error> {
    let max_entries = u32::try_from(value.max_entries).map_err(|_| {
      tonic::Status::invalid_argument("ListVolumesRequest.max_entries is negative")
    })?;

    Ok(ListVolumesRequest {
      max_entries,
      starting_token: optional(value.starting_token),
    })
  }
}

#[derive(Debug, Clone)]
pub struct ListVolumesEntry {
  volume: Volume,
  published_node_ids: Vec<String>,
}

impl ListVolumesEntry {
  pub fn new(volume: Volume) -> Self {
    ListVolumesEntry {
      volume,
      published_node_ids: Vec::new(),
    }
  }

  pub fn with_published_node(mut self, node_id: impl Into<String>) -> Self {
    self.published_node_ids.push(node_id.into());
    self
  }

  #[inline]
  pub fn volume(&self) -> &Volume {
    &self.volume
  }

  #[inline]
  pub fn published_node_ids(&self) -> &[String] {
    &self.published_node_ids
  }
}

impl TryFrom<ListVolumesEntry> for proto::list_volumes_response::Entry {
  type Error = tonic::Status;

  fn try_from(value: ListVolumesEntry) -> Result<Self, Self::Error> {
    Ok(proto::list_volumes_response::Entry {
      volume: Some(value.volume.try_into()?),
      status: Some(proto::list_volumes_response::VolumeStatus {
        published_node_ids: value.published_node_ids,
        volume_condition: None,
      }),
    })
  }
}

#[derive(Debug, Clone, Default)]
pub struct ListVolumesResponse {
  entries: Vec<ListVolumesEntry>,
  next_token: Option<String>,
}

impl ListVolumesResponse {
  pub fn new(entries: Vec<ListVolumesEntry>) -> Self {
    ListVolumesResponse {
      entries,
      next_token: None,
    }
  }

  pub fn with_next_token(mut self, next_token: impl Into<String>) -> Self {
    self.next_token = Some(next_token.into());
    self
  }

  #[inline]
  pub fn entries(&self) -> &[ListVolumesEntry] {
    &self.entries
  }

  #[inline]
  pub fn next_token(&self) -> Option<&str> {
    self.next_token.as_deref()
  }
}

impl TryFrom<ListVolumesResponse> for proto::ListVolumesResponse {
  type Error = tonic::Status;

  fn try_from(value: ListVolumesResponse) -> Result<Self, Self::Error> {
    let entries = value
      .entries
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;

    Ok(proto::ListVolumesResponse {
      entries,
      next_token: value.next_token.unwrap_or_default(),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ListVolumesError {
  #[error("Invalid starting token: {0}")]
  InvalidStartingToken(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ListVolumesError> for tonic::Status {
  fn from(value: ListVolumesError) -> Self {
    match value {
      ListVolumesError::InvalidStartingToken(v) => tonic::Status::aborted(v),
      ListVolumesError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_max_entries_is_rejected() {
    let err = ListVolumesRequest::try_from(proto::ListVolumesRequest {
      max_entries: -1,
      starting_token: String::new(),
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn entries_carry_published_nodes() {
    let response = ListVolumesResponse::new(vec![
      ListVolumesEntry::new(Volume::new("1", 10)).with_published_node("42"),
      ListVolumesEntry::new(Volume::new("2", 20)),
    ]);

    let response = proto::ListVolumesResponse::try_from(response).expect("convertible");
    assert_eq!(response.entries.len(), 2);
    assert!(response.next_token.is_empty());

    let status = response.entries[0].status.as_ref().expect("status");
    assert_eq!(status.published_node_ids, vec!["42".to_string()]);

    let status = response.entries[1].status.as_ref().expect("status");
    assert!(status.published_node_ids.is_empty());
  }
}
