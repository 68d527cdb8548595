use std::{fmt, path::PathBuf};
use tracing::{field, Span};

/// Records a value on the current span under a field declared by `#[instrument]`.
pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_request(self) -> Self {
    self.record_field("request")
  }

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, &field::debug(&self));
    self
  }
}

#[inline]
pub(crate) fn record_request<T: fmt::Debug>(request: T) -> T {
  request.record_request()
}

/// Fails with `InvalidArgument` when a required string field is empty.
pub(crate) fn require(value: String, error: &'static str) -> Result<String, tonic::Status> {
  if value.is_empty() {
    Err(tonic::Status::invalid_argument(error))
  } else {
    Ok(value)
  }
}

/// Empty strings are how proto3 spells "not set".
#[inline]
pub(crate) fn optional(value: String) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

/// Fails with `InvalidArgument` when a required path is empty or relative.
pub(crate) fn require_absolute(
  value: String,
  empty: &'static str,
  relative: &'static str,
) -> Result<PathBuf, tonic::Status> {
  let path = PathBuf::from(require(value, empty)?);
  if path.is_absolute() {
    Ok(path)
  } else {
    Err(tonic::Status::invalid_argument(relative))
  }
}

/// Like [`require_absolute`], for paths that may be left unset.
pub(crate) fn optional_absolute(
  value: String,
  relative: &'static str,
) -> Result<Option<PathBuf>, tonic::Status> {
  match optional(value).map(PathBuf::from) {
    Some(path) if !path.is_absolute() => Err(tonic::Status::invalid_argument(relative)),
    path => Ok(path),
  }
}
