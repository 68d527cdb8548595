use crate::GIB;
use std::{collections::HashMap, fmt, num::ParseIntError, str::FromStr};
use thiserror::Error;

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $name(pub u64);

    impl FromStr for $name {
      type Err = ParseIntError;

      #[inline]
      fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map($name)
      }
    }

    impl fmt::Display for $name {
      #[inline]
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
      }
    }
  };
}

id_type! {
  /// Provider-assigned volume identifier. The decimal form is the CSI
  /// volume ID.
  VolumeId
}

id_type! {
  /// Compute instance a volume can be attached to. The decimal form is the
  /// CSI node ID.
  ServerId
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
  pub id: VolumeId,
  pub name: String,
  pub size_gib: u64,
  pub location: String,
  /// Device path on the attached server. Empty when detached.
  pub linux_device: String,
  pub attached_server: Option<ServerId>,
}

impl Volume {
  #[inline]
  pub fn size_bytes(&self) -> u64 {
    self.size_gib * GIB
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOpts {
  pub name: String,
  pub min_size_gib: u64,
  /// Zero means unbounded.
  pub max_size_gib: u64,
  pub location: String,
  pub labels: HashMap<String, String>,
}

impl CreateOpts {
  /// Whether an existing volume with the same name is an acceptable result
  /// of creating a volume with these options.
  pub fn accepts(&self, existing: &Volume) -> bool {
    existing.size_gib >= self.min_size_gib
      && (self.max_size_gib == 0 || existing.size_gib <= self.max_size_gib)
      && existing.location == self.location
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeError {
  #[error("volume not found")]
  VolumeNotFound,

  #[error("volume already exists")]
  VolumeAlreadyExists,

  #[error("server not found")]
  ServerNotFound,

  #[error("volume is attached")]
  Attached,

  #[error("volume is not attached")]
  NotAttached,

  #[error("max number of attachments per server reached")]
  AttachLimitReached,

  #[error("server is locked")]
  LockedServer,

  #[error("volume size is already larger or equal than the requested size")]
  VolumeSizeAlreadyReached,

  #[error("{0}")]
  Other(String),
}

pub type Result<T> = std::result::Result<T, VolumeError>;
