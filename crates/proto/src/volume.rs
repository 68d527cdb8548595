use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
};

use crate::proto;

/// Topology segments, e.g. `{"csi.example.io/location": "fsn1"}`.
pub type Topology = HashMap<String, String>;

fn to_wire_bytes(value: u64, field: &'static str) -> Result<i64, tonic::Status> {
  i64::try_from(value).map_err(|_| tonic::Status::out_of_range(format!("{} overflows int64", field)))
}

/// Where a new volume must (requisite) or should (preferred) be reachable from.
#[derive(Debug, Clone, Default)]
pub struct TopologyRequirement {
  requisite: Vec<Topology>,
  preferred: Vec<Topology>,
}

impl TopologyRequirement {
  pub fn new(requisite: Vec<Topology>, preferred: Vec<Topology>) -> Self {
    TopologyRequirement {
      requisite,
      preferred,
    }
  }

  #[inline]
  pub fn requisite(&self) -> &[Topology] {
    &self.requisite
  }

  /// Ordered by preference, most preferred first.
  #[inline]
  pub fn preferred(&self) -> &[Topology] {
    &self.preferred
  }
}

impl From<proto::TopologyRequirement> for TopologyRequirement {
  fn from(value: proto::TopologyRequirement) -> Self {
    let requisite = value.requisite.into_iter().map(|t| t.segments).collect();
    let preferred = value.preferred.into_iter().map(|t| t.segments).collect();

    TopologyRequirement::new(requisite, preferred)
  }
}

/// Requested capacity bounds in bytes, as sent by the orchestrator. Zero
/// means "not set". Values are not validated here so that the plugin can
/// decide how out-of-range requests are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityRange {
  required_bytes: i64,
  limit_bytes: i64,
}

impl CapacityRange {
  #[inline]
  pub fn new(required_bytes: i64, limit_bytes: i64) -> Self {
    CapacityRange {
      required_bytes,
      limit_bytes,
    }
  }

  #[inline]
  pub fn required_bytes(&self) -> i64 {
    self.required_bytes
  }

  #[inline]
  pub fn limit_bytes(&self) -> i64 {
    self.limit_bytes
  }
}

impl From<proto::CapacityRange> for CapacityRange {
  #[inline]
  fn from(value: proto::CapacityRange) -> Self {
    CapacityRange::new(value.required_bytes, value.limit_bytes)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
  capacity_bytes: u64,
  volume_id: String,
  volume_context: HashMap<String, String>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>, capacity_bytes: u64) -> Self {
    Volume {
      capacity_bytes,
      volume_id: volume_id.into(),
      volume_context: HashMap::new(),
      accessible_topology: Vec::new(),
    }
  }

  /// Context handed back to the node on publish.
  pub fn with_volume_context(mut self, volume_context: HashMap<String, String>) -> Self {
    self.volume_context = volume_context;
    self
  }

  pub fn with_accessible_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology.push(topology);
    self
  }

  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  #[inline]
  pub fn accessible_topology(&self) -> &[Topology] {
    &self.accessible_topology
  }
}

impl TryFrom<Volume> for proto::Volume {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    let capacity_bytes = to_wire_bytes(value.capacity_bytes, "Volume.capacity_bytes")?;
    let accessible_topology = value
      .accessible_topology
      .into_iter()
      .map(|segments| proto::Topology { segments })
      .collect();

    Ok(proto::Volume {
      capacity_bytes,
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: None,
      accessible_topology,
    })
  }
}

impl TryFrom<Volume> for proto::CreateVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    let volume = Some(value.try_into()?);

    Ok(proto::CreateVolumeResponse { volume })
  }
}

#[derive(Debug, Clone)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }

  #[inline]
  pub fn is_block(&self) -> bool {
    matches!(self.access_type, AccessType::Block)
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .map(AccessMode::from)
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_mode missing"))?;

    let access_type = value
      .access_type
      .map(AccessType::from)
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_type missing"))?;

    Ok(VolumeCapability::new(access_mode, access_type))
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

/// Closed set of CSI access modes. Unrecognized wire values map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
  Unknown,
  /// Read/write on a single node.
  SingleNodeWriter,
  SingleNodeReaderOnly,
  MultiNodeReaderOnly,
  MultiNodeSingleWriter,
  MultiNodeMultiWriter,
  /// Read/write by a single workload on a single node.
  SingleNodeSingleWriter,
  /// Read/write by several workloads on a single node.
  SingleNodeMultiWriter,
}

use proto::volume_capability::access_mode::Mode;

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    match Mode::from_i32(value.mode) {
      Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      Some(Mode::SingleNodeSingleWriter) => AccessMode::SingleNodeSingleWriter,
      Some(Mode::SingleNodeMultiWriter) => AccessMode::SingleNodeMultiWriter,
      Some(Mode::Unknown) | None => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
      AccessMode::SingleNodeSingleWriter => Mode::SingleNodeSingleWriter,
      AccessMode::SingleNodeMultiWriter => Mode::SingleNodeMultiWriter,
    };

    proto::volume_capability::AccessMode { mode: mode as i32 }
  }
}

#[derive(Debug, Clone)]
pub enum AccessType {
  /// Raw block device.
  Block,

  /// Mounted filesystem.
  Mount(MountVolume),
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, Default)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type,
      mount_flags,
    }
  }

  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// Mount flags may carry sensitive material and are never printed.
  #[inline]
  pub fn mount_flags(&self) -> &[String] {
    &self.mount_flags
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    let fs_type = match value.fs_type {
      v if v.is_empty() => None,
      v => Some(v),
    };

    MountVolume::new(fs_type, value.mount_flags)
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format_args!("<{} redacted>", self.mount_flags.len()),
      )
      .finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUsageUnit {
  Bytes,
  Inodes,
}

impl From<VolumeUsageUnit> for proto::volume_usage::Unit {
  fn from(value: VolumeUsageUnit) -> Self {
    match value {
      VolumeUsageUnit::Bytes => proto::volume_usage::Unit::Bytes,
      VolumeUsageUnit::Inodes => proto::volume_usage::Unit::Inodes,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
  available: u64,
  total: u64,
  used: u64,
  unit: VolumeUsageUnit,
}

impl VolumeUsage {
  pub fn bytes(available: u64, total: u64, used: u64) -> Self {
    VolumeUsage {
      available,
      total,
      used,
      unit: VolumeUsageUnit::Bytes,
    }
  }

  pub fn inodes(available: u64, total: u64, used: u64) -> Self {
    VolumeUsage {
      available,
      total,
      used,
      unit: VolumeUsageUnit::Inodes,
    }
  }

  #[inline]
  pub fn available(&self) -> u64 {
    self.available
  }

  #[inline]
  pub fn total(&self) -> u64 {
    self.total
  }

  #[inline]
  pub fn used(&self) -> u64 {
    self.used
  }

  #[inline]
  pub fn unit(&self) -> VolumeUsageUnit {
    self.unit
  }
}

impl TryFrom<VolumeUsage> for proto::VolumeUsage {
  type Error = tonic::Status;

  fn try_from(value: VolumeUsage) -> Result<Self, Self::Error> {
    Ok(proto::VolumeUsage {
      available: to_wire_bytes(value.available, "VolumeUsage.available")?,
      total: to_wire_bytes(value.total, "VolumeUsage.total")?,
      used: to_wire_bytes(value.used, "VolumeUsage.used")?,
      unit: proto::volume_usage::Unit::from(value.unit) as i32,
    })
  }
}
