use crate::{DEFAULT_VOLUME_SIZE, GIB, MIN_VOLUME_SIZE};
use csi_proto::controller::CapacityRange;
use std::convert::TryFrom;

/// Volume size bounds in GiB for a requested capacity range: the minimum,
/// rounded up and at least [`MIN_VOLUME_SIZE`], and the maximum, rounded
/// down with zero meaning unbounded. `None` when the range is negative or
/// cannot be satisfied.
pub fn volume_size_from_capacity_range(range: Option<&CapacityRange>) -> Option<(u64, u64)> {
  let range = match range {
    None => return Some((DEFAULT_VOLUME_SIZE, 0)),
    Some(range) => range,
  };

  let required = u64::try_from(range.required_bytes()).ok()?;
  let limit = u64::try_from(range.limit_bytes()).ok()?;

  let min_size = match required {
    0 => DEFAULT_VOLUME_SIZE,
    bytes => ((bytes + GIB - 1) / GIB).max(MIN_VOLUME_SIZE),
  };

  let max_size = limit / GIB;
  if max_size != 0 && min_size > max_size {
    return None;
  }

  Some((min_size, max_size))
}
