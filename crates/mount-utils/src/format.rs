use crate::{
  exec::{Cmd, Exec},
  MountError, Result,
};
use std::path::Path;
use tracing::{debug, info};

/// Reported by [`get_disk_format`] for a disk that carries a partition
/// table but no filesystem.
pub const UNKNOWN_PARTITIONED_FORMAT: &str = "unknown data, probably partitions";

/// blkid exit code for "no recognizable signature".
const BLKID_NOTHING_FOUND: i32 = 2;

pub(crate) fn get_disk_format(exec: &impl Exec, device: &Path) -> Result<Option<String>> {
  let cmd = Cmd::new("blkid").args(vec![
    "-p".to_string(),
    "-s".into(),
    "TYPE".into(),
    "-s".into(),
    "PTTYPE".into(),
    "-o".into(),
    "export".into(),
    device.display().to_string(),
  ]);

  let output = exec.run(&cmd)?;
  match output.code() {
    Some(0) => (),
    Some(BLKID_NOTHING_FOUND) => {
      debug!(device = %device.display(), "no filesystem found");
      return Ok(None);
    }
    _ => {
      return Err(MountError::GetDiskFormatFailed(format!(
        "{}: exit code {:?}: {}",
        cmd,
        output.code(),
        output.output()
      )))
    }
  }

  let mut fstype = None;
  let mut pttype = None;
  for line in output.output().lines() {
    match line.trim().split_once('=') {
      Some(("TYPE", v)) if !v.is_empty() => fstype = Some(v.to_owned()),
      Some(("PTTYPE", v)) if !v.is_empty() => pttype = Some(v.to_owned()),
      _ => (),
    }
  }

  if let Some(pttype) = pttype {
    debug!(device = %device.display(), pttype = %pttype, "partition table found");
    if fstype.is_none() {
      return Ok(Some(UNKNOWN_PARTITIONED_FORMAT.to_owned()));
    }
  }

  Ok(fstype)
}

pub(crate) fn make_fs(
  exec: &impl Exec,
  device: &Path,
  fstype: &str,
  format_options: &[String],
) -> Result<()> {
  let mut args: Vec<String> = match fstype {
    "ext3" | "ext4" => vec!["-F".into(), "-m0".into()],
    _ => Vec::new(),
  };
  args.extend(format_options.iter().cloned());
  args.push(device.display().to_string());

  let cmd = Cmd::new(format!("mkfs.{}", fstype)).args(args);
  info!(device = %device.display(), fstype, command = %cmd, "formatting disk");

  let output = exec.run(&cmd)?;
  if !output.is_success() {
    return Err(MountError::FormatFailed(format!(
      "{}: exit code {:?}: {}",
      cmd,
      output.code(),
      output.output()
    )));
  }

  Ok(())
}

pub(crate) fn resize_fs(
  exec: &impl Exec,
  device: &Path,
  mount_path: &Path,
  fstype: &str,
) -> Result<()> {
  let cmd = match fstype {
    "ext3" | "ext4" => Cmd::new("resize2fs").arg(device.display().to_string()),
    "xfs" => Cmd::new("xfs_growfs")
      .arg("-d")
      .arg(mount_path.display().to_string()),
    "btrfs" => Cmd::new("btrfs").args(vec![
      "filesystem".to_string(),
      "resize".into(),
      "max".into(),
      mount_path.display().to_string(),
    ]),
    other => return Err(MountError::UnsupportedResize(other.to_owned())),
  };

  info!(device = %device.display(), fstype, command = %cmd, "resizing filesystem");
  let output = exec.run(&cmd)?;
  if !output.is_success() {
    return Err(MountError::ResizeFailed(format!(
      "{}: exit code {:?}: {}",
      cmd,
      output.code(),
      output.output()
    )));
  }

  Ok(())
}
