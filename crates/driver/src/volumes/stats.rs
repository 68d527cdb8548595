use csi_mount_utils::{dispatch, Result};
use nix::sys::statfs::{statfs, Statfs};
use std::{io, path::PathBuf};

/// Usage of the filesystem a path lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
  pub total_bytes: u64,
  pub available_bytes: u64,
  pub used_bytes: u64,
  pub total_inodes: u64,
  pub available_inodes: u64,
  pub used_inodes: u64,
}

impl From<&Statfs> for FsStats {
  // field widths differ between targets
  #[allow(clippy::unnecessary_cast)]
  fn from(st: &Statfs) -> Self {
    let block_size = st.block_size() as u64;
    let blocks = st.blocks() as u64;
    let files = st.files() as u64;
    let files_free = st.files_free() as u64;

    FsStats {
      total_bytes: blocks * block_size,
      available_bytes: st.blocks_available() as u64 * block_size,
      used_bytes: blocks.saturating_sub(st.blocks_free() as u64) * block_size,
      total_inodes: files,
      available_inodes: files_free,
      used_inodes: files.saturating_sub(files_free),
    }
  }
}

/// statfs(2) on the mount worker pool.
pub async fn fs_stats(path: PathBuf) -> Result<FsStats> {
  dispatch(move || {
    let st = statfs(&path).map_err(io::Error::from)?;
    Ok(FsStats::from(&st))
  })
  .await
}
