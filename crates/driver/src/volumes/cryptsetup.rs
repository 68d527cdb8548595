use csi_mount_utils::{Cmd, MountError, Mounter, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Disk format blkid reports for a LUKS container.
pub const LUKS_FORMAT: &str = "crypto_LUKS";

const MAPPER_DIR: &str = "/dev/mapper";

/// `cryptsetup status` exit code for a mapping that is not active.
const STATUS_INACTIVE: i32 = 4;

/// Mapping name of an encrypted device: the file name of its path.
pub fn luks_name(device: &Path) -> Option<String> {
  device
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
}

pub fn mapper_path(name: &str) -> PathBuf {
  Path::new(MAPPER_DIR).join(name)
}

/// cryptsetup(8) run through the mounter's worker pool. Passphrases are
/// passed on stdin only.
pub struct Cryptsetup<'a, M> {
  mounter: &'a M,
}

impl<'a, M: Mounter> Cryptsetup<'a, M> {
  pub fn new(mounter: &'a M) -> Self {
    Cryptsetup { mounter }
  }

  async fn run(&self, cmd: Cmd) -> Result<()> {
    debug!(command = %cmd, "running cryptsetup");
    self.mounter.run(cmd.clone()).await?.check(&cmd)?;
    Ok(())
  }

  pub async fn format(&self, device: &Path, passphrase: &str) -> Result<()> {
    info!(device = %device.display(), "formatting LUKS container");
    let cmd = Cmd::new("cryptsetup")
      .args(vec!["luksFormat", "--type", "luks1", "--batch-mode"])
      .arg(device.display().to_string())
      .stdin(passphrase);

    self.run(cmd).await
  }

  /// Opens `device` as `/dev/mapper/<name>`. An active mapping is left as is.
  pub async fn open(&self, device: &Path, name: &str, passphrase: &str) -> Result<()> {
    if self.is_active(name).await? {
      debug!(name, "LUKS mapping already active");
      return Ok(());
    }

    info!(device = %device.display(), name, "opening LUKS container");
    let cmd = Cmd::new("cryptsetup")
      .args(vec!["luksOpen", "--allow-discards"])
      .arg(device.display().to_string())
      .arg(name)
      .stdin(passphrase);

    self.run(cmd).await
  }

  /// Closes the mapping `name`. An inactive mapping is left as is.
  pub async fn close(&self, name: &str) -> Result<()> {
    if !self.is_active(name).await? {
      return Ok(());
    }

    info!(name, "closing LUKS container");
    self.run(Cmd::new("cryptsetup").arg("luksClose").arg(name)).await
  }

  /// Grows the active mapping `name` to the size of its device.
  pub async fn resize(&self, name: &str) -> Result<()> {
    info!(name, "resizing LUKS container");
    self.run(Cmd::new("cryptsetup").arg("resize").arg(name)).await
  }

  pub async fn is_active(&self, name: &str) -> Result<bool> {
    let cmd = Cmd::new("cryptsetup").arg("status").arg(name);
    let output = self.mounter.run(cmd.clone()).await?;

    match output.code() {
      Some(0) => Ok(true),
      Some(STATUS_INACTIVE) => Ok(false),
      code => Err(MountError::CommandFailed {
        command: cmd.to_string(),
        code,
        output: output.output().to_owned(),
      }),
    }
  }
}
