//! Local volume pipeline: makes an attached device usable at a target path.
//!
//! There is no staging step. A publish goes straight from the raw device
//! (or its LUKS mapping) to the target path, which is why every step first
//! checks whether it already happened.

mod cryptsetup;
mod stats;

pub use cryptsetup::{luks_name, mapper_path, Cryptsetup, LUKS_FORMAT};
pub use stats::{fs_stats, FsStats};

use csi_mount_utils::{MountError, Mounter};
use std::{
  fmt, fs, io,
  os::unix::fs::DirBuilderExt,
  path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// Filesystem created when the capability does not name one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// mkfs.xfs options that keep new filesystems mountable by older kernels.
pub const XFS_DEFAULT_FORMAT_OPTIONS: &[&str] =
  &["-c", "options=/usr/share/xfsprogs/mkfs/lts_5.15.conf"];

#[derive(Debug, Error)]
pub enum VolumeMountError {
  #[error(transparent)]
  Mount(#[from] MountError),

  #[error("invalid filesystem format options: {0}")]
  FormatOptions(#[from] shell_words::ParseError),

  #[error("cannot initialize encryption on {0} in read-only mode")]
  UnformattedReadOnlyEncryption(String),

  #[error("{device} is formatted as {format}, expected an encrypted volume")]
  EncryptionMismatch { device: String, format: String },

  #[error("{0} is not a device path")]
  InvalidDevice(String),

  #[error("{0} is not mounted")]
  NotMounted(String),
}

impl From<io::Error> for VolumeMountError {
  fn from(e: io::Error) -> Self {
    VolumeMountError::Mount(e.into())
  }
}

pub type Result<T> = std::result::Result<T, VolumeMountError>;

/// How a device is published.
#[derive(Clone, Default)]
pub struct MountOpts {
  /// Bind the raw device onto a file instead of mounting a filesystem.
  pub block_volume: bool,
  /// Empty means [`DEFAULT_FS_TYPE`].
  pub fs_type: String,
  pub readonly: bool,
  pub additional_flags: Vec<String>,
  /// Encrypt the device with LUKS when set.
  pub encryption_passphrase: Option<String>,
  /// Extra mkfs arguments, shell quoted.
  pub fs_format_options: Option<String>,
}

impl fmt::Debug for MountOpts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountOpts")
      .field("block_volume", &self.block_volume)
      .field("fs_type", &self.fs_type)
      .field("readonly", &self.readonly)
      .field("additional_flags", &self.additional_flags)
      .field(
        "encryption_passphrase",
        &self.encryption_passphrase.as_ref().map(|_| "<redacted>"),
      )
      .field("fs_format_options", &self.fs_format_options)
      .finish()
  }
}

impl MountOpts {
  fn passphrase(&self) -> Option<&str> {
    self
      .encryption_passphrase
      .as_deref()
      .filter(|passphrase| !passphrase.is_empty())
  }

  fn format_options(&self) -> Result<Vec<String>> {
    let options = match &self.fs_format_options {
      Some(options) => shell_words::split(options)?,
      None => Vec::new(),
    };

    if options.is_empty() && self.fs_type == "xfs" {
      return Ok(
        XFS_DEFAULT_FORMAT_OPTIONS
          .iter()
          .map(|o| (*o).to_owned())
          .collect(),
      );
    }

    Ok(options)
  }
}

fn create_target(target: &Path, block_volume: bool) -> io::Result<()> {
  if block_volume {
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }

    fs::OpenOptions::new()
      .create(true)
      .write(true)
      .open(target)?;
  } else {
    fs::DirBuilder::new()
      .recursive(true)
      .mode(0o750)
      .create(target)?;
  }

  Ok(())
}

/// Publishes, unpublishes, measures and grows volumes on this node.
pub struct MountService<M> {
  mounter: M,
}

impl<M: Mounter> MountService<M> {
  pub fn new(mounter: M) -> Self {
    MountService { mounter }
  }

  #[inline]
  pub fn mounter(&self) -> &M {
    &self.mounter
  }

  /// Makes `device` available at `target`. Encryption is set up before
  /// mounting; an already mounted target is left untouched.
  pub async fn publish(&self, device: &Path, target: &Path, opts: &MountOpts) -> Result<()> {
    let format_options = opts.format_options()?;

    match self.mounter.is_not_mount_point(target.to_owned()).await {
      Ok(true) => (),
      Ok(false) => {
        debug!(target = %target.display(), "target is already mounted");
        return Ok(());
      }
      Err(e) if e.is_not_found() => create_target(target, opts.block_volume)?,
      Err(e) => return Err(e.into()),
    }

    let source = match opts.passphrase() {
      Some(passphrase) => self.open_encrypted(device, passphrase, opts.readonly).await?,
      None => device.to_owned(),
    };

    let mut options = Vec::new();
    if opts.block_volume {
      options.push("bind".to_owned());
    }
    if opts.readonly {
      options.push("ro".to_owned());
    }
    options.extend(opts.additional_flags.iter().cloned());

    if opts.block_volume {
      self
        .mounter
        .mount(Some(source.clone()), target.to_owned(), String::new(), options)
        .await?;
    } else {
      let fs_type = if opts.fs_type.is_empty() {
        DEFAULT_FS_TYPE
      } else {
        opts.fs_type.as_str()
      };

      self
        .mounter
        .format_and_mount(
          source.clone(),
          target.to_owned(),
          fs_type.to_owned(),
          options,
          format_options,
        )
        .await?;
    }

    info!(
      source = %source.display(),
      target = %target.display(),
      block = opts.block_volume,
      "published volume"
    );
    Ok(())
  }

  /// LUKS-formats a blank `device` if needed and opens it. Returns the
  /// mapper device to mount.
  async fn open_encrypted(&self, device: &Path, passphrase: &str, readonly: bool) -> Result<PathBuf> {
    let name = luks_name(device)
      .ok_or_else(|| VolumeMountError::InvalidDevice(device.display().to_string()))?;
    let luks = Cryptsetup::new(&self.mounter);

    match self.mounter.get_disk_format(device.to_owned()).await? {
      None if readonly => {
        return Err(VolumeMountError::UnformattedReadOnlyEncryption(
          device.display().to_string(),
        ));
      }
      None => luks.format(device, passphrase).await?,
      Some(format) if format == LUKS_FORMAT => (),
      Some(format) => {
        return Err(VolumeMountError::EncryptionMismatch {
          device: device.display().to_string(),
          format,
        });
      }
    }

    luks.open(device, &name, passphrase).await?;
    Ok(mapper_path(&name))
  }

  /// Unmounts and removes `target`, then closes the LUKS mapping of the
  /// device that was mounted there, if any.
  pub async fn unpublish(&self, target: &Path) -> Result<()> {
    let device = self
      .mounter
      .get_device_name_from_mount(target.to_owned())
      .await?
      .map(|(device, _)| device);

    self
      .mounter
      .cleanup_mount_point(target.to_owned(), true)
      .await?;

    if let Some(name) = device.as_deref().and_then(luks_name) {
      Cryptsetup::new(&self.mounter).close(&name).await?;
    }

    info!(target = %target.display(), "unpublished volume");
    Ok(())
  }

  #[inline]
  pub fn path_exists(&self, path: &Path) -> bool {
    path.exists()
  }

  pub async fn stats(&self, path: &Path) -> Result<FsStats> {
    Ok(fs_stats(path.to_owned()).await?)
  }

  /// Grows the filesystem mounted at `volume_path`, resizing its LUKS
  /// container first when there is one.
  pub async fn resize(&self, volume_path: &Path) -> Result<()> {
    let device = match self
      .mounter
      .get_device_name_from_mount(volume_path.to_owned())
      .await?
    {
      Some((device, _)) => device,
      None => {
        return Err(VolumeMountError::NotMounted(
          volume_path.display().to_string(),
        ))
      }
    };

    let luks = Cryptsetup::new(&self.mounter);
    let device = match luks_name(&device) {
      Some(name) if luks.is_active(&name).await? => {
        luks.resize(&name).await?;
        mapper_path(&name)
      }
      _ => device,
    };

    self
      .mounter
      .resize_fs(device.clone(), volume_path.to_owned())
      .await?;

    info!(device = %device.display(), path = %volume_path.display(), "resized filesystem");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use csi_mount_utils::{CommandOutput, FakeAction, FakeMounter, MountPoint};
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  const BLKID_NOTHING_FOUND: i32 = 2;
  const STATUS_INACTIVE: i32 = 4;

  fn exec(program: &str, args: &[&str]) -> FakeAction {
    FakeAction::Exec {
      program: program.to_owned(),
      args: args.iter().map(|a| (*a).to_owned()).collect(),
    }
  }

  fn mount(source: &str, target: &Path, fs_type: &str) -> FakeAction {
    FakeAction::Mount {
      source: source.into(),
      target: target.to_owned(),
      fs_type: fs_type.to_owned(),
    }
  }

  /// Blank disks; LUKS mappings become active once opened.
  fn script_blank_disks(mounter: &FakeMounter) -> Arc<AtomicBool> {
    let active = Arc::new(AtomicBool::new(false));

    mounter
      .exec()
      .on("blkid", |_| CommandOutput::new(Some(BLKID_NOTHING_FOUND), ""));

    let opened = active.clone();
    mounter
      .exec()
      .on("cryptsetup", move |cmd| match cmd.get_args()[0].as_str() {
        "status" if opened.load(Ordering::SeqCst) => CommandOutput::success(""),
        "status" => CommandOutput::new(Some(STATUS_INACTIVE), ""),
        "luksOpen" => {
          opened.store(true, Ordering::SeqCst);
          CommandOutput::success("")
        }
        "luksClose" => {
          opened.store(false, Ordering::SeqCst);
          CommandOutput::success("")
        }
        _ => CommandOutput::success(""),
      });

    active
  }

  fn encrypted() -> MountOpts {
    MountOpts {
      encryption_passphrase: Some("secret".to_owned()),
      ..MountOpts::default()
    }
  }

  #[tokio::test]
  async fn publish_encrypted_blank_device() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("target");
    let mounter = FakeMounter::new(None);
    let active = script_blank_disks(&mounter);
    let service = MountService::new(mounter.clone());

    service
      .publish(Path::new("/dev/sdb"), &target, &encrypted())
      .await
      .expect("publish");

    let target = fs::canonicalize(&target).expect("target created");
    assert_eq!(
      mounter.log(),
      vec![
        exec("blkid", &["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", "/dev/sdb"]),
        exec("cryptsetup", &["luksFormat", "--type", "luks1", "--batch-mode", "/dev/sdb"]),
        exec("cryptsetup", &["status", "sdb"]),
        exec("cryptsetup", &["luksOpen", "--allow-discards", "/dev/sdb", "sdb"]),
        exec(
          "blkid",
          &["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", "/dev/mapper/sdb"]
        ),
        exec("mkfs.ext4", &["-F", "-m0", "/dev/mapper/sdb"]),
        mount("/dev/mapper/sdb", &target, "ext4"),
      ]
    );
    assert!(active.load(Ordering::SeqCst));

    mounter.reset_log();
    service
      .publish(Path::new("/dev/sdb"), &target, &encrypted())
      .await
      .expect("publish again");
    assert!(mounter.log().is_empty());
  }

  #[tokio::test]
  async fn encrypted_readonly_blank_device_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mounter = FakeMounter::new(None);
    script_blank_disks(&mounter);
    let service = MountService::new(mounter.clone());

    let opts = MountOpts {
      readonly: true,
      ..encrypted()
    };
    let err = service
      .publish(Path::new("/dev/sdb"), &dir.path().join("target"), &opts)
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      VolumeMountError::UnformattedReadOnlyEncryption(_)
    ));
    assert!(!mounter
      .log()
      .iter()
      .any(|action| matches!(action, FakeAction::Mount { .. })));
  }

  #[tokio::test]
  async fn encryption_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mounter = FakeMounter::new(None);
    mounter
      .exec()
      .on("blkid", |_| CommandOutput::success("DEVNAME=/dev/sdb\nTYPE=ext4\n"));
    let service = MountService::new(mounter.clone());

    let err = service
      .publish(Path::new("/dev/sdb"), &dir.path().join("target"), &encrypted())
      .await
      .unwrap_err();

    assert!(matches!(err, VolumeMountError::EncryptionMismatch { .. }));
  }

  #[tokio::test]
  async fn publish_block_volume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("pods").join("dev");
    let mounter = FakeMounter::new(None);
    let service = MountService::new(mounter.clone());

    let opts = MountOpts {
      block_volume: true,
      ..MountOpts::default()
    };
    service
      .publish(Path::new("/dev/sdb"), &target, &opts)
      .await
      .expect("publish");

    assert!(target.is_file());
    let target = fs::canonicalize(&target).expect("target");
    assert_eq!(mounter.log(), vec![mount("/dev/sdb", &target, "")]);
    assert_eq!(mounter.mount_points()[0].opts(), &["bind".to_owned()]);
  }

  #[test]
  fn targets() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");

    let mount_target = dir.path().join("pods/a/mount");
    create_target(&mount_target, false).expect("mount target");
    let mode = fs::metadata(&mount_target).expect("stat").permissions().mode();
    assert_eq!(mode & 0o777, 0o750);

    let block_target = dir.path().join("pods/b/dev");
    create_target(&block_target, true).expect("block target");
    assert!(fs::metadata(&block_target).expect("stat").is_file());
  }

  #[tokio::test]
  async fn publish_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mounter = FakeMounter::new(None);
    mounter
      .exec()
      .on("blkid", |_| CommandOutput::new(Some(BLKID_NOTHING_FOUND), ""));
    let service = MountService::new(mounter.clone());

    let opts = MountOpts {
      fs_type: "xfs".to_owned(),
      additional_flags: vec!["noatime".to_owned()],
      ..MountOpts::default()
    };
    service
      .publish(Path::new("/dev/sdb"), &dir.path().join("xfs"), &opts)
      .await
      .expect("publish");

    let opts = MountOpts {
      fs_format_options: Some("-b 4096 -L 'my data'".to_owned()),
      ..MountOpts::default()
    };
    service
      .publish(Path::new("/dev/sdc"), &dir.path().join("ext4"), &opts)
      .await
      .expect("publish");

    let mkfs: Vec<_> = mounter
      .exec()
      .commands()
      .into_iter()
      .filter(|cmd| cmd.program().starts_with("mkfs."))
      .map(|cmd| cmd.to_string())
      .collect();
    assert_eq!(
      mkfs,
      vec![
        "mkfs.xfs -c options=/usr/share/xfsprogs/mkfs/lts_5.15.conf /dev/sdb",
        "mkfs.ext4 -F -m0 -b 4096 -L my data /dev/sdc",
      ]
    );

    let mps = mounter.mount_points();
    assert_eq!(mps[0].opts(), &["noatime".to_owned(), "defaults".to_owned()]);
  }

  #[tokio::test]
  async fn malformed_format_options_fail_before_any_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("target");
    let mounter = FakeMounter::new(None);
    let service = MountService::new(mounter.clone());

    let opts = MountOpts {
      fs_format_options: Some("-L 'unterminated".to_owned()),
      ..MountOpts::default()
    };
    let err = service
      .publish(Path::new("/dev/sdb"), &target, &opts)
      .await
      .unwrap_err();

    assert!(matches!(err, VolumeMountError::FormatOptions(_)));
    assert!(!target.exists());
    assert!(mounter.log().is_empty());
  }

  #[tokio::test]
  async fn unpublish_unmounts_before_closing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("target");
    let mounter = FakeMounter::new(None);
    let active = script_blank_disks(&mounter);
    let service = MountService::new(mounter.clone());

    service
      .publish(Path::new("/dev/sdb"), &target, &encrypted())
      .await
      .expect("publish");
    let resolved = fs::canonicalize(&target).expect("target");
    mounter.reset_log();

    service.unpublish(&target).await.expect("unpublish");

    assert_eq!(
      mounter.log(),
      vec![
        FakeAction::Unmount { target: resolved },
        exec("cryptsetup", &["status", "sdb"]),
        exec("cryptsetup", &["luksClose", "sdb"]),
      ]
    );
    assert!(!target.exists());
    assert!(!active.load(Ordering::SeqCst));

    service.unpublish(&target).await.expect("unpublish again");
  }

  #[tokio::test]
  async fn resize_encrypted_volume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = fs::canonicalize(dir.path()).expect("path");
    let mounter = FakeMounter::new(vec![MountPoint::new("/dev/mapper/sdb", &path, "ext4")]);
    mounter.exec().on("blkid", |_| CommandOutput::success("TYPE=ext4\n"));
    let service = MountService::new(mounter.clone());

    service.resize(&path).await.expect("resize");

    let luks_resize = exec("cryptsetup", &["resize", "sdb"]);
    let fs_resize = exec("resize2fs", &["/dev/mapper/sdb"]);
    let log = mounter.log();
    assert_eq!(log[0], exec("cryptsetup", &["status", "sdb"]));
    assert_eq!(log[1], luks_resize);
    assert_eq!(log.last(), Some(&fs_resize));
  }

  #[tokio::test]
  async fn resize_plain_volume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = fs::canonicalize(dir.path()).expect("path");
    let mounter = FakeMounter::new(vec![MountPoint::new("/dev/sdb", &path, "ext4")]);
    mounter.exec().on("blkid", |_| CommandOutput::success("TYPE=ext4\n"));
    mounter
      .exec()
      .on("cryptsetup", |_| CommandOutput::new(Some(STATUS_INACTIVE), ""));
    let service = MountService::new(mounter.clone());

    service.resize(&path).await.expect("resize");

    let commands: Vec<_> = mounter
      .exec()
      .commands()
      .iter()
      .map(|cmd| cmd.to_string())
      .collect();
    assert_eq!(
      commands,
      vec![
        "cryptsetup status sdb",
        "blkid -p -s TYPE -s PTTYPE -o export /dev/sdb",
        "resize2fs /dev/sdb",
      ]
    );
  }

  #[tokio::test]
  async fn resize_requires_mount() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = MountService::new(FakeMounter::new(None));

    let err = service.resize(dir.path()).await.unwrap_err();
    assert!(matches!(err, VolumeMountError::NotMounted(_)));
  }
}
