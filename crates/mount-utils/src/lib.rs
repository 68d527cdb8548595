#![allow(clippy::too_many_arguments)]

cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    use unix::*;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod exec;
mod fake;
mod format;
mod runner;

pub use exec::{Cmd, CommandOutput, Exec, OsExec};
pub use fake::{FakeAction, FakeExec};
pub use format::UNKNOWN_PARTITIONED_FORMAT;
pub use runner::{dispatch, MounterImpl, MounterWrapper};

use async_trait::async_trait;
use static_assertions::assert_impl_all;
use std::{
  fmt, io,
  path::{Path, PathBuf},
  result,
  sync::Arc,
  time::Duration,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;

const DEFAULT_MOUNT_COMMAND: &str = "mount";

/// Mount operations on the host.
///
/// Every call is executed on a small pool of blocking worker threads, so
/// awaiting it never stalls the async executor.
#[async_trait]
pub trait Mounter: Send + Sync {
  /// Mounts `source` at `target`. `options` must not contain secrets.
  async fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
  ) -> Result<()>;

  /// Same as [`Mounter::mount`], but `sensitive_options` are never logged.
  async fn mount_sensitive(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
    sensitive_options: Vec<String>,
  ) -> Result<()>;

  /// Unmounts `target`, retrying with `-f` once `force_after` has elapsed.
  async fn unmount(&self, target: PathBuf, force_after: Option<Duration>) -> Result<()>;

  /// All mounted filesystems.
  async fn list(&self) -> Result<Vec<MountPoint>>;

  /// Fast heuristic: a directory on the same device as its parent is not a
  /// mount point. Misses bind mounts. Fails when `file` does not exist.
  async fn is_likely_not_mount_point(&self, file: PathBuf) -> Result<bool>;

  /// Exact check that also consults the mount table.
  async fn is_not_mount_point(&self, file: PathBuf) -> Result<bool>;

  /// Device mounted at `mount_path` and how many mount points share it.
  async fn get_device_name_from_mount(&self, mount_path: PathBuf)
    -> Result<Option<(PathBuf, usize)>>;

  /// Unmounts `path` if needed, then removes it. A missing path is fine.
  async fn cleanup_mount_point(&self, path: PathBuf, extensive_check: bool) -> Result<()>;

  /// Filesystem (or partition table marker) on `device`, `None` if blank.
  async fn get_disk_format(&self, device: PathBuf) -> Result<Option<String>>;

  /// Formats `source` if it is blank, then mounts it at `target`.
  async fn format_and_mount(
    &self,
    source: PathBuf,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
    format_options: Vec<String>,
  ) -> Result<()>;

  /// Grows the filesystem on `device`, mounted at `mount_path`, to fill it.
  async fn resize_fs(&self, device: PathBuf, mount_path: PathBuf) -> Result<()>;

  /// Runs a helper tool on the worker pool. A non-zero exit is returned,
  /// not raised.
  async fn run(&self, cmd: Cmd) -> Result<CommandOutput>;
}

/// A single line of /proc/mounts.
#[derive(Clone, PartialEq)]
pub struct MountPoint {
  device: PathBuf,
  path: PathBuf,
  ty: String,
  opts: Vec<String>,
  freq: isize,
  pass: isize,
}

impl fmt::Debug for MountPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountPoint")
      .field("device", &self.device)
      .field("path", &self.path)
      .field("type", &self.ty)
      .field("opts", &format!("length={}", self.opts.len()))
      .field("freq", &self.freq)
      .field("pass", &self.pass)
      .finish()
  }
}

impl MountPoint {
  pub fn new(device: impl Into<PathBuf>, path: impl Into<PathBuf>, ty: impl Into<String>) -> Self {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: ty.into(),
      opts: Vec::new(),
      freq: 0,
      pass: 0,
    }
  }

  pub fn with_opts(mut self, opts: Vec<String>) -> Self {
    self.opts = opts;
    self
  }

  #[inline]
  pub fn device(&self) -> &Path {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn mount_type(&self) -> &str {
    &self.ty
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  #[inline]
  pub fn freq(&self) -> isize {
    self.freq
  }

  #[inline]
  pub fn pass(&self) -> isize {
    self.pass
  }

  /// Whether this entry is mounted at `dir`. The kernel appends
  /// `\040(deleted)` to mount points whose directory was removed.
  pub fn matches(&self, dir: &Path) -> bool {
    if self.path == dir {
      return true;
    }

    let deleted = format!("{}\\040(deleted)", dir.display());
    self.path == Path::new(&deleted)
  }
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("File system mismatch: {0}")]
  FilesystemMismatch(String),

  #[error("Unformatted read only: {0}")]
  UnformattedReadOnly(String),

  #[error("Format failed: {0}")]
  FormatFailed(String),

  #[error("Get disk format failed: {0}")]
  GetDiskFormatFailed(String),

  #[error("Resize failed: {0}")]
  ResizeFailed(String),

  #[error("Resize of filesystem {0} is not supported")]
  UnsupportedResize(String),

  #[error("command '{command}' failed with exit code {code:?}: {output}")]
  CommandFailed {
    command: String,
    code: Option<i32>,
    output: String,
  },

  #[error(transparent)]
  Io(#[from] io::Error),
}

impl MountError {
  pub fn is_permission_error(&self) -> bool {
    matches!(self, MountError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied)
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, MountError::Io(e) if e.kind() == io::ErrorKind::NotFound)
  }

  pub(crate) fn other(msg: impl Into<String>) -> Self {
    MountError::Io(io::Error::new(io::ErrorKind::Other, msg.into()))
  }
}

#[async_trait]
impl<T> Mounter for T
where
  T: MounterWrapper + Send + Sync,
{
  async fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
  ) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.mount(source.as_deref(), &target, &fstype, &options)).await
  }

  async fn mount_sensitive(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
    sensitive_options: Vec<String>,
  ) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || {
      mounter.mount_sensitive(
        source.as_deref(),
        &target,
        &fstype,
        &options,
        &sensitive_options,
      )
    })
    .await
  }

  async fn unmount(&self, target: PathBuf, force_after: Option<Duration>) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.unmount(&target, force_after)).await
  }

  async fn list(&self) -> Result<Vec<MountPoint>> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.list()).await
  }

  async fn is_likely_not_mount_point(&self, file: PathBuf) -> Result<bool> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.is_likely_not_mount_point(&file)).await
  }

  async fn is_not_mount_point(&self, file: PathBuf) -> Result<bool> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.is_not_mount_point(&file)).await
  }

  async fn get_device_name_from_mount(
    &self,
    mount_path: PathBuf,
  ) -> Result<Option<(PathBuf, usize)>> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.get_device_name_from_mount(&mount_path)).await
  }

  async fn cleanup_mount_point(&self, path: PathBuf, extensive_check: bool) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.cleanup_mount_point(&path, extensive_check)).await
  }

  async fn get_disk_format(&self, device: PathBuf) -> Result<Option<String>> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.get_disk_format(&device)).await
  }

  async fn format_and_mount(
    &self,
    source: PathBuf,
    target: PathBuf,
    fstype: String,
    options: Vec<String>,
    format_options: Vec<String>,
  ) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.format_and_mount(&source, &target, &fstype, &options, &format_options))
      .await
  }

  async fn resize_fs(&self, device: PathBuf, mount_path: PathBuf) -> Result<()> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.resize_fs(&device, &mount_path)).await
  }

  async fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
    let mounter = self.mounter().clone();
    dispatch(move || mounter.exec().run(&cmd)).await
  }
}

assert_impl_all!(OsMounter: MounterImpl, Send, Sync);
assert_impl_all!(fake::FakeMounter: MounterImpl, Send, Sync);

/// Mounter for the host, backed by mount(8) and the tools in `$PATH`.
#[derive(Clone)]
pub struct DefaultMounter(Arc<OsMounter>);

impl DefaultMounter {
  /// Probes the host (systemd detection) on the worker pool.
  pub async fn new() -> Result<Self> {
    let mounter = dispatch(OsMounter::new).await?;
    Ok(DefaultMounter(Arc::new(mounter)))
  }
}

impl MounterWrapper for DefaultMounter {
  type Mounter = OsMounter;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

/// In-memory mounter for tests. Every mount, unmount and command is
/// appended to one ordered log.
#[derive(Clone)]
pub struct FakeMounter(Arc<fake::FakeMounter>);

impl FakeMounter {
  pub fn new(mount_points: impl IntoIterator<Item = MountPoint>) -> Self {
    FakeMounter(Arc::new(fake::FakeMounter::new(mount_points)))
  }

  /// Scripts the helper tools run through this mounter.
  #[inline]
  pub fn exec(&self) -> &FakeExec {
    self.0.exec()
  }

  pub fn log(&self) -> Vec<FakeAction> {
    self.0.get_log()
  }

  pub fn reset_log(&self) {
    self.0.reset_log()
  }

  pub fn mount_points(&self) -> Vec<MountPoint> {
    self.0.mount_points()
  }

  /// Makes every unmount of `target` fail with `error()`.
  pub fn fail_unmount(&self, target: impl Into<PathBuf>, error: fn() -> MountError) {
    self.0.fail_unmount(target.into(), error)
  }
}

impl MounterWrapper for FakeMounter {
  type Mounter = fake::FakeMounter;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}
