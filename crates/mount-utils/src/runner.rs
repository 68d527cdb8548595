use crate::{
  exec::Exec,
  format::{self, UNKNOWN_PARTITIONED_FORMAT},
  MountError, MountPoint, Result,
};
use futures::channel::oneshot;
use once_cell::sync::OnceCell;
use std::{
  fs,
  future::Future,
  io,
  panic::{catch_unwind, AssertUnwindSafe},
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};
use tracing::{debug, error, info, warn, Span};

const WORKER_THREADS: usize = 4;

struct Job {
  span: Span,
  run: Box<dyn FnOnce() + Send>,
}

type Dispatcher = crossbeam::channel::Sender<Job>;

/// Blocking half of a mounter. Methods run on the dispatcher threads only.
pub trait MounterImpl: Send + Sync + 'static {
  type Exec: Exec;

  /// Runs the helper tools (blkid, mkfs, resize2fs, ...).
  fn exec(&self) -> &Self::Exec;

  /// `options` must not contain secrets.
  fn mount(
    &self,
    source: Option<&Path>,
    target: &Path,
    fstype: &str,
    options: &[String],
  ) -> Result<()> {
    self.mount_sensitive(source, target, fstype, options, &[])
  }

  /// `sensitive_options` are passed to mount(8) but never logged.
  fn mount_sensitive(
    &self,
    source: Option<&Path>,
    target: &Path,
    fstype: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()>;

  fn unmount(&self, target: &Path, force_after: Option<Duration>) -> Result<()>;

  /// Read in one consistent pass.
  fn list(&self) -> Result<Vec<MountPoint>>;

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool>;

  fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;

    // the kernel lists resolved paths
    let mount_path = fs::canonicalize(mount_path).unwrap_or_else(|_| mount_path.to_owned());

    // FIXME if multiple devices are mounted on the same path, only the first one is returned.
    Ok(
      mps
        .iter()
        .find(|m| m.path() == mount_path)
        .map(|m| m.device().to_owned())
        .map(|device| {
          let ref_count = mps.iter().filter(|m| m.device() == device).count();
          (device, ref_count)
        }),
    )
  }

  fn is_not_mount_point(&self, file: &Path) -> Result<bool> {
    let not_mnt = match self.is_likely_not_mount_point(file) {
      Ok(v) => v,
      // stat() not allowed (e.g. NFS with root_squash), fall back to the mount table
      Err(e) if e.is_permission_error() => true,
      Err(e) => return Err(e),
    };

    if !not_mnt {
      return Ok(false);
    }

    let resolved = match fs::canonicalize(file) {
      Ok(v) => v,
      Err(e) => return Err(e.into()),
    };

    // the heuristic misses bind mounts
    Ok(!self.list()?.iter().any(|mp| mp.matches(&resolved)))
  }

  fn cleanup_mount_point(&self, path: &Path, extensive_check: bool) -> Result<()> {
    let corrupted = match fs::metadata(path) {
      Ok(_) => false,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "mount point does not exist, nothing to clean up");
        return Ok(());
      }
      Err(e) if is_corrupted_mount(&e) => {
        warn!(path = %path.display(), "mount point is corrupted, unmounting");
        true
      }
      Err(e) => return Err(e.into()),
    };

    let check = |path: &Path| {
      if extensive_check {
        self.is_not_mount_point(path)
      } else {
        self.is_likely_not_mount_point(path)
      }
    };

    if !corrupted && check(path)? {
      remove_mount_point(path)?;
      return Ok(());
    }

    self.unmount(path, None)?;

    if check(path)? {
      remove_mount_point(path)?;
      Ok(())
    } else {
      Err(MountError::other(format!(
        "failed to unmount path {}",
        path.display()
      )))
    }
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    format::get_disk_format(self.exec(), device)
  }

  fn format_and_mount(
    &self,
    source: &Path,
    target: &Path,
    fstype: &str,
    options: &[String],
    format_options: &[String],
  ) -> Result<()> {
    let read_only = options.iter().any(|o| o == "ro");
    let fstype = if fstype.is_empty() { "ext4" } else { fstype };

    match self.get_disk_format(source)? {
      None => {
        if read_only {
          return Err(MountError::UnformattedReadOnly(format!(
            "cannot format {} in read-only mode",
            source.display()
          )));
        }

        format::make_fs(self.exec(), source, fstype, format_options)?;
      }
      Some(existing) if existing == UNKNOWN_PARTITIONED_FORMAT => {
        return Err(MountError::FilesystemMismatch(format!(
          "{} contains a partition table and no filesystem",
          source.display()
        )));
      }
      Some(existing) if existing != fstype => {
        return Err(MountError::FilesystemMismatch(format!(
          "{} is formatted as {}, requested {}",
          source.display(),
          existing,
          fstype
        )));
      }
      Some(_) => (),
    }

    let mut options = options.to_vec();
    options.push("defaults".into());

    info!(
      source = %source.display(),
      target = %target.display(),
      fstype,
      "mounting formatted device"
    );
    self
      .mount(Some(source), target, fstype, &options)
      .map_err(|e| {
        error!(source = %source.display(), error = %e, "mount failed");
        e
      })
  }

  fn resize_fs(&self, device: &Path, mount_path: &Path) -> Result<()> {
    let fstype = self.get_disk_format(device)?.unwrap_or_default();
    format::resize_fs(self.exec(), device, mount_path, &fstype)
  }
}

fn remove_mount_point(path: &Path) -> Result<()> {
  debug!(path = %path.display(), "removing mount point");
  if path.is_dir() {
    fs::remove_dir(path)?;
  } else {
    fs::remove_file(path)?;
  }

  Ok(())
}

/// Errors stat() returns for a mount whose backing store went away.
pub(crate) fn is_corrupted_mount(e: &io::Error) -> bool {
  matches!(
    e.raw_os_error(),
    Some(libc::ENOTCONN) | Some(libc::ESTALE) | Some(libc::EIO) | Some(libc::EACCES)
  )
}

static DISPATCHER: OnceCell<Dispatcher> = OnceCell::new();

fn dispatcher() -> Result<&'static Dispatcher> {
  DISPATCHER.get_or_try_init(|| {
    let (sender, receiver) = crossbeam::channel::unbounded::<Job>();

    for i in 0..WORKER_THREADS {
      let receiver = receiver.clone();
      std::thread::Builder::new()
        .name(format!("mount-utils:worker-{}", i))
        .spawn(move || {
          while let Ok(Job { span, run }) = receiver.recv() {
            let _enter = span.enter();
            if let Err(e) = catch_unwind(AssertUnwindSafe(run)) {
              error!("mount function panicked in worker: {:?}", e);
            }
          }
        })
        .map_err(|e| MountError::other(format!("failed to spawn mount worker: {}", e)))?;
    }

    Ok(sender)
  })
}

/// Runs `f` on the blocking worker pool inside the current span and waits
/// for its result without blocking the executor.
pub fn dispatch<R, F>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  let (sender, receiver) = oneshot::channel();

  let job = Job {
    span: Span::current(),
    run: Box::new(move || {
      let _ = sender.send(f());
    }),
  };

  let sent = dispatcher().and_then(|d| {
    d.send(job)
      .map_err(|_| MountError::other("mount workers have shut down"))
  });

  async move {
    sent?;
    match receiver.await {
      Ok(r) => r,
      Err(_) => Err(MountError::other(
        "mount request was cancelled (worker panicked?)",
      )),
    }
  }
}

/// Detects a bind mount and builds the options of the two mount(8) calls
/// it needs: bind does not apply options, so a remount follows with
/// `options - bind + remount`.
pub(crate) fn make_bind_opts_sensitive(
  opts: &[String],
  opts_sensitive: &[String],
) -> (bool, Vec<String>, Vec<String>, Vec<String>) {
  let mut bind = false;
  let mut bind_opts: Vec<String> = vec!["bind".into()];
  let mut bind_remount_opts: Vec<String> = vec!["bind".into(), "remount".into()];
  let mut bind_remount_sensitive_opts = Vec::new();

  let tagged = opts
    .iter()
    .map(|o| (o, false))
    .chain(opts_sensitive.iter().map(|o| (o, true)));

  for (opt, sensitive) in tagged {
    match opt.as_str() {
      "bind" => bind = true,
      // userspace option, not carried over by the kernel
      "_netdev" => {
        bind_opts.push("_netdev".into());
        bind_remount_opts.push("_netdev".into());
      }
      _ if sensitive => bind_remount_sensitive_opts.push(opt.clone()),
      _ => bind_remount_opts.push(opt.clone()),
    }
  }

  (
    bind,
    bind_opts,
    bind_remount_opts,
    bind_remount_sensitive_opts,
  )
}

/// Async handle around a shared [`MounterImpl`].
pub trait MounterWrapper {
  type Mounter: MounterImpl;

  fn mounter(&self) -> &Arc<Self::Mounter>;
}
