use crate::{
  exec::{Cmd, Exec, OsExec},
  runner::{make_bind_opts_sensitive, MounterImpl},
  MountError, MountPoint, Result, DEFAULT_MOUNT_COMMAND,
};
use crossbeam::{scope, select};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  fmt::Write,
  fs, io,
  num::NonZeroUsize,
  os::unix::fs::MetadataExt,
  path::{Path, PathBuf},
  time::Duration,
};
use tracing::{debug, error, info};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: usize = 3;
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

pub struct OsMounter {
  exec: OsExec,
  systemd: bool,
}

impl OsMounter {
  pub(crate) fn new() -> Result<Self> {
    Ok(OsMounter {
      exec: OsExec,
      systemd: Self::detect_systemd()?,
    })
  }

  /// Whether `systemd-run --scope` works, i.e. systemd is pid 1 and not
  /// just installed in the image. Unsure means no.
  fn detect_systemd() -> Result<bool> {
    let systemd_run_path = match which("systemd-run") {
      Ok(p) => p,
      Err(_) => {
        info!("Detected OS without systemd");
        return Ok(false);
      }
    };

    let output = OsExec.run(
      &Cmd::new(systemd_run_path.display().to_string())
        .arg("--description=cloudvol systemd probe")
        .arg("--scope")
        .arg("true"),
    )?;

    if output.is_success() {
      info!("Detected OS with systemd");
      Ok(true)
    } else {
      info!("Cannot run systemd-run, assuming non-systemd OS");
      debug!(
        "systemd-run output: {}, failed with: {:?}",
        output.output(),
        output.code()
      );
      Ok(false)
    }
  }

  fn do_mount(
    &self,
    source: Option<&Path>,
    target: &Path,
    fstype: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let (mut mount_cmd, mut mount_args, mut log_str) = {
      let (args, log_str) =
        make_mount_args_sensitive(source, target, fstype, options, sensitive_options);
      (DEFAULT_MOUNT_COMMAND.to_owned(), args, log_str)
    };

    if self.systemd {
      // Run mount in its own transient scope so that fuse daemons it forks
      // outlive a restart of this plugin:
      //   systemd-run --description=... --scope -- mount -t <type> <what> <where>
      let t = add_systemd_scope_sensitive("systemd-run", target, mount_cmd, mount_args, log_str);
      mount_cmd = t.0;
      mount_args = t.1;
      log_str = t.2;
    }

    info!("Mounting cmd {} with arguments ({})", mount_cmd, log_str);
    let cmd = Cmd::new(mount_cmd).args(mount_args);
    let output = self.exec.run(&cmd)?;
    if output.is_success() {
      Ok(())
    } else {
      error!(
        code = ?output.code(),
        output = output.output(),
        "Mount failed: {}",
        log_str
      );
      Err(MountError::CommandFailed {
        // the real command line may contain sensitive options
        command: format!("mount {}", log_str),
        code: output.code(),
        output: output.output().to_owned(),
      })
    }
  }
}

impl MounterImpl for OsMounter {
  type Exec = OsExec;

  #[inline]
  fn exec(&self) -> &OsExec {
    &self.exec
  }

  fn mount_sensitive(
    &self,
    source: Option<&Path>,
    target: &Path,
    fstype: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let (bind, bind_opts, bind_remount_opts, bind_remount_opts_sensitive) =
      make_bind_opts_sensitive(options, sensitive_options);

    if bind {
      self.do_mount(
        source,
        target,
        fstype,
        &bind_opts,
        &bind_remount_opts_sensitive,
      )?;
      self.do_mount(
        source,
        target,
        fstype,
        &bind_remount_opts,
        &bind_remount_opts_sensitive,
      )
    } else {
      self.do_mount(source, target, fstype, options, sensitive_options)
    }
  }

  fn unmount(&self, target: &Path, force_after: Option<Duration>) -> Result<()> {
    info!("Unmounting {}", target.display());
    let umount = cmd!("umount", target).stderr_to_stdout().stdout_capture();

    let run_forced = match force_after {
      None => {
        umount.run()?;
        false
      }
      Some(duration) => {
        let handle = umount.start()?;
        let handle = &handle;
        scope(|s| -> Result<bool> {
          let (sender, receiver) = crossbeam::channel::bounded(1);

          s.spawn(move |_| {
            let _ = sender.send(handle.wait().map(|_| ()));
          });

          let finished = select! {
            recv(receiver) -> result => match result {
              Ok(result) => { result?; true }
              Err(_) => false,
            },
            default(duration) => false,
          };

          if !finished {
            let _ = handle.kill();
          }

          Ok(!finished)
        })
        .map_err(|e| MountError::other(format!("failed to spawn unmount watcher: {:?}", e)))??
      }
    };

    if run_forced {
      info!("Unmount of {} timed out, forcing", target.display());
      cmd!("umount", "-f", target).stderr_to_stdout().stdout_capture().run()?;
    }

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    list_proc_mounts(Path::new(PROC_MOUNTS_PATH))
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let stat = fs::metadata(file)?;
    let parent = file
      .parent()
      .ok_or_else(|| MountError::other("file does not have parent"))?;
    let parent_stat = fs::metadata(parent)?;

    // a different device than the parent means something is mounted here
    Ok(stat.dev() == parent_stat.dev())
  }
}

/// Arguments of mount(8): `[-t fstype] [-o options] [source] target`, and
/// the same command line for the log, without `options_sensitive`.
fn make_mount_args_sensitive(
  source: Option<&Path>,
  target: &Path,
  fstype: &str,
  options: &[String],
  options_sensitive: &[String],
) -> (Vec<String>, String) {
  let mut mount_args = Vec::new();
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".to_owned());
    mount_args.push(fstype.to_owned());
    let _ = write!(log_str, "-t {}", fstype);
  }

  if !options.is_empty() || !options_sensitive.is_empty() {
    let arg = options
      .iter()
      .chain(options_sensitive.iter())
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(",");

    mount_args.push("-o".to_owned());
    mount_args.push(arg);
    let _ = write!(log_str, " -o {}", options.join(","));
  }

  if let Some(source) = source {
    mount_args.push(source.display().to_string());
    let _ = write!(log_str, " {}", source.display());
  }

  mount_args.push(target.display().to_string());
  let _ = write!(log_str, " {}", target.display());

  (mount_args, log_str.trim_start().to_owned())
}

fn add_systemd_scope_sensitive(
  systemd_run_path: &str,
  mount_name: &Path,
  command: String,
  args: Vec<String>,
  log_str: String,
) -> (String, Vec<String>, String) {
  let mut systemd_run_args = vec![
    format!(
      "--description=cloudvol transient mount for {}",
      mount_name.display()
    ),
    "--scope".to_owned(),
    "--".to_owned(),
    command,
  ];
  let log_str = format!("{} {}", systemd_run_args.join(" "), log_str);
  systemd_run_args.extend(args);

  (systemd_run_path.to_owned(), systemd_run_args, log_str)
}

fn list_proc_mounts(mount_file_path: &Path) -> Result<Vec<MountPoint>> {
  let content = consistent_read(mount_file_path, MAX_LIST_TRIES)?;

  parse_proc_mounts(&content)
}

/// Reads a file until two reads in a row agree. Files in /proc larger than
/// a page can change between read() calls.
fn consistent_read(path: &Path, attempts: usize) -> io::Result<Vec<u8>> {
  let attempts = NonZeroUsize::new(attempts).map_or(1, NonZeroUsize::get);
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let s = std::str::from_utf8(content)
    .map_err(|_| MountError::other("proc mounts contain invalid UTF8"))?;

  let mut out = Vec::new();
  for line in s.lines() {
    if line.trim().is_empty() {
      continue;
    }

    let fields = line
      .split_whitespace()
      .collect::<SmallVec<[&str; EXPECTED_FIELDS_PER_MOUNTS_LINE]>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::other(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::other(format!("invalid freq: {:?}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::other(format!("invalid pass: {:?}", e)))?;

    out.push(MountPoint {
      device: PathBuf::from(fields[0]),
      path: PathBuf::from(fields[1]),
      ty: fields[2].to_owned(),
      opts: fields[3].split(',').map(str::to_owned).collect(),
      freq,
      pass,
    })
  }

  Ok(out)
}
