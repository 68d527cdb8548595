use crate::{
  exec::{Cmd, CommandOutput, Exec},
  runner::MounterImpl,
  MountError, MountPoint, Result,
};
use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, MutexGuard},
  time::Duration,
};
use tracing::info;

/// One side effect observed by the fakes, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    source: PathBuf,
    target: PathBuf,
    fs_type: String,
  },

  Unmount {
    target: PathBuf,
  },

  /// A helper command. Stdin is not recorded.
  Exec {
    program: String,
    args: Vec<String>,
  },
}

type Log = Arc<Mutex<Vec<FakeAction>>>;
type Handler = Box<dyn Fn(&Cmd) -> CommandOutput + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    // a panicking test thread must not hide the log from the others
    Err(poisoned) => poisoned.into_inner(),
  }
}

/// Scripted [`Exec`]. Programs without a handler succeed with no output.
#[derive(Default)]
pub struct FakeExec {
  handlers: Mutex<HashMap<String, Handler>>,
  commands: Mutex<Vec<Cmd>>,
  log: Log,
}

impl FakeExec {
  fn with_log(log: Log) -> Self {
    FakeExec {
      handlers: Mutex::default(),
      commands: Mutex::default(),
      log,
    }
  }

  /// Answers every run of `program` with `handler`. Replaces any earlier
  /// handler for the same program.
  pub fn on<F>(&self, program: impl Into<String>, handler: F)
  where
    F: Fn(&Cmd) -> CommandOutput + Send + Sync + 'static,
  {
    lock(&self.handlers).insert(program.into(), Box::new(handler));
  }

  /// Commands run so far, stdin included.
  pub fn commands(&self) -> Vec<Cmd> {
    lock(&self.commands).clone()
  }
}

impl Exec for FakeExec {
  fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
    lock(&self.log).push(FakeAction::Exec {
      program: cmd.program().to_owned(),
      args: cmd.get_args().to_vec(),
    });
    lock(&self.commands).push(cmd.clone());

    let output = match lock(&self.handlers).get(cmd.program()) {
      Some(handler) => handler(cmd),
      None => CommandOutput::success(""),
    };

    info!(command = %cmd, code = ?output.code(), "Fake exec");
    Ok(output)
  }
}

type ErrorFactory = fn() -> MountError;

struct State {
  mount_points: Vec<MountPoint>,
  unmount_errors: HashMap<PathBuf, ErrorFactory>,
}

pub struct FakeMounter {
  state: Mutex<State>,
  exec: FakeExec,
  log: Log,
}

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let log = Log::default();

    FakeMounter {
      state: Mutex::new(State {
        mount_points: mps.into_iter().collect(),
        unmount_errors: HashMap::new(),
      }),
      exec: FakeExec::with_log(log.clone()),
      log,
    }
  }

  pub fn reset_log(&self) {
    lock(&self.log).clear();
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    lock(&self.log).clone()
  }

  pub fn mount_points(&self) -> Vec<MountPoint> {
    lock(&self.state).mount_points.clone()
  }

  pub fn fail_unmount(&self, target: PathBuf, error: ErrorFactory) {
    lock(&self.state).unmount_errors.insert(target, error);
  }
}

fn resolve(path: &Path) -> PathBuf {
  path.canonicalize().unwrap_or_else(|_| path.to_owned())
}

impl MounterImpl for FakeMounter {
  type Exec = FakeExec;

  #[inline]
  fn exec(&self) -> &FakeExec {
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
    let mut source = source
      .ok_or_else(|| MountError::other("missing required source in fake mounter"))?
      .to_owned();
    let mut state = lock(&self.state);

    // Linux lists the original device of a bind mount as its source:
    //   mount /dev/sda /mnt/test; mount -o bind /mnt/test /mnt/bound
    // gives "/dev/sda /mnt/bound" in /proc/mounts.
    if options.iter().any(|o| o == "bind") {
      if let Some(mp) = state.mount_points.iter().find(|mp| mp.path() == source) {
        source = mp.device().to_owned();
      }
    }

    let target = resolve(target);
    let opts = options
      .iter()
      .chain(sensitive_options.iter())
      .cloned()
      .collect();

    state
      .mount_points
      .push(MountPoint::new(source.clone(), target.clone(), fstype).with_opts(opts));
    info!(
      "Fake mounter: mounted {} to {}",
      source.display(),
      target.display()
    );

    lock(&self.log).push(FakeAction::Mount {
      source,
      target,
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn unmount(&self, target: &Path, _: Option<Duration>) -> Result<()> {
    let mut state = lock(&self.state);
    let target = resolve(target);

    if let Some(error) = state.unmount_errors.get(&target) {
      return Err(error());
    }

    if let Some(i) = state.mount_points.iter().position(|mp| mp.path() == target) {
      let mp = state.mount_points.remove(i);
      info!(
        "Fake mounter: unmounted {} from {}",
        mp.device().display(),
        target.display()
      );
    }

    lock(&self.log).push(FakeAction::Unmount { target });
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.mount_points())
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    // same contract as the real check: the path has to exist
    file.metadata()?;

    let file = resolve(file);
    let mounted = lock(&self.state)
      .mount_points
      .iter()
      .any(|mp| mp.path() == file);

    info!(
      "isLikelyNotMountPoint for {}: {}",
      file.display(),
      !mounted
    );
    Ok(!mounted)
  }
}
