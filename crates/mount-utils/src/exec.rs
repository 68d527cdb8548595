use crate::{MountError, Result};
use std::fmt;
use tracing::debug;

/// A helper command line. Bytes fed to stdin are never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Cmd {
  program: String,
  args: Vec<String>,
  stdin: Option<Vec<u8>>,
}

impl Cmd {
  pub fn new(program: impl Into<String>) -> Self {
    Cmd {
      program: program.into(),
      args: Vec::new(),
      stdin: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I>(mut self, args: I) -> Self
  where
    I: IntoIterator,
    I::Item: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Secret input, e.g. a passphrase.
  pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
    self.stdin = Some(input.into());
    self
  }

  #[inline]
  pub fn program(&self) -> &str {
    &self.program
  }

  #[inline]
  pub fn get_args(&self) -> &[String] {
    &self.args
  }

  #[inline]
  pub fn get_stdin(&self) -> Option<&[u8]> {
    self.stdin.as_deref()
  }
}

impl fmt::Debug for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cmd")
      .field("program", &self.program)
      .field("args", &self.args)
      .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

impl fmt::Display for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }

    Ok(())
  }
}

/// Exit code and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  code: Option<i32>,
  output: String,
}

impl CommandOutput {
  pub fn new(code: Option<i32>, output: impl Into<String>) -> Self {
    CommandOutput {
      code,
      output: output.into(),
    }
  }

  pub fn success(output: impl Into<String>) -> Self {
    CommandOutput::new(Some(0), output)
  }

  /// `None` when the process was killed by a signal.
  #[inline]
  pub fn code(&self) -> Option<i32> {
    self.code
  }

  #[inline]
  pub fn output(&self) -> &str {
    &self.output
  }

  #[inline]
  pub fn is_success(&self) -> bool {
    self.code == Some(0)
  }

  /// Turns a non-zero exit into [`MountError::CommandFailed`].
  pub fn check(self, cmd: &Cmd) -> Result<Self> {
    if self.is_success() {
      Ok(self)
    } else {
      Err(MountError::CommandFailed {
        command: cmd.to_string(),
        code: self.code,
        output: self.output,
      })
    }
  }
}

/// Runs helper tools. Called from the blocking worker pool only.
pub trait Exec: Send + Sync + 'static {
  /// Runs `cmd` to completion. A non-zero exit is not an error here.
  fn run(&self, cmd: &Cmd) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsExec;

impl Exec for OsExec {
  fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
    debug!(command = %cmd, "running");

    let mut expr = duct::cmd(cmd.program.as_str(), &cmd.args);
    if let Some(stdin) = &cmd.stdin {
      expr = expr.stdin_bytes(stdin.clone());
    }

    let output = expr.stderr_to_stdout().stdout_capture().unchecked().run()?;
    let output = CommandOutput::new(
      output.status.code(),
      String::from_utf8_lossy(&output.stdout).into_owned(),
    );

    debug!(command = %cmd, code = ?output.code(), "finished");
    Ok(output)
  }
}
