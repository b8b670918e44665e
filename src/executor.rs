use std::process::Command;

use crate::error::{RNFError, RNFResult};

/// What an external command left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  /// Exit code, `None` when the process was killed by a signal.
  pub status: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.status == Some(0)
  }
}

/// Runs one external command to completion.
///
/// `argv[0]` is the program. Implementations block until the process exits.
pub trait CommandExecutor: Send + Sync {
  fn run(&self, argv: &[String]) -> RNFResult<CommandOutput>;
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
  fn run(&self, argv: &[String]) -> RNFResult<CommandOutput> {
    let (program, args) = argv.split_first().ok_or(RNFError::Other("empty command"))?;
    let output = Command::new(program).args(args).output()?;
    Ok(CommandOutput {
      status: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }
}
