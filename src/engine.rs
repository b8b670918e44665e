use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::error::{RNFError, RNFResult};
use crate::executor::{CommandExecutor, CommandOutput, SystemExecutor};

/// Lock file used to serialize invocations when the engine has no `--wait` option.
pub const DEFAULT_LEGACY_LOCK: &'static str = "/var/run/xtables_old.lock";

const WAIT_FLAG: &'static str = "--wait";

/// Diagnostic the engine prints for `-N` on an existing chain.
const CHAIN_ALREADY_EXISTS: &'static str = "Chain already exists";

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Drive `ip6tables`/`ip6tables-save` instead of `iptables`/`iptables-save`.
  pub ipv6: bool,

  /// File locked around every mutation when `--wait` is unsupported. `None` disables locking.
  pub legacy_lock: Option<PathBuf>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      ipv6: false,
      legacy_lock: Some(PathBuf::from(DEFAULT_LEGACY_LOCK)),
    }
  }
}

impl EngineConfig {
  pub fn ipv6(mut self, ipv6: bool) -> Self {
    self.ipv6 = ipv6;
    self
  }

  pub fn legacy_lock<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.legacy_lock = Some(path.into());
    self
  }

  pub fn without_legacy_lock(mut self) -> Self {
    self.legacy_lock = None;
    self
  }
}

/// Successful outcome of an engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
  /// Exited cleanly, with its standard output.
  Completed(String),

  /// Exited non-zero only because the chain already existed. Carries the diagnostic.
  AlreadyExists(String),
}

/// Access to the `iptables` engine: program names, the command executor and the cached
/// `--wait` capability. Every [`Table`](crate::table::Table) borrows one.
pub struct Engine {
  cmd: &'static str,
  save_cmd: &'static str,
  executor: Arc<dyn CommandExecutor>,
  legacy_lock: Option<PathBuf>,
  has_wait: OnceLock<bool>,
}

impl Engine {
  pub fn new(config: EngineConfig) -> Engine {
    Engine::with_executor(config, Arc::new(SystemExecutor))
  }

  pub fn with_executor(config: EngineConfig, executor: Arc<dyn CommandExecutor>) -> Engine {
    let (cmd, save_cmd) = if config.ipv6 {
      ("ip6tables", "ip6tables-save")
    } else {
      ("iptables", "iptables-save")
    };
    Engine {
      cmd,
      save_cmd,
      executor,
      legacy_lock: config.legacy_lock,
      has_wait: OnceLock::new(),
    }
  }

  /// The utility command, 'iptables' or 'ip6tables'.
  pub fn cmd(&self) -> &'static str {
    self.cmd
  }

  /// The dump command, 'iptables-save' or 'ip6tables-save'.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(true);
  /// assert_eq!(engine.save_cmd(), "ip6tables-save");
  /// ```
  pub fn save_cmd(&self) -> &'static str {
    self.save_cmd
  }

  pub fn is_ipv6(&self) -> bool {
    self.cmd == "ip6tables"
  }

  /// Whether the engine accepts `--wait`. Probed on first call, then cached.
  pub fn has_wait(&self) -> bool {
    *self.has_wait.get_or_init(|| self.probe_wait())
  }

  fn probe_wait(&self) -> bool {
    let argv = to_argv(&[self.cmd, "-L", "-n", WAIT_FLAG]);
    match self.executor.run(&argv) {
      Ok(output) if output.success() => true,
      Ok(output) => {
        debug!(status = ?output.status, "{} does not support {}", self.cmd, WAIT_FLAG);
        false
      }
      Err(err) => {
        warn!("probing {} for {} failed: {}", self.cmd, WAIT_FLAG, err);
        false
      }
    }
  }

  /// Builds `[cmd, -t, table, args...]`.
  pub fn command(&self, table: &str, args: Vec<String>) -> Vec<String> {
    let mut command = to_argv(&[self.cmd, "-t", table]);
    command.extend(args);
    command
  }

  /// Runs a command built by [`Engine::command`], adding `--wait` when supported and taking
  /// the legacy lock otherwise.
  pub fn execute(&self, command: &[String]) -> RNFResult<Invocation> {
    let mut argv = command.to_vec();
    let _lock = if self.has_wait() {
      argv.insert(1, WAIT_FLAG.to_string());
      None
    } else {
      self.lock()?
    };

    let output = self.run(&argv)?;
    if output.success() {
      return Ok(Invocation::Completed(output.stdout));
    }
    if output.stderr.contains(CHAIN_ALREADY_EXISTS) {
      debug!(command = ?argv, "chain already exists");
      return Ok(Invocation::AlreadyExists(output.stderr));
    }
    Err(self::failure(argv, output))
  }

  /// Save-format dump of `table` with packet and byte counters.
  pub fn dump(&self, table: &str) -> RNFResult<String> {
    let argv = to_argv(&[self.save_cmd, "-t", table, "-c"]);
    let output = self.run(&argv)?;
    if !output.success() {
      return Err(self::failure(argv, output));
    }
    Ok(output.stdout)
  }

  fn run(&self, argv: &[String]) -> RNFResult<CommandOutput> {
    debug!(command = ?argv, "running");
    self.executor.run(argv)
  }

  fn lock(&self) -> RNFResult<Option<Flock<File>>> {
    let path = match &self.legacy_lock {
      Some(path) => path,
      None => return Ok(None),
    };
    let file = File::create(path)?;
    let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| RNFError::Nix(errno))?;
    Ok(Some(lock))
  }
}

fn failure(command: Vec<String>, output: CommandOutput) -> RNFError {
  let message = if output.stderr.trim().is_empty() { output.stdout } else { output.stderr };
  RNFError::Command {
    command,
    status: output.status,
    message,
  }
}

fn to_argv(args: &[&str]) -> Vec<String> {
  args.iter().map(|arg| arg.to_string()).collect()
}
