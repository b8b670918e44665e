use std::collections::VecDeque;

use tracing::{debug, info};

use crate::engine::{Engine, Invocation};
use crate::error::RNFResult;
use crate::iptparser;
use crate::rule::Rule;

/// What happened to a mutation handed to a [`Table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
  /// Ran against the engine and succeeded.
  Executed,
  /// Ran against the engine; the chain was already there.
  AlreadyExists,
  /// Buffered until [`Table::commit`].
  Queued,
}

impl From<Invocation> for Applied {
  fn from(invocation: Invocation) -> Self {
    match invocation {
      Invocation::Completed(_) => Applied::Executed,
      Invocation::AlreadyExists(_) => Applied::AlreadyExists,
    }
  }
}

/// One engine table, e.g. "filter" or "nat".
///
/// With `auto_commit` every mutation runs immediately. Without it, commands queue up in call
/// order and run on [`Table::commit`].
pub struct Table<'e> {
  engine: &'e Engine,
  name: String,
  auto_commit: bool,
  buffer: VecDeque<Vec<String>>,
}

impl<'e> Table<'e> {
  pub fn new<S: Into<String>>(engine: &'e Engine, name: S, auto_commit: bool) -> Table<'e> {
    Table {
      engine,
      name: name.into(),
      auto_commit,
      buffer: VecDeque::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn auto_commit(&self) -> bool {
    self.auto_commit
  }

  /// Switching on auto-commit does not flush commands already queued.
  pub fn set_auto_commit(&mut self, auto_commit: bool) {
    self.auto_commit = auto_commit;
  }

  /// Creates a user-defined chain. An existing chain yields [`Applied::AlreadyExists`].
  pub fn create_chain(&mut self, chain: &str) -> RNFResult<Applied> {
    self.run_iptables(to_args(&["-N", chain]))
  }

  /// Deletes a user-defined chain, or every user-defined chain when `chain` is `None`.
  pub fn delete_chain(&mut self, chain: Option<&str>) -> RNFResult<Applied> {
    let mut args = to_args(&["-X"]);
    args.extend(chain.map(String::from));
    self.run_iptables(args)
  }

  /// Deletes all rules of a chain, or of every chain when `chain` is `None`.
  pub fn flush_chain(&mut self, chain: Option<&str>) -> RNFResult<Applied> {
    let mut args = to_args(&["-F"]);
    args.extend(chain.map(String::from));
    self.run_iptables(args)
  }

  /// Renames a user-defined chain.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut filter = rnetfilter::Table::new(&engine, "filter", true);
  /// filter.rename_chain("SSH", "SSH_OLD").unwrap();
  /// ```
  pub fn rename_chain(&mut self, old_chain: &str, new_chain: &str) -> RNFResult<Applied> {
    self.run_iptables(to_args(&["-E", old_chain, new_chain]))
  }

  /// Sets the policy of a built-in chain, e.g. `DROP` on `INPUT`.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut filter = rnetfilter::Table::new(&engine, "filter", false);
  /// filter.set_policy("FORWARD", "DROP").unwrap();
  /// filter.commit().unwrap();
  /// ```
  pub fn set_policy(&mut self, chain: &str, policy: &str) -> RNFResult<Applied> {
    self.run_iptables(to_args(&["-P", chain, policy]))
  }

  /// Appends `rule` to the end of `chain`.
  ///
  /// # Example
  ///
  /// ```rust
  /// use rnetfilter::{Extension, Rule, Table};
  ///
  /// let engine = rnetfilter::new(false);
  /// let mut filter = Table::new(&engine, "filter", true);
  /// let ssh = Rule::new()
  ///   .with_protocol("tcp")
  ///   .with_match(Extension::new_match("tcp", "--dport 22").unwrap())
  ///   .with_jump("ACCEPT");
  /// filter.append_rule("INPUT", &ssh).unwrap();
  /// ```
  pub fn append_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<Applied> {
    let mut args = to_args(&["-A", chain]);
    args.extend(rule.to_tokens());
    self.run_iptables(args)
  }

  /// Inserts `rule` at the head of `chain`.
  pub fn prepend_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<Applied> {
    let mut args = to_args(&["-I", chain, "1"]);
    args.extend(rule.to_tokens());
    self.run_iptables(args)
  }

  /// Deletes the first rule of `chain` matching `rule`.
  ///
  /// # Example
  ///
  /// ```rust
  /// use rnetfilter::{Rule, Table};
  ///
  /// let engine = rnetfilter::new(false);
  /// let mut filter = Table::new(&engine, "filter", true);
  /// filter.delete_rule("INPUT", &Rule::new().with_in_interface("lo").with_jump("ACCEPT")).unwrap();
  /// ```
  pub fn delete_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<Applied> {
    let mut args = to_args(&["-D", chain]);
    args.extend(rule.to_tokens());
    self.run_iptables(args)
  }

  /// Rules currently in `chain`, with their counters. Ignores the buffer.
  pub fn list_rules(&self, chain: &str) -> RNFResult<Vec<Rule>> {
    let dump = self.engine.dump(&self.name)?;
    Ok(iptparser::parse_rules(dump, chain)?)
  }

  /// Names of all chains in the table, built-in and user-defined.
  pub fn list_chains(&self) -> RNFResult<Vec<String>> {
    let dump = self.engine.dump(&self.name)?;
    Ok(iptparser::parse_chains(dump)?.into_iter().map(|(name, _)| name).collect())
  }

  /// Policy of a built-in chain. `None` for user-defined or unknown chains.
  pub fn get_policy(&self, chain: &str) -> RNFResult<Option<String>> {
    let dump = self.engine.dump(&self.name)?;
    Ok(iptparser::parse_chains(dump)?.remove(chain).and_then(|info| info.policy))
  }

  /// Runs queued commands in FIFO order. Stops at the first failure, leaving the failed
  /// command and everything after it queued. Returns how many commands ran.
  pub fn commit(&mut self) -> RNFResult<usize> {
    let pending = self.buffer.len();
    if pending > 0 {
      info!("committing {} command(s) to table {}", pending, self.name);
    }

    let mut executed = 0;
    while let Some(command) = self.buffer.front() {
      self.engine.execute(command)?;
      self.buffer.pop_front();
      executed += 1;
    }
    Ok(executed)
  }

  /// Snapshot of the commands waiting for [`Table::commit`].
  pub fn buffer(&self) -> Vec<Vec<String>> {
    self.buffer.iter().cloned().collect()
  }

  /// Drops every queued command, returning them.
  pub fn discard(&mut self) -> Vec<Vec<String>> {
    self.buffer.drain(..).collect()
  }

  fn run_iptables(&mut self, args: Vec<String>) -> RNFResult<Applied> {
    let command = self.engine.command(&self.name, args);
    if self.auto_commit {
      return Ok(self.engine.execute(&command)?.into());
    }
    debug!(command = ?command, "queued");
    self.buffer.push_back(command);
    Ok(Applied::Queued)
  }
}

fn to_args(args: &[&str]) -> Vec<String> {
  args.iter().map(|arg| arg.to_string()).collect()
}
