#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rnetfilter::{CommandExecutor, CommandOutput, Engine, EngineConfig, RNFError, RNFResult};

type Responder = Box<dyn Fn(&[String]) -> Option<CommandOutput> + Send + Sync>;

/// Records every command and answers like a cooperative `iptables`.
pub struct MockExecutor {
  calls: Mutex<Vec<Vec<String>>>,
  wait: bool,
  probe_error: bool,
  dump: String,
  responder: Mutex<Option<Responder>>,
}

impl MockExecutor {
  pub fn new() -> MockExecutor {
    MockExecutor {
      calls: Mutex::new(vec![]),
      wait: false,
      probe_error: false,
      dump: String::new(),
      responder: Mutex::new(None),
    }
  }

  pub fn with_wait(mut self) -> MockExecutor {
    self.wait = true;
    self
  }

  /// The `--wait` probe fails to spawn instead of exiting non-zero.
  pub fn with_probe_error(mut self) -> MockExecutor {
    self.probe_error = true;
    self
  }

  pub fn with_dump<S: Into<String>>(mut self, dump: S) -> MockExecutor {
    self.dump = dump.into();
    self
  }

  /// Overrides the answer for commands where `responder` returns `Some`.
  pub fn respond<F>(&self, responder: F) where F: Fn(&[String]) -> Option<CommandOutput> + Send + Sync + 'static {
    *self.responder.lock().unwrap() = Some(Box::new(responder));
  }

  pub fn reset_responder(&self) {
    *self.responder.lock().unwrap() = None;
  }

  pub fn calls(&self) -> Vec<Vec<String>> {
    self.calls.lock().unwrap().clone()
  }

  /// Recorded commands without the `--wait` probes.
  pub fn engine_calls(&self) -> Vec<Vec<String>> {
    self.calls().into_iter().filter(|argv| !is_probe(argv)).collect()
  }

  pub fn probe_count(&self) -> usize {
    self.calls().iter().filter(|argv| is_probe(argv)).count()
  }
}

impl CommandExecutor for MockExecutor {
  fn run(&self, argv: &[String]) -> RNFResult<CommandOutput> {
    self.calls.lock().unwrap().push(argv.to_vec());

    if is_probe(argv) {
      if self.probe_error {
        return Err(RNFError::Other("no such program"));
      }
      return Ok(if self.wait { ok("") } else { fail(2, "iptables v1.4.7: unknown option \"--wait\"") });
    }
    if let Some(responder) = self.responder.lock().unwrap().as_ref() {
      if let Some(output) = responder(argv) {
        return Ok(output);
      }
    }
    if argv[0].ends_with("-save") {
      return Ok(ok(&self.dump));
    }
    Ok(ok(""))
  }
}

fn is_probe(argv: &[String]) -> bool {
  argv.len() == 4 && argv[1] == "-L" && argv[2] == "-n" && argv[3] == "--wait"
}

pub fn ok(stdout: &str) -> CommandOutput {
  CommandOutput { status: Some(0), stdout: stdout.to_string(), stderr: String::new() }
}

pub fn fail(status: i32, stderr: &str) -> CommandOutput {
  CommandOutput { status: Some(status), stdout: String::new(), stderr: stderr.to_string() }
}

pub fn argv(text: &str) -> Vec<String> {
  text.split_whitespace().map(String::from).collect()
}

pub fn engine(executor: &Arc<MockExecutor>) -> Engine {
  init_logging();
  Engine::with_executor(EngineConfig::default().without_legacy_lock(), executor.clone())
}

pub fn init_logging() {
  let _ = tracing_subscriber::fmt()
    .with_test_writer()
    .with_max_level(tracing::Level::DEBUG)
    .try_init();
}
