use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RNFError {
  #[error("{0}")]
  Io(#[from] io::Error),

  #[error("{0}")]
  Nix(#[from] nix::Error),

  #[error("{0}")]
  Analysis(#[from] RNFAnalysisError),

  /// The engine exited non-zero. Carries the exact argument vector and the raw diagnostic text.
  #[error("command: {command:?}\nmessage: {message}")]
  Command {
    command: Vec<String>,
    status: Option<i32>,
    message: String,
  },

  #[error("{0}")]
  Other(&'static str),
}

/// Defines the Result type of rnetfilter crate
pub type RNFResult<T> = Result<T, RNFError>;

impl From<&'static str> for RNFError {
  fn from(err: &'static str) -> Self {
    RNFError::Other(err)
  }
}

impl RNFError {
  /// The argument vector of a failed engine invocation, if this error came from one.
  pub fn command(&self) -> Option<&[String]> {
    match self {
      RNFError::Command { command, .. } => Some(command),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum RNFAnalysisError {
  #[error("{0}")]
  FromUtf8Error(#[from] FromUtf8Error),

  /// A token sat where an option name (`--name`) was expected.
  #[error("expected option, got: {0}")]
  ExpectedOption(String),

  /// A `!` with no option following it.
  #[error("dangling negation in options: {0:?}")]
  DanglingNegation(Vec<String>),

  #[error("unexpected output: {0}")]
  UnexpectedOutput(String),
}

pub type RNFAnalysisResult<T> = Result<T, RNFAnalysisError>;
