use std::collections::BTreeMap;

use crate::error::{RNFAnalysisError, RNFAnalysisResult};
use crate::iptparser;

/// Token the engine uses to negate the option or flag that follows it.
pub const NEGATION: &str = "!";

/// Marker prefixed to a stored key when the option is negated.
/// Never a valid option name, since names come from `--name` tokens.
const NEGATED_KEY: &str = "! ";

const OPTION_INTRODUCER: &str = "--";

/// Options of one match or target module, keyed by canonical option name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
  options: BTreeMap<String, Vec<String>>,
}

impl OptionSet {
  /// Parses an option string such as `--state NEW ! --dport 22`.
  /// Words in double quotes are kept together.
  pub fn parse<S: AsRef<str>>(text: S, rewrites: &[(&str, &str)]) -> RNFAnalysisResult<OptionSet> {
    let tokens = iptparser::split_quoted(text)?;
    OptionSet::from_tokens(&tokens, rewrites)
  }

  /// Builds the set from already split tokens, renaming any option found in `rewrites`.
  pub fn from_tokens<T: AsRef<str>>(tokens: &[T], rewrites: &[(&str, &str)]) -> RNFAnalysisResult<OptionSet> {
    let mut options = BTreeMap::new();
    let mut negations = 0;
    let mut pos = 0;

    while pos < tokens.len() {
      let token = tokens[pos].as_ref();
      if token == NEGATION {
        negations += 1;
        pos += 1;
        continue;
      }

      let name = option_name(token).ok_or_else(|| RNFAnalysisError::ExpectedOption(token.to_string()))?;
      pos += 1;
      let name = rewrites.iter()
        .find(|(long, _)| *long == name)
        .map(|(_, short)| *short)
        .unwrap_or(name);

      let mut values = vec![];
      while pos < tokens.len() && !starts_option(tokens, pos) {
        values.push(tokens[pos].as_ref().to_string());
        pos += 1;
      }

      options.insert(format!("{}{}", NEGATED_KEY.repeat(negations), name), values);
      negations = 0;
    }

    if negations > 0 {
      return Err(RNFAnalysisError::DanglingNegation(tokens.iter().map(|t| t.as_ref().to_string()).collect()));
    }
    Ok(OptionSet { options })
  }

  pub fn is_empty(&self) -> bool {
    self.options.is_empty()
  }

  pub fn len(&self) -> usize {
    self.options.len()
  }

  /// Values of an option. Negated options are looked up as `"! name"`.
  pub fn get(&self, key: &str) -> Option<&[String]> {
    self.options.get(key).map(|values| &values[..])
  }

  pub fn iter(&self) -> impl Iterator<Item=(&str, &[String])> {
    self.options.iter().map(|(key, values)| (&key[..], &values[..]))
  }

  /// Serializes in sorted key order so output is deterministic.
  pub fn to_tokens(&self) -> Vec<String> {
    let mut tokens = vec![];
    for (key, values) in &self.options {
      let mut name = &key[..];
      while let Some(rest) = name.strip_prefix(NEGATED_KEY) {
        tokens.push(NEGATION.to_string());
        name = rest;
      }
      tokens.push(format!("{}{}", OPTION_INTRODUCER, name));
      tokens.extend(values.iter().cloned());
    }
    tokens
  }
}

fn option_name(token: &str) -> Option<&str> {
  token.strip_prefix(OPTION_INTRODUCER)
}

// `!` only ends a value list when it negates the next option.
fn starts_option<T: AsRef<str>>(tokens: &[T], pos: usize) -> bool {
  let token = tokens[pos].as_ref();
  if option_name(token).is_some() {
    return true;
  }
  token == NEGATION && tokens.get(pos + 1).map_or(false, |next| option_name(next.as_ref()).is_some())
}
