use std::collections::BTreeMap;
use std::mem;

use string_builder::Builder;
use text_reader::TextReader;
use tracing::warn;

use crate::error::{RNFAnalysisError, RNFAnalysisResult};
use crate::options::NEGATION;
use crate::rule::{ChainInfo, Extension, ExtensionKind, Rule};

/// Flags that belong to the rule itself rather than to a match or target module.
const RULE_FLAGS: &'static [&'static str] = &["-p", "-i", "-o", "-s", "-d", "-m", "-j", "-g"];

/// Splits text into words on whitespace, keeping double-quoted runs together.
/// Inside quotes a backslash escapes the next character.
pub fn split_quoted<S: AsRef<str>>(text: S) -> RNFAnalysisResult<Vec<String>> {
  let text = text.as_ref();
  let mut reader = TextReader::new(text.to_string());
  let mut words = vec![];
  let mut builder = Builder::default();
  let mut in_word = false;
  let mut quoted = false;

  while reader.has_next() {
    match reader.next() {
      Some('"') => {
        quoted = !quoted;
        in_word = true;
      }
      Some('\\') if quoted => {
        if let Some(ch) = reader.next() {
          builder.append(ch);
        }
      }
      Some(ch) if ch.is_whitespace() && !quoted => {
        if in_word {
          words.push(mem::take(&mut builder).string()?);
          in_word = false;
        }
      }
      Some(ch) => {
        builder.append(ch);
        in_word = true;
      }
      None => break,
    }
  }

  if quoted {
    return Err(RNFAnalysisError::UnexpectedOutput(text.to_string()));
  }
  if in_word {
    words.push(builder.string()?);
  }
  Ok(words)
}

/// Reads the chain declarations (`:NAME POLICY [packets:bytes]`) of a save-format dump.
pub fn parse_chains<S: AsRef<str>>(text: S) -> RNFAnalysisResult<BTreeMap<String, ChainInfo>> {
  let mut chains = BTreeMap::new();
  for line in text.as_ref().lines() {
    let line = line.trim();
    let declaration = match line.strip_prefix(':') {
      Some(declaration) => declaration,
      None => continue,
    };

    let fields = declaration.split_whitespace().collect::<Vec<&str>>();
    if fields.len() < 2 {
      return Err(RNFAnalysisError::UnexpectedOutput(line.to_string()));
    }
    let (packets, bytes) = match fields.get(2) {
      Some(counters) => self::parse_counters(counters)?,
      None => (0, 0),
    };
    let policy = match fields[1] {
      "-" => None,
      policy => Some(policy.to_string()),
    };
    chains.insert(fields[0].to_string(), ChainInfo { policy, packets, bytes });
  }
  Ok(chains)
}

/// Reads the rules appended to `chain` in a save-format dump, in dump order.
///
/// Rules using a rule-level flag that [`Rule`] cannot hold, such as `-f`, are left out, so they
/// never compare equal to a built rule.
pub fn parse_rules<S: AsRef<str>>(text: S, chain: &str) -> RNFAnalysisResult<Vec<Rule>> {
  let mut rules = vec![];
  for line in text.as_ref().lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('*') || line.starts_with(':') || line == "COMMIT" {
      continue;
    }

    let words = self::split_quoted(line)?;
    let mut pos = 0;
    let mut counters = (0, 0);
    if let Some(first) = words.first() {
      if first.starts_with('[') {
        counters = self::parse_counters(first)?;
        pos = 1;
      }
    }

    match (words.get(pos).map(|w| &w[..]), words.get(pos + 1)) {
      (Some("-A"), Some(name)) => {
        if name != chain {
          continue;
        }
      }
      _ => return Err(RNFAnalysisError::UnexpectedOutput(line.to_string())),
    }

    match self::to_rule(line, &words[pos + 2..])? {
      Some(rule) => rules.push(rule.with_counters(counters.0, counters.1)),
      None => warn!("skipping rule with unsupported flags: {}", line),
    }
  }
  Ok(rules)
}

fn to_rule(line: &str, words: &[String]) -> RNFAnalysisResult<Option<Rule>> {
  let unexpected = || RNFAnalysisError::UnexpectedOutput(line.to_string());

  let mut rule = Rule::new();
  let mut negate = false;
  let mut pos = 0;

  while pos < words.len() {
    let flag = &words[pos][..];
    if flag == NEGATION {
      negate = true;
      pos += 1;
      continue;
    }
    if !RULE_FLAGS.iter().any(|known| *known == flag) {
      if flag.starts_with('-') {
        return Ok(None);
      }
      return Err(unexpected());
    }

    let value = words.get(pos + 1).ok_or_else(unexpected)?;
    pos += 2;
    let host = if negate { format!("{}{}", NEGATION, value) } else { value.clone() };

    rule = match flag {
      "-p" => rule.with_protocol(host),
      "-i" => rule.with_in_interface(host),
      "-o" => rule.with_out_interface(host),
      "-s" => rule.with_source(host),
      "-d" => rule.with_destination(host),
      "-m" | "-j" | "-g" => {
        if negate {
          return Err(unexpected());
        }
        let end = self::extension_end(words, pos);
        let kind = if flag == "-m" { ExtensionKind::Match } else { ExtensionKind::Target };
        let extension = Extension::from_tokens(kind, value.clone(), &words[pos..end])?;
        pos = end;
        match flag {
          "-m" => rule.with_match(extension),
          "-j" => rule.with_jump(extension),
          _ => rule.with_goto(extension),
        }
      }
      _ => return Err(unexpected()),
    };
    negate = false;
  }

  if negate {
    return Err(unexpected());
  }
  Ok(Some(rule))
}

/// Index of the first word after `start` that begins a new rule-level flag.
fn extension_end(words: &[String], start: usize) -> usize {
  let is_rule_flag = |pos: usize| words.get(pos).map_or(false, |w| self::is_short_flag(w));
  let mut pos = start;
  while pos < words.len() {
    if is_rule_flag(pos) || (words[pos] == NEGATION && is_rule_flag(pos + 1)) {
      break;
    }
    pos += 1;
  }
  pos
}

// Rule-level flags are single-dash letters; module options always start with `--`.
fn is_short_flag(word: &str) -> bool {
  let mut chars = word.chars();
  chars.next() == Some('-') && chars.next().map_or(false, |ch| ch.is_ascii_alphabetic()) && chars.next().is_none()
}

fn parse_counters(text: &str) -> RNFAnalysisResult<(u64, u64)> {
  let unexpected = || RNFAnalysisError::UnexpectedOutput(text.to_string());
  let inner = text.strip_prefix('[')
    .and_then(|rest| rest.strip_suffix(']'))
    .ok_or_else(unexpected)?;
  let mut parts = inner.splitn(2, ':');
  let packets = parts.next().and_then(|p| p.parse::<u64>().ok()).ok_or_else(unexpected)?;
  let bytes = parts.next().and_then(|b| b.parse::<u64>().ok()).ok_or_else(unexpected)?;
  Ok((packets, bytes))
}
