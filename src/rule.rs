use std::fmt;

use crate::error::RNFAnalysisResult;
use crate::options::{OptionSet, NEGATION};

/// Long option names a match module accepts, and the short names the engine reports them under.
const MATCH_REWRITES: &'static [(&'static str, &'static str)] = &[
  ("destination-port", "dport"),
  ("destination-ports", "dports"),
  ("source-port", "sport"),
  ("source-ports", "sports"),
];

/// Netmasks that select a single host.
const IPV4_HOST_MASKS: &'static [&'static str] = &["/32", "/255.255.255.255"];
const IPV6_HOST_MASK: &'static str = "/128";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
  Match,
  Target,
}

impl ExtensionKind {
  fn rewrites(self) -> &'static [(&'static str, &'static str)] {
    match self {
      ExtensionKind::Match => MATCH_REWRITES,
      ExtensionKind::Target => &[],
    }
  }
}

/// A named match (`-m`) or target (`-j`/`-g`) module with its options.
///
/// Two extensions are equal when name and options are; the kind is not compared.
#[derive(Debug, Clone)]
pub struct Extension {
  kind: ExtensionKind,
  name: String,
  options: OptionSet,
}

impl Extension {
  /// Creates an extension from an option string, e.g. `Extension::new(ExtensionKind::Match, "state", "--state NEW")`.
  pub fn new<S: Into<String>, O: AsRef<str>>(kind: ExtensionKind, name: S, options: O) -> RNFAnalysisResult<Extension> {
    Ok(Extension {
      kind,
      name: name.into(),
      options: OptionSet::parse(options, kind.rewrites())?,
    })
  }

  /// Creates an extension from pre-split option tokens.
  pub fn from_tokens<S: Into<String>, T: AsRef<str>>(kind: ExtensionKind, name: S, tokens: &[T]) -> RNFAnalysisResult<Extension> {
    Ok(Extension {
      kind,
      name: name.into(),
      options: OptionSet::from_tokens(tokens, kind.rewrites())?,
    })
  }

  /// Creates an extension without options.
  pub fn bare<S: Into<String>>(kind: ExtensionKind, name: S) -> Extension {
    Extension {
      kind,
      name: name.into(),
      options: OptionSet::default(),
    }
  }

  pub fn new_match<S: Into<String>, O: AsRef<str>>(name: S, options: O) -> RNFAnalysisResult<Extension> {
    Extension::new(ExtensionKind::Match, name, options)
  }

  pub fn new_target<S: Into<String>, O: AsRef<str>>(name: S, options: O) -> RNFAnalysisResult<Extension> {
    Extension::new(ExtensionKind::Target, name, options)
  }

  pub fn kind(&self) -> ExtensionKind {
    self.kind
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn options(&self) -> &OptionSet {
    &self.options
  }

  pub fn to_tokens(&self) -> Vec<String> {
    self.options.to_tokens()
  }
}

impl PartialEq for Extension {
  fn eq(&self, other: &Extension) -> bool {
    self.name == other.name && self.options == other.options
  }
}

impl Eq for Extension {}

/// A plain name becomes a target without options.
impl From<&str> for Extension {
  fn from(name: &str) -> Self {
    Extension::bare(ExtensionKind::Target, name)
  }
}

impl From<String> for Extension {
  fn from(name: String) -> Self {
    Extension::bare(ExtensionKind::Target, name)
  }
}

/// One packet-filter rule.
///
/// Fields are set through the `with_*` builders, which canonicalize addresses and negations.
/// Packet and byte counters are observed state and do not take part in equality.
#[derive(Debug, Clone, Default)]
pub struct Rule {
  protocol: Option<String>,
  in_interface: Option<String>,
  out_interface: Option<String>,
  source: Option<String>,
  destination: Option<String>,
  matches: Vec<Extension>,
  jump: Option<Extension>,
  goto: Option<Extension>,
  packets: u64,
  bytes: u64,
}

impl Rule {
  pub fn new() -> Rule {
    Rule::default()
  }

  /// Sets the protocol. An empty value leaves the protocol unset.
  pub fn with_protocol<S: Into<String>>(mut self, protocol: S) -> Rule {
    self.protocol = present(protocol.into()).map(canonical_negation);
    self
  }

  pub fn with_in_interface<S: Into<String>>(mut self, interface: S) -> Rule {
    self.in_interface = present(interface.into()).map(canonical_negation);
    self
  }

  pub fn with_out_interface<S: Into<String>>(mut self, interface: S) -> Rule {
    self.out_interface = present(interface.into()).map(canonical_negation);
    self
  }

  /// Sets the source; an exact-host netmask is dropped, so `10.0.0.1/32` is stored as `10.0.0.1`.
  pub fn with_source<S: Into<String>>(mut self, source: S) -> Rule {
    self.source = present(source.into()).map(canonical_negation).map(canonical_host);
    self
  }

  /// Sets the destination, canonicalized like [`Rule::with_source`].
  pub fn with_destination<S: Into<String>>(mut self, destination: S) -> Rule {
    self.destination = present(destination.into()).map(canonical_negation).map(canonical_host);
    self
  }

  pub fn with_matches(mut self, matches: Vec<Extension>) -> Rule {
    self.matches = matches;
    self
  }

  pub fn with_match(mut self, extension: Extension) -> Rule {
    self.matches.push(extension);
    self
  }

  pub fn with_jump<T: Into<Extension>>(mut self, target: T) -> Rule {
    self.jump = Some(target.into());
    self
  }

  pub fn with_goto<T: Into<Extension>>(mut self, target: T) -> Rule {
    self.goto = Some(target.into());
    self
  }

  pub fn with_counters(mut self, packets: u64, bytes: u64) -> Rule {
    self.packets = packets;
    self.bytes = bytes;
    self
  }

  pub fn protocol(&self) -> Option<&str> {
    self.protocol.as_deref()
  }

  pub fn in_interface(&self) -> Option<&str> {
    self.in_interface.as_deref()
  }

  pub fn out_interface(&self) -> Option<&str> {
    self.out_interface.as_deref()
  }

  pub fn source(&self) -> Option<&str> {
    self.source.as_deref()
  }

  pub fn destination(&self) -> Option<&str> {
    self.destination.as_deref()
  }

  pub fn matches(&self) -> &[Extension] {
    &self.matches
  }

  pub fn jump(&self) -> Option<&Extension> {
    self.jump.as_ref()
  }

  pub fn goto(&self) -> Option<&Extension> {
    self.goto.as_ref()
  }

  pub fn packets(&self) -> u64 {
    self.packets
  }

  pub fn bytes(&self) -> u64 {
    self.bytes
  }

  /// Serializes the rule into engine arguments.
  ///
  /// Order is fixed: `-p -i -o -s -d`, every `-m` in sequence, then `-g` or, when no goto is set, `-j`.
  pub fn to_tokens(&self) -> Vec<String> {
    let mut tokens = vec![];
    let hosts = [
      ("-p", &self.protocol),
      ("-i", &self.in_interface),
      ("-o", &self.out_interface),
      ("-s", &self.source),
      ("-d", &self.destination),
    ];
    for (flag, value) in hosts.iter() {
      if let Some(value) = value {
        tokens.extend(host_tokens(flag, value));
      }
    }

    for extension in &self.matches {
      tokens.push("-m".to_string());
      tokens.push(extension.name.clone());
      tokens.extend(extension.to_tokens());
    }

    let target = match (&self.goto, &self.jump) {
      (Some(goto), _) => Some(("-g", goto)),
      (None, Some(jump)) => Some(("-j", jump)),
      (None, None) => None,
    };
    if let Some((flag, extension)) = target {
      tokens.push(flag.to_string());
      tokens.push(extension.name.clone());
      tokens.extend(extension.to_tokens());
    }
    tokens
  }

  /// Returns the first rule in `rules` equal to this one.
  pub fn find<'a>(&self, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules.iter().find(|rule| *rule == self)
  }
}

impl PartialEq for Rule {
  fn eq(&self, other: &Rule) -> bool {
    self.protocol == other.protocol
      && self.in_interface == other.in_interface
      && self.out_interface == other.out_interface
      && self.source == other.source
      && self.destination == other.destination
      && self.goto == other.goto
      && self.jump == other.jump
      && self.matches == other.matches
  }
}

impl Eq for Rule {}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.to_tokens().join(" "))
  }
}

/// Policy and counters of one chain, as reported by a table dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
  /// `None` for user-defined chains, which have no policy.
  pub policy: Option<String>,
  pub packets: u64,
  pub bytes: u64,
}

fn host_tokens(flag: &str, value: &str) -> Vec<String> {
  match value.strip_prefix(NEGATION) {
    Some(rest) => vec![NEGATION.to_string(), flag.to_string(), rest.trim_start().to_string()],
    None => vec![flag.to_string(), value.to_string()],
  }
}

// Blank header values mean "any" and are not serialized.
fn present(value: String) -> Option<String> {
  if value.trim().is_empty() { None } else { Some(value) }
}

// "! eth0" and "!eth0" serialize identically, so store one form.
fn canonical_negation(value: String) -> String {
  match value.strip_prefix(NEGATION) {
    Some(rest) => format!("{}{}", NEGATION, rest.trim_start()),
    None => value,
  }
}

fn canonical_host(value: String) -> String {
  if value.contains(':') {
    if let Some(host) = value.strip_suffix(IPV6_HOST_MASK) {
      return host.to_string();
    }
    return value;
  }
  for mask in IPV4_HOST_MASKS {
    if let Some(host) = value.strip_suffix(mask) {
      return host.to_string();
    }
  }
  value
}
