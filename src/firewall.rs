use tracing::info;

use crate::engine::Engine;
use crate::error::RNFResult;
use crate::rule::{Extension, Rule};
use crate::table::Table;

/// ICMP types accepted on input by [`Firewall::accept_icmp`] over IPv4.
const ACCEPTED_ICMP_TYPES: &'static [&'static str] = &[
  "echo-request",
  "network-unreachable",
  "host-unreachable",
  "port-unreachable",
  "fragmentation-needed",
  "time-exceeded",
];

const CONNTRACK_ESTABLISHED: &'static str = "--state ESTABLISHED,RELATED";

/// A host firewall assembled from the `filter` table and, for IPv4, the `nat` table.
pub struct Firewall<'e> {
  pub filter: Table<'e>,
  pub nat: Option<Table<'e>>,
  ipv6: bool,
}

impl<'e> Firewall<'e> {
  pub fn new(engine: &'e Engine, auto_commit: bool) -> Firewall<'e> {
    let ipv6 = engine.is_ipv6();
    Firewall {
      filter: Table::new(engine, "filter", auto_commit),
      nat: if ipv6 { None } else { Some(Table::new(engine, "nat", auto_commit)) },
      ipv6,
    }
  }

  fn tables(&mut self) -> impl Iterator<Item=&mut Table<'e>> + '_ {
    std::iter::once(&mut self.filter).chain(self.nat.as_mut())
  }

  /// Flushes every chain and deletes every user-defined chain.
  pub fn clear(&mut self) -> RNFResult<()> {
    for table in self.tables() {
      table.flush_chain(None)?;
      table.delete_chain(None)?;
    }
    Ok(())
  }

  pub fn commit(&mut self) -> RNFResult<()> {
    for table in self.tables() {
      table.commit()?;
    }
    Ok(())
  }

  /// Queued commands of all tables, filter first.
  pub fn buffer(&self) -> Vec<Vec<String>> {
    let mut buffer = self.filter.buffer();
    if let Some(nat) = &self.nat {
      buffer.extend(nat.buffer());
    }
    buffer
  }

  pub fn start(&mut self) -> RNFResult<()> {
    self.clear()?;
    self.set_default_policy()?;
    self.accept_icmp(None)?;
    self.accept_input(Some("lo"))
  }

  pub fn stop(&mut self) -> RNFResult<()> {
    self.clear()?;
    self.set_open_policy()
  }

  /// Accepts forwarding from `in_interface` to `out_interface`; `None` means any.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut firewall = rnetfilter::Firewall::new(&engine, true);
  /// firewall.accept_forward(Some("eth1"), Some("eth0")).unwrap();
  /// ```
  pub fn accept_forward(&mut self, in_interface: Option<&str>, out_interface: Option<&str>) -> RNFResult<()> {
    self.message("allow FORWARD", in_interface);
    let mut rule = self::inbound(in_interface).with_jump("ACCEPT");
    if let Some(out_interface) = out_interface {
      rule = rule.with_out_interface(out_interface);
    }
    self.filter.append_rule("FORWARD", &rule)?;
    Ok(())
  }

  /// Accepts diagnostic ICMP input: a fixed set of types over IPv4, all of ICMPv6 over IPv6.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut firewall = rnetfilter::Firewall::new(&engine, true);
  /// firewall.accept_icmp(Some("eth0")).unwrap();
  /// ```
  pub fn accept_icmp(&mut self, interface: Option<&str>) -> RNFResult<()> {
    self.message("allow selected icmp INPUT", interface);
    if self.ipv6 {
      let rule = self::inbound(interface).with_protocol("icmpv6").with_jump("ACCEPT");
      self.filter.append_rule("INPUT", &rule)?;
      return Ok(());
    }

    for icmp_type in ACCEPTED_ICMP_TYPES {
      let rule = self::inbound(interface)
        .with_protocol("icmp")
        .with_match(Extension::new_match("icmp", format!("--icmp-type {}", icmp_type))?)
        .with_jump("ACCEPT");
      self.filter.append_rule("INPUT", &rule)?;
    }
    Ok(())
  }

  /// Accepts all input on `interface`, or on every interface when `None`.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut firewall = rnetfilter::Firewall::new(&engine, true);
  /// firewall.accept_input(Some("lo")).unwrap();
  /// ```
  pub fn accept_input(&mut self, interface: Option<&str>) -> RNFResult<()> {
    self.message("allow INPUT", interface);
    self.filter.append_rule("INPUT", &self::inbound(interface).with_jump("ACCEPT"))?;
    Ok(())
  }

  /// Accepts new connections of `protocol` to any of `ports`.
  ///
  /// # Example
  ///
  /// ```rust
  /// let engine = rnetfilter::new(false);
  /// let mut firewall = rnetfilter::Firewall::new(&engine, true);
  /// firewall.accept_protocol(Some("eth0"), "tcp", &["22", "443"], None, None).unwrap();
  /// ```
  pub fn accept_protocol(&mut self, interface: Option<&str>, protocol: &str, ports: &[&str], destination: Option<&str>, source: Option<&str>) -> RNFResult<()> {
    let ports = ports.join(",");
    self.message(&format!("allow selected {} INPUT (ports: {})", protocol, ports), interface);

    let mut rule = self::inbound(interface)
      .with_protocol(protocol)
      .with_matches(vec![
        Extension::new_match("state", "--state NEW")?,
        Extension::new_match("multiport", format!("--destination-ports {}", ports))?,
      ])
      .with_jump("ACCEPT");
    if let Some(destination) = destination {
      rule = rule.with_destination(destination);
    }
    if let Some(source) = source {
      rule = rule.with_source(source);
    }
    self.filter.append_rule("INPUT", &rule)?;
    Ok(())
  }

  /// Redirects inbound HTTP to a local proxy port. No-op over IPv6.
  pub fn redirect_http(&mut self, interface: Option<&str>, proxy_port: u16) -> RNFResult<()> {
    if self.ipv6 {
      return Ok(());
    }
    self.message(&format!("redirect HTTP to port {}", proxy_port), interface);
    let rule = self::inbound(interface)
      .with_protocol("tcp")
      .with_match(Extension::new_match("tcp", "--dport 80")?)
      .with_jump(Extension::new_target("REDIRECT", format!("--to-port {}", proxy_port))?);
    if let Some(nat) = self.nat.as_mut() {
      nat.append_rule("PREROUTING", &rule)?;
    }
    Ok(())
  }

  /// Drops input and forwarded traffic except established connections; allows all output.
  pub fn set_default_policy(&mut self) -> RNFResult<()> {
    self.message("set default policy", None);
    let established = Rule::new()
      .with_match(Extension::new_match("state", CONNTRACK_ESTABLISHED)?)
      .with_jump("ACCEPT");
    self.filter.set_policy("INPUT", "DROP")?;
    self.filter.append_rule("INPUT", &established)?;
    self.filter.set_policy("OUTPUT", "ACCEPT")?;
    self.filter.set_policy("FORWARD", "DROP")?;
    self.filter.append_rule("FORWARD", &established)?;
    Ok(())
  }

  pub fn set_open_policy(&mut self) -> RNFResult<()> {
    self.message("set open policy", None);
    for chain in &["INPUT", "OUTPUT", "FORWARD"] {
      self.filter.set_policy(chain, "ACCEPT")?;
    }
    Ok(())
  }

  /// Masquerades traffic leaving `interface`. No-op over IPv6.
  pub fn source_nat(&mut self, interface: &str) -> RNFResult<()> {
    if self.ipv6 {
      return Ok(());
    }
    self.message("enable SNAT", Some(interface));
    let rule = Rule::new().with_out_interface(interface).with_jump("MASQUERADE");
    if let Some(nat) = self.nat.as_mut() {
      nat.append_rule("POSTROUTING", &rule)?;
    }
    Ok(())
  }

  fn message(&self, msg: &str, interface: Option<&str>) {
    let version = if self.ipv6 { "IPv6" } else { "IPv4" };
    match interface {
      Some(interface) => info!("{} interface {}: {}", version, interface, msg),
      None => info!("{} global: {}", version, msg),
    }
  }
}

fn inbound(interface: Option<&str>) -> Rule {
  match interface {
    Some(interface) => Rule::new().with_in_interface(interface),
    None => Rule::new(),
  }
}
