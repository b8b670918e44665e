//! Packet-filter rules as data, serialized into `iptables` arguments and applied to
//! tables either immediately or through a commit buffer.
//!
//! ```rust,ignore
//! use rnetfilter::{Extension, Rule, Table};
//!
//! let engine = rnetfilter::new(false);
//! let mut filter = Table::new(&engine, "filter", false);
//! let ssh = Rule::new()
//!   .with_protocol("tcp")
//!   .with_match(Extension::new_match("tcp", "--destination-port 22")?)
//!   .with_jump("ACCEPT");
//! if ssh.find(&filter.list_rules("INPUT")?).is_none() {
//!   filter.append_rule("INPUT", &ssh)?;
//! }
//! println!("{:?}", filter.buffer());
//! filter.commit()?;
//! ```

pub use engine::{Engine, EngineConfig, Invocation};
pub use error::{RNFAnalysisError, RNFError, RNFResult};
pub use executor::{CommandExecutor, CommandOutput, SystemExecutor};
pub use firewall::Firewall;
pub use options::OptionSet;
pub use rule::{ChainInfo, Extension, ExtensionKind, Rule};
pub use table::{Applied, Table};

mod iptparser;
pub mod engine;
pub mod error;
pub mod executor;
pub mod firewall;
pub mod options;
pub mod rule;
pub mod table;

pub use iptparser::{parse_chains, parse_rules, split_quoted};

/// Engine driving the system `iptables` (or `ip6tables` when `ipv6`) binaries.
pub fn new(ipv6: bool) -> Engine {
  Engine::new(EngineConfig::default().ipv6(ipv6))
}
