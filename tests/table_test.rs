use std::sync::Arc;

use rnetfilter::{Applied, Engine, EngineConfig, Extension, RNFError, Rule, Table};

mod common;

use common::{argv, engine, fail, MockExecutor};

const DUMP: &str = "\
# Generated by iptables-save v1.8.7
*filter
:INPUT DROP [10:1000]
:FORWARD DROP [0:0]
:OUTPUT ACCEPT [5:500]
:WEB - [0:0]
[7:420] -A INPUT -d 192.168.1.10/32 -p tcp -m tcp --dport 80 -j WEB
[1:60] -A INPUT -i lo -j ACCEPT
[0:0] -A WEB -j ACCEPT
COMMIT
";

fn ssh_rule() -> Rule {
  Rule::new()
    .with_protocol("tcp")
    .with_in_interface("eth0")
    .with_match(Extension::new_match("state", "--state NEW").unwrap())
    .with_jump("ACCEPT")
}

#[test]
fn test_buffered_append_does_not_run() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", false);

  assert_eq!(table.append_rule("INPUT", &ssh_rule()).unwrap(), Applied::Queued);

  assert_eq!(table.buffer(), vec![argv("iptables -t filter -A INPUT -p tcp -i eth0 -m state --state NEW -j ACCEPT")]);
  assert!(mock.calls().is_empty());
}

#[test]
fn test_commit_runs_buffer_in_order() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", false);

  table.create_chain("SSH").unwrap();
  table.append_rule("SSH", &ssh_rule()).unwrap();
  table.set_policy("INPUT", "DROP").unwrap();
  let queued = table.buffer();
  assert_eq!(queued.len(), 3);

  assert_eq!(table.commit().unwrap(), 3);

  assert_eq!(mock.engine_calls(), queued);
  assert!(table.buffer().is_empty());
  assert_eq!(table.commit().unwrap(), 0);
  assert_eq!(mock.engine_calls().len(), 3);
}

#[test]
fn test_auto_commit_runs_immediately() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "nat", true);

  let masquerade = Rule::new().with_out_interface("eth1").with_jump("MASQUERADE");
  assert_eq!(table.append_rule("POSTROUTING", &masquerade).unwrap(), Applied::Executed);

  assert!(table.buffer().is_empty());
  assert_eq!(mock.engine_calls(), vec![argv("iptables -t nat -A POSTROUTING -o eth1 -j MASQUERADE")]);
}

#[test]
fn test_mutation_flags() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", false);
  let rule = Rule::new().with_source("10.0.0.0/8").with_jump("DROP");

  table.prepend_rule("INPUT", &rule).unwrap();
  table.delete_rule("INPUT", &rule).unwrap();
  table.delete_chain(Some("OLD")).unwrap();
  table.delete_chain(None).unwrap();
  table.flush_chain(None).unwrap();
  table.flush_chain(Some("INPUT")).unwrap();
  table.rename_chain("NEW", "RENAMED").unwrap();

  assert_eq!(table.buffer(), vec![
    argv("iptables -t filter -I INPUT 1 -s 10.0.0.0/8 -j DROP"),
    argv("iptables -t filter -D INPUT -s 10.0.0.0/8 -j DROP"),
    argv("iptables -t filter -X OLD"),
    argv("iptables -t filter -X"),
    argv("iptables -t filter -F"),
    argv("iptables -t filter -F INPUT"),
    argv("iptables -t filter -E NEW RENAMED"),
  ]);
}

#[test]
fn test_wait_is_probed_once() {
  let mock = Arc::new(MockExecutor::new().with_wait());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", true);

  table.flush_chain(None).unwrap();
  table.delete_chain(None).unwrap();
  let mut other = Table::new(&engine, "nat", true);
  other.flush_chain(None).unwrap();

  assert_eq!(mock.probe_count(), 1);
  assert_eq!(mock.engine_calls(), vec![
    argv("iptables --wait -t filter -F"),
    argv("iptables --wait -t filter -X"),
    argv("iptables --wait -t nat -F"),
  ]);
}

#[test]
fn test_probe_error_means_no_wait() {
  let mock = Arc::new(MockExecutor::new().with_probe_error());
  let engine = engine(&mock);

  assert!(!engine.has_wait());
  assert!(!engine.has_wait());
  assert_eq!(mock.probe_count(), 1);

  let mut table = Table::new(&engine, "filter", true);
  table.set_policy("FORWARD", "DROP").unwrap();
  assert_eq!(mock.engine_calls(), vec![argv("iptables -t filter -P FORWARD DROP")]);
}

#[test]
fn test_chain_already_exists_is_benign() {
  let mock = Arc::new(MockExecutor::new());
  mock.respond(|argv| if argv.contains(&"-N".to_string()) {
    Some(fail(1, "iptables: Chain already exists.\n"))
  } else {
    None
  });
  let engine = engine(&mock);

  let mut table = Table::new(&engine, "filter", true);
  assert_eq!(table.create_chain("SSH").unwrap(), Applied::AlreadyExists);

  let mut buffered = Table::new(&engine, "filter", false);
  buffered.create_chain("SSH").unwrap();
  buffered.append_rule("SSH", &ssh_rule()).unwrap();
  assert_eq!(buffered.commit().unwrap(), 2);
  assert!(buffered.buffer().is_empty());
}

#[test]
fn test_failure_carries_command() {
  let mock = Arc::new(MockExecutor::new());
  mock.respond(|_| Some(fail(2, "iptables v1.8.7 (legacy): Couldn't load target `NOPE'")));
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", true);

  let err = table.append_rule("INPUT", &Rule::new().with_jump("NOPE")).unwrap_err();
  match &err {
    RNFError::Command { command, status, message } => {
      assert_eq!(*command, argv("iptables -t filter -A INPUT -j NOPE"));
      assert_eq!(*status, Some(2));
      assert!(message.contains("Couldn't load target"));
    }
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(err.command().map(|c| c.len()), Some(7));
}

#[test]
fn test_failed_commit_keeps_remaining_commands() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", false);

  table.create_chain("WEB").unwrap();
  table.append_rule("WEB", &Rule::new().with_jump("BROKEN")).unwrap();
  table.append_rule("INPUT", &Rule::new().with_jump("WEB")).unwrap();
  let queued = table.buffer();

  mock.respond(|argv| if argv.last().map(|s| s.as_str()) == Some("BROKEN") {
    Some(fail(1, "iptables: No chain/target/match by that name."))
  } else {
    None
  });

  let err = table.commit().unwrap_err();
  assert_eq!(err.command(), Some(&queued[1][..]));
  assert_eq!(table.buffer(), queued[1..].to_vec());
  assert_eq!(mock.engine_calls(), queued[..2].to_vec());

  mock.reset_responder();
  assert_eq!(table.commit().unwrap(), 2);
  assert!(table.buffer().is_empty());
  assert_eq!(mock.engine_calls(), vec![queued[0].clone(), queued[1].clone(), queued[1].clone(), queued[2].clone()]);
}

#[test]
fn test_discard_abandons_buffer() {
  let mock = Arc::new(MockExecutor::new());
  let engine = engine(&mock);
  let mut table = Table::new(&engine, "filter", false);

  table.flush_chain(None).unwrap();
  table.delete_chain(None).unwrap();
  assert_eq!(table.discard().len(), 2);
  assert!(table.buffer().is_empty());
  assert_eq!(table.commit().unwrap(), 0);
  assert!(mock.calls().is_empty());
}

#[test]
fn test_list_rules_reconciles_with_built_rules() {
  let mock = Arc::new(MockExecutor::new().with_dump(DUMP));
  let engine = engine(&mock);
  let table = Table::new(&engine, "filter", true);

  let rules = table.list_rules("INPUT").unwrap();
  assert_eq!(mock.calls(), vec![argv("iptables-save -t filter -c")]);
  assert_eq!(rules.len(), 2);
  assert_eq!(rules[0].packets(), 7);
  assert_eq!(rules[0].bytes(), 420);

  let web = Rule::new()
    .with_protocol("tcp")
    .with_destination("192.168.1.10")
    .with_match(Extension::new_match("tcp", "--destination-port 80").unwrap())
    .with_jump("WEB");
  let found = web.find(&rules).unwrap();
  assert_eq!(found.packets(), 7);

  let loopback = Rule::new().with_in_interface("lo").with_jump("ACCEPT");
  assert!(loopback.find(&rules).is_some());
  assert!(loopback.with_jump("DROP").find(&rules).is_none());

  assert_eq!(table.list_rules("WEB").unwrap().len(), 1);
  assert!(table.list_rules("MISSING").unwrap().is_empty());
}

#[test]
fn test_list_chains_and_policy() {
  let mock = Arc::new(MockExecutor::new().with_dump(DUMP));
  let engine = engine(&mock);
  let table = Table::new(&engine, "filter", true);

  assert_eq!(table.list_chains().unwrap(), vec!["FORWARD", "INPUT", "OUTPUT", "WEB"]);
  assert_eq!(table.get_policy("INPUT").unwrap(), Some("DROP".to_string()));
  assert_eq!(table.get_policy("WEB").unwrap(), None);
  assert_eq!(table.get_policy("NOPE").unwrap(), None);
}

#[test]
fn test_dump_failure_is_error() {
  let mock = Arc::new(MockExecutor::new());
  mock.respond(|_| Some(fail(1, "iptables-save: permission denied")));
  let engine = engine(&mock);
  let table = Table::new(&engine, "filter", true);

  let err = table.list_rules("INPUT").unwrap_err();
  assert_eq!(err.command(), Some(&argv("iptables-save -t filter -c")[..]));
}

#[test]
fn test_ipv6_engine() {
  let mock = Arc::new(MockExecutor::new().with_dump("*filter\nCOMMIT\n"));
  let engine = Engine::with_executor(EngineConfig::default().ipv6(true).without_legacy_lock(), mock.clone());
  assert!(engine.is_ipv6());
  assert_eq!(engine.save_cmd(), "ip6tables-save");

  let mut table = Table::new(&engine, "filter", true);
  table.append_rule("INPUT", &Rule::new().with_source("2001:db8::1/128").with_jump("ACCEPT")).unwrap();
  table.list_rules("INPUT").unwrap();

  assert_eq!(mock.calls(), vec![
    argv("ip6tables -L -n --wait"),
    argv("ip6tables -t filter -A INPUT -s 2001:db8::1 -j ACCEPT"),
    argv("ip6tables-save -t filter -c"),
  ]);
}

#[test]
fn test_legacy_lock_without_wait() {
  let mock = Arc::new(MockExecutor::new());
  let lock = std::env::temp_dir().join(format!("rnetfilter-{}.lock", std::process::id()));
  let engine = Engine::with_executor(EngineConfig::default().legacy_lock(lock.clone()), mock.clone());
  let mut table = Table::new(&engine, "filter", true);

  table.flush_chain(None).unwrap();
  table.flush_chain(None).unwrap();

  assert!(lock.exists());
  assert_eq!(mock.engine_calls(), vec![argv("iptables -t filter -F"), argv("iptables -t filter -F")]);
  std::fs::remove_file(&lock).unwrap();
}
