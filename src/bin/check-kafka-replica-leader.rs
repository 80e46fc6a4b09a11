use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use sensu_plugins::kafka::KafkaOpts;
use sensu_plugins::{plugin, CheckError, Verdict};
use serde_json::Value;
use std::collections::BTreeSet;
use structopt::StructOpt;

lazy_static! {
    static ref PARTITION: Regex = Regex::new(
        r"Topic:\s*[\w.-]+\s+Partition:\s*\d+\s+Leader:\s*(-?\d+)\s+Replicas:\s*[\d,]+\s+Isr:\s*[\d,]*"
    )
    .expect("RE");
}

/// Leader broker ids of the partitions listed by `kafka-topics.sh --describe`.
fn leaders<S: AsRef<str>>(lines: &[S]) -> BTreeSet<i64> {
    lines
        .iter()
        .filter_map(|l| PARTITION.captures(l.as_ref()))
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Broker ids from `ls /brokers/ids`, printed by zookeeper-shell as `[1, 2, 3]` after some
/// connection chatter.
fn broker_ids(out: &str) -> Result<Vec<i64>> {
    let list = out
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('[') && l.ends_with(']'))
        .last()
        .ok_or_else(|| CheckError::parse("broker id list", "no [..] line"))?;
    list[1..list.len() - 1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| -> Result<i64> { Ok(s.parse().map_err(|e| CheckError::parse("broker id", e))?) })
        .collect()
}

/// `host` of a broker registration from `get /brokers/ids/<id>`.
fn broker_host(out: &str) -> Option<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .find_map(|v| v.get("host").and_then(Value::as_str).map(str::to_owned))
}

fn local_hostname(opt: &Opt) -> Result<String> {
    match &opt.hostname {
        Some(h) => Ok(h.clone()),
        None => Ok(nix::unistd::gethostname()
            .context("Failed to get hostname")?
            .to_string_lossy()
            .into_owned()),
    }
}

fn local_broker_id(opt: &Opt, hostname: &str) -> Result<i64> {
    if let Some(id) = opt.broker_id {
        return Ok(id);
    }
    let ids = broker_ids(&opt.kafka.zookeeper_shell(&["ls", "/brokers/ids"])?)?;
    for id in ids {
        let path = format!("/brokers/ids/{}", id);
        let reg = opt.kafka.zookeeper_shell(&["get", path.as_str()])?;
        match broker_host(&reg) {
            Some(host) if host.contains(hostname) => return Ok(id),
            Some(host) => debug!("broker {} runs on {}", id, host),
            None => debug!("no host in registration of broker {}", id),
        }
    }
    Err(anyhow!("No broker registered for host {}", hostname))
}

fn classify(id: i64, hostname: &str, leaders: &BTreeSet<i64>) -> Verdict {
    if leaders.contains(&id) {
        Verdict::critical(format!(
            "There are problems with leader {}. It's leader of a partition under-replicated / \
             unavailable",
            hostname
        ))
    } else {
        Verdict::ok(format!(
            "Broker {} ({}) leads no under-replicated or unavailable partition",
            id, hostname
        ))
    }
}

fn run(opt: &Opt) -> Result<Verdict> {
    let hostname = local_hostname(opt)?;
    let id = local_broker_id(opt, &hostname)?;
    let mut lines = opt.kafka.describe_topics("--unavailable-partitions")?;
    lines.extend(opt.kafka.describe_topics("--under-replicated-partitions")?);
    Ok(classify(id, &hostname, &leaders(&lines)))
}

/// Checks that the local Kafka broker is not the leader of an unavailable or under-replicated
/// partition.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    #[structopt(flatten)]
    kafka: KafkaOpts,
    /// Broker id of this host (looked up in ZooKeeper by default)
    #[structopt(short, long, value_name = "ID")]
    broker_id: Option<i64>,
    /// Host name to look for in broker registrations (default: local host name)
    #[structopt(short = "H", long, value_name = "NAME")]
    hostname: Option<String>,
}

fn main() {
    plugin::main("KAFKA REPLICA LEADER", run)
}

#[cfg(test)]
mod test {
    use super::*;
    use sensu_plugins::State;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const UNDER: &str = "\tTopic: orders\tPartition: 0\tLeader: 2\tReplicas: 2,1\tIsr: 2\n\
                         \tTopic: audit.log\tPartition: 3\tLeader: 3\tReplicas: 3,1\tIsr: 3";

    const ZK_LS: &str = "Connecting to localhost:2181\n\nWATCHER::\n\n\
                         WatchedEvent state:SyncConnected type:None path:null\n[1, 2, 3]\n";

    #[test]
    fn parse_leaders() {
        let lines: Vec<&str> = UNDER.lines().collect();
        assert_eq!(leaders(&lines), vec![2, 3].into_iter().collect::<BTreeSet<_>>());
        assert!(leaders(&["Topic: x"]).is_empty());
    }

    #[test]
    fn parse_broker_ids() {
        assert_eq!(broker_ids(ZK_LS).unwrap(), vec![1, 2, 3]);
        assert_eq!(broker_ids("[]").unwrap(), Vec::<i64>::new());
        assert!(broker_ids("Connecting to localhost:2181").is_err());
    }

    #[test]
    fn parse_broker_registration() {
        let out = "Connecting to localhost:2181\n\
                   {\"listener_security_protocol_map\":{\"PLAINTEXT\":\"PLAINTEXT\"},\
                   \"endpoints\":[\"PLAINTEXT://kafka2.example.com:9092\"],\
                   \"host\":\"kafka2.example.com\",\"version\":4,\"port\":9092}\n\
                   cZxid = 0x1a\n";
        assert_eq!(broker_host(out).as_deref(), Some("kafka2.example.com"));
        assert_eq!(broker_host("Node does not exist"), None);
    }

    #[test]
    fn leader_of_bad_partition_is_critical() {
        let l = leaders(&UNDER.lines().collect::<Vec<_>>());
        assert_eq!(classify(2, "kafka2", &l).state, State::CRITICAL);
        assert_eq!(classify(1, "kafka1", &l).state, State::OK);
    }

    fn script(dir: &Path, name: &str, body: &str) {
        let p = dir.join("bin").join(name);
        fs::write(&p, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn lookup_through_zookeeper_shell() {
        let td = TempDir::new().unwrap();
        fs::create_dir(td.path().join("bin")).unwrap();
        script(
            td.path(),
            "zookeeper-shell.sh",
            r#"case "$3" in
  /brokers/ids) echo "[1, 2]";;
  /brokers/ids/1) echo '{"host":"kafka1.example.com","port":9092}';;
  /brokers/ids/2) echo '{"host":"kafka2.example.com","port":9092}';;
esac"#,
        );
        script(
            td.path(),
            "kafka-topics.sh",
            r#"case "$4" in
  --under-replicated-partitions) printf '\tTopic: orders\tPartition: 0\tLeader: 2\tReplicas: 2,1\tIsr: 2\n';;
esac"#,
        );
        let home = td.path().to_string_lossy().to_string();
        let opt = Opt::from_iter(&["prog", "-k", home.as_str(), "-H", "kafka2"]);
        assert_eq!(local_broker_id(&opt, "kafka2").unwrap(), 2);
        assert!(local_broker_id(&opt, "kafka9").is_err());
        assert_eq!(run(&opt).unwrap().state, State::CRITICAL);

        let opt = Opt::from_iter(&["prog", "-k", home.as_str(), "-H", "kafka1"]);
        assert_eq!(
            run(&opt).unwrap(),
            Verdict::ok("Broker 1 (kafka1) leads no under-replicated or unavailable partition")
        );
    }
}
