use anyhow::Result;
use sensu_plugins::runner::{self, CommandSpec};
use sensu_plugins::{plugin, CheckError, Verdict};
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sentinels {
    total: i64,
    down: i64,
}

impl Sentinels {
    /// Parses `sentinel sentinels <master>` in raw mode: one key or value per line, one `name`
    /// key per peer. The sentinel asked counts itself.
    fn parse(out: &str) -> Self {
        let mut s = Sentinels { total: 1, down: 0 };
        for line in out.lines() {
            if line.trim() == "name" {
                s.total += 1;
            }
            if line.contains("down,sentinel") {
                s.down += 1;
            }
        }
        s
    }

    fn alive(&self) -> i64 {
        self.total - self.down
    }

    fn majority(&self) -> i64 {
        self.total / 2 + 1
    }

    /// How many more sentinels may fail before no majority can be reached.
    fn majority_edge(&self) -> i64 {
        self.alive() - self.majority()
    }
}

/// Value following the `quorum` key in raw `sentinel master <master>` output.
fn quorum(out: &str) -> Result<i64> {
    let mut lines = out.lines().map(str::trim);
    lines
        .by_ref()
        .find(|l| *l == "quorum")
        .ok_or_else(|| CheckError::parse("sentinel master", "no quorum"))?;
    let value = lines.next().unwrap_or_default();
    Ok(value
        .parse()
        .map_err(|e| CheckError::parse("quorum", format!("'{}': {}", value, e)))?)
}

fn classify(s: Sentinels, quorum: i64, opt: &Opt) -> Verdict {
    let number = format!("{} of {} alive sentinels", s.alive(), s.total);
    if s.alive() < quorum {
        Verdict::critical(format!("{}, quorum of {} cannot be reach", number, quorum))
    } else if s.majority_edge() < opt.critical {
        Verdict::critical(format!("{}, majority cannot be reach", number))
    } else if s.majority_edge() < opt.warning {
        Verdict::warning(format!("{}, too few sentinels in cluster", number))
    } else {
        Verdict::ok(number)
    }
}

fn redis_cli(opt: &Opt, args: &[&str]) -> Result<String> {
    let spec = CommandSpec::new(opt.redis_cli.as_str())
        .args(vec!["-h", opt.host.as_str(), "-p"])
        .arg(opt.port.to_string())
        .arg("--raw")
        .args(args.iter().copied())
        .timeout(Duration::from_secs(opt.timeout));
    let res = runner::run(&spec)?;
    if !res.success() {
        // fails on timeout and non-zero exit
        res.require_output()?;
    }
    // a sentinel without peers answers with an empty list
    Ok(res.stdout().to_owned())
}

fn run(opt: &Opt) -> Result<Verdict> {
    let sentinels = Sentinels::parse(&redis_cli(
        opt,
        &["sentinel", "sentinels", opt.master_name.as_str()],
    )?);
    let quorum = quorum(&redis_cli(
        opt,
        &["sentinel", "master", opt.master_name.as_str()],
    )?)?;
    Ok(classify(sentinels, quorum, opt))
}

/// Checks that enough Redis sentinels are alive to reach quorum and a majority.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Host where the sentinel is running
    #[structopt(short, long, default_value = "127.0.0.1")]
    host: String,
    /// Port where the sentinel is listening
    #[structopt(short, long, default_value = "26379")]
    port: u16,
    /// Name of the monitored master
    #[structopt(short, long = "master_name", alias = "master-name", value_name = "NAME")]
    master_name: String,
    /// Warning if fewer than N sentinels may fail before the majority is lost
    #[structopt(short, long, default_value = "1", value_name = "N")]
    warning: i64,
    /// Critical if fewer than N sentinels may fail before the majority is lost
    #[structopt(short, long, default_value = "0", value_name = "N")]
    critical: i64,
    /// Timeout for each redis-cli call
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    /// Path to `redis-cli`
    #[structopt(long, default_value = "redis-cli", value_name = "PATH")]
    redis_cli: String,
}

fn main() {
    plugin::main("REDIS SENTINELS", run)
}

#[cfg(test)]
mod test {
    use super::*;
    use sensu_plugins::error::state_of;
    use sensu_plugins::State;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    // two peers, one of them down
    const SENTINELS: &str = "name\n10.0.0.2:26379\nip\n10.0.0.2\nport\n26379\nflags\nsentinel\n\
                             name\n10.0.0.3:26379\nip\n10.0.0.3\nport\n26379\nflags\n\
                             s_down,sentinel\n";

    const MASTER: &str = "name\nmymaster\nip\n10.0.0.1\nport\n6379\nnum-other-sentinels\n2\n\
                          quorum\n2\nfailover-timeout\n180000\n";

    fn opt() -> Opt {
        Opt::from_iter(&["prog", "-m", "mymaster"])
    }

    #[test]
    fn count_sentinels() {
        let s = Sentinels::parse(SENTINELS);
        assert_eq!(s, Sentinels { total: 3, down: 1 });
        assert_eq!(s.majority(), 2);
        assert_eq!(s.majority_edge(), 0);
    }

    #[test]
    fn parse_quorum() {
        assert_eq!(quorum(MASTER).unwrap(), 2);
        assert!(quorum("name\nmymaster\n").is_err());
        assert!(quorum("quorum\n").is_err());
    }

    #[test]
    fn one_down_of_three_warns() {
        let v = classify(Sentinels::parse(SENTINELS), 2, &opt());
        assert_eq!(
            v,
            Verdict::warning("2 of 3 alive sentinels, too few sentinels in cluster")
        );
    }

    #[test]
    fn all_up() {
        let v = classify(Sentinels { total: 3, down: 0 }, 2, &opt());
        assert_eq!(v, Verdict::ok("3 of 3 alive sentinels"));
    }

    #[test]
    fn below_quorum_is_critical() {
        let v = classify(Sentinels { total: 3, down: 2 }, 2, &opt());
        assert_eq!(
            v,
            Verdict::critical("1 of 3 alive sentinels, quorum of 2 cannot be reach")
        );
    }

    #[test]
    fn majority_lost_is_critical() {
        let v = classify(Sentinels { total: 5, down: 3 }, 1, &opt());
        assert_eq!(v.state, State::CRITICAL);
        assert_eq!(v.message, "2 of 5 alive sentinels, majority cannot be reach");
    }

    #[test]
    fn echo_redis_cli() {
        let mut o = opt();
        o.redis_cli = "echo".into();
        assert_eq!(
            redis_cli(&o, &["sentinel", "master", "mymaster"]).unwrap(),
            "-h 127.0.0.1 -p 26379 --raw sentinel master mymaster\n"
        );
        // no quorum key in echo's output
        assert!(run(&o).unwrap_err().to_string().contains("quorum"));
    }

    fn fake_redis_cli(dir: &TempDir, body: &str) -> Opt {
        let p = dir.path().join("redis-cli");
        fs::write(&p, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
        let mut o = opt();
        o.redis_cli = p.to_string_lossy().to_string();
        o
    }

    #[test]
    fn lone_sentinel_cannot_reach_quorum() {
        let td = TempDir::new().unwrap();
        let o = fake_redis_cli(
            &td,
            r#"case "$7" in sentinels) echo ;; master) printf 'quorum\n2\n' ;; esac"#,
        );
        assert_eq!(
            run(&o).unwrap(),
            Verdict::critical("1 of 1 alive sentinels, quorum of 2 cannot be reach")
        );
    }

    #[test]
    fn lone_sentinel_with_quorum_of_one_warns() {
        let td = TempDir::new().unwrap();
        let o = fake_redis_cli(
            &td,
            r#"case "$7" in sentinels) echo ;; master) printf 'quorum\n1\n' ;; esac"#,
        );
        assert_eq!(
            run(&o).unwrap(),
            Verdict::warning("1 of 1 alive sentinels, too few sentinels in cluster")
        );
    }

    #[test]
    fn unreachable_sentinel_is_critical() {
        let td = TempDir::new().unwrap();
        let o = fake_redis_cli(&td, "echo 'Could not connect to Redis'; exit 1");
        let e = run(&o).unwrap_err();
        assert_eq!(state_of(&e), State::CRITICAL);
        assert_eq!(e.to_string().matches("sentinel sentinels").count(), 1, "{}", e);
    }
}
