use anyhow::{Context, Result};
use sensu_plugins::ceph::{len_of, CephOpts};
use sensu_plugins::{plugin, CheckError, Direction, Report, State, Thresholds, Verdict};
use serde_json::Value;
use structopt::StructOpt;

#[derive(Debug, Clone, Default, PartialEq)]
struct Filesystem {
    name: String,
    id: i64,
    failed: usize,
    damaged: usize,
    stopped: usize,
    active: usize,
    standby: usize,
}

fn state_of(daemon: &Value) -> &str {
    daemon.get("state").and_then(Value::as_str).unwrap_or("")
}

/// Extracts per-filesystem daemon counts from `ceph mds stat --format json`. Standbys that are
/// not bound to a filesystem count for every filesystem.
fn filesystems(stat: &Value) -> Result<Vec<Filesystem>> {
    let fsmap = stat
        .get("fsmap")
        .ok_or_else(|| CheckError::parse("ceph mds stat", "no fsmap"))?;
    let global_standbys = fsmap
        .get("standbys")
        .and_then(Value::as_array)
        .map(|s| {
            s.iter()
                .filter(|d| state_of(d).starts_with("up:standby"))
                .count()
        })
        .unwrap_or(0);
    let list = fsmap
        .get("filesystems")
        .and_then(Value::as_array)
        .ok_or_else(|| CheckError::parse("ceph mds stat", "no fsmap.filesystems"))?;
    list.iter()
        .map(|fs| -> Result<Filesystem> {
            let m = fs
                .get("mdsmap")
                .ok_or_else(|| CheckError::parse("ceph mds stat", "filesystem without mdsmap"))?;
            let daemons: Vec<&str> = match m.get("info") {
                Some(Value::Object(info)) => info.values().map(state_of).collect(),
                _ => Vec::new(),
            };
            let count = |key: &str| m.get(key).map(len_of).unwrap_or(0);
            Ok(Filesystem {
                name: m
                    .get("fs_name")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_owned(),
                id: fs.get("id").and_then(Value::as_i64).unwrap_or(-1),
                failed: count("failed"),
                damaged: count("damaged"),
                stopped: count("stopped"),
                active: daemons.iter().filter(|s| s.starts_with("up:active")).count(),
                standby: daemons
                    .iter()
                    .filter(|s| s.starts_with("up:standby"))
                    .count()
                    + global_standbys,
            })
        })
        .collect()
}

fn classify(fss: &[Filesystem], health_detail: &str, opt: &Opt) -> Report {
    let mut report = Report::with_separator("\n");
    if health_detail.contains("mds cluster is degraded") {
        report.push(State::CRITICAL, health_detail.trim_end());
    }
    let standby = Thresholds::new(opt.warn, opt.crit, Direction::AtOrBelow);
    for fs in fss {
        let base = format!("Filesystem {} ID={}", fs.name, fs.id);
        for (n, what) in &[(fs.failed, "failed"), (fs.damaged, "damaged"), (fs.stopped, "stopped")] {
            if *n > 0 {
                report.push(State::CRITICAL, format!("{} {}", base, what));
            }
        }
        if fs.active < opt.active {
            report.push(
                State::CRITICAL,
                format!(
                    "{} less than {} MDS daemons running in up:active state",
                    base, opt.active
                ),
            );
        }
        report.check(&standby, fs.standby, |s| match s {
            State::CRITICAL => format!("{} no standby MDS daemons running", base),
            _ => format!("{} not enough standby MDS daemons running", base),
        });
    }
    report
}

fn run(opt: &Opt) -> Result<Verdict> {
    let stat: Value = opt.ceph.json(&["mds", "stat"])?;
    let fss = filesystems(&stat)?;
    let health = opt
        .ceph
        .text(&["health", "detail"])
        .context("ceph health detail")?;
    let report = classify(&fss, &health, opt);
    if report.state() == State::OK {
        return Ok(Verdict::ok(format!("{} filesystem(s) healthy", fss.len())));
    }
    let summary = opt.ceph.text(&["mds", "stat"]).context("ceph mds stat")?;
    let mut verdict = report.verdict("");
    verdict.message = format!("{}\n{}", verdict.message, summary.trim_end());
    Ok(verdict)
}

/// Checks the health of Ceph MDS daemons of every CephFS filesystem.
///
/// Runs `ceph mds stat` and `ceph health detail`. May need read access to the ceph keyring.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    #[structopt(flatten)]
    ceph: CephOpts,
    /// Critical if fewer than N MDS daemons are in up:active state
    #[structopt(short, long, default_value = "1", value_name = "N")]
    active: usize,
    /// Warning if the number of standby MDS daemons is less than or equal to N
    #[structopt(short, long, default_value = "2", value_name = "N")]
    warn: usize,
    /// Critical if the number of standby MDS daemons is less than or equal to N
    #[structopt(short, long = "critical", default_value = "1", value_name = "N")]
    crit: usize,
}

fn main() {
    plugin::main("CEPH MDS", run)
}
