use anyhow::{Context, Result};
use sensu_plugins::ceph::{len_of, CephOpts};
use sensu_plugins::{plugin, CheckError, Direction, Report, State, Thresholds, Verdict};
use serde_json::Value;
use structopt::StructOpt;

#[derive(Debug, Clone, PartialEq)]
struct MgrMap {
    available: bool,
    standbys: usize,
}

impl MgrMap {
    // newer releases only report `num_standbys` in `ceph status`
    fn from_status(status: &Value) -> Result<Self> {
        let m = status
            .get("mgrmap")
            .ok_or_else(|| CheckError::parse("ceph status", "no mgrmap"))?;
        let available = m
            .get("available")
            .and_then(Value::as_bool)
            .ok_or_else(|| CheckError::parse("ceph status", "no mgrmap.available"))?;
        let standbys = match (m.get("num_standbys").and_then(Value::as_u64), m.get("standbys")) {
            (Some(n), _) => n as usize,
            (None, Some(s)) => len_of(s),
            (None, None) => {
                return Err(CheckError::parse("ceph status", "no mgrmap.standbys").into())
            }
        };
        Ok(Self {
            available,
            standbys,
        })
    }
}

fn classify(mgr: &MgrMap, health_detail: &str, t: &Thresholds<usize>) -> Verdict {
    let mut report = Report::with_separator("\n");
    if health_detail.contains("no active mgr") {
        report.push(State::CRITICAL, health_detail.trim_end());
    }
    report.check(t, mgr.standbys, |s| {
        format!(
            "Number of MGR standbys ({}) is less than or equal to {}",
            mgr.standbys,
            t.bound(s).unwrap_or_default()
        )
    });
    if !mgr.available {
        report.push(State::CRITICAL, "There is no available MGR daemon running");
    }
    report.verdict(format!("MGR available, {} standby(s)", mgr.standbys))
}

fn run(opt: &Opt) -> Result<Verdict> {
    let status: Value = opt.ceph.json(&["status"])?;
    let mgr = MgrMap::from_status(&status)?;
    let health = opt
        .ceph
        .text(&["health", "detail"])
        .context("ceph health detail")?;
    let t = Thresholds::new(opt.warn, opt.crit, Direction::AtOrBelow);
    Ok(classify(&mgr, &health, &t))
}

/// Checks that a Ceph MGR daemon is active and enough standbys are around.
///
/// Runs `ceph status` and `ceph health detail`. May need read access to the ceph keyring.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    #[structopt(flatten)]
    ceph: CephOpts,
    /// Warning if the number of standby MGR daemons is less than or equal to N
    #[structopt(short, long, default_value = "2", value_name = "N")]
    warn: usize,
    /// Critical if the number of standby MGR daemons is less than or equal to N
    #[structopt(short, long = "critical", default_value = "1", value_name = "N")]
    crit: usize,
}

fn main() {
    plugin::main("CEPH MGR", run)
}
