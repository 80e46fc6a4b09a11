use anyhow::{ensure, Context, Result};
use sensu_plugins::ceph::CephOpts;
use sensu_plugins::{plugin, CheckError, Direction, Report, State, Thresholds, Verdict};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use structopt::StructOpt;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct OsdStat {
    num_osds: u64,
    num_up_osds: u64,
    num_in_osds: u64,
}

impl OsdStat {
    // Luminous nests the counters below `osdmap`, later releases don't
    fn from_json(v: Value) -> Result<Self> {
        let inner = match v.get("osdmap") {
            Some(m) if m.get("num_osds").is_some() => m.clone(),
            _ => v,
        };
        Ok(serde_json::from_value(inner).map_err(|e| CheckError::parse("osd stat", e))?)
    }

    fn percent_down(&self) -> f64 {
        percent(self.num_osds - self.num_up_osds.min(self.num_osds), self.num_osds)
    }

    fn percent_out(&self) -> f64 {
        percent(self.num_osds - self.num_in_osds.min(self.num_osds), self.num_osds)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    100.0 * part as f64 / total as f64
}

#[derive(Debug, Deserialize)]
struct OsdTree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    children: Vec<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reweight: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct HostStats {
    total: u64,
    down: u64,
    out: u64,
}

impl HostStats {
    fn percent_down(&self) -> f64 {
        percent(self.down, self.total)
    }

    fn percent_out(&self) -> f64 {
        percent(self.out, self.total)
    }
}

fn host_stats(tree: &OsdTree) -> BTreeMap<&str, HostStats> {
    let osds: HashMap<i64, &TreeNode> = tree
        .nodes
        .iter()
        .filter(|n| n.kind == "osd")
        .map(|n| (n.id, n))
        .collect();
    tree.nodes
        .iter()
        .filter(|n| n.kind == "host" && !n.children.is_empty())
        .map(|host| {
            let mut s = HostStats::default();
            for osd in host.children.iter().filter_map(|id| osds.get(id)) {
                s.total += 1;
                if osd.status.as_deref() != Some("up") {
                    s.down += 1;
                }
                if osd.reweight == Some(0.0) {
                    s.out += 1;
                }
            }
            (host.name.as_str(), s)
        })
        .filter(|(_, s)| s.total > 0)
        .collect()
}

fn check_all(stat: &OsdStat, t: &Thresholds<f64>) -> Result<Verdict> {
    ensure!(stat.num_osds > 0, "No OSDs in cluster");
    let (down, out) = (stat.percent_down(), stat.percent_out());
    let state = t.classify(down).max(t.classify(out));
    Ok(Verdict::new(
        state,
        format!("OSDs down {:.2}% - OSDs out {:.2}%", down, out),
    ))
}

fn check_per_host(hosts: &BTreeMap<&str, HostStats>, t: &Thresholds<f64>) -> Result<Verdict> {
    ensure!(!hosts.is_empty(), "No hosts with OSDs found in OSD tree");
    let mut report = Report::with_separator("\n");
    for (host, s) in hosts {
        let (down, out) = (s.percent_down(), s.percent_out());
        let state = t.classify(down).max(t.classify(out));
        if state != State::OK {
            report.push(
                state,
                format!(
                    "Host: {} OSDs down: {:.2}% - OSDs out: {:.2}%",
                    host, down, out
                ),
            );
        }
    }
    Ok(report.verdict(format!("{} hosts, none above thresholds", hosts.len())))
}

fn run(opt: &Opt) -> Result<Verdict> {
    let t = Thresholds::new(opt.warn, opt.crit, Direction::AtOrAbove);
    let mut verdict = if opt.per_host && !opt.all {
        let tree: OsdTree = opt.ceph.json(&["osd", "tree"])?;
        check_per_host(&host_stats(&tree), &t)?
    } else {
        let stat = OsdStat::from_json(opt.ceph.json(&["osd", "stat"])?)?;
        check_all(&stat, &t)?
    };
    if opt.osd_tree && verdict.state != State::OK {
        let tree = opt.ceph.text(&["osd", "tree"]).context("ceph osd tree")?;
        verdict.message = format!("{}\n{}", verdict.message, tree.trim_end());
    }
    Ok(verdict)
}

/// Checks the percentage of Ceph OSDs that are down or out, cluster-wide or per host.
///
/// Runs `ceph osd stat` / `ceph osd tree`. May need read access to the ceph keyring.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    #[structopt(flatten)]
    ceph: CephOpts,
    /// Warning if PERCENT or more OSDs are down or out
    #[structopt(short, long, default_value = "10", value_name = "PERCENT")]
    warn: f64,
    /// Critical if PERCENT or more OSDs are down or out
    #[structopt(short, long = "critical", default_value = "25", value_name = "PERCENT")]
    crit: f64,
    /// Check the percentage of all OSDs in the cluster (default, wins over --per-host)
    #[structopt(long)]
    all: bool,
    /// Check the percentage of OSDs of each host separately
    #[structopt(long = "per-host", alias = "per_host")]
    per_host: bool,
    /// Show OSD tree on warnings/errors (verbose!)
    #[structopt(short, long = "osd-tree")]
    osd_tree: bool,
}

fn main() {
    plugin::main("CEPH OSD", run)
}
