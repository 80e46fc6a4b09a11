use anyhow::Result;
use log::{debug, warn};
use sensu_plugins::runner::{self, CommandSpec};
use sensu_plugins::{plugin, CheckError, Direction, State, Thresholds, Verdict};
use std::time::Duration;
use structopt::StructOpt;

/// Sum of the given columns of the last line of `jstat` output.
fn jstat_sum(out: &str, columns: &[usize]) -> Result<f64, CheckError> {
    let last = out
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default();
    let fields: Vec<&str> = last.split_whitespace().collect();
    columns
        .iter()
        .map(|&i| {
            let f = fields
                .get(i)
                .ok_or_else(|| CheckError::parse("jstat output", format!("no column {}", i)))?;
            f.parse::<f64>()
                .map_err(|e| CheckError::parse("jstat output", format!("'{}': {}", f, e)))
        })
        .sum()
}

/// Maximum heap capacity: NGCMX + OGCMX
fn heap_max(gccapacity: &str) -> Result<f64, CheckError> {
    jstat_sum(gccapacity, &[1, 7])
}

/// Used heap: S0U + S1U + EU + OU + MU
fn heap_used(gc: &str) -> Result<f64, CheckError> {
    jstat_sum(gc, &[2, 3, 5, 7, 9])
}

fn percent(used: f64, max: f64) -> Result<f64, CheckError> {
    if max.is_nan() || max <= 0.0 {
        return Err(CheckError::parse("jstat output", format!("max heap is {} KB", max)));
    }
    Ok((used * 1000.0 / max).round() / 10.0)
}

struct Jvm<'a> {
    opt: &'a Opt,
}

impl Jvm<'_> {
    fn spec(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program).timeout(Duration::from_secs(self.opt.timeout))
    }

    fn pids(&self) -> Result<Vec<String>> {
        let res = runner::run(&self.spec(&self.opt.jps).arg("-q"))?;
        if !res.success() {
            res.require_output()?;
        }
        Ok(res.stdout().split_whitespace().map(str::to_owned).collect())
    }

    // None if the JVM is gone or not accessible
    fn jstat(&self, option: &str, pid: &str) -> Result<Option<String>> {
        let spec = self
            .spec(&self.opt.jstat)
            .args(vec![option, pid, "1", "1"])
            .merge_stderr(true);
        let res = runner::run(&spec)?;
        if res.success() {
            Ok(Some(res.stdout().to_owned()))
        } else {
            warn!("skipping {}: {} {}", pid, res.exit(), res.stdout().trim());
            Ok(None)
        }
    }

    fn heap_percent(&self, pid: &str) -> Result<Option<f64>> {
        let max = match self.jstat("-gccapacity", pid)? {
            Some(out) => heap_max(&out)?,
            None => return Ok(None),
        };
        let used = match self.jstat("-gc", pid)? {
            Some(out) => heap_used(&out)?,
            None => return Ok(None),
        };
        let p = percent(used, max)?;
        debug!("pid {}: {} of {} KB heap used ({}%)", pid, used, max, p);
        Ok(Some(p))
    }
}

fn pids_at<'a>(usage: &'a [(String, f64)], t: &Thresholds<f64>, state: State) -> Vec<&'a str> {
    usage
        .iter()
        .filter(|(_, p)| t.classify(*p) >= state)
        .map(|(pid, _)| pid.as_str())
        .collect()
}

fn classify(usage: &[(String, f64)], opt: &Opt) -> Verdict {
    let t = Thresholds::new(opt.warn, opt.crit, Direction::Above);
    let crit = pids_at(usage, &t, State::CRITICAL);
    let warn = pids_at(usage, &t, State::WARNING);
    if !crit.is_empty() {
        Verdict::critical(format!(
            "Java processes Over HeapMem CRIT threshold of {}%: {}",
            opt.crit,
            crit.join(", ")
        ))
    } else if !warn.is_empty() {
        Verdict::warning(format!(
            "Java processes Over HeapMem WARN threshold of {}%: {}",
            opt.warn,
            warn.join(", ")
        ))
    } else {
        Verdict::ok("No Java processes over HeapMem thresholds")
    }
}

fn run(opt: &Opt) -> Result<Verdict> {
    let jvm = Jvm { opt };
    let mut usage = Vec::new();
    for pid in jvm.pids()? {
        if let Some(p) = jvm.heap_percent(&pid)? {
            usage.push((pid, p));
        }
    }
    Ok(classify(&usage, opt))
}

/// Checks the heap usage of all JVMs visible to `jps`.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Warning if more than PERCENT of a JVM's heap is used
    #[structopt(short, long, default_value = "85", value_name = "PERCENT")]
    warn: f64,
    /// Critical if more than PERCENT of a JVM's heap is used
    #[structopt(short, long = "critical", default_value = "95", value_name = "PERCENT")]
    crit: f64,
    /// Timeout for each jps/jstat call
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    /// Path to `jps`
    #[structopt(long, default_value = "jps", value_name = "PATH")]
    jps: String,
    /// Path to `jstat`
    #[structopt(long, default_value = "jstat", value_name = "PATH")]
    jstat: String,
}

fn main() {
    plugin::main("JAVA HEAPMEM", run)
}
