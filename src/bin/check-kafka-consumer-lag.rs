use anyhow::{Context, Result};
use log::debug;
use sensu_plugins::kafka;
use sensu_plugins::runner::{self, CommandSpec};
use sensu_plugins::{plugin, CheckError, Direction, Report, State, Thresholds, Verdict};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, Clone, PartialEq)]
struct Partition {
    topic: String,
    offset: i64,
    logsize: i64,
    lag: i64,
    owner: String,
}

impl Partition {
    fn has_owner(&self) -> bool {
        self.owner != "none" && self.owner != "-"
    }
}

// unknown offsets are shown as "-"
fn offset(field: &str, what: &str) -> Result<i64, CheckError> {
    match field {
        "-" => Ok(0),
        _ => field.parse().map_err(|e| CheckError::parse(what, e)),
    }
}

/// Parses `ConsumerGroupCommand --describe` output. Columns are `GROUP TOPIC PARTITION
/// CURRENT-OFFSET LOG-END-OFFSET LAG OWNER...`. Headers and notices (any line whose third column
/// is not a partition number) are skipped.
fn parse_describe(out: &str) -> Result<Vec<Partition>> {
    let mut res = Vec::new();
    for line in out.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 6 || cols[2].parse::<u32>().is_err() {
            debug!("skipping '{}'", line);
            continue;
        }
        res.push(Partition {
            topic: cols[1].to_owned(),
            offset: offset(cols[3], "current offset")?,
            logsize: offset(cols[4], "log end offset")?,
            lag: offset(cols[5], "lag")?,
            owner: cols.get(6).copied().unwrap_or("none").to_owned(),
        });
    }
    Ok(res)
}

/// Checks the partitions of one group. Returns the summed lag per topic.
fn check_group(group: &str, parts: &[Partition], report: &mut Report) -> BTreeMap<String, i64> {
    let mut topics: BTreeMap<String, Vec<&Partition>> = BTreeMap::new();
    for p in parts {
        topics.entry(p.topic.clone()).or_default().push(p);
    }
    if topics.is_empty() {
        report.push(
            State::CRITICAL,
            format!("Could not find topics/partitions of group {}", group),
        );
    }
    let fields: [(&str, fn(&Partition) -> i64); 3] = [
        ("offset", |p| p.offset),
        ("logsize", |p| p.logsize),
        ("lag", |p| p.lag),
    ];
    for (name, get) in &fields {
        for (topic, ps) in &topics {
            if ps.iter().any(|p| get(p) < 0) {
                report.push(
                    State::CRITICAL,
                    format!("Topic {} has partitions with {} < 0", topic, name),
                );
            }
        }
    }
    for (topic, ps) in &topics {
        if ps.iter().any(|p| !p.has_owner()) {
            report.push(
                State::CRITICAL,
                format!("Topic {} has partitions with no owner", topic),
            );
        }
    }
    topics
        .into_iter()
        .map(|(t, ps)| (t, ps.iter().map(|p| p.lag).sum()))
        .collect()
}

fn topics_with(lags: &[(String, i64)], lag: i64) -> Vec<&str> {
    lags.iter()
        .filter(|(_, l)| *l == lag)
        .map(|(t, _)| t.as_str())
        .collect()
}

fn classify_lag(lags: &[(String, i64)], opt: &Opt) -> Verdict {
    let max = lags.iter().map(|(_, l)| *l).max().unwrap_or(0);
    let min = lags.iter().map(|(_, l)| *l).min().unwrap_or(0);
    let over = Thresholds::optional(opt.warning_over, opt.critical_over, Direction::Above);
    let under = Thresholds::optional(opt.warning_under, opt.critical_under, Direction::Below);
    let mut report = Report::new();
    for (t, lag) in &[(over, max), (under, min)] {
        report.check(t, *lag, |s| {
            format!(
                "Topics `{}` for the group(s) `{}` lag: {} ({} {})",
                topics_with(lags, *lag).join(", "),
                opt.groups,
                lag,
                t.direction.symbol(),
                t.bound(s).unwrap_or_default()
            )
        });
    }
    report.verdict(format!(
        "Group(s) `{}`'s lag is ok (min lag {} / max lag {})",
        opt.groups, min, max
    ))
}

fn run(opt: &Opt) -> Result<Verdict> {
    let kafka_run_class = kafka::script(&opt.kafka_home, "kafka-run-class.sh")?;
    let mut report = Report::new();
    let mut lags = Vec::new();
    for group in opt.groups.split(',').filter(|g| !g.is_empty()) {
        let spec = CommandSpec::new(kafka_run_class.to_string_lossy())
            .args(vec!["kafka.admin.ConsumerGroupCommand", "--group", group])
            .args(vec!["--bootstrap-server", opt.bootstrap_server.as_str()])
            .arg("--describe")
            .merge_stderr(true)
            .timeout(Duration::from_secs(opt.timeout));
        let res = runner::run(&spec)?;
        let out = res
            .require_output()
            .with_context(|| format!("group {}", group))?;
        let parts = parse_describe(out).with_context(|| format!("group {}", group))?;
        lags.extend(check_group(group, &parts, &mut report));
    }
    if report.state() != State::OK {
        return Ok(report.verdict(""));
    }
    Ok(classify_lag(&lags, opt))
}

/// Checks the lag of Kafka consumer groups.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Consumer groups (comma separated)
    #[structopt(short, long = "group", value_name = "NAME")]
    groups: String,
    /// Kafka installation directory
    #[structopt(short, long, default_value = "/opt/kafka", parse(from_os_str))]
    kafka_home: PathBuf,
    /// Bootstrap servers connect string
    #[structopt(short, long, default_value = "localhost:9092", value_name = "HOST:PORT")]
    bootstrap_server: String,
    /// Warning if the maximum topic lag is over N
    #[structopt(short = "W", long, value_name = "N")]
    warning_over: Option<i64>,
    /// Critical if the maximum topic lag is over N
    #[structopt(short = "C", long, value_name = "N")]
    critical_over: Option<i64>,
    /// Warning if the minimum topic lag is under N
    #[structopt(short, long, value_name = "N")]
    warning_under: Option<i64>,
    /// Critical if the minimum topic lag is under N
    #[structopt(short, long, value_name = "N")]
    critical_under: Option<i64>,
    /// Timeout for each ConsumerGroupCommand run (JVM startup included)
    #[structopt(short, long, default_value = "30", value_name = "SEC")]
    timeout: u64,
}

fn main() {
    plugin::main("KAFKA CONSUMER LAG", run)
}
