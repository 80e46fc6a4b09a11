use anyhow::{bail, ensure, Context, Result};
use log::debug;
use sensu_plugins::runner::{self, CommandSpec, Exit};
use sensu_plugins::{plugin, CheckError, Direction, Thresholds, Verdict};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;

const PCP_NODE_COUNT: &str = "pcp_node_count";
const PCP_NODE_INFO: &str = "pcp_node_info";

// PCP utilities enforce their own timeout, this is the margin on top of it
const RUNNER_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeStatus {
    // only used during pgpool startup, never shown by PCP
    Initializing,
    UpNoConnections,
    Up,
    Down,
}

impl FromStr for NodeStatus {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(NodeStatus::Initializing),
            "1" => Ok(NodeStatus::UpNoConnections),
            "2" => Ok(NodeStatus::Up),
            "3" => Ok(NodeStatus::Down),
            _ => Err(CheckError::parse("node status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodeInfo {
    id: usize,
    host: String,
    port: u16,
    status: NodeStatus,
    weight: f64,
}

impl NodeInfo {
    /// Parses `pcp_node_info` output: `<host> <port> <status> <weight>`
    fn parse(id: usize, line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [host, port, status, weight, ..] => Ok(Self {
                id,
                host: (*host).to_owned(),
                port: port
                    .parse()
                    .map_err(|e| CheckError::parse("node port", e))?,
                status: status.parse()?,
                weight: weight
                    .parse()
                    .map_err(|e| CheckError::parse("node weight", e))?,
            }),
            _ => Err(CheckError::parse("pcp_node_info output", line.trim()).into()),
        }
    }

    fn is_up(&self) -> bool {
        self.status == NodeStatus::Up || self.status == NodeStatus::UpNoConnections
    }

    fn is_down(&self) -> bool {
        self.status == NodeStatus::Down
    }
}

/// Meaning of PCP exit codes.
fn pcp_error(code: u32) -> &'static str {
    match code {
        1 => "unknown error",
        2 => "EOF error",
        3 => "memory shortage",
        4 => "error while reading from the server",
        5 => "error while writing to the server",
        6 => "timeout",
        7 => "invalid arguments",
        8 => "server connection error",
        9 => "no connection exists",
        10 => "socket error",
        11 => "hostname resolution error",
        12 => "PCP process error on the server",
        13 => "authorization failure",
        _ => "unexpected exit code",
    }
}

/// Thin wrapper over the pgpool PCP command line utilities.
struct Pcp<'a> {
    opt: &'a Opt,
    number_of_nodes: usize,
}

impl<'a> Pcp<'a> {
    fn connect(opt: &'a Opt) -> Result<Self> {
        let mut pcp = Self {
            opt,
            number_of_nodes: 0,
        };
        let out = pcp.run(PCP_NODE_COUNT, None)?;
        pcp.number_of_nodes = out
            .trim()
            .parse()
            .map_err(|e| CheckError::parse("pcp_node_count output", e))?;
        debug!("pgpool reports {} nodes", pcp.number_of_nodes);
        Ok(pcp)
    }

    fn exe(&self, name: &str) -> PathBuf {
        self.opt.prefix.join(name)
    }

    fn command(&self, name: &str, node_id: Option<usize>) -> CommandSpec {
        let o = self.opt;
        let spec = CommandSpec::new(self.exe(name).to_string_lossy())
            .arg(o.timeout.to_string())
            .arg(o.hostname.as_str())
            .arg(o.port.to_string())
            .arg(o.user.as_str())
            .arg(o.password.as_str())
            .timeout(Duration::from_secs(o.timeout) + RUNNER_MARGIN);
        match node_id {
            Some(id) => spec.arg(id.to_string()),
            None => spec,
        }
    }

    fn run(&self, name: &str, node_id: Option<usize>) -> Result<String> {
        let res = runner::run(&self.command(name, node_id))?;
        if let (false, Exit::Code(c)) = (res.timed_out(), res.exit()) {
            if c != 0 {
                bail!("{} failed: {} ({})", name, pcp_error(c), res.stderr().trim());
            }
        }
        Ok(res.require_output().context(name.to_owned())?.to_owned())
    }

    fn is_valid_node_id(&self, id: usize) -> bool {
        id < self.number_of_nodes
    }

    fn node_info(&self, id: usize) -> Result<NodeInfo> {
        ensure!(
            self.is_valid_node_id(id),
            "Invalid node id({}) must be between 0 and {}",
            id,
            self.number_of_nodes.saturating_sub(1)
        );
        let out = self.run(PCP_NODE_INFO, Some(id))?;
        NodeInfo::parse(id, &out)
    }

    fn all_nodes(&self) -> Result<Vec<NodeInfo>> {
        (0..self.number_of_nodes).map(|id| self.node_info(id)).collect()
    }
}

fn classify(nodes: &[NodeInfo], t: &Thresholds<usize>) -> Result<Verdict> {
    ensure!(!nodes.is_empty(), "pgpool reports no backend nodes");
    let down = nodes.iter().filter(|n| n.is_down()).count();
    let percent = down * 100 / nodes.len();
    for n in nodes.iter().filter(|n| !n.is_up()) {
        debug!("node {} ({}:{}, weight {}) is {:?}", n.id, n.host, n.port, n.weight, n.status);
    }
    Ok(Verdict::new(
        t.classify(percent),
        format!(
            "{}% of the nodes are down ({}/{})",
            percent,
            down,
            nodes.len()
        ),
    ))
}

fn check(opt: &Opt) -> Result<Verdict> {
    let pcp = Pcp::connect(opt)?;
    let nodes = pcp.all_nodes()?;
    classify(
        &nodes,
        &Thresholds::new(opt.warning, opt.critical, Direction::AtOrAbove),
    )
}

// every failure of this check is UNKNOWN
fn run(opt: &Opt) -> Result<Verdict> {
    Ok(check(opt).unwrap_or_else(|e| Verdict::unknown(format!("Error: {:#}", e))))
}

/// Checks the share of pgpool backend nodes that are down, using the PCP utilities.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// PCP command timeout
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    /// PCP hostname
    #[structopt(short = "H", long, default_value = "localhost", value_name = "HOST")]
    hostname: String,
    /// PCP port
    #[structopt(short = "P", long, default_value = "9898")]
    port: u16,
    /// PCP user
    #[structopt(short, long)]
    user: String,
    /// PCP password
    #[structopt(short, long, value_name = "PASS")]
    password: String,
    /// Warning if PERCENTAGE or more of the nodes are down
    #[structopt(short, long, default_value = "50", value_name = "PERCENTAGE")]
    warning: usize,
    /// Critical if PERCENTAGE or more of the nodes are down
    #[structopt(short, long, default_value = "100", value_name = "PERCENTAGE")]
    critical: usize,
    /// Directory containing the PCP utilities
    #[structopt(long, default_value = "/usr/sbin", parse(from_os_str))]
    prefix: PathBuf,
}

fn main() {
    plugin::main("PGPOOL", run)
}
