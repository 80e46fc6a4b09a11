use anyhow::{Context, Result};
use log::debug;
use postgres::{Client, Config, NoTls, SimpleQueryMessage};
use sensu_plugins::{plugin, CheckError, Verdict};
use std::time::Duration;
use structopt::StructOpt;

const CLUSTER_QUERY: &str = "SELECT * FROM nodes;";
const UNDESIRABLE: &[&str] = &["INITIALIZING", "SHUTDOWN", "READY", "RECOVERING"];

#[derive(Debug, Clone, PartialEq)]
struct Node {
    name: String,
    state: String,
}

impl Node {
    fn new(name: &str, state: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: state.to_owned(),
        }
    }

    fn is_down(&self) -> bool {
        self.state == "DOWN"
    }

    fn is_undesirable(&self) -> bool {
        UNDESIRABLE.contains(&self.state.as_str())
    }
}

fn names<F>(nodes: &[Node], pred: F) -> String
where
    F: Fn(&Node) -> bool,
{
    nodes
        .iter()
        .filter(|n| pred(*n))
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn classify(nodes: &[Node]) -> Verdict {
    let rotten = |n: &Node| n.is_down() || n.is_undesirable();
    if nodes.is_empty() {
        Verdict::unknown("No nodes found")
    } else if nodes.iter().any(Node::is_down) {
        Verdict::critical(format!(
            "The cluster has node(s) DOWN: ({})",
            names(nodes, rotten)
        ))
    } else if nodes.iter().any(Node::is_undesirable) {
        Verdict::warning(format!(
            "The cluster has node(s) with undesirable states ({})",
            names(nodes, rotten)
        ))
    } else if nodes.iter().all(|n| n.state == "UP") {
        Verdict::ok("Your cluster is working like a charm")
    } else {
        Verdict::unknown(format!(
            "The cluster has node(s) in unexpected states ({})",
            names(nodes, |n| n.state != "UP")
        ))
    }
}

fn connect(opt: &Opt) -> Result<Client> {
    let mut config = Config::new();
    config
        .host(&opt.host)
        .port(opt.port)
        .user(&opt.user)
        .dbname(&opt.database)
        .connect_timeout(Duration::from_secs(opt.timeout));
    if let Some(pw) = &opt.password {
        config.password(pw);
    }
    config
        .connect(NoTls)
        .with_context(|| format!("Failed to connect to {}:{}", opt.host, opt.port))
}

fn nodes(client: &mut Client) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for msg in client.simple_query(CLUSTER_QUERY)? {
        if let SimpleQueryMessage::Row(row) = msg {
            let column = |name: &str| -> Result<String> {
                Ok(row
                    .try_get(name)?
                    .ok_or_else(|| CheckError::parse("nodes", format!("{} is NULL", name)))?
                    .to_owned())
            };
            let node = Node {
                name: column("node_name")?,
                state: column("node_state")?,
            };
            debug!("{}: {}", node.name, node.state);
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn check(opt: &Opt) -> Result<Verdict> {
    let mut client = connect(opt)?;
    Ok(classify(&nodes(&mut client)?))
}

// every failure of this check is UNKNOWN
fn run(opt: &Opt) -> Result<Verdict> {
    Ok(check(opt).unwrap_or_else(|e| Verdict::unknown(format!("Error: {:#}", e))))
}

/// Checks that all nodes of a Vertica cluster are UP.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Vertica hostname
    #[structopt(short, long, default_value = "localhost")]
    host: String,
    /// Vertica port
    #[structopt(short = "P", long, default_value = "5433")]
    port: u16,
    /// Vertica user
    #[structopt(short, long, default_value = "dbadmin")]
    user: String,
    /// Vertica password
    #[structopt(short, long)]
    password: Option<String>,
    /// Vertica database
    #[structopt(short, long)]
    database: String,
    /// Connect timeout
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
}

fn main() {
    plugin::main("VERTICA CLUSTER", run)
}
