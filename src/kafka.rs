//! Kafka command line tools as used by the Kafka checks.

use crate::error::CheckError;
use crate::runner::{self, CommandSpec};
use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

/// Path of `bin/<name>` below the Kafka installation. A missing script is an error.
pub fn script(kafka_home: &Path, name: &str) -> Result<PathBuf> {
    let p = kafka_home.join("bin").join(name);
    ensure!(p.exists(), "Can not find {}", p.display());
    Ok(p)
}

/// Runs a Kafka tool with stderr merged into its output. Timeouts and non-zero exits are errors,
/// no output at all is not.
pub fn output(spec: CommandSpec) -> Result<String> {
    let res = runner::run(&spec.merge_stderr(true))?;
    if !res.success() {
        // fails on timeout and non-zero exit
        res.require_output()?;
    }
    Ok(res.stdout().to_owned())
}

#[derive(StructOpt, Debug, Clone, PartialEq)]
pub struct KafkaOpts {
    /// ZooKeeper connect string
    #[structopt(short, long, default_value = "localhost:2181", value_name = "HOST:PORT")]
    pub zookeeper: String,
    /// Kafka installation directory
    #[structopt(short, long, default_value = "/opt/kafka", parse(from_os_str))]
    pub kafka_home: PathBuf,
    /// Timeout for each Kafka tool run (JVM startup included)
    #[structopt(short, long, default_value = "30", value_name = "SEC")]
    pub timeout: u64,
}

impl KafkaOpts {
    fn spec(&self, script: &Path) -> Result<CommandSpec> {
        if self.timeout == 0 {
            return Err(CheckError::InvalidArgument("timeout must be positive".into()).into());
        }
        Ok(CommandSpec::new(script.to_string_lossy()).timeout(Duration::from_secs(self.timeout)))
    }

    /// Non-empty output lines of `kafka-topics.sh --describe <filter>`, e.g.
    /// `--unavailable-partitions`.
    pub fn describe_topics(&self, filter: &str) -> Result<Vec<String>> {
        let topics = script(&self.kafka_home, "kafka-topics.sh")?;
        let spec = self
            .spec(&topics)?
            .args(vec!["--zookeeper", self.zookeeper.as_str(), "--describe", filter]);
        let out = output(spec)?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Runs one `zookeeper-shell.sh` command like `ls /brokers/ids`.
    pub fn zookeeper_shell(&self, command: &[&str]) -> Result<String> {
        let shell = script(&self.kafka_home, "zookeeper-shell.sh")?;
        let spec = self
            .spec(&shell)?
            .arg(self.zookeeper.as_str())
            .args(command.iter().copied());
        output(spec)
    }
}
