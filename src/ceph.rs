//! Connection options and command plumbing shared by the Ceph checks.

use crate::error::CheckError;
use crate::runner::{self, CommandSpec};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone, PartialEq)]
pub struct CephOpts {
    /// Client name for authentication
    #[structopt(short, long, value_name = "USER")]
    pub user: Option<String>,
    /// Optional monitor address
    #[structopt(short, long, value_name = "MON")]
    pub monitor: Option<String>,
    /// Optional cluster name
    #[structopt(long, value_name = "NAME")]
    pub cluster: Option<String>,
    /// Timeout for each ceph command
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    pub timeout: u64,
    /// Include standard error of ceph commands in the output
    #[structopt(long = "stderr")]
    pub show_stderr: bool,
    /// Path to the `ceph` binary
    #[structopt(long, default_value = "ceph", value_name = "PATH")]
    pub ceph: String,
}

impl CephOpts {
    pub fn command(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(self.ceph.as_str())
            .args(args.iter().copied())
            .timeout(Duration::from_secs(self.timeout))
            .merge_stderr(self.show_stderr);
        if let Some(c) = &self.cluster {
            spec = spec.arg(format!("--cluster={}", c));
        }
        if let Some(u) = &self.user {
            spec = spec.arg("--user").arg(u.as_str());
        }
        if let Some(m) = &self.monitor {
            spec = spec.arg("-m").arg(m.as_str());
        }
        spec
    }

    /// Runs `ceph <args>` and returns its output. Timeouts, failures and empty output are
    /// errors.
    pub fn text(&self, args: &[&str]) -> Result<String> {
        if self.timeout == 0 {
            return Err(CheckError::InvalidArgument("timeout must be positive".into()).into());
        }
        let spec = self.command(args);
        let res = runner::run(&spec)?;
        Ok(res.require_output()?.to_owned())
    }

    /// Runs `ceph <args> --format json` and decodes the result.
    pub fn json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let mut args = args.to_vec();
        args.extend(&["--format", "json"]);
        let out = self.text(&args)?;
        let what = format!("ceph {}", args.join(" "));
        serde_json::from_str(&out)
            .map_err(|e| CheckError::parse(what.as_str(), e))
            .with_context(|| what.clone())
    }
}

/// Number of entries in a JSON array or object. Ceph reports some collections as either,
/// depending on the release.
pub fn len_of(v: &Value) -> usize {
    match v {
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::state_of;
    use crate::state::State;
    use serde_json::json;

    fn opts(args: &[&str]) -> CephOpts {
        let mut argv = vec!["prog"];
        argv.extend(args);
        CephOpts::from_iter(argv)
    }

    #[test]
    fn command_line_options() {
        let o = opts(&["-u", "monitoring", "-m", "10.0.0.1", "--cluster", "prod", "--stderr"]);
        assert_eq!(
            o.command(&["osd", "stat"]).to_string(),
            "ceph osd stat --cluster=prod --user monitoring -m 10.0.0.1 2>&1"
        );
        assert_eq!(o.command(&["osd", "stat"]).get_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_command() {
        assert_eq!(opts(&[]).command(&["status"]).to_string(), "ceph status");
    }

    #[test]
    fn json_from_fake_ceph() {
        let mut o = opts(&[]);
        o.ceph = "printf".into();
        let v: Value = o.json(&[r#"{"num_osds": 3}"#]).unwrap();
        assert_eq!(v["num_osds"], 3);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut o = opts(&[]);
        o.ceph = "echo".into();
        let e = o.json::<Value>(&["osd", "stat"]).unwrap_err();
        assert_eq!(state_of(&e), State::UNKNOWN);
        assert!(
            format!("{:#}", e).starts_with("ceph osd stat --format json: Failed to parse"),
            "{:#}",
            e
        );
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let o = opts(&["-t", "0"]);
        let e = o.text(&["status"]).unwrap_err();
        assert_eq!(state_of(&e), State::UNKNOWN);
    }

    #[test]
    fn collection_length() {
        assert_eq!(len_of(&json!([1, 2])), 2);
        assert_eq!(len_of(&json!({"mds_0": 4123})), 1);
        assert_eq!(len_of(&json!(null)), 0);
    }
}
