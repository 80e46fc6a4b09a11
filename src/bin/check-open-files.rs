use anyhow::{ensure, Context, Result};
use sensu_plugins::process;
use sensu_plugins::runner::{self, CommandSpec};
use sensu_plugins::{plugin, CheckError, Direction, Thresholds, Verdict};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

// lsof prints one header line
fn lsof_count(out: &str) -> usize {
    out.lines().count().saturating_sub(1)
}

fn process_open_files(opt: &Opt, pids: &[u32]) -> Result<usize> {
    ensure!(!pids.is_empty(), "No process found");
    let pids = process::join(pids);
    let lsof = opt.lsof.to_string_lossy();
    let spec = if opt.sudo {
        CommandSpec::new("sudo").arg(lsof)
    } else {
        CommandSpec::new(lsof)
    };
    let spec = spec
        .args(vec!["-p", pids.as_str()])
        .timeout(Duration::from_secs(opt.timeout));
    let res = runner::run(&spec)?;
    Ok(lsof_count(res.require_output()?))
}

/// First field of `/proc/sys/fs/file-nr`: allocated file handles.
fn system_open_files(file_nr: &Path) -> Result<usize> {
    let content = fs::read_to_string(file_nr)
        .with_context(|| format!("Failed to read {}", file_nr.display()))?;
    let first = content.split_whitespace().next().unwrap_or_default();
    Ok(first
        .parse()
        .map_err(|e| CheckError::parse(file_nr.display().to_string(), e))?)
}

fn run(opt: &Opt) -> Result<Verdict> {
    let timeout = Duration::from_secs(opt.timeout);
    let open_files = if let Some(pid_file) = &opt.pid_file {
        process_open_files(opt, &process::read_pid_file(pid_file)?)?
    } else if let Some(name) = &opt.process {
        let pids = process::pidof(&opt.pidof, name, timeout)?;
        process_open_files(opt, &pids).with_context(|| format!("pidof {}", name))?
    } else {
        system_open_files(&opt.file_nr)?
    };
    let t = Thresholds::optional(opt.warn, opt.crit, Direction::Above);
    Ok(Verdict::new(
        t.classify(open_files),
        format!("Open files: {}", open_files),
    ))
}

/// Counts the open files of a process (by pid file or name) or of the whole system.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Warning if more than N files are open
    #[structopt(short, long, value_name = "N", display_order = 1)]
    warn: Option<usize>,
    /// Critical if more than N files are open
    #[structopt(short, long, value_name = "N", display_order = 2)]
    crit: Option<usize>,
    /// Pid file of the process to count open files of
    #[structopt(short = "f", long, parse(from_os_str))]
    pid_file: Option<PathBuf>,
    /// Process name to count open files of, looked up with pidof
    #[structopt(short, long, conflicts_with = "pid-file")]
    process: Option<String>,
    /// Run lsof through sudo
    #[structopt(long)]
    sudo: bool,
    /// Path to the `lsof` binary
    #[structopt(long, default_value = "/usr/bin/lsof", parse(from_os_str))]
    lsof: PathBuf,
    /// Path to the `pidof` binary
    #[structopt(long, default_value = "pidof", value_name = "PATH")]
    pidof: String,
    #[structopt(long, default_value = "/proc/sys/fs/file-nr", hidden = true, parse(from_os_str))]
    file_nr: PathBuf,
    /// Timeout for each external command
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
}

fn main() {
    plugin::main("OPEN FILES", run)
}

#[cfg(test)]
mod test {
    use super::*;
    use sensu_plugins::State;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{NamedTempFile, TempDir};

    const LSOF: &str = "\
COMMAND  PID USER   FD   TYPE DEVICE SIZE/OFF    NODE NAME
nginx   1234 root  cwd    DIR  253,1     4096       2 /
nginx   1234 root  rtd    DIR  253,1     4096       2 /
nginx   1234 root    3u  IPv4  23456      0t0     TCP *:80 (LISTEN)
";

    fn opt(args: &[&str]) -> Opt {
        let mut argv = vec!["prog"];
        argv.extend(args);
        Opt::from_iter(argv)
    }

    fn tmpfile(content: &str) -> NamedTempFile {
        let f = NamedTempFile::new().unwrap();
        fs::write(f.path(), content).unwrap();
        f
    }

    #[test]
    fn count_lsof_lines() {
        assert_eq!(lsof_count(LSOF), 3);
        assert_eq!(lsof_count(""), 0);
    }

    #[test]
    fn system_wide() {
        let f = tmpfile("1824\t0\t9223372036854775807\n");
        assert_eq!(system_open_files(f.path()).unwrap(), 1824);
        let path = f.path().to_string_lossy().to_string();
        let v = run(&opt(&["--file-nr", path.as_str(), "-w", "1000", "-c", "2000"])).unwrap();
        assert_eq!(v, Verdict::warning("Open files: 1824"));
        let v = run(&opt(&["--file-nr", path.as_str()])).unwrap();
        assert_eq!(v.state, State::OK);
    }

    #[test]
    fn no_process() {
        let o = opt(&["--pidof", "true", "-p", "nginx"]);
        assert_eq!(
            format!("{:#}", run(&o).unwrap_err()),
            "pidof nginx: No process found"
        );
    }

    #[test]
    fn fake_lsof() {
        let td = TempDir::new().unwrap();
        let lsof = td.path().join("lsof");
        fs::write(&lsof, format!("#!/bin/sh\ncat <<EOF\n{}EOF\n", LSOF)).unwrap();
        fs::set_permissions(&lsof, fs::Permissions::from_mode(0o755)).unwrap();
        let pid_file = td.path().join("nginx.pid");
        fs::write(&pid_file, "1234\n").unwrap();

        let lsof = lsof.to_string_lossy().to_string();
        let pid_file = pid_file.to_string_lossy().to_string();
        let o = opt(&["--lsof", lsof.as_str(), "-f", pid_file.as_str(), "-c", "2"]);
        assert_eq!(process_open_files(&o, &[1234]).unwrap(), 3);
        assert_eq!(run(&o).unwrap(), Verdict::critical("Open files: 3"));
    }

    #[test]
    fn pid_file_and_process_conflict() {
        assert!(Opt::from_iter_safe(&["prog", "-f", "/run/nginx.pid", "-p", "nginx"]).is_err());
    }
}
