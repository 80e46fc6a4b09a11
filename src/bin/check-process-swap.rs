use anyhow::{Context, Result};
use log::debug;
use sensu_plugins::{plugin, process, CheckError, State, Verdict};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

/// `VmSwap` of a process in kB. Kernel threads have none.
fn vm_swap(status: &str) -> Result<u64, CheckError> {
    match status.lines().find(|l| l.starts_with("VmSwap:")) {
        Some(line) => {
            let kb = line.split_whitespace().nth(1).unwrap_or_default();
            kb.parse()
                .map_err(|e| CheckError::parse("VmSwap", format!("'{}': {}", kb, e)))
        }
        None => Ok(0),
    }
}

fn is_swapping(proc_root: &Path, pid: u32) -> Result<bool> {
    let path = proc_root.join(pid.to_string()).join("status");
    let status =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let kb = vm_swap(&status)?;
    debug!("pid {}: VmSwap {} kB", pid, kb);
    Ok(kb > 0)
}

fn classify(pids: &[u32], swapping: &[u32], warn_only: bool) -> Verdict {
    if pids.is_empty() {
        return Verdict::warning("No processes found");
    }
    if swapping.is_empty() {
        return Verdict::ok(format!(
            "No swap being used by {}",
            process::join(pids).replace(',', ", ")
        ));
    }
    let state = if warn_only {
        State::WARNING
    } else {
        State::CRITICAL
    };
    Verdict::new(
        state,
        format!(
            "Processes swapping: {}",
            process::join(swapping).replace(',', ", ")
        ),
    )
}

fn run(opt: &Opt) -> Result<Verdict> {
    let pids = if let Some(name) = &opt.process {
        process::pidof(&opt.pidof, name, Duration::from_secs(opt.timeout))?
    } else if let Some(pid_file) = &opt.pid_file {
        process::read_pid_file(pid_file)?
    } else {
        Vec::new()
    };
    let mut swapping = Vec::new();
    for &pid in &pids {
        if is_swapping(&opt.proc_root, pid)? {
            swapping.push(pid);
        }
    }
    Ok(classify(&pids, &swapping, opt.warn_only))
}

/// Checks whether a process is swapping.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Process name to look up with pidof
    #[structopt(short, long)]
    process: Option<String>,
    /// File to read the pids from
    #[structopt(short = "f", long, parse(from_os_str))]
    pid_file: Option<PathBuf>,
    /// Report WARNING instead of CRITICAL if the process is swapping
    #[structopt(short, long)]
    warn_only: bool,
    /// Path to the `pidof` binary
    #[structopt(long, default_value = "pidof", value_name = "PATH")]
    pidof: String,
    /// Timeout for pidof
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    #[structopt(long, default_value = "/proc", hidden = true, parse(from_os_str))]
    proc_root: PathBuf,
}

fn main() {
    plugin::main("PROCESS SWAP", run)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn status(swap: &str) -> String {
        format!(
            "Name:\tredis-server\nState:\tS (sleeping)\nPid:\t{}\nVmRSS:\t  10240 kB\n\
             VmSwap:\t{:>8} kB\nThreads:\t4\n",
            4711, swap
        )
    }

    fn proc_root(procs: &[(u32, &str)]) -> TempDir {
        let td = TempDir::new().unwrap();
        for (pid, swap) in procs {
            let dir = td.path().join(pid.to_string());
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("status"), status(swap)).unwrap();
        }
        td
    }

    #[test]
    fn parse_vm_swap() {
        assert_eq!(vm_swap(&status("0")).unwrap(), 0);
        assert_eq!(vm_swap(&status("512")).unwrap(), 512);
        assert_eq!(vm_swap("Name:\tkthreadd\n").unwrap(), 0);
        assert!(vm_swap("VmSwap:\tlots\n").is_err());
    }

    #[test]
    fn classification() {
        assert_eq!(
            classify(&[], &[], false),
            Verdict::warning("No processes found")
        );
        assert_eq!(
            classify(&[1, 2], &[], false),
            Verdict::ok("No swap being used by 1, 2")
        );
        assert_eq!(
            classify(&[1, 2], &[2], false),
            Verdict::critical("Processes swapping: 2")
        );
        assert_eq!(classify(&[1, 2], &[2], true).state, State::WARNING);
    }

    #[test]
    fn pid_file_with_fake_proc() {
        let td = proc_root(&[(100, "0"), (200, "2048")]);
        let pid_file = td.path().join("redis.pid");
        fs::write(&pid_file, "100 200\n").unwrap();
        let root = td.path().to_string_lossy().to_string();
        let pid_file = pid_file.to_string_lossy().to_string();
        let opt = Opt::from_iter(&[
            "prog",
            "-f",
            pid_file.as_str(),
            "--proc-root",
            root.as_str(),
        ]);
        assert_eq!(run(&opt).unwrap(), Verdict::critical("Processes swapping: 200"));
    }

    #[test]
    fn vanished_process_is_an_error() {
        let td = proc_root(&[]);
        assert!(is_swapping(td.path(), 4711).is_err());
    }

    #[test]
    fn nothing_to_look_for() {
        let opt = Opt::from_iter(&["prog"]);
        assert_eq!(run(&opt).unwrap(), Verdict::warning("No processes found"));
    }
}
