use anyhow::{ensure, Context, Result};
use log::debug;
use sensu_plugins::runner::{self, CommandSpec};
use sensu_plugins::{plugin, CheckError, Direction, Thresholds, Verdict};
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;
use walkdir::WalkDir;

/// Spool directory from `postconf queue_directory`, printed as `queue_directory = /path`.
fn queue_directory(out: &str) -> Result<PathBuf, CheckError> {
    out.split_whitespace()
        .last()
        .map(PathBuf::from)
        .ok_or_else(|| CheckError::parse("postconf output", "empty"))
}

fn count_files(dir: &Path) -> Result<usize> {
    ensure!(
        dir.is_dir(),
        "Couldn't read {}, you may need sudo",
        dir.display()
    );
    let mut n = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("Couldn't read {}", dir.display()))?;
        if entry.file_type().is_file() {
            n += 1;
        }
    }
    debug!("{}: {} files", dir.display(), n);
    Ok(n)
}

fn queue_length(spool: &Path, queues: &str) -> Result<usize> {
    queues
        .split(',')
        .filter(|q| !q.is_empty())
        .map(|q| count_files(&spool.join(q)))
        .sum()
}

fn run(opt: &Opt) -> Result<Verdict> {
    let spec = CommandSpec::new(opt.postconf.to_string_lossy())
        .arg("-c")
        .arg(opt.path.to_string_lossy())
        .arg("queue_directory")
        .timeout(Duration::from_secs(opt.timeout));
    let res = runner::run(&spec)?;
    let spool = queue_directory(res.require_output()?)?;
    let n = queue_length(&spool, &opt.queues)?;
    let t = Thresholds::new(opt.warn, opt.crit, Direction::AtOrAbove);
    Ok(Verdict::new(
        t.classify(n),
        format!(
            "{} messages in the {} queues for instance {}",
            n,
            opt.queues,
            opt.path.display()
        ),
    ))
}

/// Checks the number of messages in the queues of a Postfix instance.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Path to the postfix instance configuration
    #[structopt(short, long, default_value = "/etc/postfix", parse(from_os_str))]
    path: PathBuf,
    /// Comma-separated list of queues
    #[structopt(short, long, default_value = "deferred,active,maildrop")]
    queues: String,
    /// Warning if there are N or more messages in the queues
    #[structopt(
        short,
        long,
        alias = "warnnum",
        default_value = "600",
        value_name = "N",
        display_order = 1
    )]
    warn: usize,
    /// Critical if there are N or more messages in the queues
    #[structopt(
        short,
        long = "crit",
        alias = "critnum",
        default_value = "600",
        value_name = "N",
        display_order = 2
    )]
    crit: usize,
    /// Timeout for postconf
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    /// Path to the `postconf` binary
    #[structopt(
        long,
        default_value = "/usr/sbin/postconf",
        value_name = "PATH",
        parse(from_os_str)
    )]
    postconf: PathBuf,
}

fn main() {
    plugin::main("POSTFIX QUEUE", run)
}

#[cfg(test)]
mod test {
    use super::*;
    use sensu_plugins::State;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn spool() -> TempDir {
        let td = TempDir::new().unwrap();
        for (q, n) in &[("deferred", 3), ("active", 1), ("maildrop", 0), ("incoming", 5)] {
            let dir = td.path().join(q).join("A");
            fs::create_dir_all(&dir).unwrap();
            for i in 0..*n {
                fs::write(dir.join(format!("4A7B{}", i)), "").unwrap();
            }
        }
        td
    }

    #[test]
    fn parse_postconf() {
        assert_eq!(
            queue_directory("queue_directory = /var/spool/postfix\n").unwrap(),
            PathBuf::from("/var/spool/postfix")
        );
        assert!(queue_directory("\n").is_err());
    }

    #[test]
    fn count_queue_files() {
        let td = spool();
        assert_eq!(queue_length(td.path(), "deferred,active,maildrop").unwrap(), 4);
        assert_eq!(queue_length(td.path(), "incoming").unwrap(), 5);
    }

    #[test]
    fn missing_queue_dir() {
        let td = spool();
        let e = queue_length(td.path(), "deferred,hold").unwrap_err();
        assert!(e.to_string().ends_with("hold, you may need sudo"), "{}", e);
    }

    #[test]
    fn fake_postconf() {
        let td = spool();
        let postconf = td.path().join("postconf");
        fs::write(
            &postconf,
            format!("#!/bin/sh\necho \"queue_directory = {}\"\n", td.path().display()),
        )
        .unwrap();
        fs::set_permissions(&postconf, fs::Permissions::from_mode(0o755)).unwrap();
        let postconf = postconf.to_string_lossy().to_string();
        let opt = Opt::from_iter(&["prog", "--postconf", postconf.as_str(), "-w", "3", "-c", "5"]);
        assert_eq!(
            run(&opt).unwrap(),
            Verdict::warning(
                "4 messages in the deferred,active,maildrop queues for instance /etc/postfix"
            )
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let t = Thresholds::new(600usize, 700, Direction::AtOrAbove);
        assert_eq!(t.classify(600), State::WARNING);
        assert_eq!(t.classify(599), State::OK);
    }
}
