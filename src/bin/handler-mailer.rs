use anyhow::{anyhow, Context, Result};
use chrono::{Local, TimeZone};
use log::{error, info};
use sensu_plugins::event::Event;
use sensu_plugins::plugin;
use sensu_plugins::runner::{self, CommandSpec};
use serde::Deserialize;
use std::fs;
use std::io::stdin;
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    mailer: MailerSettings,
}

#[derive(Debug, Default, Deserialize)]
struct MailerSettings {
    mail_to: Option<String>,
}

fn load_settings(path: &Path) -> Result<Settings> {
    let s = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("Failed to parse {}", path.display()))
}

fn mail_to(opt: &Opt) -> Result<String> {
    if let Some(to) = &opt.mail_to {
        return Ok(to.clone());
    }
    load_settings(&opt.config)?
        .mailer
        .mail_to
        .ok_or_else(|| anyhow!("{}: mailer.mail_to not set", opt.config.display()))
}

fn action(event: &Event) -> &'static str {
    if event.is_resolution() {
        "RESOLVED"
    } else {
        "ALERT"
    }
}

fn subject(event: &Event) -> String {
    let summary = match &event.check.notification {
        Some(n) => n.as_str(),
        None => event.check.output.lines().next().unwrap_or_default(),
    };
    format!("{} - {}: {}", action(event), event.short_name(), summary)
}

fn timestamp(issued: i64) -> String {
    match Local.timestamp_opt(issued, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        None => issued.to_string(),
    }
}

fn body(event: &Event) -> String {
    let c = &event.check;
    format!(
        "{}\n\
         Host: {}\n\
         Timestamp: {}\n\
         Address:  {}\n\
         Check Name:  {}\n\
         Command:  {}\n\
         Status:  {}\n\
         Occurrences:  {}\n",
        c.output.trim_end(),
        event.client.name,
        timestamp(c.issued),
        event.client.address,
        c.name,
        c.command,
        c.status,
        event.occurrences
    )
}

#[derive(Debug, PartialEq)]
enum Delivery {
    Sent,
    TimedOut,
}

fn send(opt: &Opt, event: &Event, to: &str) -> Result<Delivery> {
    let spec = CommandSpec::new(opt.mail.as_str())
        .arg("-s")
        .arg(subject(event))
        .arg(to)
        .stdin(body(event))
        .timeout(Duration::from_secs(opt.timeout));
    let res = runner::run(&spec)?;
    if res.timed_out() {
        return Ok(Delivery::TimedOut);
    }
    if !res.success() {
        return Err(anyhow!(
            "{} failed with {}: {}",
            opt.mail,
            res.exit(),
            res.stderr().trim()
        ));
    }
    info!("mailed {} to {}", event.short_name(), to);
    Ok(Delivery::Sent)
}

fn handle(opt: &Opt, event: &Event) -> Result<()> {
    let to = mail_to(opt)?;
    if send(opt, event, &to)? == Delivery::TimedOut {
        println!(
            "mail -- timed out while attempting to {} an incident -- {}",
            event.action.as_deref().unwrap_or("handle"),
            event.short_name()
        );
    }
    Ok(())
}

/// Mails Sensu events read from stdin.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// Recipient (default: mailer.mail_to from the settings file)
    #[structopt(short, long, value_name = "ADDR")]
    mail_to: Option<String>,
    /// Settings file
    #[structopt(
        short,
        long,
        default_value = "/etc/sensu/conf.d/mailer.json",
        parse(from_os_str)
    )]
    config: PathBuf,
    /// Give up on `mail` after SEC seconds
    #[structopt(short, long, default_value = "10", value_name = "SEC")]
    timeout: u64,
    /// Path to the `mail` binary
    #[structopt(long, default_value = "mail", value_name = "PATH")]
    mail: String,
}

fn main() {
    plugin::init_logging();
    let opt = Opt::from_args();
    let res = Event::from_reader(stdin()).and_then(|event| handle(&opt, &event));
    if let Err(e) = res {
        error!("{:#}", e);
        std::process::exit(2);
    }
}
