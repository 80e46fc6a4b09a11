use anyhow::{Context, Result};
use log::debug;
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity, StatusCode};
use sensu_plugins::{plugin, CheckError, Verdict};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

const TIMEOUT: Duration = Duration::from_secs(5);
const NOT_RESPONDING: &str = "Etcd is not responding";

// etcd v2 answers {"health": "true"}, v3 {"health": true}
fn is_healthy(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => matches!(v.get("health"), Some(Value::Bool(true)))
            || v.get("health").and_then(Value::as_str) == Some("true"),
        Err(e) => {
            debug!("unexpected /health response '{}': {}", body.trim(), e);
            false
        }
    }
}

fn classify(status: StatusCode, body: &str) -> Verdict {
    if status == StatusCode::OK && is_healthy(body) {
        Verdict::ok("etcd is up")
    } else {
        debug!("/health returned {}: {}", status, body.trim());
        Verdict::critical(NOT_RESPONDING)
    }
}

fn client(opt: &Opt) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(TIMEOUT)
        .danger_accept_invalid_certs(opt.insecure);
    if let Some(ca) = &opt.ca {
        let pem = fs::read(ca).with_context(|| format!("Failed to read {}", ca.display()))?;
        builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }
    if let Some(cert) = &opt.cert {
        let mut pem =
            fs::read(cert).with_context(|| format!("Failed to read {}", cert.display()))?;
        if let Some(key) = &opt.key {
            pem.extend(fs::read(key).with_context(|| format!("Failed to read {}", key.display()))?);
        }
        builder = builder.identity(Identity::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}

fn url(opt: &Opt) -> String {
    let scheme = if opt.ssl { "https" } else { "http" };
    format!("{}://{}:{}/health", scheme, opt.server, opt.port)
}

fn run(opt: &Opt) -> Result<Verdict> {
    let client = client(opt)?;
    let url = url(opt);
    debug!("GET {}", url);
    match client.get(&url).send() {
        Ok(res) => {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            Ok(classify(status, &body))
        }
        Err(e) if e.is_timeout() => {
            Err(CheckError::Connection("Etcd Connection timed out".into()).into())
        }
        Err(e) => {
            debug!("{}: {}", url, e);
            Err(CheckError::Connection(NOT_RESPONDING.into()).into())
        }
    }
}

/// Checks that etcd reports itself healthy on its /health endpoint.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    /// etcd server
    #[structopt(short, long, default_value = "localhost")]
    server: String,
    /// etcd port
    #[structopt(short, long, default_value = "4001")]
    port: u16,
    /// Client TLS certificate (PEM)
    #[structopt(long, parse(from_os_str))]
    cert: Option<PathBuf>,
    /// Client TLS key (unencrypted PEM)
    #[structopt(long, parse(from_os_str), requires = "cert")]
    key: Option<PathBuf>,
    /// CA certificate to verify the server with (PEM)
    #[structopt(long, parse(from_os_str))]
    ca: Option<PathBuf>,
    /// Do not verify the server certificate
    #[structopt(long)]
    insecure: bool,
    /// Use HTTPS
    #[structopt(long)]
    ssl: bool,
}

fn main() {
    plugin::main("ETCD", run)
}
