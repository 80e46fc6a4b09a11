//! [Sensu event data](https://docs.sensu.io/sensu-core/1.9/reference/events/) as handed to
//! handlers and mutators on stdin.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Event {
    pub client: Client,
    pub check: Check,
    pub occurrences: u64,
    pub action: Option<String>,
}

/// The client that sent the check result
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Client {
    pub name: String,
    pub address: String,
    pub subscriptions: Vec<String>,
    pub timestamp: i64,
}

/// Check definition plus the result Sensu attached to it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Check {
    pub name: String,
    pub command: String,
    pub output: String,
    pub status: i64,
    pub issued: i64,
    pub notification: Option<String>,
}

impl FromStr for Event {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("Failed to parse event JSON")
    }
}

impl Event {
    pub fn from_reader<R: Read>(mut r: R) -> Result<Self> {
        let mut input = String::new();
        r.read_to_string(&mut input)
            .context("Failed to read event")?;
        input.parse()
    }

    /// `client/check`
    pub fn short_name(&self) -> String {
        format!("{}/{}", self.client.name, self.check.name)
    }

    pub fn is_resolution(&self) -> bool {
        self.action.as_deref() == Some("resolve")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EVENT: &str = r#"{
        "occurrences": 1,
        "action": "create",
        "client": {
            "name": "hello",
            "address": "192.168.1.1",
            "subscriptions": ["one", "two"],
            "timestamp": 127897
        },
        "check": {
            "name": "test-check",
            "issued": 1416069607,
            "output": "we have output",
            "status": 2,
            "command": "echo 'we have output'",
            "subscribers": ["base", "web"],
            "interval": 60,
            "handler": "default",
            "history": ["0", "0", "2"],
            "flapping": false
        }
    }"#;

    #[test]
    fn can_build_event() {
        let e = EVENT.parse::<Event>().unwrap();
        assert_eq!(e.client.name, "hello");
        assert_eq!(e.client.subscriptions, vec!["one", "two"]);
        assert_eq!(e.check.status, 2);
        assert_eq!(e.check.issued, 1416069607);
        assert_eq!(e.check.notification, None);
        assert_eq!(e.short_name(), "hello/test-check");
        assert!(!e.is_resolution());
    }

    #[test]
    fn missing_fields_default() {
        let e = r#"{"check": {"name": "c"}, "action": "resolve"}"#
            .parse::<Event>()
            .unwrap();
        assert_eq!(e.short_name(), "/c");
        assert_eq!(e.occurrences, 0);
        assert!(e.is_resolution());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("not json".parse::<Event>().is_err());
        assert!(Event::from_reader(&b"[1, 2]"[..]).is_err());
    }
}
