//! Sensu mutator: overrides the status of failing checks, always or inside a daily time window.
//!
//! The rule lives in the check definition:
//!
//! ```json
//! "change_status": {"status": 1, "begin": "22:00", "end": "06:00"}
//! ```
//!
//! Mutated events are marked with `"mutated": true`. Everything else passes through unchanged.

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use log::{debug, warn};
use sensu_plugins::plugin;
use serde::Deserialize;
use serde_json::Value;
use std::io::{stdin, Read};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Rule {
    status: Option<Value>,
    always: Option<Value>,
    begin: Option<String>,
    end: Option<String>,
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .with_context(|| format!("Invalid time of day '{}'", s))
}

/// Whether `now` lies strictly between `begin` and `end`. Windows with `end <= begin` wrap
/// around midnight.
fn in_window(now: NaiveTime, begin: NaiveTime, end: NaiveTime) -> bool {
    if end > begin {
        begin < now && now < end
    } else {
        now < end || now > begin
    }
}

impl Rule {
    fn applies(&self, now: NaiveTime) -> Result<bool> {
        if self.always == Some(Value::Bool(true)) {
            return Ok(true);
        }
        match (&self.begin, &self.end) {
            (Some(b), Some(e)) => Ok(in_window(now, parse_time(b)?, parse_time(e)?)),
            _ => Ok(false),
        }
    }
}

fn rule_of(event: &Value) -> Result<Option<Rule>> {
    let check = match event.get("check") {
        Some(c) => c,
        None => return Ok(None),
    };
    if check.get("status").and_then(Value::as_i64) == Some(0) {
        return Ok(None);
    }
    match check.get("change_status") {
        None | Some(Value::Null) => Ok(None),
        Some(r) => Ok(Some(
            serde_json::from_value(r.clone()).context("Invalid change_status rule")?,
        )),
    }
}

/// Applies the event's `change_status` rule. Returns whether the event was changed.
fn mutate(event: &mut Value, now: NaiveTime) -> Result<bool> {
    let rule = match rule_of(event)? {
        Some(r) => r,
        None => return Ok(false),
    };
    if !rule.applies(now)? {
        debug!("{:?} does not apply at {}", rule, now);
        return Ok(false);
    }
    if let Some(obj) = event.as_object_mut() {
        obj.insert("mutated".into(), Value::Bool(true));
    }
    if let (Some(status), Some(check)) = (rule.status, event.get_mut("check")) {
        if !status.is_null() {
            check["status"] = status;
        }
    }
    Ok(true)
}

fn run() -> Result<String> {
    let mut input = String::new();
    stdin()
        .read_to_string(&mut input)
        .context("Failed to read event")?;
    let mut event: Value = serde_json::from_str(&input).context("Failed to parse event JSON")?;
    if let Err(e) = mutate(&mut event, Local::now().time()) {
        warn!("passing event through unchanged: {:#}", e);
    }
    Ok(serde_json::to_string(&event)?)
}

fn main() {
    plugin::init_logging();
    match run() {
        Ok(out) => println!("{}", out),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn event(status: i64, rule: Value) -> Value {
        json!({
            "client": {"name": "db01"},
            "check": {"name": "check-vertica-cluster", "status": status, "change_status": rule},
            "occurrences": 1,
            "action": "create"
        })
    }

    #[test]
    fn time_formats() {
        assert_eq!(t("08:30"), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(t("23:59:59"), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        assert!(parse_time("half past eight").is_err());
    }

    #[test]
    fn daytime_window() {
        assert!(in_window(t("12:00"), t("08:00"), t("18:00")));
        assert!(!in_window(t("08:00"), t("08:00"), t("18:00")));
        assert!(!in_window(t("19:00"), t("08:00"), t("18:00")));
    }

    #[test]
    fn window_across_midnight() {
        assert!(in_window(t("23:00"), t("22:00"), t("06:00")));
        assert!(in_window(t("03:00"), t("22:00"), t("06:00")));
        assert!(!in_window(t("12:00"), t("22:00"), t("06:00")));
    }

    #[test]
    fn always_changes_status() {
        let mut e = event(2, json!({"status": 1, "always": true}));
        assert!(mutate(&mut e, t("12:00")).unwrap());
        assert_eq!(e["check"]["status"], 1);
        assert_eq!(e["mutated"], true);
    }

    #[test]
    fn outside_window_is_untouched() {
        let mut e = event(2, json!({"status": 1, "begin": "22:00", "end": "06:00"}));
        let orig = e.clone();
        assert!(!mutate(&mut e, t("12:00")).unwrap());
        assert_eq!(e, orig);
        assert!(mutate(&mut e, t("02:00")).unwrap());
        assert_eq!(e["check"]["status"], 1);
    }

    #[test]
    fn ok_events_and_events_without_rule_pass() {
        let mut e = event(0, json!({"status": 1, "always": true}));
        assert!(!mutate(&mut e, t("12:00")).unwrap());
        let mut e = json!({"check": {"name": "x", "status": 2}});
        assert!(!mutate(&mut e, t("12:00")).unwrap());
        assert_eq!(e, json!({"check": {"name": "x", "status": 2}}));
    }

    #[test]
    fn mark_without_status() {
        let mut e = event(2, json!({"always": true}));
        assert!(mutate(&mut e, t("12:00")).unwrap());
        assert_eq!(e["check"]["status"], 2);
        assert_eq!(e["mutated"], true);
    }

    #[test]
    fn key_order_is_preserved() {
        let input = r#"{"occurrences":1,"check":{"status":2,"name":"c","change_status":{"always":true,"status":1}},"client":{"name":"h"}}"#;
        let mut e: Value = serde_json::from_str(input).unwrap();
        mutate(&mut e, t("12:00")).unwrap();
        assert_eq!(
            serde_json::to_string(&e).unwrap(),
            r#"{"occurrences":1,"check":{"status":1,"name":"c","change_status":{"always":true,"status":1}},"client":{"name":"h"},"mutated":true}"#
        );
    }

    #[test]
    fn broken_rule() {
        let mut e = event(2, json!({"begin": "soon", "end": "later"}));
        assert!(mutate(&mut e, t("12:00")).is_err());
        let mut e = event(2, json!("always"));
        assert!(mutate(&mut e, t("12:00")).is_err());
    }
}
