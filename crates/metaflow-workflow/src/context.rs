//! Context construction and resolution (§4.9, design note): dotted
//! segments walked against successively nested maps; any missing key or
//! non-object intermediate yields `null` rather than an error, distinct
//! from an evaluator failure.

use std::collections::BTreeMap;

use metaflow_core::Record;
use regex::Regex;
use serde_json::{json, Value as JsonValue};

use crate::error::WorkflowError;

/// Walks `path` (dot-separated) against `root`. Missing keys and
/// non-object intermediates resolve to `Value::Null`.
pub fn resolve_dot_path(root: &JsonValue, path: &str) -> JsonValue {
    let mut cur = root;
    for segment in path.split('.') {
        match cur.get(segment) {
            Some(v) => cur = v,
            None => return JsonValue::Null,
        }
    }
    cur.clone()
}

/// Builds a new instance's context: each `mapping` entry resolves its
/// dot-path against `{trigger: {record_id, record}}`.
pub fn build_trigger_context(
    mapping: &BTreeMap<String, String>,
    record_id: &str,
    record: &Record,
) -> JsonValue {
    let root = json!({
        "trigger": {
            "record_id": record_id,
            "record": JsonValue::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        }
    });

    let mut out = serde_json::Map::new();
    for (key, path) in mapping {
        out.insert(key.clone(), resolve_dot_path(&root, path));
    }
    JsonValue::Object(out)
}

/// Parses the timeout duration grammar `\d+[hms]` (§3 Approval Step, §4.10).
pub fn parse_duration(raw: &str) -> Result<chrono::Duration, WorkflowError> {
    let re = Regex::new(r"^(\d+)([hms])$").expect("static regex");
    let caps = re
        .captures(raw.trim())
        .ok_or_else(|| WorkflowError::InvalidDuration(raw.to_string()))?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| WorkflowError::InvalidDuration(raw.to_string()))?;
    let duration = match &caps[2] {
        "h" => chrono::Duration::hours(amount),
        "m" => chrono::Duration::minutes(amount),
        "s" => chrono::Duration::seconds(amount),
        _ => unreachable!("regex only matches h|m|s"),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_dot_path_missing_key_yields_null() {
        let root = json!({"a": {"b": 1}});
        assert_eq!(resolve_dot_path(&root, "a.c"), JsonValue::Null);
        assert_eq!(resolve_dot_path(&root, "a.b.c"), JsonValue::Null);
        assert_eq!(resolve_dot_path(&root, "a.b"), json!(1));
    }

    #[test]
    fn build_trigger_context_resolves_record_and_record_id() {
        let mut mapping = BTreeMap::new();
        mapping.insert("amount".to_string(), "trigger.record.total".to_string());
        mapping.insert("id".to_string(), "trigger.record_id".to_string());
        let mut record = Record::new();
        record.insert("total".into(), json!(500));
        let ctx = build_trigger_context(&mapping, "rec-1", &record);
        assert_eq!(ctx.get("amount"), Some(&json!(500)));
        assert_eq!(ctx.get("id"), Some(&json!("rec-1")));
    }

    #[test]
    fn parse_duration_grammar() {
        assert_eq!(parse_duration("2h").unwrap(), chrono::Duration::hours(2));
        assert_eq!(parse_duration("30m").unwrap(), chrono::Duration::minutes(30));
        assert_eq!(parse_duration("45s").unwrap(), chrono::Duration::seconds(45));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5d").is_err());
    }
}
