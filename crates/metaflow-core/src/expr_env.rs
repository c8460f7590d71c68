//! Builds the standard `{record, old, action}` evaluation environment
//! shared by the Rule Engine (§4.2) and State-Machine Engine (§4.3), so
//! both evaluate expression/guard strings against the same shape.

use metaflow_expr::Value;
use serde_json::Value as JsonValue;

use crate::store::Record;

pub fn record_to_value(record: &Record) -> Value {
    let jv = JsonValue::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    Value::from(jv)
}

pub fn build_env(record: &Record, old: Option<&Record>, action: &str) -> Value {
    let old_value = match old {
        Some(o) => record_to_value(o),
        None => Value::Null,
    };
    metaflow_expr::env_from(vec![
        ("record", record_to_value(record)),
        ("old", old_value),
        ("action", Value::String(action.to_string())),
    ])
}
