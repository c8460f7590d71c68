//! `buildPayload`, `resolveHeaders` and `evaluateCondition` (§4.7) — the
//! pure, side-effect-free pieces of the dispatcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use metaflow_core::{Record, UserRef};
use metaflow_domain::WebhookDescriptor;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::WebhooksError;

fn changes(record: &Record, old: Option<&Record>) -> JsonValue {
    let Some(old) = old else {
        return JsonValue::Null;
    };
    let mut out = serde_json::Map::new();
    for (key, new_value) in record {
        let old_value = old.get(key).cloned().unwrap_or(JsonValue::Null);
        if &old_value != new_value {
            out.insert(key.clone(), json!({ "old": old_value, "new": new_value }));
        }
    }
    JsonValue::Object(out)
}

/// Builds the JSON payload sent to the remote endpoint. The idempotency
/// key is generated here, once, and carried unchanged through retries by
/// the caller (the retry scheduler re-sends the stored body verbatim).
pub fn build_payload(
    hook: metaflow_domain::Hook,
    entity: &str,
    action: &str,
    record: &Record,
    old: Option<&Record>,
    user: Option<&UserRef>,
    now: DateTime<Utc>,
) -> JsonValue {
    let mut payload = serde_json::Map::new();
    payload.insert("event".into(), json!(format!("{entity}.{action}")));
    payload.insert("entity".into(), json!(entity));
    payload.insert("action".into(), json!(action));
    payload.insert("record".into(), JsonValue::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));
    if let Some(old) = old {
        payload.insert(
            "old".into(),
            JsonValue::Object(old.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
        payload.insert("changes".into(), changes(record, Some(old)));
    }
    if let Some(user) = user {
        payload.insert("user".into(), json!({ "id": user.id, "roles": user.roles }));
    }
    payload.insert("timestamp".into(), json!(now.to_rfc3339()));
    payload.insert("idempotency_key".into(), json!(format!("wh_{}", Uuid::new_v4())));
    let _ = hook;
    JsonValue::Object(payload)
}

/// Substitutes every `{{env.NAME}}` occurrence with the current process
/// environment value, or the empty string if unset.
pub fn resolve_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_template(v)))
        .collect()
}

fn resolve_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{env.") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after = &rest[start + "{{env.".len()..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            break;
        };
        let name = &after[..end];
        out.push_str(&std::env::var(name).unwrap_or_default());
        rest = &after[end + "}}".len()..];
    }
    out
}

/// Empty condition is always true. Evaluator errors propagate (§4.7).
pub fn evaluate_condition(webhook: &WebhookDescriptor, payload: &JsonValue) -> Result<bool, WebhooksError> {
    if webhook.condition.as_deref().unwrap_or("").trim().is_empty() {
        return Ok(true);
    }
    let Some(result) = webhook.compiled_condition() else {
        return Ok(true);
    };
    let compiled = result.map_err(|e| WebhooksError::ConditionCompile(e.to_string()))?;
    let env = metaflow_expr::Value::from(payload.clone());
    compiled
        .eval_bool(&env)
        .map_err(|e| WebhooksError::ConditionEval(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitution_replaces_known_vars() {
        std::env::set_var("METAFLOW_TEST_TOKEN", "secret123");
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer {{env.METAFLOW_TEST_TOKEN}}".to_string());
        let resolved = resolve_headers(&headers);
        assert_eq!(resolved.get("Authorization").unwrap(), "Bearer secret123");
    }

    #[test]
    fn template_substitution_empty_string_for_unset_var() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Missing".to_string(), "{{env.METAFLOW_DEFINITELY_UNSET}}".to_string());
        let resolved = resolve_headers(&headers);
        assert_eq!(resolved.get("X-Missing").unwrap(), "");
    }

    #[test]
    fn changes_diffs_only_differing_keys() {
        let mut record = Record::new();
        record.insert("status".into(), json!("sent"));
        record.insert("total".into(), json!(10));
        let mut old = Record::new();
        old.insert("status".into(), json!("draft"));
        old.insert("total".into(), json!(10));
        let diff = changes(&record, Some(&old));
        assert!(diff.get("status").is_some());
        assert!(diff.get("total").is_none());
    }
}
