//! Write Planner (§4.4): splits a request body into own fields vs
//! relation (child) writes, validates field shapes, and produces a pure
//! `WritePlan` data structure consumed by the write pipeline.

use metaflow_domain::{EntityDescriptor, RelationDescriptor};
use serde_json::Value as JsonValue;

use crate::errors::{EngineError, ValidationDetail};
use crate::store::{Record, UserRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Diff,
    Replace,
    Append,
}

#[derive(Debug, Clone)]
pub struct ChildOp {
    pub relation_name: String,
    pub mode: WriteMode,
    pub data: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct WritePlan {
    pub is_create: bool,
    pub entity: String,
    pub fields: Record,
    pub id: Option<String>,
    pub child_ops: Vec<ChildOp>,
    pub user: Option<UserRef>,
}

/// `relations` must already be filtered to relations whose `source_entity`
/// matches `entity.name` — the registry's job, out of scope here.
pub fn plan(
    entity: &EntityDescriptor,
    relations: &[RelationDescriptor],
    body: &serde_json::Map<String, JsonValue>,
    existing_id: Option<String>,
    user: Option<UserRef>,
) -> Result<WritePlan, EngineError> {
    let is_create = existing_id.is_none();
    let mut fields = Record::new();
    let mut child_ops = Vec::new();
    let mut unknown_key = None;

    for (key, value) in body {
        if let Some(field) = entity.field(key) {
            fields.insert(field.name.clone(), value.clone());
        } else if let Some(relation) = relations.iter().find(|r| &r.name == key) {
            child_ops.push(parse_child_op(relation, value));
        } else if unknown_key.is_none() {
            unknown_key = Some(key.clone());
        }
    }

    if let Some(key) = unknown_key {
        return Err(EngineError::single_validation(
            Some(&key),
            "unknown_key",
            format!("unknown key '{key}'"),
        ));
    }

    // §3: a field's `default` applies when the client omits it on create;
    // an update leaves an absent field untouched rather than resetting it.
    if is_create {
        for f in &entity.fields {
            if !fields.contains_key(&f.name) {
                if let Some(default) = &f.default {
                    fields.insert(f.name.clone(), default.clone());
                }
            }
        }
    }

    let mut errors = Vec::new();
    for f in &entity.fields {
        if f.name == entity.primary_key {
            continue;
        }
        if is_create && f.required && !f.nullable && is_empty(fields.get(&f.name)) {
            errors.push(ValidationDetail {
                field: Some(f.name.clone()),
                rule: Some("required".to_string()),
                message: format!("{} is required", f.name),
            });
            continue;
        }
        if let (Some(allowed), Some(JsonValue::String(s))) = (&f.enum_values, fields.get(&f.name)) {
            if !allowed.iter().any(|a| a == s) {
                errors.push(ValidationDetail {
                    field: Some(f.name.clone()),
                    rule: Some("enum".to_string()),
                    message: format!("{} must be one of {:?}", f.name, allowed),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(EngineError::validation(errors));
    }

    Ok(WritePlan {
        is_create,
        entity: entity.name.clone(),
        fields,
        id: existing_id,
        child_ops,
        user,
    })
}

fn is_empty(value: Option<&JsonValue>) -> bool {
    match value {
        None => true,
        Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn parse_child_op(relation: &RelationDescriptor, value: &JsonValue) -> ChildOp {
    let mode = value
        .get("mode")
        .and_then(JsonValue::as_str)
        .map(|s| match s {
            "replace" => WriteMode::Replace,
            "append" => WriteMode::Append,
            _ => WriteMode::Diff,
        })
        .unwrap_or(WriteMode::Diff);
    let data = value
        .get("data")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| row.as_object().map(|o| o.clone().into_iter().collect::<Record>()))
        .collect();
    ChildOp {
        relation_name: relation.name.clone(),
        mode,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaflow_domain::{AutoFillPolicy, FieldDescriptor, FieldType, PkGeneration};

    fn entity() -> EntityDescriptor {
        EntityDescriptor {
            name: "invoices".into(),
            table_name: "invoices".into(),
            primary_key: "id".into(),
            pk_generation: PkGeneration::Database,
            fields: vec![
                FieldDescriptor {
                    name: "id".into(),
                    field_type: FieldType::String,
                    required: false,
                    nullable: true,
                    enum_values: None,
                    default: None,
                    auto_fill: AutoFillPolicy::None,
                },
                FieldDescriptor {
                    name: "name".into(),
                    field_type: FieldType::String,
                    required: true,
                    nullable: false,
                    enum_values: None,
                    default: None,
                    auto_fill: AutoFillPolicy::None,
                },
            ],
            soft_delete: false,
        }
    }

    #[test]
    fn unknown_key_is_fatal() {
        let e = entity();
        let body: serde_json::Map<String, JsonValue> = serde_json::from_value(serde_json::json!({
            "name": "x", "bogus": 1
        }))
        .unwrap();
        let result = plan(&e, &[], &body, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_on_create_is_fatal() {
        let e = entity();
        let body: serde_json::Map<String, JsonValue> =
            serde_json::from_value(serde_json::json!({})).unwrap();
        let result = plan(&e, &[], &body, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn required_field_not_enforced_on_update() {
        let e = entity();
        let body: serde_json::Map<String, JsonValue> =
            serde_json::from_value(serde_json::json!({})).unwrap();
        let result = plan(&e, &[], &body, Some("abc".into()), None);
        assert!(result.is_ok());
    }

    #[test]
    fn default_fills_absent_field_on_create_only() {
        let mut e = entity();
        e.fields.push(FieldDescriptor {
            name: "status".into(),
            field_type: FieldType::String,
            required: false,
            nullable: true,
            enum_values: None,
            default: Some(serde_json::json!("draft")),
            auto_fill: AutoFillPolicy::None,
        });

        let body: serde_json::Map<String, JsonValue> =
            serde_json::from_value(serde_json::json!({ "name": "x" })).unwrap();
        let created = plan(&e, &[], &body, None, None).unwrap();
        assert_eq!(created.fields.get("status"), Some(&serde_json::json!("draft")));

        let update_body: serde_json::Map<String, JsonValue> =
            serde_json::from_value(serde_json::json!({ "name": "y" })).unwrap();
        let updated = plan(&e, &[], &update_body, Some("abc".into()), None).unwrap();
        assert!(!updated.fields.contains_key("status"));
    }
}
