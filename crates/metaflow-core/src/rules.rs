//! Rule Engine (§4.2): `evaluate(entity, hook, fields, old, isCreate) ->
//! errors[]`, mutating `fields` in place for computed rules.

use metaflow_domain::{FieldOperator, Rule, RuleKind};
use serde_json::Value as JsonValue;

use crate::errors::ValidationDetail;
use crate::expr_env::build_env;
use crate::store::Record;

/// Evaluates every active rule for one hook against `fields`, mutating
/// `fields` for computed rules. Ordering within a phase: priority, then
/// insertion order (`sequence`) — deterministic per §4.2.
pub fn evaluate(
    rules: &[Rule],
    fields: &mut Record,
    old: Option<&Record>,
    is_create: bool,
) -> Vec<ValidationDetail> {
    let action = if is_create { "create" } else { "update" };
    let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.active).collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.sequence.cmp(&b.sequence)));

    let mut errors = Vec::new();

    let mut stop = false;
    for rule in ordered.iter().filter(|r| r.kind == RuleKind::Field) {
        if stop {
            break;
        }
        if let Some(detail) = eval_field_rule(rule, fields) {
            if rule.definition.stop_on_fail {
                stop = true;
            }
            errors.push(detail);
        }
    }

    let mut stop = false;
    for rule in ordered.iter().filter(|r| r.kind == RuleKind::Expression) {
        if stop {
            break;
        }
        match eval_expression_rule(rule, fields, old, action) {
            Ok(Some(detail)) => {
                if rule.definition.stop_on_fail {
                    stop = true;
                }
                errors.push(detail);
            }
            Ok(None) => {}
            Err(detail) => errors.push(detail),
        }
    }

    // Computed rules run only if no prior phase produced an error; an
    // individual computed rule's own failure doesn't stop the others.
    if errors.is_empty() {
        for rule in ordered.iter().filter(|r| r.kind == RuleKind::Computed) {
            if let Err(detail) = eval_computed_rule(rule, fields, old, action) {
                errors.push(detail);
            }
        }
    }

    errors
}

fn json_as_number(v: &JsonValue) -> Option<f64> {
    match v {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn operator_name(op: FieldOperator) -> &'static str {
    match op {
        FieldOperator::Min => "min",
        FieldOperator::Max => "max",
        FieldOperator::MinLength => "min_length",
        FieldOperator::MaxLength => "max_length",
        FieldOperator::Pattern => "pattern",
    }
}

/// Field rules operate on `fields[field]`. Absent/null values are skipped
/// (required-ness belongs to the field validator, §4.4, not here);
/// non-numeric values under a numeric operator skip silently rather than
/// erroring.
fn eval_field_rule(rule: &Rule, fields: &Record) -> Option<ValidationDetail> {
    let def = &rule.definition;
    let field_name = def.field.as_deref()?;
    let value = fields.get(field_name)?;
    if value.is_null() {
        return None;
    }
    let operator = def.operator?;

    let violated = match operator {
        FieldOperator::Min => {
            let n = json_as_number(value)?;
            let threshold = def.value.as_ref().and_then(json_as_number)?;
            n < threshold
        }
        FieldOperator::Max => {
            let n = json_as_number(value)?;
            let threshold = def.value.as_ref().and_then(json_as_number)?;
            n > threshold
        }
        FieldOperator::MinLength => {
            let s = value.as_str()?;
            let threshold = def.value.as_ref().and_then(json_as_number)? as usize;
            s.chars().count() < threshold
        }
        FieldOperator::MaxLength => {
            let s = value.as_str()?;
            let threshold = def.value.as_ref().and_then(json_as_number)? as usize;
            s.chars().count() > threshold
        }
        FieldOperator::Pattern => {
            let s = value.as_str()?;
            match rule.compiled_pattern() {
                Ok(re) => !re.is_match(s),
                Err(e) => {
                    return Some(ValidationDetail {
                        field: Some(field_name.to_string()),
                        rule: Some("pattern".to_string()),
                        message: format!("invalid pattern: {e}"),
                    })
                }
            }
        }
    };

    if violated {
        Some(ValidationDetail {
            field: Some(field_name.to_string()),
            rule: Some(operator_name(operator).to_string()),
            message: def.message.clone(),
        })
    } else {
        None
    }
}

/// Expression rules: `true` means violated.
fn eval_expression_rule(
    rule: &Rule,
    fields: &Record,
    old: Option<&Record>,
    action: &str,
) -> Result<Option<ValidationDetail>, ValidationDetail> {
    let env = build_env(fields, old, action);
    let compiled = rule.compiled_expression().map_err(|e| ValidationDetail {
        field: None,
        rule: Some("expression".to_string()),
        message: format!("expression compile error: {e}"),
    })?;
    match compiled.eval_bool(&env) {
        Ok(true) => Ok(Some(ValidationDetail {
            field: None,
            rule: Some("expression".to_string()),
            message: rule.definition.message.clone(),
        })),
        Ok(false) => Ok(None),
        Err(e) => Err(ValidationDetail {
            field: None,
            rule: Some("expression".to_string()),
            message: format!("expression evaluation error: {e}"),
        }),
    }
}

fn eval_computed_rule(
    rule: &Rule,
    fields: &mut Record,
    old: Option<&Record>,
    action: &str,
) -> Result<(), ValidationDetail> {
    let target = rule.definition.field.clone().ok_or_else(|| ValidationDetail {
        field: None,
        rule: Some("computed".to_string()),
        message: "computed rule missing target field".to_string(),
    })?;
    let env = build_env(fields, old, action);
    let compiled = rule.compiled_expression().map_err(|e| ValidationDetail {
        field: Some(target.clone()),
        rule: Some("computed".to_string()),
        message: format!("expression compile error: {e}"),
    })?;
    let result = compiled.eval(&env).map_err(|e| ValidationDetail {
        field: Some(target.clone()),
        rule: Some("computed".to_string()),
        message: format!("expression evaluation error: {e}"),
    })?;
    fields.insert(target, result.into());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaflow_domain::RuleDefinition;

    fn make_rule(kind: RuleKind, def: RuleDefinition, priority: i32, sequence: u64) -> Rule {
        serde_json::from_value(serde_json::json!({
            "id": "r1",
            "entity": "invoices",
            "hook": "before_write",
            "kind": match kind { RuleKind::Field => "field", RuleKind::Expression => "expression", RuleKind::Computed => "computed" },
            "definition": def,
            "priority": priority,
            "active": true,
            "sequence": sequence,
        }))
        .unwrap()
    }

    #[test]
    fn field_rule_min_violation() {
        let rule = make_rule(
            RuleKind::Field,
            RuleDefinition {
                field: Some("total".into()),
                operator: Some(FieldOperator::Min),
                value: Some(serde_json::json!(0)),
                pattern: None,
                expression: None,
                message: "total must be >= 0".into(),
                stop_on_fail: false,
            },
            0,
            0,
        );
        let mut fields: Record = Record::new();
        fields.insert("total".into(), serde_json::json!(-1));
        let errors = evaluate(&[rule], &mut fields, None, true);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("total"));
    }

    #[test]
    fn field_rule_skips_absent_value() {
        let rule = make_rule(
            RuleKind::Field,
            RuleDefinition {
                field: Some("total".into()),
                operator: Some(FieldOperator::Min),
                value: Some(serde_json::json!(0)),
                pattern: None,
                expression: None,
                message: "total must be >= 0".into(),
                stop_on_fail: false,
            },
            0,
            0,
        );
        let mut fields: Record = Record::new();
        let errors = evaluate(&[rule], &mut fields, None, true);
        assert!(errors.is_empty());
    }

    #[test]
    fn computed_rule_assigns_field() {
        let rule = make_rule(
            RuleKind::Computed,
            RuleDefinition {
                field: Some("total".into()),
                operator: None,
                value: None,
                pattern: None,
                expression: Some("record.subtotal * (1 + record.tax_rate)".into()),
                message: String::new(),
                stop_on_fail: false,
            },
            0,
            0,
        );
        let mut fields: Record = Record::new();
        fields.insert("subtotal".into(), serde_json::json!(100.0));
        fields.insert("tax_rate".into(), serde_json::json!(0.1));
        let errors = evaluate(&[rule], &mut fields, None, true);
        assert!(errors.is_empty());
        let total = fields.get("total").unwrap().as_f64().unwrap();
        assert!((total - 110.0).abs() < 1e-9);
    }

    #[test]
    fn computed_rule_skipped_after_prior_error() {
        let field_rule = make_rule(
            RuleKind::Field,
            RuleDefinition {
                field: Some("total".into()),
                operator: Some(FieldOperator::Min),
                value: Some(serde_json::json!(0)),
                pattern: None,
                expression: None,
                message: "bad".into(),
                stop_on_fail: false,
            },
            0,
            0,
        );
        let computed_rule = make_rule(
            RuleKind::Computed,
            RuleDefinition {
                field: Some("derived".into()),
                operator: None,
                value: None,
                pattern: None,
                expression: Some("1 + 1".into()),
                message: String::new(),
                stop_on_fail: false,
            },
            0,
            1,
        );
        let mut fields: Record = Record::new();
        fields.insert("total".into(), serde_json::json!(-5));
        let errors = evaluate(&[field_rule, computed_rule], &mut fields, None, true);
        assert_eq!(errors.len(), 1);
        assert!(!fields.contains_key("derived"));
    }
}
