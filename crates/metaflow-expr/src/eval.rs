use crate::ast::{BinOp, Expr, UnOp};
use crate::error::EvalError;
use crate::value::Value;

pub(crate) fn eval(expr: &Expr, env: &Value) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => Ok(resolve(env, segments)),
        Expr::Unary(op, inner) => eval_unary(op, eval(inner, env)?),
        Expr::Binary(op, l, r) => eval_binary(op, eval(l, env)?, eval(r, env)?),
    }
}

fn resolve(env: &Value, segments: &[String]) -> Value {
    let mut cur = env;
    for segment in segments {
        match cur {
            Value::Object(map) => match map.get(segment) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    cur.clone()
}

fn eval_unary(op: &UnOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!v.truthy())),
        UnOp::Neg => match v.as_number() {
            Some(n) => Ok(Value::Number(-n)),
            None => Err(EvalError::TypeMismatch { op: "-" }),
        },
    }
}

fn eval_binary(op: &BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::And => Ok(Value::Bool(l.truthy() && r.truthy())),
        BinOp::Or => Ok(Value::Bool(l.truthy() || r.truthy())),
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Add => arith(l, r, "+", |a, b| a + b, Some(string_concat)),
        BinOp::Sub => arith(l, r, "-", |a, b| a - b, None),
        BinOp::Mul => arith(l, r, "*", |a, b| a * b, None),
        BinOp::Div => {
            let (a, b) = numeric_pair(&l, &r, "/")?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Number(a / b))
        }
        BinOp::Lt => compare(l, r, |o| o.is_lt()),
        BinOp::LtEq => compare(l, r, |o| o.is_le()),
        BinOp::Gt => compare(l, r, |o| o.is_gt()),
        BinOp::GtEq => compare(l, r, |o| o.is_ge()),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        // A numeric string vs. number compares by numeric value, matching
        // the rule engine's "numeric comparisons coerce strings" contract.
        (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
            matches!((l.as_number(), r.as_number()), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}

fn numeric_pair(l: &Value, r: &Value, op: &'static str) -> Result<(f64, f64), EvalError> {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::TypeMismatch { op }),
    }
}

fn string_concat(l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(Value::String(format!("{}{}", a, b))),
        _ => None,
    }
}

fn arith(
    l: Value,
    r: Value,
    op: &'static str,
    f: impl Fn(f64, f64) -> f64,
    fallback: Option<fn(&Value, &Value) -> Option<Value>>,
) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
        return Ok(Value::Number(f(a, b)));
    }
    if let Some(fb) = fallback {
        if let Some(v) = fb(&l, &r) {
            return Ok(v);
        }
    }
    Err(EvalError::TypeMismatch { op })
}

fn compare(l: Value, r: Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, EvalError> {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(ord) => Ok(Value::Bool(pred(ord))),
            None => Ok(Value::Bool(false)),
        },
        _ => match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => Ok(Value::Bool(pred(a.cmp(b)))),
            _ => Err(EvalError::TypeMismatch { op: "comparison" }),
        },
    }
}
