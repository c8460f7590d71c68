use std::collections::BTreeMap;

/// Runtime value the evaluator operates on. Deliberately small: no
/// functions, no references, nothing that could reach outside the
/// environment it was constructed from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Walks a dotted path (`"a.b.c"`) against this value. Any missing key
    /// or non-object intermediate yields `Value::Null` rather than an
    /// error; distinct from an evaluator error, per design note.
    pub fn get_path(&self, path: &str) -> Value {
        let mut cur = self;
        let owned;
        for segment in path.split('.') {
            match cur {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => cur = v,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            }
        }
        owned = cur.clone();
        owned
    }
}

/// Walks a dotted path against a value, exposed as a free function so
/// callers outside this crate (workflow context resolution) can reuse the
/// same "missing key yields null" semantics without constructing a
/// [`Value`] wrapper type themselves.
pub fn resolve_path(root: &Value, path: &str) -> Value {
    root.get_path(path)
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Builds an object-shaped [`Value`] environment from `(name, value)`
/// pairs, the shape every component in this repo passes to the evaluator.
pub fn env_from(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}
