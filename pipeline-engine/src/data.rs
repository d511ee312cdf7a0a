// Runtime Data Model
// Tagged values produced by steps and the named-output bags that carry them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The reserved output name for a step's unnamed result.
pub const DEFAULT_OUTPUT: &str = "default";

/// A single runtime value flowing between steps.
///
/// Integers and floats are kept distinct so that numeric step outputs
/// round-trip through state without loss.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    /// Truthiness used by boolean coercion and the expression evaluator.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Numeric view of the value, parsing strings when possible.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::String(s) => s.parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view of the value. Floats truncate, strings parse.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) => Some(*n as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::String(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
            _ => None,
        }
    }

    /// String rendering. Null is empty; arrays and objects render as JSON.
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Name of the runtime tag, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::Number(n.into()),
            Value::Float(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A step's named outputs. Returned exactly once per run, then immutable.
pub type OutputBag = HashMap<String, Value>;

/// Bag with a single entry under the reserved `default` key.
pub fn default_output(value: Value) -> OutputBag {
    let mut bag = OutputBag::new();
    bag.insert(DEFAULT_OUTPUT.to_string(), value);
    bag
}

/// Bag with a single entry under an explicit output name.
pub fn single_output(name: &str, value: Value) -> OutputBag {
    let mut bag = OutputBag::new();
    bag.insert(name.to_string(), value);
    bag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(7).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
    }

    #[test]
    fn test_as_string_renders_json_for_structured() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.as_string(), "[1,2]");
        assert_eq!(Value::Null.as_string(), "");
    }

    #[test]
    fn test_json_round_trip_preserves_integers() {
        let json: serde_json::Value = serde_json::from_str(r#"{"n": 3, "f": 1.5}"#).unwrap();
        let v = Value::from(json);
        if let Value::Object(map) = &v {
            assert_eq!(map["n"], Value::Int(3));
            assert_eq!(map["f"], Value::Float(1.5));
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Int(42));
        let v: Value = serde_json::from_str("[1, \"two\"]").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Int(1), Value::String("two".into())])
        );
    }

    #[test]
    fn test_default_output_bag() {
        let bag = default_output(Value::Int(1));
        assert_eq!(bag.get(DEFAULT_OUTPUT), Some(&Value::Int(1)));
    }
}
