// Expression Helpers
// The small table of functions callable from configuration expressions

use crate::data::Value;
use crate::interpolate::eval::EvalError;

/// Built-in helper functions for expressions.
///
/// The expression environment is sandboxed: helpers are pure, touch no
/// I/O, and this table is the only way to extend it.
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name {
            "toJson" => self.to_json(args),
            "length" => self.length(args),
            "contains" => self.contains(args),
            "coalesce" => Ok(self.coalesce(args)),
            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    /// toJson(v) - serialize any value to its JSON text
    fn to_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let [value] = Self::arity::<1>("toJson", args)?;
        let json = serde_json::to_string(&value)
            .map_err(|e| EvalError::new(format!("toJson failed: {}", e)))?;
        Ok(Value::String(json))
    }

    /// length(v) - element count for arrays/objects, char count for strings
    fn length(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let [value] = Self::arity::<1>("length", args)?;
        let len = match &value {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            other => {
                return Err(EvalError::new(format!(
                    "length expects a string, array or object, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(Value::Int(len as i64))
    }

    /// contains(haystack, needle) - substring or array membership test
    fn contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let [haystack, needle] = Self::arity::<2>("contains", args)?;
        let found = match &haystack {
            Value::String(s) => s.contains(&needle.as_string()),
            Value::Array(items) => items.contains(&needle),
            Value::Object(map) => map.contains_key(&needle.as_string()),
            other => {
                return Err(EvalError::new(format!(
                    "contains expects a string, array or object, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(Value::Bool(found))
    }

    /// coalesce(a, b, ...) - first non-null argument, else null
    fn coalesce(&self, args: Vec<Value>) -> Value {
        args.into_iter()
            .find(|v| !matches!(v, Value::Null))
            .unwrap_or(Value::Null)
    }

    fn arity<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
        let got = args.len();
        args.try_into()
            .map_err(|_| EvalError::new(format!("{} expects {} argument(s), got {}", name, N, got)))
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json() {
        let functions = BuiltinFunctions::new();
        let result = functions
            .call("toJson", vec![Value::Array(vec![Value::Int(1)])])
            .unwrap();
        assert_eq!(result, Value::String("[1]".to_string()));
    }

    #[test]
    fn test_length() {
        let functions = BuiltinFunctions::new();
        assert_eq!(
            functions
                .call("length", vec![Value::String("abc".into())])
                .unwrap(),
            Value::Int(3)
        );
        assert!(functions.call("length", vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_contains() {
        let functions = BuiltinFunctions::new();
        assert_eq!(
            functions
                .call(
                    "contains",
                    vec![Value::String("pipeline".into()), Value::String("line".into())]
                )
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_coalesce() {
        let functions = BuiltinFunctions::new();
        assert_eq!(
            functions
                .call("coalesce", vec![Value::Null, Value::Int(2), Value::Int(3)])
                .unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_unknown_function() {
        let functions = BuiltinFunctions::new();
        assert!(functions.call("readFile", vec![]).is_err());
    }
}
