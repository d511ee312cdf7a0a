// Interpolation Layer
// Deferred configuration values resolved against run state on demand

pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use eval::{EvalError, Evaluator};
pub use functions::BuiltinFunctions;
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, Reference, ReferencePart, UnaryOp};

use crate::data::Value;
use crate::state::PipelineState;

use std::marker::PhantomData;
use thiserror::Error;

/// A failed resolution, identifying the configuration key and the raw
/// source it came from.
#[derive(Debug, Clone, Error)]
#[error("failed to interpolate '{key}' from `{raw}`: {reason}")]
pub struct InterpolationError {
    pub key: String,
    pub raw: String,
    pub reason: String,
}

impl InterpolationError {
    fn new(key: &str, raw: &Value, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            raw: raw.as_string(),
            reason: reason.into(),
        }
    }
}

/// Coercion applied to an evaluated expression result when the
/// surrounding configuration declared an explicit target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Int,
    Bool,
    String,
    Object,
}

impl TargetType {
    /// Map a configuration tag to a target. Unknown tags are the caller's
    /// policy decision; step kinds generally fall back to `String`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "int" => Some(TargetType::Int),
            "bool" => Some(TargetType::Bool),
            "string" => Some(TargetType::String),
            "object" => Some(TargetType::Object),
            _ => None,
        }
    }

    fn apply(&self, value: Value) -> Result<Value, String> {
        match self {
            TargetType::Int => value
                .as_int()
                .map(Value::Int)
                .ok_or_else(|| format!("cannot coerce {} to integer", value.type_name())),
            TargetType::Bool => Ok(Value::Bool(value.is_truthy())),
            TargetType::String => Ok(Value::String(value.as_string())),
            TargetType::Object => match value {
                Value::Object(_) | Value::Array(_) => Ok(value),
                Value::String(s) => serde_json::from_str::<serde_json::Value>(&s)
                    .map(Value::from)
                    .map_err(|e| format!("cannot decode as json: {}", e)),
                other => Err(format!("cannot coerce {} to object", other.type_name())),
            },
        }
    }
}

/// Conversion from an evaluated datum into a concrete resolution target.
pub trait FromDatum: Sized {
    fn from_datum(value: Value) -> Result<Self, String>;
}

impl FromDatum for Value {
    fn from_datum(value: Value) -> Result<Self, String> {
        Ok(value)
    }
}

impl FromDatum for i64 {
    fn from_datum(value: Value) -> Result<Self, String> {
        value
            .as_int()
            .ok_or_else(|| format!("cannot coerce {} to integer", value.type_name()))
    }
}

impl FromDatum for f64 {
    fn from_datum(value: Value) -> Result<Self, String> {
        value
            .as_number()
            .ok_or_else(|| format!("cannot coerce {} to float", value.type_name()))
    }
}

impl FromDatum for bool {
    fn from_datum(value: Value) -> Result<Self, String> {
        Ok(value.is_truthy())
    }
}

impl FromDatum for String {
    fn from_datum(value: Value) -> Result<Self, String> {
        Ok(value.as_string())
    }
}

impl FromDatum for Vec<Value> {
    fn from_datum(value: Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => Ok(items),
            other => Err(format!("cannot coerce {} to array", other.type_name())),
        }
    }
}

/// A deferred configuration value.
///
/// String raws always flow through the expression environment so that
/// `ctx` references are honored; any other raw is a literal and resolves
/// without evaluation, so a literal of exactly the target type comes back
/// unchanged.
///
/// A string that does not parse as an expression, or whose root
/// identifier is not a binding, resolves to itself: `value: hello` means
/// the string "hello", while `value: ctx.a` reads from state.
#[derive(Debug)]
pub struct InterpolateValue<T: FromDatum> {
    key: String,
    raw: Value,
    target: Option<TargetType>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromDatum> Clone for InterpolateValue<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            raw: self.raw.clone(),
            target: self.target,
            _marker: PhantomData,
        }
    }
}

impl<T: FromDatum> InterpolateValue<T> {
    pub fn new(key: &str, raw: Value) -> Self {
        Self {
            key: key.to_string(),
            raw,
            target: None,
            _marker: PhantomData,
        }
    }

    pub fn with_target(key: &str, raw: Value, target: TargetType) -> Self {
        Self {
            key: key.to_string(),
            raw,
            target: Some(target),
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Resolve against a snapshot of the given state.
    pub fn resolve(&self, state: &PipelineState) -> Result<T, InterpolationError> {
        let value = match &self.raw {
            Value::String(source) => {
                let evaluated = self.evaluate(source, state)?;
                match self.target {
                    Some(target) => target
                        .apply(evaluated)
                        .map_err(|reason| InterpolationError::new(&self.key, &self.raw, reason))?,
                    None => evaluated,
                }
            }
            // Literal fast path: non-string raws never re-enter the
            // expression environment.
            other => other.clone(),
        };

        T::from_datum(value).map_err(|reason| InterpolationError::new(&self.key, &self.raw, reason))
    }

    fn evaluate(&self, source: &str, state: &PipelineState) -> Result<Value, InterpolationError> {
        let ast = match ExprParser::parse_str(source) {
            Ok(ast) => ast,
            // Not an expression at all: the raw string is the value.
            Err(_) => return Ok(Value::String(source.to_string())),
        };

        let ctx = state.context_projection();
        match Evaluator::new(&ctx).eval(&ast) {
            Ok(value) => Ok(value),
            Err(err) if err.unknown_root => Ok(Value::String(source.to_string())),
            Err(err) => Err(InterpolationError::new(&self.key, &self.raw, err.message)),
        }
    }
}
