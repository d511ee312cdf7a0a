// Expression Evaluator
// Tree-walking evaluation of parsed expressions against the ctx binding

use crate::data::Value;
use crate::interpolate::functions::BuiltinFunctions;
use crate::interpolate::parser::{BinaryOp, Expr, ExprParser, Reference, ReferencePart, UnaryOp};

use std::collections::HashMap;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
    /// True when the expression's root identifier is not a known binding.
    /// Resolution treats such expressions as plain literal strings.
    pub unknown_root: bool,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unknown_root: false,
        }
    }

    pub fn unknown_root(name: &str) -> Self {
        Self {
            message: format!("'{}' is not defined", name),
            unknown_root: true,
        }
    }
}

/// Expression evaluator.
///
/// The only predeclared root binding is `ctx`; everything else an
/// expression can reach comes from the helper function table.
pub struct Evaluator<'a> {
    ctx: &'a Value,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a Value) -> Self {
        Self {
            ctx,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Parse and evaluate an expression source string.
    pub fn eval_str(source: &str, ctx: &Value) -> Result<Value, EvalError> {
        let ast = ExprParser::parse_str(source)
            .map_err(|e| EvalError::new(format!("parse error: {}", e)))?;
        Evaluator::new(ctx).eval(&ast)
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(n) => Ok(Value::Float(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Reference(reference) => self.eval_reference(reference),

            Expr::FunctionCall { name, args } => self.eval_function(name, args),

            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                self.eval_index(&obj, &idx)
            }

            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                self.eval_member(&obj, property)
            }

            Expr::Unary { op, expr } => {
                let val = self.eval(expr)?;
                self.eval_unary(*op, &val)
            }

            Expr::Binary { op, left, right } => {
                // Short-circuit evaluation for && and ||
                match op {
                    BinaryOp::And => {
                        let left_val = self.eval(left)?;
                        if !left_val.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                        let right_val = self.eval(right)?;
                        Ok(Value::Bool(right_val.is_truthy()))
                    }
                    BinaryOp::Or => {
                        let left_val = self.eval(left)?;
                        if left_val.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                        let right_val = self.eval(right)?;
                        Ok(Value::Bool(right_val.is_truthy()))
                    }
                    _ => {
                        let left_val = self.eval(left)?;
                        let right_val = self.eval(right)?;
                        self.eval_binary(*op, &left_val, &right_val)
                    }
                }
            }

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let cond = self.eval(condition)?;
                if cond.is_truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }

            Expr::Array(items) => {
                let values: Result<Vec<Value>, EvalError> =
                    items.iter().map(|e| self.eval(e)).collect();
                Ok(Value::Array(values?))
            }

            Expr::Object(pairs) => {
                let mut map = HashMap::new();
                for (key, value_expr) in pairs {
                    map.insert(key.clone(), self.eval(value_expr)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn eval_reference(&self, reference: &Reference) -> Result<Value, EvalError> {
        let mut current: Option<Value> = None;

        for (i, part) in reference.parts.iter().enumerate() {
            match part {
                ReferencePart::Property(name) => {
                    if i == 0 {
                        current = Some(self.lookup_root(name)?);
                    } else {
                        let obj = current.ok_or_else(|| EvalError::new("invalid reference"))?;
                        current = Some(self.eval_member(&obj, name)?);
                    }
                }
                ReferencePart::Index(index_expr) => {
                    let obj = current.ok_or_else(|| EvalError::new("invalid index access"))?;
                    let index = self.eval(index_expr)?;
                    current = Some(self.eval_index(&obj, &index)?);
                }
            }
        }

        current.ok_or_else(|| EvalError::new("empty reference"))
    }

    fn lookup_root(&self, name: &str) -> Result<Value, EvalError> {
        if name == "ctx" {
            Ok(self.ctx.clone())
        } else {
            Err(EvalError::unknown_root(name))
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        let evaluated: Result<Vec<Value>, EvalError> = args.iter().map(|a| self.eval(a)).collect();
        self.functions.call(name, evaluated?)
    }

    fn eval_index(&self, object: &Value, index: &Value) -> Result<Value, EvalError> {
        match (object, index) {
            (Value::Array(arr), Value::Int(n)) => {
                let i = *n as usize;
                arr.get(i)
                    .cloned()
                    .ok_or_else(|| EvalError::new(format!("array index {} out of bounds", i)))
            }
            (Value::Object(map), Value::String(key)) => {
                Ok(map.get(key).cloned().unwrap_or(Value::Null))
            }
            (Value::String(s), Value::Int(n)) => {
                let i = *n as usize;
                s.chars()
                    .nth(i)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| EvalError::new(format!("string index {} out of bounds", i)))
            }
            _ => Err(EvalError::new(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))),
        }
    }

    fn eval_member(&self, object: &Value, property: &str) -> Result<Value, EvalError> {
        match object {
            Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
            Value::Array(arr) if property == "length" => Ok(Value::Int(arr.len() as i64)),
            Value::String(s) if property == "length" => Ok(Value::Int(s.chars().count() as i64)),
            _ => Err(EvalError::new(format!(
                "cannot access property '{}' on {}",
                property,
                object.type_name()
            ))),
        }
    }

    fn eval_unary(&self, op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            UnaryOp::Neg => match value {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(n) => Ok(Value::Float(-n)),
                _ => Err(EvalError::new("cannot negate non-number")),
            },
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Add => self.eval_add(left, right),
            BinaryOp::Sub => self.eval_numeric_op(left, right, |a, b| a - b, |a, b| a - b),
            BinaryOp::Mul => self.eval_numeric_op(left, right, |a, b| a * b, |a, b| a * b),
            BinaryOp::Mod => self.eval_numeric_op(left, right, |a, b| a % b, |a, b| a % b),
            // Division always produces a float
            BinaryOp::Div => {
                let (a, b) = self.numeric_operands(left, right)?;
                Ok(Value::Float(a / b))
            }

            BinaryOp::Eq => Ok(Value::Bool(self.values_equal(left, right))),
            BinaryOp::Ne => Ok(Value::Bool(!self.values_equal(left, right))),
            BinaryOp::Lt => self.eval_comparison(left, right, |a, b| a < b),
            BinaryOp::Le => self.eval_comparison(left, right, |a, b| a <= b),
            BinaryOp::Gt => self.eval_comparison(left, right, |a, b| a > b),
            BinaryOp::Ge => self.eval_comparison(left, right, |a, b| a >= b),

            // Logical operators short-circuit in eval()
            BinaryOp::And | BinaryOp::Or => Err(EvalError::new("unexpected logical operator")),
        }
    }

    fn eval_add(&self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b.as_string()))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a.as_string(), b))),
            _ => {
                let (a, b) = self.numeric_operands(left, right)?;
                Ok(Value::Float(a + b))
            }
        }
    }

    fn eval_numeric_op<FI, FF>(
        &self,
        left: &Value,
        right: &Value,
        int_op: FI,
        float_op: FF,
    ) -> Result<Value, EvalError>
    where
        FI: FnOnce(i64, i64) -> i64,
        FF: FnOnce(f64, f64) -> f64,
    {
        if let (Value::Int(a), Value::Int(b)) = (left, right) {
            return Ok(Value::Int(int_op(*a, *b)));
        }
        let (a, b) = self.numeric_operands(left, right)?;
        Ok(Value::Float(float_op(a, b)))
    }

    fn numeric_operands(&self, left: &Value, right: &Value) -> Result<(f64, f64), EvalError> {
        let a = left
            .as_number()
            .ok_or_else(|| EvalError::new("left operand is not a number"))?;
        let b = right
            .as_number()
            .ok_or_else(|| EvalError::new("right operand is not a number"))?;
        Ok((a, b))
    }

    fn eval_comparison<F>(&self, left: &Value, right: &Value, op: F) -> Result<Value, EvalError>
    where
        F: FnOnce(f64, f64) -> bool,
    {
        let (a, b) = self.numeric_operands(left, right)?;
        Ok(Value::Bool(op(a, b)))
    }

    fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            // Numbers compare across int/float, and coerce from strings
            _ => match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            },
        }
    }
}
