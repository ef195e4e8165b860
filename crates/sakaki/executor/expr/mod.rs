//! Compiled scalar expressions and their evaluator.
//!
//! Binary arithmetic follows the promotion matrix: the result kind is the
//! wider of the two operands (`int4 op int8 -> int8`, `int op decimal ->
//! decimal`, `decimal op float -> float8`, `float4 op float8 -> float8`).
//! An untyped NULL inherits the other operand's kind; any NULL operand
//! makes the result NULL. Integer/decimal division by zero and numeric
//! overflow are evaluation failures that abort the statement.

use rust_decimal::Decimal;
use sakaki_common::types::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compiled scalar expression over block variables.
#[derive(Debug, Clone)]
pub enum Expression {
    Constant(Value),
    /// Field index in the block variable table.
    Variable(usize),
    Binary { op: BinaryOp, left: Box<Expression>, right: Box<Expression> },
    Compare { op: CompareOp, left: Box<Expression>, right: Box<Expression> },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    IsNull(Box<Expression>),
}

impl Expression {
    pub fn variable(index: usize) -> Self {
        Expression::Variable(index)
    }

    pub fn constant(value: Value) -> Self {
        Expression::Constant(value)
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare { op, left: Box::new(left), right: Box::new(right) }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    #[error("division by zero")]
    DivideByZero,
    #[error("numeric value overflow")]
    NumericOverflow,
    #[error("operand types do not admit the operation")]
    TypeMismatch,
}

/// Source of block variable values during evaluation.
pub trait VariableSource {
    fn value(&self, index: usize) -> Value;
}

pub fn evaluate(expr: &Expression, vars: &dyn VariableSource) -> Result<Value, EvalError> {
    match expr {
        Expression::Constant(v) => Ok(v.clone()),
        Expression::Variable(index) => Ok(vars.value(*index)),
        Expression::Binary { op, left, right } => {
            let l = evaluate(left, vars)?;
            let r = evaluate(right, vars)?;
            apply_binary(*op, l, r)
        }
        Expression::Compare { op, left, right } => {
            let l = evaluate(left, vars)?;
            let r = evaluate(right, vars)?;
            apply_compare(*op, l, r)
        }
        Expression::And(left, right) => {
            // three-valued AND
            let l = evaluate(left, vars)?;
            if l == Value::Boolean(false) {
                return Ok(Value::Boolean(false));
            }
            let r = evaluate(right, vars)?;
            Ok(match (l, r) {
                (Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(a && b),
                (_, Value::Boolean(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        Expression::Or(left, right) => {
            let l = evaluate(left, vars)?;
            if l == Value::Boolean(true) {
                return Ok(Value::Boolean(true));
            }
            let r = evaluate(right, vars)?;
            Ok(match (l, r) {
                (Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(a || b),
                (_, Value::Boolean(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        Expression::Not(inner) => match evaluate(inner, vars)? {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Null => Ok(Value::Null),
            _ => Err(EvalError::TypeMismatch),
        },
        Expression::IsNull(inner) => Ok(Value::Boolean(evaluate(inner, vars)?.is_null())),
    }
}

/// Adds two values under the promotion matrix; used by the aggregate
/// machinery.
pub fn numeric_add(l: Value, r: Value) -> Result<Value, EvalError> {
    apply_binary(BinaryOp::Add, l, r)
}

/// Divides two values under the promotion matrix.
pub fn numeric_divide(l: Value, r: Value) -> Result<Value, EvalError> {
    apply_binary(BinaryOp::Divide, l, r)
}

/// Orders two comparable values under the promotion matrix.
pub fn compare_values(l: &Value, r: &Value) -> Result<Value, EvalError> {
    apply_compare(CompareOp::Lt, l.clone(), r.clone())
}

/// Common numeric kind of a promoted pair.
enum Promoted {
    Int4(i32, i32),
    Int8(i64, i64),
    Decimal(Decimal, Decimal),
    Float4(f32, f32),
    Float8(f64, f64),
}

fn promote(l: &Value, r: &Value) -> Result<Promoted, EvalError> {
    use Value::*;
    Ok(match (l, r) {
        (Int4(a), Int4(b)) => Promoted::Int4(*a, *b),
        (Int4(a), Int8(b)) => Promoted::Int8(i64::from(*a), *b),
        (Int8(a), Int4(b)) => Promoted::Int8(*a, i64::from(*b)),
        (Int8(a), Int8(b)) => Promoted::Int8(*a, *b),
        (Int4(a), Decimal(b)) => Promoted::Decimal(rust_decimal::Decimal::from(*a), *b),
        (Decimal(a), Int4(b)) => Promoted::Decimal(*a, rust_decimal::Decimal::from(*b)),
        (Int8(a), Decimal(b)) => Promoted::Decimal(rust_decimal::Decimal::from(*a), *b),
        (Decimal(a), Int8(b)) => Promoted::Decimal(*a, rust_decimal::Decimal::from(*b)),
        (Decimal(a), Decimal(b)) => Promoted::Decimal(*a, *b),
        (Decimal(a), Float4(b)) => {
            Promoted::Float8(decimal_to_f64(*a)?, f64::from(*b))
        }
        (Float4(a), Decimal(b)) => {
            Promoted::Float8(f64::from(*a), decimal_to_f64(*b)?)
        }
        (Decimal(a), Float8(b)) => Promoted::Float8(decimal_to_f64(*a)?, *b),
        (Float8(a), Decimal(b)) => Promoted::Float8(*a, decimal_to_f64(*b)?),
        (Float4(a), Float4(b)) => Promoted::Float4(*a, *b),
        (Float4(a), Float8(b)) => Promoted::Float8(f64::from(*a), *b),
        (Float8(a), Float4(b)) => Promoted::Float8(*a, f64::from(*b)),
        (Float8(a), Float8(b)) => Promoted::Float8(*a, *b),
        (Int4(a), Float4(b)) => Promoted::Float4(*a as f32, *b),
        (Float4(a), Int4(b)) => Promoted::Float4(*a, *b as f32),
        (Int4(a), Float8(b)) => Promoted::Float8(f64::from(*a), *b),
        (Float8(a), Int4(b)) => Promoted::Float8(*a, f64::from(*b)),
        (Int8(a), Float4(b)) => Promoted::Float8(*a as f64, f64::from(*b)),
        (Float4(a), Int8(b)) => Promoted::Float8(f64::from(*a), *b as f64),
        (Int8(a), Float8(b)) => Promoted::Float8(*a as f64, *b),
        (Float8(a), Int8(b)) => Promoted::Float8(*a, *b as f64),
        _ => return Err(EvalError::TypeMismatch),
    })
}

fn decimal_to_f64(d: Decimal) -> Result<f64, EvalError> {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().ok_or(EvalError::NumericOverflow)
}

fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match promote(&l, &r)? {
        Promoted::Int4(a, b) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => {
                    if b == 0 {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOp::Remainder => {
                    if b == 0 {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_rem(b)
                }
            };
            out.map(Value::Int4).ok_or(EvalError::NumericOverflow)
        }
        Promoted::Int8(a, b) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => {
                    if b == 0 {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOp::Remainder => {
                    if b == 0 {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_rem(b)
                }
            };
            out.map(Value::Int8).ok_or(EvalError::NumericOverflow)
        }
        Promoted::Decimal(a, b) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => {
                    if b.is_zero() {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOp::Remainder => {
                    if b.is_zero() {
                        return Err(EvalError::DivideByZero);
                    }
                    a.checked_rem(b)
                }
            };
            out.map(Value::Decimal).ok_or(EvalError::NumericOverflow)
        }
        Promoted::Float4(a, b) => Ok(Value::Float4(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Remainder => a % b,
        })),
        Promoted::Float8(a, b) => Ok(Value::Float8(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Remainder => a % b,
        })),
    }
}

fn apply_compare(op: CompareOp, l: Value, r: Value) -> Result<Value, EvalError> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let ordering = match (&l, &r) {
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::Character(a), Value::Character(b)) => a.cmp(b),
        (Value::Octet(a), Value::Octet(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::TimeOfDay(a), Value::TimeOfDay(b)) => a.cmp(b),
        (Value::TimePoint(a), Value::TimePoint(b)) => a.cmp(b),
        _ => match promote(&l, &r)? {
            Promoted::Int4(a, b) => a.cmp(&b),
            Promoted::Int8(a, b) => a.cmp(&b),
            Promoted::Decimal(a, b) => a.cmp(&b),
            Promoted::Float4(a, b) => a.total_cmp(&b),
            Promoted::Float8(a, b) => a.total_cmp(&b),
        },
    };
    let result = match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
    };
    Ok(Value::Boolean(result))
}
