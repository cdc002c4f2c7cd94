//! Arithmetic, comparison, and logical operators.
//!
//! Stateless helpers used by the VM's dispatch loop. Addition is overloaded:
//! two numbers add numerically, any other combination converts each operand
//! to its printable string form and concatenates (left then right). Every
//! other arithmetic operator requires two numbers. Division and modulo by
//! zero are recoverable runtime errors, not silent NaN.

use crate::bytecode::Op;
use crate::error::{Error, Result};
use crate::value::Value;

/// Apply a binary arithmetic or logical opcode.
pub fn apply_binop(op: Op, left: &Value, right: &Value) -> Result<Value> {
    match op {
        Op::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            _ => {
                let mut s = left.to_print_string();
                s.push_str(&right.to_print_string());
                Ok(Value::string(s))
            }
        },
        Op::Sub => numeric_binop(op, left, right, |a, b| Ok(a - b)),
        Op::Mul => numeric_binop(op, left, right, |a, b| Ok(a * b)),
        Op::Div => numeric_binop(op, left, right, |a, b| {
            if b == 0.0 {
                Err(Error::runtime("Cannot divide by zero"))
            } else {
                Ok(a / b)
            }
        }),
        Op::Mod => numeric_binop(op, left, right, |a, b| {
            if b == 0.0 {
                Err(Error::runtime("Cannot take modulo by zero"))
            } else {
                Ok(a % b)
            }
        }),
        Op::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        Op::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        _ => Err(Error::internal(format!(
            "{} is not a binary operator",
            op.mnemonic()
        ))),
    }
}

/// Apply a comparison opcode, producing a boolean.
///
/// Equality is structural and never fails. Ordering works on two numbers or
/// two strings (lexicographic); anything else is a type error.
pub fn apply_cmpop(op: Op, left: &Value, right: &Value) -> Result<bool> {
    match op {
        Op::Eq => Ok(left == right),
        Op::Neq => Ok(left != right),
        Op::Gt | Op::Lt | Op::Gte | Op::Lte => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => {
                    return Err(Error::value(format!(
                        "Cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    )));
                }
            };
            let Some(ordering) = ordering else {
                // NaN compares false against everything.
                return Ok(false);
            };
            Ok(match op {
                Op::Gt => ordering.is_gt(),
                Op::Lt => ordering.is_lt(),
                Op::Gte => ordering.is_ge(),
                _ => ordering.is_le(),
            })
        }
        _ => Err(Error::internal(format!(
            "{} is not a comparison operator",
            op.mnemonic()
        ))),
    }
}

fn numeric_binop<F>(op: Op, left: &Value, right: &Value, f: F) -> Result<Value>
where
    F: Fn(f64, f64) -> Result<f64>,
{
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b)?)),
        _ => Err(Error::value(format!(
            "{} expects two numbers, got {} and {}",
            op.mnemonic(),
            left.type_name(),
            right.type_name()
        ))),
    }
}
