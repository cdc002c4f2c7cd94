//! Runtime values and their shared-handle lifecycle.
//!
//! A [`Value`] is a tagged variant. Scalars (`Nil`, `Bool`, `Number`,
//! `Range`) are inline; strings, lists, and maps are heap payloads behind
//! reference-counted handles. Cloning a `Value` is the retain operation,
//! dropping it is the release; the payload is freed when the last handle
//! goes away. Lists and maps are interior-mutable, so every handle observes
//! mutation — the mutation boundary is wherever a handle was cloned.
//!
//! Reference cycles (a list containing itself) are a known limitation of
//! pure reference counting and are leaked rather than collected.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// A runtime value.
///
/// Maps keep insertion order and are represented as a pair vector; `set`
/// overwrites in place, `delete` removes, and equality is elementwise in
/// insertion order.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Range { start: f64, end: f64, step: f64 },
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// A new list taking ownership of `items`. Append growth beyond the
    /// initial capacity doubles.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        Value::Map(Rc::new(RefCell::new(pairs)))
    }

    /// A range value. Rejects a zero step, which would never terminate.
    pub fn range(start: f64, end: f64, step: f64) -> Result<Self> {
        if step == 0.0 {
            return Err(Error::value("Range step cannot be zero"));
        }
        Ok(Value::Range { start, end, step })
    }

    // -----------------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------------

    /// Language-level truthiness, used by conditional jumps, logical
    /// operators, and loop tests.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Map(pairs) => !pairs.borrow().is_empty(),
            Value::Range { .. } => true,
        }
    }

    /// The type name used by `is of type` and by error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Range { .. } => "range",
        }
    }

    /// The `is of type NAME` predicate.
    pub fn is_type(&self, name: &str) -> bool {
        self.type_name() == name
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Container helpers
    // -----------------------------------------------------------------------

    /// Element count for `len`: list length, string character count, or the
    /// number of values a range iteration produces.
    pub fn length(&self) -> Result<f64> {
        match self {
            Value::List(items) => Ok(items.borrow().len() as f64),
            Value::Str(s) => Ok(s.chars().count() as f64),
            Value::Range { start, end, step } => {
                let span = (end - start) / step;
                Ok(if span > 0.0 { span.ceil() } else { 0.0 })
            }
            other => Err(Error::value(format!(
                "len expects a list, string, or range, got {}",
                other.type_name()
            ))),
        }
    }

    /// Borrowed map lookup; `None` on a miss.
    pub fn map_get(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Map(pairs) => pairs
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Formatting
    // -----------------------------------------------------------------------

    /// The bare form used by `print` and string concatenation: strings are
    /// unquoted, everything else is the repr form.
    pub fn to_print_string(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.to_repr_string(),
        }
    }

    /// The quoted form used inside containers and by the disassembler.
    pub fn to_repr_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => format!("\"{}\"", s),
            Value::List(items) => {
                let parts: Vec<String> =
                    items.borrow().iter().map(|v| v.to_repr_string()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(pairs) => {
                let parts: Vec<String> = pairs
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_repr_string(), v.to_repr_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Range { start, end, step } => {
                if *step == 1.0 {
                    format!("{}..{}", format_number(*start), format_number(*end))
                } else {
                    format!(
                        "{}..{} by {}",
                        format_number(*start),
                        format_number(*end),
                        format_number(*step)
                    )
                }
            }
        }
    }
}

/// Format a number: integral values below 10^15 in magnitude print with no
/// fractional part, everything else uses the shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_print_string())
    }
}

impl PartialEq for Value {
    /// Structural equality: scalars, strings, and ranges by value; lists and
    /// maps elementwise in insertion order.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                *a.borrow() == *b.borrow()
            }
            (Value::Map(a), Value::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                *a.borrow() == *b.borrow()
            }
            (
                Value::Range { start, end, step },
                Value::Range {
                    start: s2,
                    end: e2,
                    step: st2,
                },
            ) => start == s2 && end == e2 && step == st2,
            _ => false,
        }
    }
}
