//! Built-in functions.
//!
//! The VM consults this fixed registry before user functions, by exact
//! name. Dotted names in the `math.` and `regex.` namespaces are resolved
//! here as well; `math.NAME` aliases the bare math builtin of the same
//! name. Argument counts are fixed except for `min`/`max`, which are
//! variadic.
//!
//! I/O failures in the filesystem builtins are recoverable runtime errors,
//! so scripts can `catch RuntimeError` around them.

use crate::error::{Error, Result};
use crate::value::Value;

/// Outcome of a builtin lookup: either the registry owns the name (with the
/// call's result) or the VM should keep resolving.
pub enum BuiltinResult {
    Handled(Result<Value>),
    NotBuiltin,
}

/// Dispatch a call if `name` is a builtin.
pub fn try_builtin(name: &str, args: Vec<Value>) -> BuiltinResult {
    let bare = match name.split_once('.') {
        Some(("math", rest)) => rest,
        Some(("regex", rest)) => {
            return BuiltinResult::Handled(regex_builtin(rest, args));
        }
        Some(_) => return BuiltinResult::NotBuiltin,
        None => name,
    };

    let result = match bare {
        // Arithmetic helpers
        "add" => binary_numeric(bare, &args, |a, b| Ok(a + b)),
        "subtract" => binary_numeric(bare, &args, |a, b| Ok(a - b)),
        "multiply" => binary_numeric(bare, &args, |a, b| Ok(a * b)),
        "divide" => binary_numeric(bare, &args, |a, b| {
            if b == 0.0 {
                Err(Error::runtime("Cannot divide by zero"))
            } else {
                Ok(a / b)
            }
        }),

        // Math
        "sqrt" => unary_numeric(bare, &args, |x| {
            if x < 0.0 {
                Err(Error::value("sqrt expects a non-negative number"))
            } else {
                Ok(x.sqrt())
            }
        }),
        "power" => binary_numeric(bare, &args, |a, b| Ok(a.powf(b))),
        "abs" => unary_numeric(bare, &args, |x| Ok(x.abs())),
        "round" => unary_numeric(bare, &args, |x| Ok(x.round())),
        "floor" => unary_numeric(bare, &args, |x| Ok(x.floor())),
        "ceil" => unary_numeric(bare, &args, |x| Ok(x.ceil())),
        "rand" => {
            if args.is_empty() {
                Ok(Value::Number(rand::random::<f64>()))
            } else {
                Err(arity_error(bare, 0, args.len()))
            }
        }
        "min" => fold_numeric(bare, &args, f64::min),
        "max" => fold_numeric(bare, &args, f64::max),

        // Strings
        "uppercase" => unary_string(bare, &args, |s| Value::string(s.to_uppercase())),
        "lowercase" => unary_string(bare, &args, |s| Value::string(s.to_lowercase())),
        "trim" => unary_string(bare, &args, |s| Value::string(s.trim())),
        "split" => split(&args),
        "join" => join(&args),
        "contains" => binary_string(bare, &args, |s, sub| Value::Bool(s.contains(sub))),
        "starts_with" => binary_string(bare, &args, |s, p| Value::Bool(s.starts_with(p))),
        "ends_with" => binary_string(bare, &args, |s, p| Value::Bool(s.ends_with(p))),
        "replace" => replace(&args),
        "to_string" => match args.as_slice() {
            [value] => Ok(Value::string(value.to_print_string())),
            _ => Err(arity_error(bare, 1, args.len())),
        },
        "to_number" => to_number(&args),
        "to_bool" => to_bool(&args),

        // Collections
        "len" => match args.as_slice() {
            [value] => value.length().map(Value::Number),
            _ => Err(arity_error(bare, 1, args.len())),
        },
        "reverse" => reverse(&args),
        "sort" => sort(&args),

        // Type predicate (the compiler lowers `is of type` onto this).
        "is_type" => match args.as_slice() {
            [value, Value::Str(name)] => Ok(Value::Bool(value.is_type(name))),
            [_, other] => Err(Error::value(format!(
                "is_type expects a type name string, got {}",
                other.type_name()
            ))),
            _ => Err(arity_error(bare, 2, args.len())),
        },

        // Filesystem
        "read_file" => read_file(&args),
        "write_file" => write_file(&args),
        "read_lines" => read_lines(&args),
        "file_exists" => file_exists(&args),
        "list_files" => list_files(&args),
        "join_path" => join_path(&args),
        "dirname" => dirname(&args),
        "basename" => basename(&args),

        _ => return BuiltinResult::NotBuiltin,
    };
    BuiltinResult::Handled(result)
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arity_error(name: &str, expected: usize, got: usize) -> Error {
    Error::invalid_argument(format!(
        "{} expects {} argument{}, got {}",
        name,
        expected,
        if expected == 1 { "" } else { "s" },
        got
    ))
}

fn number_of(name: &str, value: &Value) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        Error::value(format!(
            "{} expects a number, got {}",
            name,
            value.type_name()
        ))
    })
}

fn string_of<'a>(name: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        Error::value(format!(
            "{} expects a string, got {}",
            name,
            value.type_name()
        ))
    })
}

fn unary_numeric(name: &str, args: &[Value], f: impl Fn(f64) -> Result<f64>) -> Result<Value> {
    match args {
        [value] => Ok(Value::Number(f(number_of(name, value)?)?)),
        _ => Err(arity_error(name, 1, args.len())),
    }
}

fn binary_numeric(
    name: &str,
    args: &[Value],
    f: impl Fn(f64, f64) -> Result<f64>,
) -> Result<Value> {
    match args {
        [a, b] => Ok(Value::Number(f(number_of(name, a)?, number_of(name, b)?)?)),
        _ => Err(arity_error(name, 2, args.len())),
    }
}

/// Variadic numeric fold for `min`/`max`; at least one argument.
fn fold_numeric(name: &str, args: &[Value], f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::invalid_argument(format!(
            "{} expects at least one argument",
            name
        )));
    }
    let mut acc = number_of(name, &args[0])?;
    for arg in &args[1..] {
        acc = f(acc, number_of(name, arg)?);
    }
    Ok(Value::Number(acc))
}

fn unary_string(name: &str, args: &[Value], f: impl Fn(&str) -> Value) -> Result<Value> {
    match args {
        [value] => Ok(f(string_of(name, value)?)),
        _ => Err(arity_error(name, 1, args.len())),
    }
}

fn binary_string(name: &str, args: &[Value], f: impl Fn(&str, &str) -> Value) -> Result<Value> {
    match args {
        [a, b] => Ok(f(string_of(name, a)?, string_of(name, b)?)),
        _ => Err(arity_error(name, 2, args.len())),
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

fn split(args: &[Value]) -> Result<Value> {
    match args {
        [s, delim] => {
            let s = string_of("split", s)?;
            let delim = string_of("split", delim)?;
            if delim.is_empty() {
                return Err(Error::invalid_argument("split delimiter cannot be empty"));
            }
            Ok(Value::list(
                s.split(delim).map(Value::string).collect(),
            ))
        }
        _ => Err(arity_error("split", 2, args.len())),
    }
}

fn join(args: &[Value]) -> Result<Value> {
    match args {
        [Value::List(items), delim] => {
            let delim = string_of("join", delim)?;
            let parts: Vec<String> = items
                .borrow()
                .iter()
                .map(|v| v.to_print_string())
                .collect();
            Ok(Value::string(parts.join(delim)))
        }
        [other, _] => Err(Error::value(format!(
            "join expects a list, got {}",
            other.type_name()
        ))),
        _ => Err(arity_error("join", 2, args.len())),
    }
}

fn replace(args: &[Value]) -> Result<Value> {
    match args {
        [s, old, new] => {
            let s = string_of("replace", s)?;
            let old = string_of("replace", old)?;
            let new = string_of("replace", new)?;
            if old.is_empty() {
                return Err(Error::invalid_argument(
                    "replace needs a nonempty search string",
                ));
            }
            Ok(Value::string(s.replace(old, new)))
        }
        _ => Err(arity_error("replace", 3, args.len())),
    }
}

fn to_number(args: &[Value]) -> Result<Value> {
    match args {
        [Value::Number(n)] => Ok(Value::Number(*n)),
        [Value::Str(s)] => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| Error::value(format!("Cannot convert \"{}\" to a number", s))),
        [Value::Bool(b)] => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        [other] => Err(Error::value(format!(
            "Cannot convert {} to a number",
            other.type_name()
        ))),
        _ => Err(arity_error("to_number", 1, args.len())),
    }
}

fn to_bool(args: &[Value]) -> Result<Value> {
    match args {
        // The literal spellings convert exactly; everything else is
        // truthiness.
        [Value::Str(s)] if s.as_ref() == "true" => Ok(Value::Bool(true)),
        [Value::Str(s)] if s.as_ref() == "false" => Ok(Value::Bool(false)),
        [value] => Ok(Value::Bool(value.is_truthy())),
        _ => Err(arity_error("to_bool", 1, args.len())),
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

fn reverse(args: &[Value]) -> Result<Value> {
    match args {
        [Value::List(items)] => {
            let mut reversed: Vec<Value> = items.borrow().clone();
            reversed.reverse();
            Ok(Value::list(reversed))
        }
        [Value::Str(s)] => Ok(Value::string(s.chars().rev().collect::<String>())),
        [other] => Err(Error::value(format!(
            "reverse expects a list or string, got {}",
            other.type_name()
        ))),
        _ => Err(arity_error("reverse", 1, args.len())),
    }
}

/// Stable sort of a homogeneous list of numbers or strings. Returns a new
/// list; the argument is untouched.
fn sort(args: &[Value]) -> Result<Value> {
    let [Value::List(items)] = args else {
        return match args {
            [other] => Err(Error::value(format!(
                "sort expects a list, got {}",
                other.type_name()
            ))),
            _ => Err(arity_error("sort", 1, args.len())),
        };
    };
    let mut sorted: Vec<Value> = items.borrow().clone();
    if sorted.is_empty() {
        return Ok(Value::list(sorted));
    }

    let all_numbers = sorted.iter().all(|v| matches!(v, Value::Number(_)));
    let all_strings = sorted.iter().all(|v| matches!(v, Value::Str(_)));
    if all_numbers {
        sorted.sort_by(|a, b| {
            a.as_number()
                .unwrap()
                .total_cmp(&b.as_number().unwrap())
        });
    } else if all_strings {
        sorted.sort_by(|a, b| a.as_str().unwrap().cmp(b.as_str().unwrap()));
    } else {
        return Err(Error::value(
            "sort expects a list of all numbers or all strings",
        ));
    }
    Ok(Value::list(sorted))
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

fn path_arg<'a>(name: &str, args: &'a [Value], expected: usize) -> Result<&'a str> {
    if args.len() != expected {
        return Err(arity_error(name, expected, args.len()));
    }
    string_of(name, &args[0])
}

fn read_file(args: &[Value]) -> Result<Value> {
    let path = path_arg("read_file", args, 1)?;
    std::fs::read_to_string(path)
        .map(Value::string)
        .map_err(|e| Error::runtime(format!("Cannot read file '{}': {}", path, e)))
}

fn write_file(args: &[Value]) -> Result<Value> {
    let path = path_arg("write_file", args, 2)?;
    let content = args[1].to_print_string();
    std::fs::write(path, content)
        .map(|_| Value::Nil)
        .map_err(|e| Error::runtime(format!("Cannot write file '{}': {}", path, e)))
}

fn read_lines(args: &[Value]) -> Result<Value> {
    let path = path_arg("read_lines", args, 1)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::runtime(format!("Cannot read file '{}': {}", path, e)))?;
    Ok(Value::list(content.lines().map(Value::string).collect()))
}

fn file_exists(args: &[Value]) -> Result<Value> {
    let path = path_arg("file_exists", args, 1)?;
    Ok(Value::Bool(std::path::Path::new(path).exists()))
}

fn list_files(args: &[Value]) -> Result<Value> {
    let dir = path_arg("list_files", args, 1)?;
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::runtime(format!("Cannot list directory '{}': {}", dir, e)))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::runtime(format!("Cannot list directory '{}': {}", dir, e)))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::string).collect()))
}

fn join_path(args: &[Value]) -> Result<Value> {
    match args {
        [a, b] => {
            let a = string_of("join_path", a)?;
            let b = string_of("join_path", b)?;
            let joined = std::path::Path::new(a).join(b);
            Ok(Value::string(joined.to_string_lossy()))
        }
        _ => Err(arity_error("join_path", 2, args.len())),
    }
}

fn dirname(args: &[Value]) -> Result<Value> {
    let path = path_arg("dirname", args, 1)?;
    let parent = std::path::Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Value::string(parent))
}

fn basename(args: &[Value]) -> Result<Value> {
    let path = path_arg("basename", args, 1)?;
    let name = std::path::Path::new(path)
        .file_name()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Value::string(name))
}

// ---------------------------------------------------------------------------
// Regex namespace
// ---------------------------------------------------------------------------

fn regex_builtin(name: &str, args: Vec<Value>) -> Result<Value> {
    let full = match name {
        "match" => "regex.match",
        "search" => "regex.search",
        "findall" => "regex.findall",
        _ => {
            return Err(Error::not_found(format!(
                "Function 'regex.{}' not found",
                name
            )));
        }
    };
    let [subject, pattern] = args.as_slice() else {
        return Err(arity_error(full, 2, args.len()));
    };
    let subject = string_of(full, subject)?;
    let pattern = string_of(full, pattern)?;

    let compiled = regex::Regex::new(pattern)
        .map_err(|e| Error::runtime(format!("Invalid regular expression: {}", e)))?;

    Ok(match name {
        // `match` is anchored at the start of the subject.
        "match" => Value::Bool(
            compiled
                .find(subject)
                .is_some_and(|m| m.start() == 0),
        ),
        "search" => compiled
            .find(subject)
            .map(|m| Value::string(m.as_str()))
            .unwrap_or(Value::Nil),
        _ => Value::list(
            compiled
                .find_iter(subject)
                .map(|m| Value::string(m.as_str()))
                .collect(),
        ),
    })
}
