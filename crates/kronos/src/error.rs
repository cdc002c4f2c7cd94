//! Error taxonomy shared by the whole pipeline.
//!
//! Errors carry two orthogonal pieces of information:
//!
//! - an [`ErrorKind`] for the embedder (which stage failed, and whether it is
//!   a lookup miss, an I/O failure, a user-level runtime fault, or a bug in
//!   the bytecode itself), and
//! - an [`ExcType`] for the language's `try`/`catch` matching, which compares
//!   against the type name written in a `catch` clause.
//!
//! The VM stores the most recent error and optionally reports each new one
//! through a user callback; see [`crate::vm::Vm::set_error_callback`].

use thiserror::Error;

/// A specialized `Result` for interpreter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification for programmatic dispatch by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A built-in was called with an argument it cannot accept.
    InvalidArgument,
    /// A variable, function, or module lookup missed.
    NotFound,
    /// The filesystem failed underneath a module load.
    Io,
    /// The lexer rejected the source text.
    Tokenize,
    /// The parser rejected the token stream.
    Parse,
    /// The compiler could not translate the AST.
    Compile,
    /// A recoverable fault during execution.
    Runtime,
    /// Malformed bytecode or a broken VM invariant.
    Internal,
}

/// Exception type name used by `catch` clause matching.
///
/// Built-in conditions map onto the fixed set of names; `throw ... as Foo`
/// produces a [`ExcType::User`] with whatever name the script supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcType {
    Runtime,
    Syntax,
    Compile,
    Name,
    Value,
    Internal,
    User(String),
}

impl ExcType {
    /// The name a `catch` clause must spell to match this type.
    pub fn name(&self) -> &str {
        match self {
            ExcType::Runtime => "RuntimeError",
            ExcType::Syntax => "SyntaxError",
            ExcType::Compile => "CompileError",
            ExcType::Name => "NameError",
            ExcType::Value => "ValueError",
            ExcType::Internal => "InternalError",
            ExcType::User(name) => name,
        }
    }

    /// Map a type name back to its variant, folding the built-in names onto
    /// their fixed cases and everything else onto [`ExcType::User`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "RuntimeError" => ExcType::Runtime,
            "SyntaxError" => ExcType::Syntax,
            "CompileError" => ExcType::Compile,
            "NameError" => ExcType::Name,
            "ValueError" => ExcType::Value,
            "InternalError" => ExcType::Internal,
            other => ExcType::User(other.to_string()),
        }
    }
}

impl std::fmt::Display for ExcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A structured interpreter error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{exc_type}: {message}")]
pub struct Error {
    /// Which stage failed, and how.
    pub kind: ErrorKind,
    /// The name `catch` clauses match against.
    pub exc_type: ExcType,
    /// Human-readable description.
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            kind,
            exc_type,
            message: message.into(),
        }
    }

    /// A recoverable runtime fault (stack overflow, bad operand, bounds).
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, ExcType::Runtime, message)
    }

    /// A wrong-operand-type or wrong-value fault.
    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, ExcType::Value, message)
    }

    /// A missing variable, function, or module.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, ExcType::Name, message)
    }

    /// A built-in rejected its arguments.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, ExcType::Value, message)
    }

    /// A filesystem failure during module loading.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, ExcType::Runtime, message)
    }

    pub fn tokenize(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tokenize, ExcType::Syntax, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, ExcType::Syntax, message)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, ExcType::Compile, message)
    }

    /// Malformed bytecode, a bad constant index, or a broken VM invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, ExcType::Internal, message)
    }

    /// A script-level `throw`, carrying whatever type name the script chose.
    pub fn thrown(type_name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, ExcType::from_name(type_name), message)
    }

    /// Whether a `catch` clause declaring `type_name` would catch this error.
    pub fn matches_catch(&self, type_name: &str) -> bool {
        self.exc_type.name() == type_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_type_and_message() {
        let err = Error::runtime("Cannot divide by zero");
        assert_eq!(err.to_string(), "RuntimeError: Cannot divide by zero");

        let err = Error::not_found("Variable 'x' not found");
        assert_eq!(err.to_string(), "NameError: Variable 'x' not found");
    }

    #[test]
    fn user_types_round_trip() {
        let t = ExcType::from_name("DatabaseError");
        assert_eq!(t, ExcType::User("DatabaseError".to_string()));
        assert_eq!(t.name(), "DatabaseError");
        assert_eq!(ExcType::from_name("ValueError"), ExcType::Value);
    }

    #[test]
    fn catch_matching() {
        let err = Error::thrown("DatabaseError", "connection lost");
        assert!(err.matches_catch("DatabaseError"));
        assert!(!err.matches_catch("RuntimeError"));
    }
}
