//! Kronos — a bytecode interpreter for a small, indentation-sensitive,
//! verbose-English scripting language.
//!
//! Source text is compiled through a four-stage pipeline — lexer, parser,
//! bytecode compiler, stack VM — and executed on a reference-counted value
//! heap. Values are shared handles: cloning retains, dropping releases, and
//! containers are interior-mutable so every holder observes writes.
//!
//! # Quick start
//!
//! ```
//! use kronos::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let output = interp.capture("set x to 3 plus 4\nprint x").unwrap();
//! assert_eq!(output, vec!["7"]);
//! ```
//!
//! # The language
//!
//! ## Statements
//! - `set x to 1` / `let x to 1` (immutable) / `set x to 1 as number`
//! - `set xs at 0 to 5`, `delete m at "k"`, `print expr`
//! - `if … : … else: …`, `while … : …`, `for x in … : …`
//! - `function name with a, b: …` / `return expr`
//! - `try: … catch RuntimeError as e: … finally: … end`
//! - `throw "boom" as ValueError`
//! - `import "./util.kr" as util`
//!
//! ## Expressions
//! - `plus`, `minus`, `times`, `divided by`, `modulo`
//! - `is equal to`, `is not equal to`, `is greater than`, `is less than`,
//!   `is greater or equal to`, `is less or equal to`, `is of type "number"`
//! - `and`, `or`, `not`, unary `minus`
//! - `list 1, 2, 3`, `map`, `range 0 to 10 by 2`, `xs at i`
//! - `call fact with 6` or `fact(6)`; dotted calls reach modules and the
//!   `math.`/`regex.` namespaces
//!
//! ## Execution model
//! - Single-threaded stack VM with fixed limits on the operand stack, call
//!   depth, locals, globals, handlers, and modules.
//! - Imports run each module in an isolated VM; exports are reached through
//!   `module.name`. Import cycles are detected and rejected.
//! - Errors carry a kind (for the embedder) and an exception type name (for
//!   `catch` matching). The VM keeps the last error and can report each one
//!   through a callback.
//! - Reference cycles in containers are leaked, not collected.

mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod error;
mod lexer;
mod modules;
mod operators;
mod parser;
mod value;
mod vm;

pub use ast::{BinOp, CatchClause, Expr, Stmt, UnOp};
pub use bytecode::{Bytecode, Function, Op, TYPE_ANY};
pub use error::{Error, ErrorKind, ExcType, Result};
pub use lexer::{Token, TokenKind, tokenize};
pub use modules::{IMPORT_DEPTH_MAX, MODULES_MAX, ModuleRegistry};
pub use parser::parse;
pub use value::{Value, format_number};
pub use vm::{
    CALL_STACK_MAX, Cell, ErrorCallback, EXC_MAX, FUNCS_MAX, GLOBALS_MAX, LOCALS_MAX, STACK_MAX,
    Vm,
};

use std::path::Path;
use std::rc::Rc;

/// Compile source text into a bytecode unit (tokenize, parse, compile).
pub fn compile(source: &str) -> Result<Bytecode> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse(tokens)?;
    compiler::compile(&program)
}

/// Compile source text and render its disassembly.
pub fn disassemble(source: &str) -> Result<String> {
    Ok(compile(source)?.disassemble())
}

/// A persistent interpreter: one VM reused across `run` calls, so globals,
/// functions, and loaded modules accumulate — which is what a REPL wants.
pub struct Interpreter {
    vm: Vm,
}

impl Interpreter {
    pub fn new() -> Self {
        Self { vm: Vm::new() }
    }

    /// Compile and execute a source string.
    pub fn run(&mut self, source: &str) -> Result<()> {
        let bytecode = compile(source)?;
        self.vm.execute(Rc::new(bytecode))
    }

    /// Run a script file; relative imports resolve against its directory.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Cannot read '{}': {}", path.display(), e)))?;
        self.vm.set_current_file(path.to_path_buf());
        self.run(&source)
    }

    /// Compile and execute, returning everything the program printed.
    pub fn capture(&mut self, source: &str) -> Result<Vec<String>> {
        self.vm.take_output();
        self.run(source)?;
        Ok(self.vm.take_output())
    }

    /// Take and clear accumulated print output.
    pub fn take_output(&mut self) -> Vec<String> {
        self.vm.take_output()
    }

    /// The most recent execution error.
    pub fn last_error(&self) -> Option<&Error> {
        self.vm.last_error()
    }

    /// Register a callback fired once for every error the VM records.
    pub fn on_error(&mut self, callback: ErrorCallback) {
        self.vm.set_error_callback(callback);
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
