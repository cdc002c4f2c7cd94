//! Stack-based bytecode virtual machine.
//!
//! This module executes [`Bytecode`] units produced by the compiler. It
//! uses a fetch-decode-execute loop over the flat byte stream. All runtime
//! state — the operand stack, call frames, variable cells, exception
//! handlers, and the last-error record — lives here.
//!
//! The VM is the **only** module that mutates runtime state; the compiler
//! is pure translation and `operators`/`builtins` are stateless helpers.
//! Every push retains a value handle and every pop transfers it to the
//! handler that popped it, so normal Rust ownership keeps retain/release
//! balanced on both success and error paths.
//!
//! A VM is single-threaded by contract: no opcode suspends, and module
//! imports run the child VM to completion before the next instruction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::trace;

use crate::builtins::{BuiltinResult, try_builtin};
use crate::bytecode::{Bytecode, Function, Op, TYPE_ANY};
use crate::error::{Error, Result};
use crate::modules::{self, ModuleRegistry};
use crate::operators::{apply_binop, apply_cmpop};
use crate::value::Value;

/// Operand stack capacity.
pub const STACK_MAX: usize = 256;
/// Call-frame stack capacity.
pub const CALL_STACK_MAX: usize = 64;
/// Local variable cells per frame.
pub const LOCALS_MAX: usize = 128;
/// Global variable cells per VM.
pub const GLOBALS_MAX: usize = 512;
/// Registered functions per VM.
pub const FUNCS_MAX: usize = 256;
/// Active exception handlers per VM.
pub const EXC_MAX: usize = 32;

/// Callback invoked once for every error the VM records.
pub type ErrorCallback = Box<dyn FnMut(&Error)>;

/// A variable cell: the owned value plus its binding rules.
///
/// Reassignment is rejected when the cell is immutable, and when the cell
/// carries a type tag the new value must satisfy the predicate. The tag and
/// mutability of an existing cell survive reassignment.
#[derive(Debug, Clone)]
pub struct Cell {
    pub value: Value,
    pub mutable: bool,
    pub type_tag: Option<String>,
}

/// An activation record. `return_ip`/`return_code` are `None` for a
/// detached (module-call) frame: returning from one exits `execute` and
/// leaves the return value on the stack for the loader to lift out.
struct Frame {
    name: String,
    return_ip: Option<usize>,
    return_code: Option<Rc<Bytecode>>,
    locals: HashMap<String, Cell>,
}

/// An exception handler record pushed by `TRY_ENTER`.
///
/// Captures enough state to tear the VM back to the `try` site: the frame
/// depth and operand-stack depth at entry, plus the unit the handler's
/// `CATCH` lives in.
struct Handler {
    handler_ip: usize,
    frame_depth: usize,
    stack_depth: usize,
    code: Rc<Bytecode>,
}

enum Flow {
    Continue,
    /// `HALT`, or a return from a detached frame.
    Exit,
}

/// The virtual machine.
///
/// A `Vm` persists across `execute` calls: globals, functions, and loaded
/// modules survive, which is what a REPL leans on. Each imported module
/// runs in its own isolated `Vm` that shares the root's module registry.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: HashMap<String, Cell>,
    functions: HashMap<String, Rc<Function>>,
    handlers: Vec<Handler>,
    /// The unit currently executing.
    code: Rc<Bytecode>,
    ip: usize,
    /// Most recent error; cleared by a matching `CATCH`.
    last_error: Option<Error>,
    error_callback: Option<ErrorCallback>,
    /// Module registry shared by every VM in this tree; also carries the
    /// print buffer so module code prints where the root does.
    pub(crate) registry: Rc<ModuleRegistry>,
    /// Source path of the unit, for resolving `./` imports.
    pub(crate) current_file: Option<PathBuf>,
}

impl Vm {
    /// A fresh root VM with the built-in globals installed.
    pub fn new() -> Self {
        Self::with_registry(Rc::new(ModuleRegistry::new()))
    }

    /// A VM sharing an existing registry; used for module isolation.
    pub(crate) fn with_registry(registry: Rc<ModuleRegistry>) -> Self {
        let mut globals = HashMap::new();
        globals.insert(
            "Pi".to_string(),
            Cell {
                value: Value::Number(std::f64::consts::PI),
                mutable: false,
                type_tag: Some("number".to_string()),
            },
        );
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            functions: HashMap::new(),
            handlers: Vec::new(),
            code: Rc::new(Bytecode::new()),
            ip: 0,
            last_error: None,
            error_callback: None,
            registry,
            current_file: None,
        }
    }

    /// The most recent error, if any instruction has failed since the last
    /// `CATCH` cleared it.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Register a callback fired once per recorded error. It does not fire
    /// when a `CATCH` clears the error.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    /// Set the file path used to resolve relative imports.
    pub fn set_current_file(&mut self, path: PathBuf) {
        self.current_file = Some(path);
    }

    /// Take and clear everything printed so far (shared across the module
    /// tree).
    pub fn take_output(&mut self) -> Vec<String> {
        self.registry.take_output()
    }

    pub(crate) fn function(&self, name: &str) -> Option<Rc<Function>> {
        self.functions.get(name).cloned()
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(|cell| cell.value.clone())
    }

    // -----------------------------------------------------------------------
    // Execution loop
    // -----------------------------------------------------------------------

    /// Execute a bytecode unit to completion.
    ///
    /// On an unhandled error the frames, handlers, and operand stack are
    /// torn down so the VM is reusable, and the error (also available via
    /// [`Vm::last_error`]) is returned.
    pub fn execute(&mut self, code: Rc<Bytecode>) -> Result<()> {
        self.code = code;
        self.ip = 0;
        self.run()
    }

    fn run(&mut self) -> Result<()> {
        loop {
            // Falling off the end of a unit is an implicit halt at the top
            // level and an implicit `return nil` inside a frame.
            if self.ip >= self.code.code.len() {
                if self.frames.is_empty() {
                    return Ok(());
                }
                match self.return_value(Value::Nil) {
                    Ok(Flow::Continue) => continue,
                    Ok(Flow::Exit) => return Ok(()),
                    Err(err) => {
                        if !self.fail(&err)? {
                            return Err(err);
                        }
                        continue;
                    }
                }
            }

            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return Ok(()),
                Err(err) => {
                    if !self.fail(&err)? {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Record an error and divert to the innermost matching handler.
    /// Returns `false` when no handler caught it; the VM is then torn down.
    fn fail(&mut self, err: &Error) -> Result<bool> {
        self.last_error = Some(err.clone());
        if let Some(callback) = &mut self.error_callback {
            callback(err);
        }
        if self.unwind(err)? {
            return Ok(true);
        }
        self.frames.clear();
        self.handlers.clear();
        self.stack.clear();
        Ok(false)
    }

    /// Fetch, decode, and execute one instruction.
    fn step(&mut self) -> Result<Flow> {
        let byte = self.code.code[self.ip];
        self.ip += 1;
        let op = Op::try_from(byte).map_err(|_| {
            Error::internal(format!(
                "Unknown opcode 0x{:02x} at offset {}",
                byte,
                self.ip - 1
            ))
        })?;

        match op {
            Op::Halt => return Ok(Flow::Exit),

            Op::LoadConst => {
                let idx = self.fetch_u16()?;
                let value = self.code.constant(idx)?.clone();
                self.push(value)?;
            }

            Op::LoadVar => {
                let idx = self.fetch_u16()?;
                let name = self.code.name(idx)?.to_string();
                let value = self.lookup_variable(&name)?;
                self.push(value)?;
            }

            Op::StoreVar => {
                let idx = self.fetch_u16()?;
                let name = self.code.name(idx)?.to_string();
                let mutable = self.fetch_u8()? != 0;
                let has_type = self.fetch_u8()? != 0;
                let type_tag = if has_type {
                    let tag_idx = self.fetch_u16()?;
                    Some(self.code.name(tag_idx)?.to_string())
                } else {
                    None
                };
                let value = self.pop()?;
                self.bind_variable(&name, value, mutable, type_tag)?;
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = apply_binop(op, &left, &right)?;
                self.push(result)?;
            }

            Op::Eq | Op::Neq | Op::Gt | Op::Lt | Op::Gte | Op::Lte => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = apply_cmpop(op, &left, &right)?;
                self.push(Value::Bool(result))?;
            }

            Op::Neg => {
                let value = self.pop()?;
                let n = value.as_number().ok_or_else(|| {
                    Error::value(format!("NEG expects a number, got {}", value.type_name()))
                })?;
                self.push(Value::Number(-n))?;
            }

            Op::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()))?;
            }

            Op::Print => {
                let value = self.pop()?;
                self.registry.print(value.to_print_string());
            }

            Op::Pop => {
                self.pop()?;
            }

            Op::Jump => {
                let offset = self.fetch_u8()? as i8;
                let target = self.ip as i64 + offset as i64;
                self.jump_to(target)?;
            }

            Op::JumpIfFalse => {
                let offset = self.fetch_u8()?;
                // Peek the condition, branch, then pop it.
                let falsy = !self
                    .stack
                    .last()
                    .ok_or_else(|| Error::runtime("Stack underflow"))?
                    .is_truthy();
                if falsy {
                    let target = self.ip as i64 + offset as i64;
                    self.jump_to(target)?;
                }
                self.pop()?;
            }

            Op::DefineFunc => self.define_function()?,

            Op::CallFunc => {
                let name_idx = self.fetch_u16()?;
                let argc = self.fetch_u8()? as usize;
                let name = self.code.name(name_idx)?.to_string();
                self.call_function(&name, argc)?;
            }

            Op::ReturnVal => {
                let retval = self.pop()?;
                return self.return_value(retval);
            }

            Op::ListNew => {
                let count = self.fetch_u16()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.push(Value::list(items))?;
            }

            Op::ListAppend => {
                let value = self.pop()?;
                let target = self.pop()?;
                match &target {
                    Value::List(items) => items.borrow_mut().push(value),
                    other => {
                        return Err(Error::value(format!(
                            "Cannot append to {}",
                            other.type_name()
                        )));
                    }
                }
                self.push(target)?;
            }

            Op::ListGet => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = self.index_get(&target, &index)?;
                self.push(value)?;
            }

            Op::ListSet => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                self.index_set(&target, index, value)?;
            }

            Op::ListLen => {
                let value = self.pop()?;
                self.push(Value::Number(value.length()?))?;
            }

            Op::ListSlice => {
                let end = self.pop()?;
                let start = self.pop()?;
                let target = self.pop()?;
                let sliced = self.slice(&target, &start, &end)?;
                self.push(sliced)?;
            }

            Op::ListIter => {
                let iterable = self.pop()?;
                let state = match &iterable {
                    Value::List(_) => Value::Number(0.0),
                    Value::Range { start, .. } => Value::Number(*start),
                    other => {
                        return Err(Error::value(format!(
                            "Cannot iterate over {}",
                            other.type_name()
                        )));
                    }
                };
                self.push(iterable)?;
                self.push(state)?;
            }

            Op::ListNext => self.iterate_next()?,

            Op::MapNew => {
                let count = self.fetch_u16()? as usize;
                let mut flat = Vec::with_capacity(count * 2);
                for _ in 0..count * 2 {
                    flat.push(self.pop()?);
                }
                flat.reverse();
                let map = Value::map(Vec::with_capacity(count));
                for pair in flat.chunks(2) {
                    self.index_set(&map, pair[0].clone(), pair[1].clone())?;
                }
                self.push(map)?;
            }

            Op::MapSet => {
                let value = self.pop()?;
                let key = self.pop()?;
                let target = self.pop()?;
                if !matches!(target, Value::Map(_)) {
                    return Err(Error::value(format!(
                        "MAP_SET expects a map, got {}",
                        target.type_name()
                    )));
                }
                self.index_set(&target, key, value)?;
            }

            Op::Delete => {
                let key = self.pop()?;
                let target = self.pop()?;
                match &target {
                    Value::Map(pairs) => {
                        let mut pairs = pairs.borrow_mut();
                        let position = pairs.iter().position(|(k, _)| *k == key);
                        match position {
                            Some(i) => {
                                pairs.remove(i);
                            }
                            None => {
                                return Err(Error::runtime(format!(
                                    "Key {} not found in map",
                                    key.to_repr_string()
                                )));
                            }
                        }
                    }
                    other => {
                        return Err(Error::value(format!(
                            "Cannot delete from {}",
                            other.type_name()
                        )));
                    }
                }
            }

            Op::RangeNew => {
                let step = self.pop()?;
                let end = self.pop()?;
                let start = self.pop()?;
                match (start.as_number(), end.as_number(), step.as_number()) {
                    (Some(start), Some(end), Some(step)) => {
                        self.push(Value::range(start, end, step)?)?;
                    }
                    _ => {
                        return Err(Error::value("Range bounds must be numbers"));
                    }
                }
            }

            Op::Import => {
                let name_idx = self.fetch_u16()?;
                let path_idx = self.fetch_u16()?;
                let alias = self.code.name(name_idx)?.to_string();
                let path = self.code.name(path_idx)?.to_string();
                modules::import_module(self, &alias, &path)?;
            }

            Op::TryEnter => {
                let offset = self.fetch_u16()? as usize;
                let handler_ip = self.ip + offset;
                if handler_ip > self.code.code.len() {
                    return Err(Error::runtime("Handler target out of bounds"));
                }
                if self.handlers.len() >= EXC_MAX {
                    return Err(Error::runtime(format!(
                        "Exception handler depth exceeds {}",
                        EXC_MAX
                    )));
                }
                self.handlers.push(Handler {
                    handler_ip,
                    frame_depth: self.frames.len(),
                    stack_depth: self.stack.len(),
                    code: self.code.clone(),
                });
            }

            Op::TryExit => {
                let offset = self.fetch_u16()? as usize;
                if self.handlers.pop().is_none() {
                    return Err(Error::internal("TRY_EXIT with no active handler"));
                }
                if offset != 0 {
                    let target = (self.ip + offset) as i64;
                    self.jump_to(target)?;
                }
            }

            // CATCH is only meaningful while unwinding; the dispatch loop
            // never reaches one on the normal path.
            Op::Catch => {
                return Err(Error::internal("CATCH encountered outside unwinding"));
            }

            Op::Finally => {}

            Op::Throw => {
                let type_idx = self.fetch_u16()?;
                let message = self.pop()?.to_print_string();
                let type_name = if type_idx == TYPE_ANY {
                    "RuntimeError".to_string()
                } else {
                    self.code.name(type_idx)?.to_string()
                };
                return Err(Error::thrown(&type_name, message));
            }
        }
        Ok(Flow::Continue)
    }

    // -----------------------------------------------------------------------
    // Operand fetching and stack discipline
    // -----------------------------------------------------------------------

    fn fetch_u8(&mut self) -> Result<u8> {
        let byte = self.code.u8_at(self.ip)?;
        self.ip += 1;
        Ok(byte)
    }

    fn fetch_u16(&mut self) -> Result<u16> {
        let value = self.code.u16_at(self.ip)?;
        self.ip += 2;
        Ok(value)
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(Error::runtime(format!(
                "Stack overflow (limit {})",
                STACK_MAX
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Error::runtime("Stack underflow"))
    }

    fn jump_to(&mut self, target: i64) -> Result<()> {
        if target < 0 || target > self.code.code.len() as i64 {
            return Err(Error::runtime(format!("Jump target {} out of bounds", target)));
        }
        self.ip = target as usize;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Locals of the current frame first, then globals, then module
    /// globals for dotted names.
    fn lookup_variable(&self, name: &str) -> Result<Value> {
        if let Some(frame) = self.frames.last()
            && let Some(cell) = frame.locals.get(name)
        {
            return Ok(cell.value.clone());
        }
        if let Some(cell) = self.globals.get(name) {
            return Ok(cell.value.clone());
        }
        if let Some((module, member)) = name.split_once('.') {
            return modules::module_global(self, module, member);
        }
        Err(Error::not_found(format!("Variable '{}' not found", name)))
    }

    /// Create or reassign a cell in the current frame's locals (or the
    /// globals when no frame is active).
    fn bind_variable(
        &mut self,
        name: &str,
        value: Value,
        mutable: bool,
        type_tag: Option<String>,
    ) -> Result<()> {
        let (table, limit, what) = if self.frames.is_empty() {
            (&mut self.globals, GLOBALS_MAX, "global variables")
        } else {
            let frame = self.frames.last_mut().unwrap();
            (&mut frame.locals, LOCALS_MAX, "local variables")
        };

        if let Some(cell) = table.get_mut(name) {
            if !cell.mutable {
                return Err(Error::runtime(format!(
                    "Cannot reassign immutable variable '{}'",
                    name
                )));
            }
            if let Some(tag) = &cell.type_tag
                && !value.is_type(tag)
            {
                return Err(Error::value(format!(
                    "Variable '{}' holds {} values, cannot assign {}",
                    name,
                    tag,
                    value.type_name()
                )));
            }
            cell.value = value;
            return Ok(());
        }

        if table.len() >= limit {
            return Err(Error::runtime(format!(
                "Too many {} (limit {})",
                what, limit
            )));
        }
        if let Some(tag) = &type_tag
            && !value.is_type(tag)
        {
            return Err(Error::value(format!(
                "Variable '{}' is typed as {}, cannot bind {}",
                name,
                tag,
                value.type_name()
            )));
        }
        table.insert(
            name.to_string(),
            Cell {
                value,
                mutable,
                type_tag,
            },
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Containers
    // -----------------------------------------------------------------------

    fn index_get(&self, target: &Value, index: &Value) -> Result<Value> {
        match target {
            Value::List(items) => {
                let items = items.borrow();
                let i = list_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Map(_) => target.map_get(index).ok_or_else(|| {
                Error::runtime(format!("Key {} not found in map", index.to_repr_string()))
            }),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = list_index(index, chars.len())?;
                Ok(Value::string(chars[i].to_string()))
            }
            other => Err(Error::value(format!(
                "Cannot index into {}",
                other.type_name()
            ))),
        }
    }

    /// In-place element write; the shared handle makes the mutation visible
    /// through every holder of the container.
    fn index_set(&self, target: &Value, index: Value, value: Value) -> Result<()> {
        match target {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = list_index(&index, len)?;
                items[i] = value;
                Ok(())
            }
            Value::Map(pairs) => {
                let mut pairs = pairs.borrow_mut();
                match pairs.iter_mut().find(|(k, _)| *k == index) {
                    Some(entry) => entry.1 = value,
                    None => pairs.push((index, value)),
                }
                Ok(())
            }
            other => Err(Error::value(format!(
                "Cannot assign into {}",
                other.type_name()
            ))),
        }
    }

    fn slice(&self, target: &Value, start: &Value, end: &Value) -> Result<Value> {
        let (Some(start), Some(end)) = (start.as_number(), end.as_number()) else {
            return Err(Error::value("Slice bounds must be numbers"));
        };
        let clamp = |len: usize| {
            let lo = (start.max(0.0) as usize).min(len);
            let hi = (end.max(0.0) as usize).min(len);
            (lo, hi.max(lo))
        };
        match target {
            Value::List(items) => {
                let items = items.borrow();
                let (lo, hi) = clamp(items.len());
                Ok(Value::list(items[lo..hi].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = clamp(chars.len());
                Ok(Value::string(chars[lo..hi].iter().collect::<String>()))
            }
            other => Err(Error::value(format!(
                "Cannot slice {}",
                other.type_name()
            ))),
        }
    }

    /// Advance an `(iterable, state)` pair from `LIST_ITER`.
    fn iterate_next(&mut self) -> Result<()> {
        let state = self.pop()?;
        let iterable = self.pop()?;
        let cursor = state
            .as_number()
            .ok_or_else(|| Error::internal("Corrupt iteration state"))?;

        match &iterable {
            Value::List(items) => {
                let item = {
                    let items = items.borrow();
                    items.get(cursor as usize).cloned()
                };
                match item {
                    Some(item) => {
                        self.push(iterable)?;
                        self.push(Value::Number(cursor + 1.0))?;
                        self.push(item)?;
                        self.push(Value::Bool(true))?;
                    }
                    None => {
                        self.push(iterable)?;
                        self.push(state)?;
                        self.push(Value::Bool(false))?;
                    }
                }
            }
            Value::Range { end, step, .. } => {
                let more = if *step > 0.0 {
                    cursor < *end
                } else {
                    cursor > *end
                };
                if more {
                    let next = cursor + step;
                    self.push(iterable)?;
                    self.push(Value::Number(next))?;
                    self.push(Value::Number(cursor))?;
                    self.push(Value::Bool(true))?;
                } else {
                    self.push(iterable)?;
                    self.push(state)?;
                    self.push(Value::Bool(false))?;
                }
            }
            other => {
                return Err(Error::value(format!(
                    "Cannot iterate over {}",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    /// Execute `DEFINE_FUNC`: read the signature, carve the inline body
    /// into the function's own unit, and skip over it.
    fn define_function(&mut self) -> Result<()> {
        let name_idx = self.fetch_u16()?;
        let name = self.code.name(name_idx)?.to_string();
        let param_count = self.fetch_u8()? as usize;
        if param_count > LOCALS_MAX {
            return Err(Error::runtime(format!(
                "Function '{}' has too many parameters (limit {})",
                name, LOCALS_MAX
            )));
        }
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let idx = self.fetch_u16()?;
            params.push(self.code.name(idx)?.to_string());
        }
        // The body-start operand is positional bookkeeping from the
        // compiler; inside a copied function unit it is shifted, so the
        // ip after the sentinel is authoritative.
        let _body_start = self.fetch_u16()? as usize;

        // The compiler terminates the signature with a JUMP sentinel whose
        // offset is the body length.
        let sentinel = self.fetch_u8()?;
        if sentinel != Op::Jump as u8 {
            return Err(Error::internal(format!(
                "DEFINE_FUNC for '{}' is missing its body sentinel",
                name
            )));
        }
        let skip = self.fetch_u8()? as usize;
        let body_start = self.ip;
        let body_end = self.ip + skip;
        if body_end > self.code.code.len() {
            return Err(Error::internal(format!(
                "DEFINE_FUNC for '{}' extends past the unit",
                name
            )));
        }

        if self.functions.len() >= FUNCS_MAX && !self.functions.contains_key(&name) {
            return Err(Error::runtime(format!(
                "Too many functions (limit {})",
                FUNCS_MAX
            )));
        }

        let bytecode = Bytecode {
            code: self.code.code[body_start..body_end].to_vec(),
            constants: self.code.constants.clone(),
        };
        trace!(function = %name, params = params.len(), "defined function");
        self.functions.insert(
            name.clone(),
            Rc::new(Function {
                name,
                params,
                bytecode: Rc::new(bytecode),
            }),
        );
        self.ip = body_end;
        Ok(())
    }

    /// `CALL_FUNC` resolution: built-ins by exact match first, then dotted
    /// module calls, then the VM's own function table.
    fn call_function(&mut self, name: &str, argc: usize) -> Result<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();

        match try_builtin(name, args.clone()) {
            BuiltinResult::Handled(result) => {
                return self.push(result?);
            }
            BuiltinResult::NotBuiltin => {}
        }

        if let Some((module, member)) = name.split_once('.') {
            let result = modules::invoke_function(self, module, member, args)?;
            return self.push(result);
        }

        match self.functions.get(name).cloned() {
            Some(function) => self.enter_function(function, args),
            None => Err(Error::not_found(format!("Function '{}' not found", name))),
        }
    }

    /// Bind arguments into a new frame and transfer control.
    fn enter_function(&mut self, function: Rc<Function>, args: Vec<Value>) -> Result<()> {
        if args.len() != function.params.len() {
            return Err(Error::runtime(format!(
                "Function '{}' expects {} argument{}, got {}",
                function.name,
                function.params.len(),
                if function.params.len() == 1 { "" } else { "s" },
                args.len()
            )));
        }
        if self.frames.len() >= CALL_STACK_MAX {
            return Err(Error::runtime(format!(
                "Call stack overflow (limit {})",
                CALL_STACK_MAX
            )));
        }
        if function.params.len() > LOCALS_MAX {
            return Err(Error::runtime(format!(
                "Too many local variables (limit {})",
                LOCALS_MAX
            )));
        }

        let mut locals = HashMap::with_capacity(function.params.len());
        for (param, value) in function.params.iter().zip(args) {
            locals.insert(
                param.clone(),
                Cell {
                    value,
                    mutable: true,
                    type_tag: None,
                },
            );
        }
        trace!(function = %function.name, depth = self.frames.len() + 1, "call");
        self.frames.push(Frame {
            name: function.name.clone(),
            return_ip: Some(self.ip),
            return_code: Some(self.code.clone()),
            locals,
        });
        self.code = function.bytecode.clone();
        self.ip = 0;
        Ok(())
    }

    /// Push a detached frame and run `function` to completion, returning
    /// the value it produced. Used by the module loader; the frame's null
    /// return pointers make `RETURN_VAL` exit `execute` instead of
    /// restoring a caller.
    pub(crate) fn call_detached(&mut self, function: &Function, args: Vec<Value>) -> Result<Value> {
        if args.len() != function.params.len() {
            return Err(Error::runtime(format!(
                "Function '{}' expects {} argument{}, got {}",
                function.name,
                function.params.len(),
                if function.params.len() == 1 { "" } else { "s" },
                args.len()
            )));
        }
        if self.frames.len() >= CALL_STACK_MAX {
            return Err(Error::runtime(format!(
                "Call stack overflow (limit {})",
                CALL_STACK_MAX
            )));
        }
        if function.params.len() > LOCALS_MAX {
            return Err(Error::runtime(format!(
                "Too many local variables (limit {})",
                LOCALS_MAX
            )));
        }
        let mut locals = HashMap::with_capacity(function.params.len());
        for (param, value) in function.params.iter().zip(args) {
            locals.insert(
                param.clone(),
                Cell {
                    value,
                    mutable: true,
                    type_tag: None,
                },
            );
        }
        self.frames.push(Frame {
            name: function.name.clone(),
            return_ip: None,
            return_code: None,
            locals,
        });
        self.execute(function.bytecode.clone())?;
        self.pop()
    }

    /// Tear down the current frame and deliver `retval` to the caller.
    fn return_value(&mut self, retval: Value) -> Result<Flow> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::internal("RETURN_VAL with no active frame"))?;
        // Handlers opened inside the finished frame are dead.
        while let Some(handler) = self.handlers.last() {
            if handler.frame_depth > self.frames.len() {
                self.handlers.pop();
            } else {
                break;
            }
        }
        trace!(function = %frame.name, "return");
        match (frame.return_ip, frame.return_code) {
            (Some(ip), Some(code)) => {
                self.code = code;
                self.ip = ip;
                self.push(retval)?;
                Ok(Flow::Continue)
            }
            // A detached frame: leave the value for the loader and exit.
            _ => {
                self.push(retval)?;
                Ok(Flow::Exit)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Unwinding
    // -----------------------------------------------------------------------

    /// Walk the handler stack innermost-first looking for a `CATCH` that
    /// matches `err`. A match tears the VM back to the handler's depth,
    /// clears the error, pushes the message, binds the catch variable, and
    /// resumes at the catch body. Returns `false` when nothing matched.
    fn unwind(&mut self, err: &Error) -> Result<bool> {
        while let Some(handler) = self.handlers.pop() {
            // Tear down frames opened since the try, releasing their
            // locals, and drop whatever the try body left on the stack.
            while self.frames.len() > handler.frame_depth {
                self.frames.pop();
            }
            self.stack.truncate(handler.stack_depth);
            self.code = handler.code.clone();
            self.ip = handler.handler_ip;

            // The handler target must be a CATCH; anything else is a
            // compiler bug and the error keeps propagating.
            if self.code.u8_at(self.ip).ok() != Some(Op::Catch as u8) {
                continue;
            }
            self.ip += 1;
            let type_idx = self.fetch_u16()?;
            let var_idx = self.fetch_u16()?;

            let matches = type_idx == TYPE_ANY || err.matches_catch(self.code.name(type_idx)?);
            if !matches {
                continue;
            }

            self.last_error = None;
            if var_idx == TYPE_ANY {
                // No binding: the message stays on the stack and the catch
                // body begins with the POP the compiler emitted.
                self.push(Value::string(&err.message))?;
            } else {
                let name = self.code.name(var_idx)?.to_string();
                self.bind_variable(&name, Value::string(&err.message), true, None)?;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a numeric list/string index against `len`.
fn list_index(index: &Value, len: usize) -> Result<usize> {
    let n = index.as_number().ok_or_else(|| {
        Error::value(format!(
            "Index must be a number, got {}",
            index.type_name()
        ))
    })?;
    if n.fract() != 0.0 || n < 0.0 || (n as usize) >= len {
        return Err(Error::runtime(format!(
            "Index {} out of bounds (length {})",
            crate::value::format_number(n),
            len
        )));
    }
    Ok(n as usize)
}
