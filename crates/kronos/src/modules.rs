//! Module loading and cross-VM invocation.
//!
//! Each `import "path" as name` compiles and runs the named file in an
//! isolated child VM: fresh globals (with the built-ins re-installed),
//! fresh functions, no visibility into the importer. What survives is the
//! child VM itself, registered in the [`ModuleRegistry`] that every VM in
//! the tree shares through a cloned handle. Deeper imports therefore land
//! in the same table and the same loading stack, which is how import
//! cycles are detected.
//!
//! A module is addressed only through [`invoke_function`] and
//! [`module_global`]; nothing outside ever touches a child VM's stack or
//! error state directly. Errors crossing the boundary keep their kind,
//! type name, and message.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::value::Value;
use crate::vm::Vm;

/// Registered modules per tree.
pub const MODULES_MAX: usize = 64;
/// Chained-import cap, bounding recursion into `execute` during load.
pub const IMPORT_DEPTH_MAX: usize = 256;

/// A loaded module: its inner VM plus where it came from.
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    vm: Rc<RefCell<Vm>>,
}

/// State shared by a root VM and all of its module VMs: the module table,
/// the loading stack for cycle detection, and the print buffer.
pub struct ModuleRegistry {
    modules: RefCell<HashMap<String, Module>>,
    loading: RefCell<Vec<String>>,
    output: RefCell<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
            output: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn print(&self, line: String) {
        self.output.borrow_mut().push(line);
    }

    pub(crate) fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut self.output.borrow_mut())
    }

    /// Names of the modules loaded so far.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.borrow().keys().cloned().collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle an `IMPORT`: resolve, cycle-check, load, register.
///
/// Re-importing an already-registered name is a no-op; the first load wins.
/// Tokenize, parse, compile, and execute failures in the module body
/// propagate to the importer with their original kind.
pub fn import_module(vm: &mut Vm, alias: &str, path: &str) -> Result<()> {
    let registry = vm.registry.clone();

    if registry.modules.borrow().contains_key(alias) {
        return Ok(());
    }

    {
        let loading = registry.loading.borrow();
        if loading.iter().any(|name| name == alias) {
            return Err(Error::runtime(format!(
                "Circular import of module '{}'",
                alias
            )));
        }
        if loading.len() >= IMPORT_DEPTH_MAX {
            return Err(Error::runtime(format!(
                "Import depth exceeds {}",
                IMPORT_DEPTH_MAX
            )));
        }
    }
    if registry.modules.borrow().len() >= MODULES_MAX {
        return Err(Error::runtime(format!(
            "Too many modules (limit {})",
            MODULES_MAX
        )));
    }

    let resolved = resolve_path(path, vm.current_file.as_deref());
    debug!(module = alias, path = %resolved.display(), "loading module");

    registry.loading.borrow_mut().push(alias.to_string());
    let loaded = load_module(&registry, &resolved);
    registry.loading.borrow_mut().pop();

    let module_vm = loaded?;
    registry.modules.borrow_mut().insert(
        alias.to_string(),
        Module {
            name: alias.to_string(),
            path: resolved,
            vm: Rc::new(RefCell::new(module_vm)),
        },
    );
    Ok(())
}

/// Run the whole front-end pipeline over a module file in a fresh VM.
fn load_module(registry: &Rc<ModuleRegistry>, path: &Path) -> Result<Vm> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Cannot read module '{}': {}", path.display(), e)))?;
    let tokens = crate::lexer::tokenize(&source)?;
    let program = crate::parser::parse(tokens)?;
    let bytecode = crate::compiler::compile(&program)?;

    let mut vm = Vm::with_registry(registry.clone());
    vm.set_current_file(path.to_path_buf());
    vm.execute(Rc::new(bytecode))?;
    Ok(vm)
}

/// Resolve an import path. Absolute paths are used as-is; `./` and `../`
/// resolve against the importing file's directory; anything else is
/// relative to the process working directory.
fn resolve_path(path: &str, current_file: Option<&Path>) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    if path.starts_with("./") || path.starts_with("../") {
        if let Some(dir) = current_file.and_then(|f| f.parent()) {
            return dir.join(p);
        }
    }
    p.to_path_buf()
}

/// Call `module.function(args)` across the VM boundary.
///
/// The callee runs in the module's own VM on a detached frame; the return
/// value (and any error) is lifted back to the caller.
pub fn invoke_function(
    vm: &mut Vm,
    module: &str,
    function: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let module_vm = {
        let modules = vm.registry.modules.borrow();
        let module = modules
            .get(module)
            .ok_or_else(|| Error::not_found(format!("Module '{}' not found", module)))?;
        module.vm.clone()
    };
    let mut target = module_vm.try_borrow_mut().map_err(|_| {
        Error::runtime(format!("Re-entrant call into module '{}'", module))
    })?;
    let callee = target.function(function).ok_or_else(|| {
        Error::not_found(format!(
            "Function '{}' not found in module '{}'",
            function, module
        ))
    })?;
    tracing::trace!(module, function, "cross-module call");
    target.call_detached(&callee, args)
}

/// Read a global exported by a module (`module.name` in an expression).
pub fn module_global(vm: &Vm, module: &str, name: &str) -> Result<Value> {
    let modules = vm.registry.modules.borrow();
    let module_entry = modules
        .get(module)
        .ok_or_else(|| Error::not_found(format!("Module '{}' not found", module)))?;
    let target = module_entry.vm.try_borrow().map_err(|_| {
        Error::runtime(format!("Re-entrant access to module '{}'", module))
    })?;
    target.global(name).ok_or_else(|| {
        Error::not_found(format!(
            "Variable '{}' not found in module '{}'",
            name, module
        ))
    })
}
