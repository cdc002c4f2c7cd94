use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use kronos::{ErrorKind, Interpreter};
use pretty_assertions::assert_eq;

/// A unique scratch directory per test.
fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "kronos-tests-{}-{}-{}",
        std::process::id(),
        name,
        n
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &PathBuf, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn run_main(dir: &PathBuf, source: &str) -> Vec<String> {
    let main = write(dir, "main.kr", source);
    let mut interp = Interpreter::new();
    interp
        .run_file(&main)
        .unwrap_or_else(|e| panic!("main.kr failed: {}", e));
    interp.take_output()
}

#[test]
fn import_and_call_a_module_function() {
    let dir = temp_dir("import");
    write(
        &dir,
        "util.kr",
        "function square with x:\n    return x times x\n",
    );
    let output = run_main(&dir, "import \"./util.kr\" as util\nprint util.square(5)\n");
    assert_eq!(output, vec!["25"]);
}

#[test]
fn module_globals_are_reachable_only_dotted() {
    let dir = temp_dir("isolation");
    write(&dir, "config.kr", "set limit to 99\nlet secret to 7\n");

    let output = run_main(
        &dir,
        "import \"./config.kr\" as config\nprint config.limit\nprint config.secret\n",
    );
    assert_eq!(output, vec!["99", "7"]);

    // The bare name is not visible in the importer.
    let main = write(
        &dir,
        "main2.kr",
        "import \"./config.kr\" as config\nprint limit\n",
    );
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("limit"));
}

#[test]
fn importer_globals_are_invisible_to_the_module() {
    let dir = temp_dir("no-leak");
    write(&dir, "peek.kr", "print root_var\n");
    let main = write(
        &dir,
        "main.kr",
        "set root_var to 1\nimport \"./peek.kr\" as peek\n",
    );
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn module_top_level_runs_once_and_prints_through() {
    let dir = temp_dir("side-effects");
    write(&dir, "noisy.kr", "print \"loading\"\n");
    let output = run_main(
        &dir,
        "import \"./noisy.kr\" as noisy\nimport \"./noisy.kr\" as noisy\nprint \"done\"\n",
    );
    // The second import reuses the registered module.
    assert_eq!(output, vec!["loading", "done"]);
}

#[test]
fn chained_imports() {
    let dir = temp_dir("chain");
    write(&dir, "c.kr", "function base:\n    return 2\n");
    write(
        &dir,
        "b.kr",
        "import \"./c.kr\" as c\nfunction doubled:\n    return c.base() times 2\n",
    );
    let output = run_main(
        &dir,
        "import \"./b.kr\" as b\nprint b.doubled()\n",
    );
    assert_eq!(output, vec!["4"]);
}

#[test]
fn circular_imports_are_rejected() {
    let dir = temp_dir("cycle");
    write(&dir, "a.kr", "import \"./b.kr\" as b\n");
    write(&dir, "b.kr", "import \"./a.kr\" as a\n");
    let main = write(&dir, "main.kr", "import \"./a.kr\" as a\n");

    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("Circular import"));
}

#[test]
fn missing_module_file_is_an_io_error() {
    let dir = temp_dir("missing");
    let main = write(&dir, "main.kr", "import \"./nope.kr\" as nope\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
}

#[test]
fn module_errors_keep_their_original_kind() {
    let dir = temp_dir("bad-module");
    write(&dir, "broken.kr", "set x to ???\n");
    let main = write(&dir, "main.kr", "import \"./broken.kr\" as broken\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Tokenize);

    write(&dir, "halfway.kr", "set to to to\n");
    let main = write(&dir, "main2.kr", "import \"./halfway.kr\" as halfway\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);

    write(&dir, "throws.kr", "throw \"module init failed\" as ValueError\n");
    let main = write(&dir, "main3.kr", "import \"./throws.kr\" as throws\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: module init failed");
}

#[test]
fn import_failure_makes_no_registration() {
    let dir = temp_dir("no-register");
    write(&dir, "bad.kr", "print nope\n");
    let main = write(
        &dir,
        "main.kr",
        "try:\n    import \"./bad.kr\" as bad\ncatch as e:\n    print \"failed\"\nend\nprint bad.x\n",
    );
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(interp.take_output(), vec!["failed"]);
    assert!(err.message.contains("Module 'bad' not found"));
}

#[test]
fn missing_module_function_is_distinct_from_missing_module() {
    let dir = temp_dir("lookup");
    write(&dir, "util.kr", "function square with x:\n    return x times x\n");
    let main = write(
        &dir,
        "main.kr",
        "import \"./util.kr\" as util\nprint util.cube(2)\n",
    );
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("Function 'cube' not found in module 'util'"));

    let main = write(&dir, "main2.kr", "print ghost.cube(2)\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert!(err.message.contains("Module 'ghost' not found"));
}

#[test]
fn module_function_errors_cross_the_boundary() {
    let dir = temp_dir("cross-error");
    write(
        &dir,
        "math2.kr",
        "function crash:\n    return 1 divided by 0\n",
    );
    let main = write(
        &dir,
        "main.kr",
        "import \"./math2.kr\" as math2\ntry:\n    print math2.crash()\ncatch RuntimeError as e:\n    print \"caught: \" plus e\nend\n",
    );
    let mut interp = Interpreter::new();
    interp.run_file(&main).unwrap();
    assert_eq!(
        interp.take_output(),
        vec!["caught: Cannot divide by zero"]
    );
}

#[test]
fn module_functions_respect_the_locals_limit() {
    // The parameter cap is enforced where the function is defined, so an
    // imported module cannot smuggle an over-wide frame past the limit
    // either.
    let dir = temp_dir("wide-module");
    let params: Vec<String> = (0..129).map(|i| format!("p{}", i)).collect();
    write(
        &dir,
        "wide.kr",
        &format!("function wide with {}:\n    return 0\n", params.join(", ")),
    );
    let main = write(&dir, "main.kr", "import \"./wide.kr\" as wide\n");
    let mut interp = Interpreter::new();
    let err = interp.run_file(&main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("too many parameters"));
}

#[test]
fn module_state_persists_between_calls() {
    let dir = temp_dir("stateful");
    write(
        &dir,
        "counter.kr",
        "set count to 0\nfunction bump:\n    set count to count plus 1\n    return count\n",
    );
    let output = run_main(
        &dir,
        "import \"./counter.kr\" as counter\nprint counter.bump()\nprint counter.bump()\nprint counter.count\n",
    );
    // bump's assignment lands in its frame locals, so the module global is
    // shadowed inside the call but unchanged outside.
    assert_eq!(output, vec!["1", "1", "0"]);
}

// ---------------------------------------------------------------------------
// Filesystem builtins (exercised against the same scratch directories)
// ---------------------------------------------------------------------------

#[test]
fn file_builtins_round_trip() {
    let dir = temp_dir("fs");
    let data = dir.join("data.txt").to_string_lossy().into_owned();

    let mut interp = Interpreter::new();
    let source = format!(
        "write_file(\"{path}\", \"line one\\nline two\")\nprint file_exists(\"{path}\")\nprint read_file(\"{path}\")\nprint len(read_lines(\"{path}\"))\n",
        path = data
    );
    interp.run(&source).unwrap();
    assert_eq!(
        interp.take_output(),
        vec!["true", "line one\nline two", "2"]
    );
}

#[test]
fn list_files_is_sorted() {
    let dir = temp_dir("fs-list");
    write(&dir, "b.txt", "");
    write(&dir, "a.txt", "");
    let mut interp = Interpreter::new();
    let source = format!("print list_files(\"{}\")", dir.to_string_lossy());
    interp.run(&source).unwrap();
    assert_eq!(interp.take_output(), vec!["[\"a.txt\", \"b.txt\"]"]);
}

#[test]
fn path_helpers() {
    let mut interp = Interpreter::new();
    interp
        .run("print join_path(\"a/b\", \"c.kr\")\nprint dirname(\"a/b/c.kr\")\nprint basename(\"a/b/c.kr\")")
        .unwrap();
    assert_eq!(interp.take_output(), vec!["a/b/c.kr", "a/b", "c.kr"]);
}

#[test]
fn missing_file_reads_are_catchable() {
    let dir = temp_dir("fs-missing");
    let path = dir.join("ghost.txt").to_string_lossy().into_owned();
    let mut interp = Interpreter::new();
    let source = format!(
        "try:\n    print read_file(\"{}\")\ncatch RuntimeError as e:\n    print \"unreadable\"\nend",
        path
    );
    interp.run(&source).unwrap();
    assert_eq!(interp.take_output(), vec!["unreadable"]);
}
