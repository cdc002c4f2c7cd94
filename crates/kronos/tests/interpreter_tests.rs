use kronos::{ErrorKind, Interpreter};
use pretty_assertions::assert_eq;

/// Run a program and return everything it printed.
fn capture(source: &str) -> Vec<String> {
    let mut interp = Interpreter::new();
    interp
        .capture(source)
        .unwrap_or_else(|e| panic!("program failed: {}\n{}", e, source))
}

/// Run a program expected to fail and return the error.
fn capture_err(source: &str) -> kronos::Error {
    let mut interp = Interpreter::new();
    interp
        .run(source)
        .expect_err(&format!("program should fail:\n{}", source))
}

#[test]
fn arithmetic_and_printing() {
    assert_eq!(capture("set x to 3 plus 4\nprint x"), vec!["7"]);
    assert_eq!(capture("print 10 minus 2 minus 3"), vec!["5"]);
    assert_eq!(capture("print 2 times 3 plus 4"), vec!["10"]);
    assert_eq!(capture("print 7 divided by 2"), vec!["3.5"]);
    assert_eq!(capture("print 7 modulo 3"), vec!["1"]);
    assert_eq!(capture("print minus 5 plus 8"), vec!["3"]);
    assert_eq!(capture("print (2 plus 3) times 4"), vec!["20"]);
}

#[test]
fn string_concatenation_via_plus() {
    assert_eq!(capture("print \"n=\" plus 7"), vec!["n=7"]);
    assert_eq!(capture("print 1 plus \"!\""), vec!["1!"]);
    assert_eq!(capture("print \"a\" plus \"b\""), vec!["ab"]);
}

#[test]
fn comparisons_and_logic() {
    assert_eq!(capture("print 5 is greater than 3"), vec!["true"]);
    assert_eq!(capture("print 5 is less than 3"), vec!["false"]);
    assert_eq!(capture("print 3 is greater or equal to 3"), vec!["true"]);
    assert_eq!(capture("print 2 is less or equal to 1"), vec!["false"]);
    assert_eq!(capture("print 4 is equal to 4"), vec!["true"]);
    assert_eq!(capture("print 4 is not equal to 4"), vec!["false"]);
    assert_eq!(capture("print true and false"), vec!["false"]);
    assert_eq!(capture("print true or false"), vec!["true"]);
    assert_eq!(capture("print not true"), vec!["false"]);
    assert_eq!(capture("print \"a\" is less than \"b\""), vec!["true"]);
}

#[test]
fn truthiness_in_conditions() {
    assert_eq!(capture("if 0: print \"yes\"\nprint \"after\""), vec!["after"]);
    assert_eq!(capture("if \"\": print \"yes\"\nprint \"after\""), vec!["after"]);
    assert_eq!(capture("if nil: print \"yes\"\nprint \"after\""), vec!["after"]);
    assert_eq!(capture("if list 1: print \"yes\""), vec!["yes"]);
}

#[test]
fn if_else_branches() {
    let source = r#"
set x to 10
if x is greater than 5:
    print "big"
else:
    print "small"
"#;
    assert_eq!(capture(source), vec!["big"]);

    let source = r#"
set x to 1
if x is greater than 5:
    print "big"
else if x is greater than 0:
    print "medium"
else:
    print "small"
"#;
    assert_eq!(capture(source), vec!["medium"]);
}

#[test]
fn while_loop() {
    let source = r#"
set count to 0
set total to 0
while count is less than 5:
    set total to total plus count
    set count to count plus 1
print total
"#;
    assert_eq!(capture(source), vec!["10"]);
}

#[test]
fn for_over_list_and_range() {
    assert_eq!(
        capture("for x in list 10, 20, 30: print x"),
        vec!["10", "20", "30"]
    );
    assert_eq!(
        capture("for i in range 1 to 4: print i"),
        vec!["1", "2", "3"]
    );
    assert_eq!(
        capture("for i in range 0 to 10 by 3: print i"),
        vec!["0", "3", "6", "9"]
    );
    assert_eq!(
        capture("for i in range 3 to 0 by minus 1: print i"),
        vec!["3", "2", "1"]
    );
    // An empty range yields nothing.
    assert_eq!(
        capture("for i in range 5 to 1: print i\nprint \"done\""),
        vec!["done"]
    );
}

#[test]
fn functions_and_recursion() {
    let source = r#"
function fact with n:
    if n is less than 2: return 1
    return n times call fact with n minus 1
print call fact with 6
"#;
    assert_eq!(capture(source), vec!["720"]);
}

#[test]
fn paren_call_syntax() {
    let source = r#"
function square with x:
    return x times x
print square(5)
print call square with 6
"#;
    assert_eq!(capture(source), vec!["25", "36"]);
}

#[test]
fn function_locals_do_not_leak() {
    let source = r#"
set x to 1
function shadow with x:
    set y to x times 2
    return y
print call shadow with 21
print x
"#;
    assert_eq!(capture(source), vec!["42", "1"]);

    let err = capture_err("function f with a:\n    return a\nprint f(1)\nprint a");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn function_arity_is_checked() {
    let err = capture_err("function f with a, b:\n    return a\nprint f(1)");
    assert!(err.message.contains("expects 2 arguments"));
}

#[test]
fn nested_function_definitions() {
    let source = r#"
function outer:
    function inner with x:
        return x plus 1
    return call inner with 41
print call outer
"#;
    assert_eq!(capture(source), vec!["42"]);
}

#[test]
fn implicit_return_is_nil() {
    let source = r#"
function noop:
    set x to 1
print call noop
"#;
    assert_eq!(capture(source), vec!["nil"]);
}

#[test]
fn lists() {
    assert_eq!(capture("print list 1, 2, 3"), vec!["[1, 2, 3]"]);
    assert_eq!(capture("print list"), vec!["[]"]);
    assert_eq!(capture("set xs to list 5, 6\nprint xs at 1"), vec!["6"]);
    assert_eq!(
        capture("set xs to list 1, 2, 3\nset xs at 0 to 9\nprint xs"),
        vec!["[9, 2, 3]"]
    );
    assert_eq!(capture("print len(list 1, 2, 3)"), vec!["3"]);

    let err = capture_err("set xs to list 1\nprint xs at 5");
    assert!(err.message.contains("out of bounds"));
}

#[test]
fn maps() {
    let source = r#"
set m to map
set m at "k" to 42
print m at "k"
"#;
    assert_eq!(capture(source), vec!["42"]);

    let source = r#"
set m to map
set m at "a" to 1
set m at "b" to 2
set m at "a" to 3
print m
"#;
    // Overwrite keeps insertion order.
    assert_eq!(capture(source), vec!["{\"a\": 3, \"b\": 2}"]);

    let source = r#"
set m to map
set m at "k" to 1
delete m at "k"
print len(to_string(m))
"#;
    assert_eq!(capture(source), vec!["2"]);

    let err = capture_err("set m to map\nprint m at \"missing\"");
    assert!(err.message.contains("not found in map"));
}

#[test]
fn string_indexing() {
    assert_eq!(capture("print \"abc\" at 1"), vec!["b"]);
}

#[test]
fn is_of_type_predicate() {
    assert_eq!(capture("print 1 is of type \"number\""), vec!["true"]);
    assert_eq!(capture("print \"x\" is of type \"string\""), vec!["true"]);
    assert_eq!(capture("print nil is of type \"null\""), vec!["true"]);
    assert_eq!(capture("print (list 1) is of type \"list\""), vec!["true"]);
    assert_eq!(capture("print map is of type \"map\""), vec!["true"]);
    assert_eq!(capture("print 1 is of type \"string\""), vec!["false"]);
    assert_eq!(
        capture("print (range 0 to 3) is of type \"range\""),
        vec!["true"]
    );
}

#[test]
fn immutable_bindings() {
    let err = capture_err("let c to 5\nset c to 6");
    assert!(err.message.contains("immutable"));

    // The binding survives the failed reassignment.
    let source = r#"
let c to 5
try:
    set c to 6
catch RuntimeError as e:
    print e
print c
"#;
    let output = capture(source);
    assert!(output[0].contains("immutable"));
    assert_eq!(output[1], "5");
}

#[test]
fn pi_is_prebound_and_immutable() {
    let output = capture("print Pi is greater than 3.14 and Pi is less than 3.15");
    assert_eq!(output, vec!["true"]);

    let err = capture_err("set Pi to 3");
    assert!(err.message.contains("immutable"));
}

#[test]
fn type_tags_are_enforced() {
    let err = capture_err("set x to 1 as number\nset x to \"s\"");
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("number"));

    // The tagged cell still holds its old value after the rejection.
    let source = r#"
set x to 1 as number
try:
    set x to "s"
catch ValueError as e:
    print "rejected"
print x
"#;
    assert_eq!(capture(source), vec!["rejected", "1"]);

    // Binding a value that fails the predicate is also rejected.
    let err = capture_err("set x to \"s\" as number");
    assert!(err.message.contains("number"));
}

#[test]
fn divide_by_zero_is_catchable() {
    let source = r#"
try:
    set x to 1 divided by 0
catch RuntimeError as e:
    print e
end
"#;
    let output = capture(source);
    assert_eq!(output.len(), 1);
    assert!(output[0].contains("Cannot divide by zero"));
}

#[test]
fn catch_by_type_and_wildcard() {
    let source = r#"
try:
    throw "boom" as ValueError
catch NameError as e:
    print "name"
catch ValueError as e:
    print "value: " plus e
end
"#;
    assert_eq!(capture(source), vec!["value: boom"]);

    let source = r#"
try:
    throw "anything" as SomeCustomError
catch as e:
    print "caught " plus e
end
"#;
    assert_eq!(capture(source), vec!["caught anything"]);
}

#[test]
fn uncaught_errors_keep_their_type() {
    let err = capture_err("throw \"boom\" as ValueError");
    assert_eq!(err.to_string(), "ValueError: boom");

    let err = capture_err("throw \"plain\"");
    assert_eq!(err.to_string(), "RuntimeError: plain");

    let err = capture_err("print nope");
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.to_string(), "NameError: Variable 'nope' not found");
}

#[test]
fn unmatched_catch_propagates() {
    let err = capture_err(
        "try:\n    throw \"boom\" as ValueError\ncatch NameError as e:\n    print e\nend",
    );
    assert_eq!(err.to_string(), "ValueError: boom");
}

#[test]
fn finally_runs_on_success_and_after_catch() {
    let source = r#"
try:
    print "body"
catch as e:
    print "caught"
finally:
    print "cleanup"
end
"#;
    assert_eq!(capture(source), vec!["body", "cleanup"]);

    let source = r#"
try:
    throw "x"
catch RuntimeError as e:
    print "caught"
finally:
    print "cleanup"
end
"#;
    assert_eq!(capture(source), vec!["caught", "cleanup"]);
}

#[test]
fn errors_inside_functions_unwind_to_the_caller() {
    let source = r#"
function risky:
    return 1 divided by 0
try:
    set x to call risky
catch RuntimeError as e:
    print "caught: " plus e
end
"#;
    let output = capture(source);
    assert_eq!(output, vec!["caught: Cannot divide by zero"]);
}

#[test]
fn execution_continues_after_a_caught_error() {
    let source = r#"
set total to 0
for i in range 0 to 3:
    try:
        if i is equal to 1: throw "skip"
        set total to total plus 1
    catch RuntimeError as e:
        set total to total plus 100
print total
"#;
    assert_eq!(capture(source), vec!["102"]);
}

#[test]
fn nested_try_blocks() {
    let source = r#"
try:
    try:
        throw "inner" as ValueError
    catch NameError as e:
        print "wrong"
catch ValueError as e:
    print "outer caught " plus e
end
"#;
    assert_eq!(capture(source), vec!["outer caught inner"]);
}

#[test]
fn builtin_calls_from_scripts() {
    assert_eq!(capture("set xs to list 2, 1, 3\nprint sort(xs)"), vec!["[1, 2, 3]"]);
    assert_eq!(capture("print uppercase(\"abc\")"), vec!["ABC"]);
    assert_eq!(capture("print len(\"hello\")"), vec!["5"]);
    assert_eq!(capture("print min(3, 1, 2)"), vec!["1"]);
    assert_eq!(capture("print max(3, 1, 2)"), vec!["3"]);
    assert_eq!(capture("print power(2, 10)"), vec!["1024"]);
    assert_eq!(capture("print math.sqrt(16)"), vec!["4"]);
    assert_eq!(capture("print to_number(\"2.5\") plus 0.5"), vec!["3"]);
    assert_eq!(capture("print join(split(\"a,b,c\", \",\"), \"-\")"), vec!["a-b-c"]);
    assert_eq!(capture("print reverse(list 1, 2, 3)"), vec!["[3, 2, 1]"]);
    assert_eq!(capture("print reverse(\"abc\")"), vec!["cba"]);
    assert_eq!(capture("print contains(\"hello\", \"ell\")"), vec!["true"]);
    assert_eq!(capture("print replace(\"a.b\", \".\", \"-\")"), vec!["a-b"]);
}

#[test]
fn builtins_shadow_user_functions() {
    // Built-ins are checked first by exact match.
    let source = r#"
function len with x:
    return 999
print len("ab")
"#;
    assert_eq!(capture(source), vec!["2"]);
}

#[test]
fn regex_builtins_from_scripts() {
    assert_eq!(
        capture("print regex.match(\"abc\", \"[a-c]+\")"),
        vec!["true"]
    );
    assert_eq!(
        capture("print regex.search(\"x42y\", \"[0-9]+\")"),
        vec!["42"]
    );
    assert_eq!(
        capture("print regex.findall(\"a1b22\", \"[0-9]+\")"),
        vec!["[\"1\", \"22\"]"]
    );

    let source = r#"
try:
    print regex.match("x", "[broken")
catch RuntimeError as e:
    print "bad pattern"
end
"#;
    assert_eq!(capture(source), vec!["bad pattern"]);
}

#[test]
fn sort_rejects_mixed_lists() {
    let err = capture_err("print sort(list 1, \"a\")");
    assert!(err.message.contains("all numbers or all strings"));
}

#[test]
fn number_formatting_in_output() {
    assert_eq!(capture("print 1000000"), vec!["1000000"]);
    assert_eq!(capture("print 0.5 plus 0.25"), vec!["0.75"]);
    assert_eq!(capture("print 3.0"), vec!["3"]);
    assert_eq!(capture("print minus 0.0"), vec!["0"]);
}

#[test]
fn ranges_are_values() {
    assert_eq!(capture("print range 0 to 10 by 2"), vec!["0..10 by 2"]);
    assert_eq!(capture("print len(range 0 to 10 by 2)"), vec!["5"]);
    let err = capture_err("print range 0 to 10 by 0");
    assert!(err.message.contains("step"));
}

#[test]
fn globals_persist_across_runs() {
    let mut interp = Interpreter::new();
    interp.run("set x to 41").unwrap();
    interp.run("function bump with n:\n    return n plus 1").unwrap();
    let output = interp.capture("print bump(x)").unwrap();
    assert_eq!(output, vec!["42"]);
}

#[test]
fn last_error_and_callback() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut interp = Interpreter::new();
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    interp.on_error(Box::new(move |err| {
        sink.borrow_mut().push(err.to_string());
    }));

    // A caught error still fires the callback once, and a clearing catch
    // resets the last-error record.
    interp
        .run("try:\n    set x to 1 divided by 0\ncatch RuntimeError as e:\n    print e\nend")
        .unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].contains("Cannot divide by zero"));
    assert!(interp.last_error().is_none());

    // An uncaught error is recorded.
    let _ = interp.run("print nope").unwrap_err();
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(
        interp.last_error().unwrap().to_string(),
        "NameError: Variable 'nope' not found"
    );
}

#[test]
fn disassembly_is_printable() {
    let listing = kronos::disassemble("set x to 3 plus 4\nprint x").unwrap();
    assert!(listing.contains("ADD"));
    assert!(listing.contains("STORE_VAR"));
    assert!(listing.contains("HALT"));
}

#[test]
fn parse_and_tokenize_errors_have_their_kinds() {
    let mut interp = Interpreter::new();
    let err = interp.run("set x to @").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Tokenize);

    let err = interp.run("set to 5").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
}
