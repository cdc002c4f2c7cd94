//! Round-trip and idempotence laws, checked over generated inputs.

use kronos::{Interpreter, format_number};
use quickcheck_macros::quickcheck;

fn capture_one(source: &str) -> String {
    let mut interp = Interpreter::new();
    let mut output = interp.capture(source).expect("program should run");
    assert_eq!(output.len(), 1, "expected exactly one printed line");
    output.remove(0)
}

#[quickcheck]
fn number_formatting_round_trips(n: f64) -> bool {
    if !n.is_finite() {
        return true;
    }
    format_number(n).parse::<f64>() == Ok(n)
}

#[quickcheck]
fn to_number_inverts_to_string(n: f64) -> bool {
    if !n.is_finite() {
        return true;
    }
    // to_number(to_string(n)) == n, via the interpreter. Negative numbers
    // are spelled with unary minus.
    let literal = if n < 0.0 {
        format!("minus {}", format_number(-n))
    } else {
        format_number(n)
    };
    let printed = capture_one(&format!(
        "print to_number(to_string({})) is equal to {}",
        literal, literal
    ));
    printed == "true"
}

#[quickcheck]
fn join_inverts_split(bytes: Vec<u8>) -> bool {
    // Restrict to a delimiter-bearing alphabet so the program source stays
    // well-formed; the law itself holds for any nonempty delimiter.
    let s: String = bytes
        .iter()
        .map(|b| match b % 4 {
            0 => 'a',
            1 => 'b',
            2 => 'c',
            _ => ',',
        })
        .collect();
    let printed = capture_one(&format!(
        "print join(split(\"{}\", \",\"), \",\")",
        s
    ));
    printed == s
}

#[quickcheck]
fn reverse_twice_is_identity(xs: Vec<u16>) -> bool {
    let literal = if xs.is_empty() {
        "list".to_string()
    } else {
        format!(
            "list {}",
            xs.iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    let source = format!(
        "set xs to {}\nprint reverse(reverse(xs)) is equal to xs",
        literal
    );
    capture_one(&source) == "true"
}

#[quickcheck]
fn sort_is_idempotent(xs: Vec<u16>) -> bool {
    let literal = if xs.is_empty() {
        "list".to_string()
    } else {
        format!(
            "list {}",
            xs.iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    let source = format!(
        "set xs to {}\nprint sort(sort(xs)) is equal to sort(xs)",
        literal
    );
    capture_one(&source) == "true"
}
