//! Command-line runner and REPL for Kronos.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use kronos::Interpreter;

#[derive(Parser)]
#[command(name = "kronos", version, about = "Run Kronos scripts")]
struct Args {
    /// Script file to run; starts a REPL when omitted.
    file: Option<PathBuf>,

    /// Print the compiled bytecode instead of executing.
    #[arg(long)]
    dis: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match args.file {
        Some(file) => run_file(&file, args.dis),
        None => repl(),
    }
}

fn run_file(file: &PathBuf, dis: bool) -> ExitCode {
    if dis {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("error: cannot read '{}': {}", file.display(), e);
                return ExitCode::FAILURE;
            }
        };
        return match kronos::disassemble(&source) {
            Ok(listing) => {
                print!("{}", listing);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let mut interp = Interpreter::new();
    let result = interp.run_file(file);
    for line in interp.take_output() {
        println!("{}", line);
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn repl() -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("error: cannot start the REPL: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut interp = Interpreter::new();

    loop {
        match editor.readline("kr> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match interp.run(&line) {
                    Ok(()) => {
                        for out in interp.take_output() {
                            println!("{}", out);
                        }
                    }
                    Err(e) => {
                        for out in interp.take_output() {
                            println!("{}", out);
                        }
                        eprintln!("error: {}", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
