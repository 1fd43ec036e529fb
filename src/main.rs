// File: src/main.rs
//
// Entry point. Argument handling follows the reference interpreter's own
// argc/argv dispatch: no args starts the REPL, one arg runs a script file,
// anything else is a usage error.

mod chunk;
mod compiler;
mod errors;
mod lexer;
mod repl;
mod table;
mod value;
mod vm;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use errors::InterpretResult;
use repl::Repl;
use vm::Vm;

#[derive(Parser)]
#[command(
    name = "lox",
    about = "A bytecode compiler and virtual machine for a small dynamic scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Script to run. Omit to start the interactive REPL.
    path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: lox [path]");
        return ExitCode::from(64);
    }

    let cli = Cli::parse();

    match cli.path {
        None => match Repl::new() {
            Ok(mut repl) => {
                if let Err(err) = repl.run() {
                    eprintln!("{} {err}", "Error:".red());
                    return ExitCode::from(1);
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{} {err}", "Error:".red());
                ExitCode::from(1)
            }
        },
        Some(path) => run_file(&path),
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            return ExitCode::from(74);
        }
    };

    let mut vm = Vm::new();
    let result = vm.interpret(&source);
    ExitCode::from(exit_code(result))
}

fn exit_code(result: InterpretResult) -> u8 {
    result.exit_code() as u8
}
