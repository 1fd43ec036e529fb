// File: src/repl.rs
//
// Interactive REPL for the language. Each line is compiled and run against
// one persistent `Vm`, so variables and functions declared on one line stay
// visible on the next.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: Vm::new(), editor })
    }

    /// Runs until the user sends EOF (Ctrl-D) or interrupts with Ctrl-C.
    /// A compile or runtime error on one line does not end the session --
    /// it's reported to stderr and the REPL keeps reading.
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            match self.editor.readline("> ") {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    // Diagnostics are already printed by the compiler/VM; a
                    // bad line just gets reported and the loop keeps going.
                    self.vm.interpret(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{} {err}", "Readline error:".red());
                    break;
                }
            }
        }
        Ok(())
    }
}
