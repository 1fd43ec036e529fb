// File: src/errors.rs
//
// Diagnostics for both compile time and run time. Wording here is part of
// the external contract (see spec §7) rather than a style choice, so unlike
// the teacher's own `RuffError` this doesn't embellish messages with
// suggestions or "did you mean" hints -- it renders exactly what's specified.

use colored::Colorize;
use std::fmt;

use crate::lexer::{Token, TokenKind};

/// The three outcomes `interpret` can produce, mirroring the spec's
/// {OK, CompileError, RuntimeError} contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    /// Maps a result to the process exit code from spec §6.
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
        }
    }
}

/// Prints a single parse error to stderr in the spec's exact format:
/// `[Line N] Error at 'lexeme': message`, with `at end` at EOF and a bare
/// `Error: message` for scanner error tokens (whose lexeme *is* the message).
pub fn report_parse_error(token: &Token, message: &str) {
    let mut out = format!("[Line {}] Error", token.line);
    match token.kind {
        TokenKind::Eof => out.push_str(" at end"),
        TokenKind::Error => {
            eprintln!("{}", format!("[Line {}] Error: {}", token.line, token.lexeme).red());
            return;
        }
        _ => out.push_str(&format!(" at '{}'", token.lexeme)),
    }
    out.push_str(&format!(": {}", message));
    eprintln!("{}", out.red());
}

/// One frame of a runtime stack trace, top (most recently called) first.
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the implicit top-level script frame, printed as `script`.
    pub function_name: Option<String>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error: a message plus the call stack at the moment it was
/// raised, top frame first.
pub struct RuntimeErrorReport {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message.red().bold())?;
        for frame in &self.trace {
            writeln!(f, "{}", frame)?;
        }
        Ok(())
    }
}

pub fn report_runtime_error(report: &RuntimeErrorReport) {
    eprint!("{}", report);
}
