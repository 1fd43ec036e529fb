// File: src/vm.rs
//
// The stack-based bytecode interpreter. One `Vm` is created per process (the
// REPL reuses it across lines so globals and interned strings persist); each
// `interpret` call compiles and runs one chunk of source to completion or to
// the first runtime error.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Instant;

use crate::chunk::OpCode;
use crate::compiler::compile;
use crate::errors::{report_runtime_error, InterpretResult, RuntimeErrorReport, TraceFrame};
use crate::table::{intern_string, Table};
use crate::value::{NativeFn, Obj, ObjClosure, ObjNative, ObjUpvalue, UpvalueLocation, Value};

const MAX_FRAMES: usize = 64;

/// One active function invocation: the closure being run, its instruction
/// pointer, and the base index into the VM's shared value stack where its
/// locals begin (slot 0 is the closure itself).
struct CallFrame {
    closure: Rc<ObjClosure>,
    ip: usize,
    slot_base: usize,
}

pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    strings: Table,
    /// Open upvalues, kept sorted by descending stack slot so that
    /// `capture_upvalue` can find-or-create in one forward scan and
    /// `close_upvalues` can stop as soon as it passes the watermark.
    open_upvalues: Vec<Rc<RefCell<ObjUpvalue>>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            frames: Vec::new(),
            stack: Vec::new(),
            globals: Table::new(),
            strings: Table::new(),
            open_upvalues: Vec::new(),
        };
        vm.define_native("clock", native_clock);
        vm
    }

    fn define_native(&mut self, name: &'static str, function: NativeFn) {
        let key = intern_string(&mut self.strings, name);
        let native = Rc::new(ObjNative { name, function });
        self.globals.set(key, Value::Obj(Obj::Native(native)));
    }

    /// Compiles and runs one unit of source. Resets the operand stack and
    /// call frames on entry -- REPL lines are independent except for shared
    /// globals and interned strings.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compile(source, &mut self.strings) {
            Ok(function) => function,
            Err(()) => return InterpretResult::CompileError,
        };

        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        let closure = Rc::new(ObjClosure { function, upvalues: Vec::new() });
        self.stack.push(Value::Obj(Obj::Closure(Rc::clone(&closure))));
        self.frames.push(CallFrame { closure, ip: 0, slot_base: 0 });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(report) => {
                report_runtime_error(&report);
                InterpretResult::RuntimeError
            }
        }
    }

    /// Looks up a global by name. Exposed mainly so integration tests can
    /// assert on program results without scraping stdout.
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let key = intern_string(&mut self.strings, name);
        self.globals.get(&key).cloned()
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().closure.function.chunk.constants[index].clone()
    }

    fn read_string(&mut self) -> Rc<crate::value::ObjString> {
        match self.read_constant() {
            Value::Obj(Obj::String(s)) => s,
            _ => unreachable!("compiler only emits string constants for identifier operands"),
        }
    }

    fn current_line(&self) -> u32 {
        let frame = self.frame();
        // `ip` has already advanced past the opcode byte read this iteration.
        frame.closure.function.chunk.line_at(frame.ip.saturating_sub(1))
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler-emitted bytecode keeps the stack balanced")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeErrorReport {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let line = frame.closure.function.chunk.line_at(frame.ip.saturating_sub(1));
            let function_name =
                frame.closure.function.name.as_ref().map(|n| n.chars.to_string());
            trace.push(TraceFrame { line, function_name });
        }
        RuntimeErrorReport { message: message.into(), trace }
    }

    fn run(&mut self) -> Result<(), RuntimeErrorReport> {
        loop {
            let byte = self.read_byte();
            let op = OpCode::from_byte(byte)
                .unwrap_or_else(|| panic!("corrupted bytecode: unknown opcode {byte}"));

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slot_base;
                    self.push(self.stack[base + slot].clone());
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slot_base;
                    self.stack[base + slot] = self.peek(0).clone();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            return Err(
                                self.runtime_error(format!("Undefined variable '{}'.", name.chars))
                            )
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0).clone();
                    let is_new = self.globals.set(Rc::clone(&name), value);
                    if is_new {
                        self.globals.delete(&name);
                        return Err(
                            self.runtime_error(format!("Undefined variable '{}'.", name.chars))
                        );
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = Rc::clone(&self.frame().closure.upvalues[slot]);
                    let value = self.read_upvalue(&upvalue);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    let upvalue = Rc::clone(&self.frame().closure.upvalues[slot]);
                    self.write_upvalue(&upvalue, value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.number_binary_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.number_binary_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.number_binary_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.number_binary_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.number_binary_op(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let n = self.pop().as_number().unwrap();
                    self.push(Value::Number(-n));
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{}", value);
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    self.call_value(argc)?;
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(Obj::Function(f)) => f,
                        _ => unreachable!("compiler only emits OP_CLOSURE with a function constant"),
                    };
                    let upvalue_count = function.upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.frame().slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            upvalues.push(Rc::clone(&self.frame().closure.upvalues[index]));
                        }
                    }
                    let closure = Rc::new(ObjClosure { function, upvalues });
                    self.push(Value::Obj(Obj::Closure(closure)));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let finished = self.frames.pop().unwrap();
                    self.close_upvalues(finished.slot_base);
                    if self.frames.is_empty() {
                        self.stack.clear();
                        return Ok(());
                    }
                    self.stack.truncate(finished.slot_base);
                    self.push(result);
                }
            }
        }
    }

    fn add(&mut self) -> Result<(), RuntimeErrorReport> {
        match (self.peek(0).clone(), self.peek(1).clone()) {
            (Value::Number(b), Value::Number(a)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(Obj::String(b)), Value::Obj(Obj::String(a))) => {
                self.pop();
                self.pop();
                let mut joined = String::with_capacity(a.chars.len() + b.chars.len());
                joined.push_str(&a.chars);
                joined.push_str(&b.chars);
                let interned = intern_string(&mut self.strings, &joined);
                self.push(Value::Obj(Obj::String(interned)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    fn number_binary_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeErrorReport> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number().unwrap();
        let a = self.pop().as_number().unwrap();
        self.push(op(a, b));
        Ok(())
    }

    fn call_value(&mut self, argc: usize) -> Result<(), RuntimeErrorReport> {
        let callee = self.peek(argc).clone();
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, argc),
            Value::Obj(Obj::Native(native)) => {
                let args_start = self.stack.len() - argc;
                let result = (native.function)(&self.stack[args_start..]);
                self.stack.truncate(args_start - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure: Rc<ObjClosure>, argc: usize) -> Result<(), RuntimeErrorReport> {
        let arity = closure.function.arity as usize;
        if argc != arity {
            return Err(
                self.runtime_error(format!("Expected {} arguments but got {}.", arity, argc))
            );
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    /// Finds an existing open upvalue aliasing `stack_slot`, or creates one.
    /// `open_upvalues` stays sorted by descending slot so this scan (and
    /// `close_upvalues`) both terminate early.
    fn capture_upvalue(&mut self, stack_slot: usize) -> Rc<RefCell<ObjUpvalue>> {
        let mut insert_at = self.open_upvalues.len();
        for (i, upvalue) in self.open_upvalues.iter().enumerate() {
            match upvalue.borrow().open_slot() {
                Some(slot) if slot == stack_slot => return Rc::clone(upvalue),
                Some(slot) if slot < stack_slot => {
                    insert_at = i;
                    break;
                }
                _ => {}
            }
        }
        let created = Rc::new(RefCell::new(ObjUpvalue::open(stack_slot)));
        self.open_upvalues.insert(insert_at, Rc::clone(&created));
        created
    }

    /// Closes every open upvalue aliasing a stack slot at or above `from`,
    /// copying its value out of the stack before the slot is discarded.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(upvalue) = self.open_upvalues.first() {
            let slot = match upvalue.borrow().open_slot() {
                Some(slot) => slot,
                None => break,
            };
            if slot < from {
                break;
            }
            let upvalue = self.open_upvalues.remove(0);
            let value = self.stack[slot].clone();
            upvalue.borrow_mut().location = UpvalueLocation::Closed(value);
        }
    }

    fn read_upvalue(&self, upvalue: &Rc<RefCell<ObjUpvalue>>) -> Value {
        match &upvalue.borrow().location {
            UpvalueLocation::Open(slot) => self.stack[*slot].clone(),
            UpvalueLocation::Closed(value) => value.clone(),
        }
    }

    fn write_upvalue(&mut self, upvalue: &Rc<RefCell<ObjUpvalue>>, value: Value) {
        let slot = upvalue.borrow().open_slot();
        match slot {
            Some(slot) => self.stack[slot] = value,
            None => upvalue.borrow_mut().location = UpvalueLocation::Closed(value),
        }
    }
}

/// `clock()`: seconds elapsed since this process started, as a float.
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

fn native_clock(_args: &[Value]) -> Value {
    let start = PROCESS_START.get_or_init(Instant::now);
    Value::Number(start.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> InterpretResult {
        let mut vm = Vm::new();
        vm.interpret(source)
    }

    #[test]
    fn arithmetic_and_print_report_ok() {
        assert_eq!(run("print 1 + 2 * 3;"), InterpretResult::Ok);
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        assert_eq!(run("print undefinedThing;"), InterpretResult::RuntimeError);
    }

    #[test]
    fn assigning_undefined_global_rolls_back_the_entry() {
        let mut vm = Vm::new();
        assert_eq!(vm.interpret("x = 1;"), InterpretResult::RuntimeError);
        let key = intern_string(&mut vm.strings, "x");
        assert!(vm.globals.get(&key).is_none());
    }

    #[test]
    fn closures_share_a_captured_upvalue() {
        let source = r#"
            fun makeCounter() {
                var count = 0;
                fun counter() {
                    count = count + 1;
                    return count;
                }
                return counter;
            }
            var counter = makeCounter();
            print counter();
            print counter();
        "#;
        assert_eq!(run(source), InterpretResult::Ok);
    }

    #[test]
    fn deep_recursion_overflows_the_call_stack() {
        let source = r#"
            fun recurse(n) {
                return recurse(n + 1);
            }
            recurse(0);
        "#;
        assert_eq!(run(source), InterpretResult::RuntimeError);
    }

    #[test]
    fn string_concatenation_interns_the_result() {
        assert_eq!(run(r#"print "foo" + "bar";"#), InterpretResult::Ok);
    }
}
