// Integration tests for the bytecode VM.
//
// These run complete programs end to end through `Vm::interpret` and check
// the resulting globals or the `InterpretResult` outcome. Tests cover:
// - Arithmetic and string handling
// - Control flow (if/else, while, for)
// - Functions, closures, and upvalue sharing
// - Compile-time and runtime error reporting

use loxvm::errors::InterpretResult;
use loxvm::value::Value;
use loxvm::vm::Vm;

fn run(source: &str) -> Vm {
    let mut vm = Vm::new();
    let result = vm.interpret(source);
    assert_eq!(result, InterpretResult::Ok, "program should run without error");
    vm
}

#[test]
fn arithmetic_respects_precedence() {
    let mut vm = run("var result = 1 + 2 * 3 - 4 / 2;");
    assert_eq!(vm.global("result"), Some(Value::Number(5.0)));
}

#[test]
fn string_concatenation_builds_a_new_string() {
    let mut vm = run(r#"var greeting = "hello, " + "world";"#);
    match vm.global("greeting") {
        Some(Value::Obj(obj)) => assert_eq!(format!("{}", obj), "hello, world"),
        other => panic!("expected a string, got {:?}", other),
    }
}

#[test]
fn while_loop_accumulates() {
    let mut vm = run(
        r#"
        var i = 0;
        var total = 0;
        while (i < 5) {
            total = total + i;
            i = i + 1;
        }
        "#,
    );
    assert_eq!(vm.global("total"), Some(Value::Number(10.0)));
}

#[test]
fn for_loop_counts_to_ten() {
    let mut vm = run(
        r#"
        var sum = 0;
        for (var i = 1; i <= 10; i = i + 1) {
            sum = sum + i;
        }
        "#,
    );
    assert_eq!(vm.global("sum"), Some(Value::Number(55.0)));
}

#[test]
fn closures_capture_and_share_state() {
    let mut vm = run(
        r#"
        fun makeCounter() {
            var count = 0;
            fun increment() {
                count = count + 1;
                return count;
            }
            return increment;
        }

        var counter = makeCounter();
        var first = counter();
        var second = counter();
        var third = counter();
        "#,
    );
    assert_eq!(vm.global("first"), Some(Value::Number(1.0)));
    assert_eq!(vm.global("second"), Some(Value::Number(2.0)));
    assert_eq!(vm.global("third"), Some(Value::Number(3.0)));
}

#[test]
fn recursive_functions_work() {
    let mut vm = run(
        r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        var result = fib(10);
        "#,
    );
    assert_eq!(vm.global("result"), Some(Value::Number(55.0)));
}

#[test]
fn syntax_error_is_reported_as_a_compile_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("var x = ;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn calling_a_non_callable_value_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("var notAFunction = 1; notAFunction();");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret(
        r#"
        fun needsTwo(a, b) { return a + b; }
        needsTwo(1);
        "#,
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn clock_returns_a_nonnegative_number() {
    let mut vm = run("var t = clock();");
    match vm.global("t") {
        Some(Value::Number(n)) => assert!(n >= 0.0),
        other => panic!("expected a number, got {:?}", other),
    }
}
