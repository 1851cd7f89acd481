//! Black-box tests against the public host entry contract (`Evaluator::{new, register_native,
//! parse, execute, evaluate}`), exercising it the way an embedder or the CLI would rather than
//! reaching into `reed_core`'s internals the way the in-crate unit tests do.
//!
//! `print`/`println` are external built-ins (spec §1 Non-goals), so each test that needs them
//! registers a minimal pair backed by a shared buffer instead of writing to stdout — mirroring
//! the teacher's own `CollectStringPrint` test harness.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use reed_core::{Arity, Evaluator, HostValue, Value};

fn eval_with_output(source: &str) -> String {
    let output = Rc::new(RefCell::new(String::new()));
    let mut ev = Evaluator::new();
    register_print(&mut ev, Rc::clone(&output));

    let program = Evaluator::parse(source, "test.reed").expect("parse should succeed");
    ev.execute(&program).expect("execution should not error");
    output.take()
}

fn register_print(ev: &mut Evaluator, output: Rc<RefCell<String>>) {
    let print_buf = Rc::clone(&output);
    ev.register_native("print", Arity::Variadic, move |ev, args| {
        for arg in args {
            let s = ev.display(*arg);
            print_buf.borrow_mut().push_str(&s);
        }
        Ok(Value::Nil)
    })
    .unwrap();

    let println_buf = output;
    ev.register_native("println", Arity::Variadic, move |ev, args| {
        let parts: Vec<String> = args.iter().map(|a| ev.display(*a)).collect();
        println_buf.borrow_mut().push_str(&parts.join(" "));
        println_buf.borrow_mut().push('\n');
        Ok(Value::Nil)
    })
    .unwrap();
}

#[test]
fn scenario_1_variable_binding_and_println() {
    let output = eval_with_output("x := 40\ny := x + 2\nprintln(y)");
    assert_eq!(output, "42\n");
}

#[test]
fn scenario_2_recursive_function() {
    let output = eval_with_output("fn fact(n) { if n <= 1 { return 1 } return n * fact(n-1) }\nprintln(fact(5))");
    assert_eq!(output, "120\n");
}

#[test]
fn scenario_3_array_iteration_with_print_has_no_separator() {
    let output = eval_with_output("a := [3,1,2]\nfor x in a { print(x, \" \") }");
    assert_eq!(output, "3 1 2 ");
}

#[test]
fn scenario_4_table_field_assignment_and_multi_arg_println() {
    let output = eval_with_output("t := {a:1,b:2}\nt.a = 10\nprintln(t.a, t.b)");
    assert_eq!(output, "10 2\n");
}

#[test]
fn scenario_5_closure_shares_mutable_captured_state() {
    let output = eval_with_output("fn make() { c := 0\nfn() { c = c + 1\nc } }\nnext := make()\nprintln(next(), next(), next())");
    assert_eq!(output, "1 2 3\n");
}

#[test]
fn scenario_6_defer_runs_after_the_deferring_functions_body() {
    let output = eval_with_output("fn f() { defer println(\"b\"); println(\"a\") }\nf()");
    assert_eq!(output, "a\nb\n");
}

#[test]
fn empty_source_is_a_valid_no_op_program() {
    let mut ev = Evaluator::new();
    let program = Evaluator::parse("", "empty.reed").unwrap();
    assert!(program.statements.is_empty());
    ev.execute(&program).unwrap();
}

#[test]
fn empty_block_array_and_table_literals_evaluate_without_error() {
    let output = eval_with_output("a := []\nt := {}\nif true {}\nprintln(\"ok\")");
    assert_eq!(output, "ok\n");
}

#[test]
fn descending_range_with_crossed_bounds_executes_zero_iterations() {
    let output = eval_with_output("a := 3\ncount := 0\nfor i in a..a-1 { count = count + 1 }\nprintln(count)");
    assert_eq!(output, "0\n");
}

#[test]
fn fixed_arity_native_rejects_wrong_argument_count() {
    let mut ev = Evaluator::new();
    ev.register_native("double", Arity::Fixed(1), |_ev, args| match args {
        [Value::Int(n)] => Ok(Value::Int(n * 2)),
        _ => unreachable!("arity checked by dispatch"),
    })
    .unwrap();

    let program = Evaluator::parse("double(1, 2)", "test.reed").unwrap();
    assert!(ev.execute(&program).is_err());
}

#[test]
fn variadic_native_accepts_any_argument_count() {
    let mut ev = Evaluator::new();
    ev.register_native("sum", Arity::Variadic, |_ev, args| {
        let total: i64 = args
            .iter()
            .map(|v| match v {
                Value::Int(n) => *n,
                _ => 0,
            })
            .sum();
        Ok(Value::Int(total))
    })
    .unwrap();

    let program = Evaluator::parse("result := sum(1, 2, 3, 4)", "test.reed").unwrap();
    ev.execute(&program).unwrap();

    let lookup = reed_core::ast::Expr::new(reed_core::ast::ExprKind::Identifier("result".into()), 0, 0);
    assert_eq!(ev.evaluate(&lookup).unwrap(), HostValue::Int(10));
}

#[test]
fn parse_failure_reports_a_diagnostic_labelled_with_the_file_name() {
    let err = Evaluator::parse("x := ", "broken.reed").unwrap_err();
    assert!(err.message.starts_with("broken.reed: "), "message was: {}", err.message);
}

#[test]
fn runtime_error_surfaces_through_execute() {
    let mut ev = Evaluator::new();
    let program = Evaluator::parse("x := 1 / 0", "test.reed").unwrap();
    let err = ev.execute(&program).unwrap_err();
    assert_eq!(err.kind, reed_core::ErrorKind::Arithmetic);
}

#[test]
fn evaluate_converts_string_values_into_host_value_str() {
    let mut ev = Evaluator::new();
    let program = Evaluator::parse("greeting := \"hi\"", "test.reed").unwrap();
    ev.execute(&program).unwrap();

    let lookup = reed_core::ast::Expr::new(reed_core::ast::ExprKind::Identifier("greeting".into()), 0, 0);
    assert_eq!(ev.evaluate(&lookup).unwrap(), HostValue::Str("hi".to_string()));
}
