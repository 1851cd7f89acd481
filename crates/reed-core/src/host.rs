//! The stable, small surface embedders compile against instead of reaching into the evaluator's
//! internal heap/environment state directly.
//!
//! Mirrors the teacher's `Runner`/`Executor` split in `run.rs`: construct, then drive, getting a
//! `Result` back at every step rather than a panic crossing the boundary. `Runner` there owns a
//! compiled `Executor` and exposes `run`/`start`; here `Evaluator` plays both parts, since this
//! interpreter has no bytecode stage to separate from execution.

use crate::ast::Program;
use crate::error::{Diagnostic, Result};
use crate::eval::Evaluator;
use crate::value::Value;

impl Evaluator {
    /// Renders a value the way `print`/`println` do: scalars and strings in full, everything else
    /// as `<kind>` (e.g. `<array>`). Exposed so a host's native functions can format arguments
    /// without reaching into the evaluator's internal `Value`/heap representation.
    pub fn display(&mut self, value: Value) -> String {
        self.stringify(value)
    }

    /// Parses `source` into a program, labelling any diagnostic with `file_name`.
    ///
    /// The parser recovers from errors at statement boundaries and can collect several for one
    /// source (see [`Evaluator::parse_all`]); a host contract built on plain `Result` can only
    /// carry one `Diagnostic`; so this reports the first and discards the rest. Callers that want
    /// every parse error at once — the CLI, to print a full error listing before giving up —
    /// should call [`Evaluator::parse_all`] instead.
    pub fn parse(source: &str, file_name: &str) -> Result<Program> {
        let (program, mut diagnostics) = Self::parse_all(source);
        if diagnostics.is_empty() {
            return Ok(program);
        }
        let mut first = diagnostics.remove(0);
        first.message = format!("{file_name}: {}", first.message);
        Err(first)
    }

    /// Allocates a new array holding `items`, taking one reference to each.
    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        self.make_array(items)
    }

    /// Allocates a new string.
    pub fn new_string(&mut self, s: impl Into<String>) -> Value {
        self.make_string(s.into())
    }

    /// Declares a C struct layout named `name` from `(field name, C type name)` pairs — type
    /// names like `"int"`, `"double"`, `"char*"` — and allocates a zero-initialised instance.
    /// `None` if a type name isn't recognized. Field access from script code (`value.field`,
    /// `value.field = x`) then resolves against the declared layout.
    pub fn new_struct(&mut self, name: impl Into<String>, fields: &[(&str, &str)]) -> Option<Value> {
        self.make_struct(name.into(), fields)
    }

    /// Returns a copy of `value`'s characters if it's a string, `None` otherwise.
    pub fn as_str(&self, value: Value) -> Option<String> {
        self.str_contents(value)
    }

    /// `len()`: strings count characters, arrays and tables count entries, anything else is `None`.
    pub fn len_of(&self, value: Value) -> Option<i64> {
        self.length_of(value)
    }

    /// `type()`: the name of `value`'s runtime type.
    pub fn type_name(&self, value: Value) -> &'static str {
        self.type_name_of(value)
    }

    /// `push(array, item)`. Returns `false` if `array` isn't actually an array.
    pub fn push(&mut self, array: Value, item: Value) -> bool {
        self.array_push(array, item)
    }

    /// `pop(array)`: removes and returns the last element.
    pub fn pop(&mut self, array: Value) -> Option<Value> {
        self.array_pop(array)
    }

    /// `first(array)`.
    pub fn first(&self, array: Value) -> Option<Value> {
        self.array_first(array)
    }

    /// Every element of `array`, in order, for hosts that need to iterate one fully (e.g. `join`).
    pub fn items(&self, array: Value) -> Option<Vec<Value>> {
        self.array_items(array)
    }

    /// `last(array)`.
    pub fn last(&self, array: Value) -> Option<Value> {
        self.array_last(array)
    }

    /// `insert(array, index, item)`. Returns `false` on an out-of-range index or a non-array.
    pub fn insert(&mut self, array: Value, index: i64, item: Value) -> bool {
        self.array_insert(array, index, item)
    }

    /// `remove(array, index)`: removes and returns the element at `index`.
    pub fn remove(&mut self, array: Value, index: i64) -> Option<Value> {
        self.array_remove(array, index)
    }

    /// `keys(table)`: an array of the table's field names, as strings.
    pub fn keys(&mut self, table: Value) -> Option<Value> {
        self.table_keys(table)
    }

    /// `values(table)`: an array of the table's field values.
    pub fn values(&mut self, table: Value) -> Option<Value> {
        self.table_values(table)
    }

    /// `has(table, key)`.
    pub fn has(&self, table: Value, key: &str) -> bool {
        self.table_has(table, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reports_first_diagnostic_labelled_with_file_name() {
        let err = Evaluator::parse("x := ", "script.reed").unwrap_err();
        assert!(err.message.starts_with("script.reed: "));
    }

    #[test]
    fn parse_returns_program_on_success() {
        let program = Evaluator::parse("x := 1", "script.reed").unwrap();
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn end_to_end_register_parse_execute_evaluate() {
        use crate::ast::{Expr, ExprKind};
        use crate::eval::{Arity, HostValue};
        use crate::value::Value;

        let mut ev = Evaluator::new();
        ev.register_native("double", Arity::Fixed(1), |_ev, args| match args {
            [Value::Int(n)] => Ok(Value::Int(n * 2)),
            _ => unreachable!("arity checked by dispatch"),
        })
        .unwrap();

        let program = Evaluator::parse("result := double(21)", "inline").unwrap();
        ev.execute(&program).unwrap();

        let lookup = Expr::new(ExprKind::Identifier("result".into()), 0, 0);
        assert_eq!(ev.evaluate(&lookup).unwrap(), HostValue::Int(42));
    }
}
