//! Error taxonomy for the front end, evaluator, and native bridge.
//!
//! Every fallible operation in `reed-core` returns a [`Diagnostic`]: a flat `(kind, message, line,
//! column)` record. There is no exception hierarchy (spec.md §7 lists error *kinds*, not types), so a
//! single carrier type is enough; callers distinguish cases by matching on [`Diagnostic::kind`].

use std::fmt;

use strum::Display;

/// Coarse category a [`Diagnostic`] belongs to, matching spec.md §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Unterminated string, illegal character.
    Lex,
    /// Unexpected token; recovered via statement-level synchronisation.
    Parse,
    /// Undefined variable, duplicate declaration in a scope.
    Name,
    /// Wrong operand kind, non-callable call, non-array iteration, non-integer index, non-string key.
    Type,
    /// Out-of-bounds array or string index.
    Index,
    /// Division or modulo by zero.
    Arithmetic,
    /// File not found, parse failure, symbol not found.
    Import,
    /// ABI preparation failure, marshal failure, wrong argument count.
    Foreign,
}

/// A single diagnostic: what went wrong, where, and in what category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self { kind, message: message.into(), line, column }
    }

    /// Constructs a diagnostic with no meaningful column (most runtime errors only track a line).
    #[must_use]
    pub fn at_line(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self::new(kind, message, line, 0)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error at line {}: {}", self.kind, self.line, self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Result alias used throughout `reed-core`.
pub type Result<T> = std::result::Result<T, Diagnostic>;
