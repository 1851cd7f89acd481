//! Precedence-climbing parser turning a token stream into a [`Program`].
//!
//! Newlines are insignificant: [`Parser::advance`] swallows them the same way the lexer's
//! line-comment skipping works, so the grammar never has to special-case statement terminators.
//! Errors do not abort parsing — [`Parser::parse_program`] collects every [`Diagnostic`] and
//! resynchronises at the next statement-starting keyword, the way a panic-mode recursive-descent
//! parser recovers from a single bad statement without losing the rest of the file.

use crate::ast::{BinOp, Expr, ExprKind, MatchArm, Program, Stmt, StmtKind, TableEntry, UnOp};
use crate::error::{Diagnostic, ErrorKind};
use crate::lexer::{Lexer, unescape};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Range,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

fn infix_prec(kind: TokenKind) -> Prec {
    match kind {
        TokenKind::Or => Prec::Or,
        TokenKind::And => Prec::And,
        TokenKind::EqEq | TokenKind::NotEq => Prec::Equality,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => Prec::Comparison,
        TokenKind::DotDot => Prec::Range,
        TokenKind::Plus | TokenKind::Minus => Prec::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Prec::Factor,
        TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot => Prec::Call,
        _ => Prec::None,
    }
}

fn binop_from(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::EqEq => BinOp::Eq,
        TokenKind::NotEq => BinOp::NotEq,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::LtEq => BinOp::LtEq,
        TokenKind::GtEq => BinOp::GtEq,
        TokenKind::And => BinOp::And,
        TokenKind::Or => BinOp::Or,
        _ => return None,
    })
}

/// Statement-starting keywords `synchronize` resumes at after a parse error.
fn is_sync_point(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Fn
            | TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::Return
            | TokenKind::Match
            | TokenKind::Defer
    )
}

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    errors: Vec<Diagnostic>,
    panic_mode: bool,
}

impl<'src> Parser<'src> {
    #[must_use]
    pub fn new(src: &'src str) -> Self {
        let mut lexer = Lexer::new(src);
        let mut errors = Vec::new();
        let first = Self::first_real_token(&mut lexer, &mut errors);
        Self { lexer, previous: first, current: first, errors, panic_mode: false }
    }

    fn first_real_token(lexer: &mut Lexer<'src>, errors: &mut Vec<Diagnostic>) -> Token<'src> {
        loop {
            let tok = lexer.next_token();
            match tok.kind {
                TokenKind::Newline => continue,
                TokenKind::Error => {
                    errors.push(Diagnostic::new(ErrorKind::Lex, format!("unexpected token '{}'", tok.text), tok.line, tok.column));
                    continue;
                }
                _ => return tok,
            }
        }
    }

    /// Parses the whole source buffer, returning every top-level statement parsed plus every
    /// [`Diagnostic`] raised; a non-empty error list does not imply an empty statement list,
    /// since parsing continues after each error via [`Self::synchronize`].
    pub fn parse_program(mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.statement() {
                statements.push(stmt);
            }
            if self.panic_mode {
                self.synchronize();
            }
        }
        (Program { statements }, self.errors)
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if is_sync_point(self.current.kind) {
                return;
            }
            self.advance();
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            let tok = self.lexer.next_token();
            match tok.kind {
                TokenKind::Newline => continue,
                TokenKind::Error => {
                    self.error_at_current(&format!("unexpected token '{}'", tok.text));
                    continue;
                }
                _ => {
                    self.current = tok;
                    break;
                }
            }
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(Diagnostic::new(ErrorKind::Parse, message, token.line, token.column));
    }

    // ---- expressions ----

    fn expression(&mut self) -> Expr {
        self.precedence(Prec::Assignment)
    }

    fn precedence(&mut self, min_prec: Prec) -> Expr {
        self.advance();
        let mut left = match self.prefix() {
            Some(expr) => expr,
            None => {
                self.error("expected expression");
                Expr::new(ExprKind::Nil, self.previous.line, self.previous.column)
            }
        };

        while min_prec <= infix_prec(self.current.kind) {
            self.advance();
            left = self.infix(left);
        }
        left
    }

    fn prefix(&mut self) -> Option<Expr> {
        let tok = self.previous;
        match tok.kind {
            TokenKind::Int => Some(self.int_literal(tok)),
            TokenKind::Float => Some(self.float_literal(tok)),
            TokenKind::Str => Some(Expr::new(ExprKind::Str(unescape(&tok.text[1..tok.text.len() - 1])), tok.line, tok.column)),
            TokenKind::True => Some(Expr::new(ExprKind::Bool(true), tok.line, tok.column)),
            TokenKind::False => Some(Expr::new(ExprKind::Bool(false), tok.line, tok.column)),
            TokenKind::Nil => Some(Expr::new(ExprKind::Nil, tok.line, tok.column)),
            TokenKind::Identifier | TokenKind::Underscore => {
                Some(Expr::new(ExprKind::Identifier(tok.text.to_string()), tok.line, tok.column))
            }
            TokenKind::LParen => {
                let inner = self.expression();
                self.consume(TokenKind::RParen, "expected ')' after expression");
                Some(inner)
            }
            TokenKind::Minus => {
                let operand = self.precedence(Prec::Unary);
                Some(Expr::new(ExprKind::Unary { op: UnOp::Neg, operand: Box::new(operand) }, tok.line, tok.column))
            }
            TokenKind::Not => {
                let operand = self.precedence(Prec::Unary);
                Some(Expr::new(ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) }, tok.line, tok.column))
            }
            TokenKind::Amp => {
                let operand = self.precedence(Prec::Unary);
                Some(Expr::new(ExprKind::AddressOf(Box::new(operand)), tok.line, tok.column))
            }
            TokenKind::LBracket => Some(self.array_literal(tok)),
            TokenKind::LBrace => Some(self.table_literal(tok)),
            TokenKind::Fn => Some(self.lambda_expr(tok)),
            _ => None,
        }
    }

    fn infix(&mut self, left: Expr) -> Expr {
        let tok = self.previous;
        match tok.kind {
            TokenKind::LParen => self.call(left, tok),
            TokenKind::LBracket => self.index(left, tok),
            TokenKind::Dot => self.field(left, tok),
            TokenKind::DotDot => {
                let right = self.precedence(Prec::Range.next());
                Expr::new(ExprKind::Range { start: Box::new(left), end: Box::new(right) }, tok.line, tok.column)
            }
            _ => {
                let Some(op) = binop_from(tok.kind) else {
                    self.error("unexpected operator");
                    return left;
                };
                let prec = infix_prec(tok.kind);
                let right = self.precedence(prec.next());
                Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, tok.line, tok.column)
            }
        }
    }

    fn int_literal(&mut self, tok: Token<'src>) -> Expr {
        let cleaned: String = tok.text.chars().filter(|c| *c != '_').collect();
        let value = if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).unwrap_or(0)
        } else {
            cleaned.parse().unwrap_or(0)
        };
        Expr::new(ExprKind::Int(value), tok.line, tok.column)
    }

    fn float_literal(&mut self, tok: Token<'src>) -> Expr {
        let cleaned: String = tok.text.chars().filter(|c| *c != '_').collect();
        Expr::new(ExprKind::Float(cleaned.parse().unwrap_or(0.0)), tok.line, tok.column)
    }

    fn call(&mut self, callee: Expr, tok: Token<'src>) -> Expr {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.expression());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after arguments");
        Expr::new(ExprKind::Call { callee: Box::new(callee), args }, tok.line, tok.column)
    }

    fn index(&mut self, object: Expr, tok: Token<'src>) -> Expr {
        let index = self.expression();
        self.consume(TokenKind::RBracket, "expected ']' after index");
        Expr::new(ExprKind::Index { object: Box::new(object), index: Box::new(index) }, tok.line, tok.column)
    }

    fn field(&mut self, object: Expr, tok: Token<'src>) -> Expr {
        self.consume(TokenKind::Identifier, "expected field name after '.'");
        let name = self.previous.text.to_string();
        Expr::new(ExprKind::Field { object: Box::new(object), name }, tok.line, tok.column)
    }

    fn array_literal(&mut self, tok: Token<'src>) -> Expr {
        let mut elements = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                if self.check(TokenKind::RBracket) {
                    break;
                }
                elements.push(self.expression());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBracket, "expected ']' after array elements");
        Expr::new(ExprKind::Array(elements), tok.line, tok.column)
    }

    fn table_literal(&mut self, tok: Token<'src>) -> Expr {
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                if self.check(TokenKind::RBrace) {
                    break;
                }
                self.consume(TokenKind::Identifier, "expected key name");
                let key = self.previous.text.to_string();
                self.consume(TokenKind::Colon, "expected ':' after key");
                let value = self.expression();
                entries.push(TableEntry { key, value });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected '}' after table entries");
        Expr::new(ExprKind::Table(entries), tok.line, tok.column)
    }

    /// Parses an anonymous function appearing in expression position. A named `fn` only ever
    /// appears at statement start, where [`Self::fn_decl_stmt`] handles it instead.
    fn lambda_expr(&mut self, tok: Token<'src>) -> Expr {
        self.consume(TokenKind::LParen, "expected '(' after 'fn'");
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expected parameter name");
                params.push(self.previous.text.to_string());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters");

        if self.matches(TokenKind::Arrow) {
            self.advance();
        }

        self.consume(TokenKind::LBrace, "expected '{' before function body");
        let body = self.block();
        Expr::new(ExprKind::Lambda { params, body: Box::new(body) }, tok.line, tok.column)
    }

    // ---- statements ----

    fn block(&mut self) -> Stmt {
        let tok = self.previous;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.statement() {
                statements.push(stmt);
            }
            if self.panic_mode {
                self.synchronize();
            }
        }
        self.consume(TokenKind::RBrace, "expected '}' after block");
        Stmt::new(StmtKind::Block(statements), tok.line, tok.column)
    }

    fn statement(&mut self) -> Option<Stmt> {
        if self.check(TokenKind::Eof) {
            return None;
        }

        if self.check(TokenKind::Identifier) {
            let name_tok = self.current;
            let peeked = self.lexer.peek_token();
            if peeked.kind == TokenKind::ColonEq {
                self.advance(); // identifier
                self.advance(); // :=
                let init = self.expression();
                return Some(Stmt::new(
                    StmtKind::VarDecl { name: name_tok.text.to_string(), init: Some(init), is_const: false },
                    name_tok.line,
                    name_tok.column,
                ));
            }
            if peeked.kind == TokenKind::ColonColon {
                self.advance();
                self.advance();
                let init = self.expression();
                return Some(Stmt::new(
                    StmtKind::VarDecl { name: name_tok.text.to_string(), init: Some(init), is_const: true },
                    name_tok.line,
                    name_tok.column,
                ));
            }
        }

        if self.matches(TokenKind::If) {
            return Some(self.if_stmt());
        }
        if self.matches(TokenKind::While) {
            return Some(self.while_stmt());
        }
        if self.matches(TokenKind::For) {
            return Some(self.for_stmt());
        }
        if self.matches(TokenKind::Return) {
            return Some(self.return_stmt());
        }
        if self.matches(TokenKind::Break) {
            return Some(Stmt::new(StmtKind::Break, self.previous.line, self.previous.column));
        }
        if self.matches(TokenKind::Continue) {
            return Some(Stmt::new(StmtKind::Continue, self.previous.line, self.previous.column));
        }
        if self.matches(TokenKind::Match) {
            return Some(self.match_stmt());
        }
        if self.matches(TokenKind::Defer) {
            let tok = self.previous;
            let inner = self.statement()?;
            return Some(Stmt::new(StmtKind::Defer(Box::new(inner)), tok.line, tok.column));
        }
        if self.matches(TokenKind::Fn) {
            let tok = self.previous;
            return Some(if self.check(TokenKind::Identifier) {
                self.fn_decl_stmt(tok)
            } else {
                let lambda = self.lambda_expr(tok);
                Stmt::new(StmtKind::Expr(lambda), tok.line, tok.column)
            });
        }
        if self.matches(TokenKind::At) {
            return Some(self.directive());
        }

        let start = self.current;
        let expr = self.expression();
        if self.matches(TokenKind::Eq) {
            let value = self.expression();
            return Some(Stmt::new(StmtKind::Assign { target: expr, value }, start.line, start.column));
        }
        Some(Stmt::new(StmtKind::Expr(expr), start.line, start.column))
    }

    fn fn_decl_stmt(&mut self, tok: Token<'src>) -> Stmt {
        self.advance();
        let name = self.previous.text.to_string();
        self.consume(TokenKind::LParen, "expected '(' after function name");
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expected parameter name");
                params.push(self.previous.text.to_string());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters");
        if self.matches(TokenKind::Arrow) {
            self.advance();
        }
        self.consume(TokenKind::LBrace, "expected '{' before function body");
        let body = self.block();
        Stmt::new(StmtKind::FnDecl { name, params, body: Box::new(body) }, tok.line, tok.column)
    }

    fn if_stmt(&mut self) -> Stmt {
        let tok = self.previous;
        let cond = self.expression();
        self.consume(TokenKind::LBrace, "expected '{' after if condition");
        let then_branch = self.block();

        let else_branch = if self.matches(TokenKind::Elif) {
            Some(Box::new(self.if_stmt()))
        } else if self.matches(TokenKind::Else) {
            self.consume(TokenKind::LBrace, "expected '{' after else");
            Some(Box::new(self.block()))
        } else {
            None
        };

        Stmt::new(StmtKind::If { cond, then_branch: Box::new(then_branch), else_branch }, tok.line, tok.column)
    }

    fn while_stmt(&mut self) -> Stmt {
        let tok = self.previous;
        let cond = self.expression();
        self.consume(TokenKind::LBrace, "expected '{' after while condition");
        let body = self.block();
        Stmt::new(StmtKind::While { cond, body: Box::new(body) }, tok.line, tok.column)
    }

    fn for_stmt(&mut self) -> Stmt {
        let tok = self.previous;
        self.consume(TokenKind::Identifier, "expected iterator name");
        let binding = self.previous.text.to_string();
        self.consume(TokenKind::In, "expected 'in' after iterator");
        let iterable = self.expression();
        self.consume(TokenKind::LBrace, "expected '{' after for iterable");
        let body = self.block();
        Stmt::new(StmtKind::For { binding, iterable, body: Box::new(body) }, tok.line, tok.column)
    }

    fn return_stmt(&mut self) -> Stmt {
        let tok = self.previous;
        let value = if self.check(TokenKind::RBrace) || self.check(TokenKind::Eof) { None } else { Some(self.expression()) };
        Stmt::new(StmtKind::Return(value), tok.line, tok.column)
    }

    fn match_stmt(&mut self) -> Stmt {
        let tok = self.previous;
        let scrutinee = self.expression();
        self.consume(TokenKind::LBrace, "expected '{' after match value");

        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let arm_tok = self.current;
            let pattern = if self.matches(TokenKind::Underscore) { None } else { Some(self.expression()) };
            self.consume(TokenKind::FatArrow, "expected '=>' after pattern");
            let body = if self.check(TokenKind::LBrace) {
                self.advance();
                self.block()
            } else {
                let e = self.expression();
                Stmt::new(StmtKind::Expr(e), arm_tok.line, arm_tok.column)
            };
            arms.push(MatchArm { pattern, body, line: arm_tok.line });
            self.matches(TokenKind::Comma);
        }
        self.consume(TokenKind::RBrace, "expected '}' after match arms");
        Stmt::new(StmtKind::Match { scrutinee, arms }, tok.line, tok.column)
    }

    fn directive(&mut self) -> Stmt {
        let tok = self.previous;
        if self.check(TokenKind::Identifier) {
            match self.current.text {
                "import" => {
                    self.advance();
                    self.consume(TokenKind::Str, "expected import path string");
                    let raw = self.previous.text;
                    let path = raw[1..raw.len() - 1].to_string();
                    return Stmt::new(StmtKind::Import { path }, tok.line, tok.column);
                }
                "c" => {
                    self.advance();
                    self.consume(TokenKind::LBrace, "expected '{' after @c");
                    let code = self.capture_c_block();
                    return Stmt::new(StmtKind::CBlock { code }, tok.line, tok.column);
                }
                _ => {}
            }
        }
        self.error("unknown directive");
        Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Nil, tok.line, tok.column)), tok.line, tok.column)
    }

    /// Raw-captures everything up to the matching closing brace, honoring nested braces, the
    /// same way the front end defers `@c{}` bodies without attempting to tokenize them as script.
    fn capture_c_block(&mut self) -> String {
        let mut depth = 1;
        let mut code = String::new();
        loop {
            if self.current.kind == TokenKind::Eof {
                self.error_at_current("unterminated @c block");
                break;
            }
            if self.current.kind == TokenKind::LBrace {
                depth += 1;
            } else if self.current.kind == TokenKind::RBrace {
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    break;
                }
            }
            if !code.is_empty() {
                code.push(' ');
            }
            code.push_str(self.current.text);
            self.advance();
        }
        code
    }
}

impl Prec {
    fn next(self) -> Self {
        match self {
            Prec::None => Prec::Assignment,
            Prec::Assignment => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Equality,
            Prec::Equality => Prec::Comparison,
            Prec::Comparison => Prec::Range,
            Prec::Range => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary => Prec::Call,
            Prec::Call => Prec::Primary,
            Prec::Primary => Prec::Primary,
        }
    }
}

/// Parses a full program, returning the AST plus any diagnostics raised.
#[must_use]
pub fn parse(src: &str) -> (Program, Vec<Diagnostic>) {
    Parser::new(src).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let (program, errors) = parse(src);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        program
    }

    #[test]
    fn parses_var_and_const_decl() {
        let program = parse_ok("x := 1\ny :: 2\n");
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0].kind, StmtKind::VarDecl { is_const: false, .. }));
        assert!(matches!(program.statements[1].kind, StmtKind::VarDecl { is_const: true, .. }));
    }

    #[test]
    fn binary_precedence_matches_arithmetic() {
        let program = parse_ok("x := 1 + 2 * 3\n");
        let StmtKind::VarDecl { init: Some(expr), .. } = &program.statements[0].kind else { panic!() };
        let ExprKind::Binary { op: BinOp::Add, right, .. } = &expr.kind else { panic!("expected top-level add") };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_if_elif_else_chain() {
        let program = parse_ok("if x { y } elif z { w } else { v }\n");
        let StmtKind::If { else_branch: Some(elif), .. } = &program.statements[0].kind else { panic!() };
        assert!(matches!(elif.kind, StmtKind::If { .. }));
    }

    #[test]
    fn parses_call_index_and_field_chain() {
        let program = parse_ok("f(1, 2).name[0]\n");
        let StmtKind::Expr(expr) = &program.statements[0].kind else { panic!() };
        assert!(matches!(expr.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn parses_fn_decl_vs_lambda() {
        let program = parse_ok("fn add(a, b) { return a + b }\nfn(x) { x }\n");
        assert!(matches!(program.statements[0].kind, StmtKind::FnDecl { .. }));
        assert!(matches!(program.statements[1].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn parses_match_with_wildcard() {
        let program = parse_ok("match x { 1 => a, _ => b }\n");
        let StmtKind::Match { arms, .. } = &program.statements[0].kind else { panic!() };
        assert_eq!(arms.len(), 2);
        assert!(arms[1].pattern.is_none());
    }

    #[test]
    fn recovers_after_parse_error() {
        let (program, errors) = parse(")\nx := 1\n");
        assert!(!errors.is_empty());
        assert!(program.statements.iter().any(|s| matches!(s.kind, StmtKind::VarDecl { .. })));
    }

    #[test]
    fn parses_c_block_capturing_raw_code() {
        let program = parse_ok("@c { int x = { 1 }; }\n");
        assert!(matches!(program.statements[0].kind, StmtKind::CBlock { .. }));
    }
}
