//! Recursive-descent parser producing the sum-type AST.
//!
//! The grammar is a Python subset wide enough that dangerous statements
//! (`import`, `with`, `try`, `class`, ...) parse successfully and reach the
//! analyzer, which rejects them by category with a targeted message.
//! Anything outside the grammar is a plain syntax error.

use crate::ast::*;
use crate::errors::{Result, SandboxError};
use crate::lexer::{Lexer, Token, TokenKind};

/// Parse source text in module mode.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.matches(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ---- token plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!(
                "expected {} {}, found {}",
                kind.describe(),
                context,
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!(
                "expected identifier {}, found {}",
                context,
                other.describe()
            ))),
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Syntax { line: self.line(), message: message.into() }
    }

    fn can_start_expr(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Ident(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
        )
    }

    // ---- statements -----------------------------------------------------

    /// One logical statement line; simple statements may be `;`-chained.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        match self.peek_kind() {
            TokenKind::If => Ok(vec![self.parse_if()?]),
            TokenKind::While => Ok(vec![self.parse_while()?]),
            TokenKind::For => Ok(vec![self.parse_for()?]),
            TokenKind::Def => Ok(vec![self.parse_def()?]),
            TokenKind::With => Ok(vec![self.parse_with()?]),
            TokenKind::Try => Ok(vec![self.parse_try()?]),
            TokenKind::Class => Ok(vec![self.parse_class()?]),
            _ => self.parse_simple_stmt_line(),
        }
    }

    fn parse_simple_stmt_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple_stmt()?];
        while self.matches(&TokenKind::Semicolon) {
            if self.check(&TokenKind::Newline) || self.check(&TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_simple_stmt()?);
        }
        self.end_of_line()?;
        Ok(stmts)
    }

    fn end_of_line(&mut self) -> Result<()> {
        if self.matches(&TokenKind::Newline) || self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error(format!(
                "unexpected {} at end of statement",
                self.peek_kind().describe()
            )))
        }
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let line = self.line();
        match self.peek_kind() {
            TokenKind::Return => {
                self.advance();
                let value = if self.can_start_expr() {
                    Some(self.parse_testlist()?)
                } else {
                    None
                };
                Ok(Stmt::Return { value, line })
            }
            TokenKind::Pass => {
                self.advance();
                Ok(Stmt::Pass { line })
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break { line })
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::Continue { line })
            }
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_import_from(),
            TokenKind::Del => {
                self.advance();
                let target = self.parse_testlist()?;
                Ok(Stmt::Del { targets: vec![target], line })
            }
            TokenKind::Raise => {
                self.advance();
                let exc = if self.can_start_expr() {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt::Raise { exc, line })
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let msg = if self.matches(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt::Assert { test, msg, line })
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_ident("after 'global'")?];
                while self.matches(&TokenKind::Comma) {
                    names.push(self.expect_ident("after ','")?);
                }
                Ok(Stmt::Global { names, line })
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt> {
        let line = self.line();
        let first = self.parse_testlist()?;
        match self.peek_kind() {
            TokenKind::Assign => {
                let mut targets = vec![first];
                let mut value = {
                    self.advance();
                    self.parse_testlist()?
                };
                while self.check(&TokenKind::Assign) {
                    self.advance();
                    targets.push(value);
                    value = self.parse_testlist()?;
                }
                Ok(Stmt::Assign { targets, value, line })
            }
            TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign => {
                let op = match self.advance().kind {
                    TokenKind::PlusAssign => BinOpKind::Add,
                    TokenKind::MinusAssign => BinOpKind::Sub,
                    TokenKind::StarAssign => BinOpKind::Mul,
                    _ => BinOpKind::Div,
                };
                let value = self.parse_testlist()?;
                Ok(Stmt::AugAssign { target: first, op, value, line })
            }
            _ => Ok(Stmt::Expr { value: first, line }),
        }
    }

    fn parse_import(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let mut names = vec![self.parse_dotted_name()?];
        if self.matches(&TokenKind::As) {
            self.expect_ident("after 'as'")?;
        }
        while self.matches(&TokenKind::Comma) {
            names.push(self.parse_dotted_name()?);
            if self.matches(&TokenKind::As) {
                self.expect_ident("after 'as'")?;
            }
        }
        Ok(Stmt::Import { names, line })
    }

    fn parse_import_from(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let module = self.parse_dotted_name()?;
        self.expect(&TokenKind::Import, "in from-import")?;
        let mut names = Vec::new();
        if self.matches(&TokenKind::Star) {
            names.push("*".to_string());
        } else {
            names.push(self.expect_ident("in import list")?);
            if self.matches(&TokenKind::As) {
                self.expect_ident("after 'as'")?;
            }
            while self.matches(&TokenKind::Comma) {
                names.push(self.expect_ident("in import list")?);
                if self.matches(&TokenKind::As) {
                    self.expect_ident("after 'as'")?;
                }
            }
        }
        Ok(Stmt::ImportFrom { module, names, line })
    }

    fn parse_dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_ident("in module path")?;
        while self.matches(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident("in module path")?);
        }
        Ok(name)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "after if condition")?;
        let body = self.parse_suite()?;
        let orelse = if self.check(&TokenKind::Elif) {
            // Reuse the if parser: elif desugars to a nested if.
            self.tokens[self.pos].kind = TokenKind::If;
            vec![self.parse_if()?]
        } else if self.matches(&TokenKind::Else) {
            self.expect(&TokenKind::Colon, "after else")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If { test, body, orelse, line })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "after while condition")?;
        let body = self.parse_suite()?;
        Ok(Stmt::While { test, body, line })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In, "in for loop")?;
        let iter = self.parse_testlist()?;
        self.expect(&TokenKind::Colon, "after for header")?;
        let body = self.parse_suite()?;
        Ok(Stmt::For { target, iter, body, line })
    }

    fn parse_def(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_ident("after 'def'")?;
        self.expect(&TokenKind::LParen, "after function name")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            params.push(self.expect_ident("in parameter list")?);
            if self.check(&TokenKind::Assign) || self.check(&TokenKind::Star) {
                return Err(self.error("default values and starred parameters are not supported"));
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "after parameters")?;
        self.expect(&TokenKind::Colon, "after function signature")?;
        let body = self.parse_suite()?;
        Ok(Stmt::FunctionDef { name, params, body, line })
    }

    fn parse_with(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let mut items = vec![self.parse_expr()?];
        if self.matches(&TokenKind::As) {
            self.parse_target_list()?;
        }
        while self.matches(&TokenKind::Comma) {
            items.push(self.parse_expr()?);
            if self.matches(&TokenKind::As) {
                self.parse_target_list()?;
            }
        }
        self.expect(&TokenKind::Colon, "after with items")?;
        let body = self.parse_suite()?;
        Ok(Stmt::With { items, body, line })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::Colon, "after try")?;
        let body = self.parse_suite()?;
        let mut handlers = Vec::new();
        while self.matches(&TokenKind::Except) {
            if self.can_start_expr() {
                self.parse_expr()?;
                if self.matches(&TokenKind::As) {
                    self.expect_ident("after 'as'")?;
                }
            }
            self.expect(&TokenKind::Colon, "after except clause")?;
            handlers.push(self.parse_suite()?);
        }
        let orelse = if self.matches(&TokenKind::Else) {
            self.expect(&TokenKind::Colon, "after else")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        let finalbody = if self.matches(&TokenKind::Finally) {
            self.expect(&TokenKind::Colon, "after finally")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("try statement needs an except or finally clause"));
        }
        Ok(Stmt::Try { body, handlers, orelse, finalbody, line })
    }

    fn parse_class(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_ident("after 'class'")?;
        if self.matches(&TokenKind::LParen) {
            while !self.check(&TokenKind::RParen) {
                self.parse_expr()?;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "after base classes")?;
        }
        self.expect(&TokenKind::Colon, "after class header")?;
        let body = self.parse_suite()?;
        Ok(Stmt::ClassDef { name, body, line })
    }

    /// Block after a colon: inline simple statements, or an indented suite.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>> {
        if self.matches(&TokenKind::Newline) {
            self.expect(&TokenKind::Indent, "to open block")?;
            let mut body = Vec::new();
            while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
                if self.matches(&TokenKind::Newline) {
                    continue;
                }
                body.extend(self.parse_statement()?);
            }
            self.expect(&TokenKind::Dedent, "to close block")?;
            if body.is_empty() {
                return Err(self.error("empty block"));
            }
            Ok(body)
        } else {
            self.parse_simple_stmt_line()
        }
    }

    /// Assignment/loop targets: names, attributes, subscripts, or a
    /// comma list of them. Parsed below the comparison level so the `in`
    /// of a for header or comprehension is not swallowed as an operator.
    fn parse_target_list(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_postfix()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.matches(&TokenKind::Comma) {
            if !self.can_start_expr() {
                break;
            }
            elts.push(self.parse_postfix()?);
        }
        Ok(Expr::Tuple { elts, line })
    }

    // ---- expressions ----------------------------------------------------

    /// `expr (',' expr)*`; a bare comma list becomes a tuple.
    fn parse_testlist(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_expr()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.matches(&TokenKind::Comma) {
            if !self.can_start_expr() {
                break;
            }
            elts.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple { elts, line })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let line = self.line();
        let body = self.parse_or()?;
        if self.matches(&TokenKind::If) {
            let test = self.parse_or()?;
            self.expect(&TokenKind::Else, "in conditional expression")?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
                line,
            });
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> Result<Expr> {
        let line = self.line();
        self.advance();
        let mut params = Vec::new();
        while !self.check(&TokenKind::Colon) {
            params.push(self.expect_ident("in lambda parameters")?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Colon, "after lambda parameters")?;
        let body = self.parse_expr()?;
        Ok(Expr::Lambda { params, body: Box::new(body), line })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_and()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.matches(&TokenKind::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp { op: BoolOpKind::Or, values, line })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_not()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.matches(&TokenKind::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp { op: BoolOpKind::And, values, line })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        let line = self.line();
        if self.matches(&TokenKind::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp { op: UnaryOpKind::Not, operand: Box::new(operand), line });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let line = self.line();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CmpOpKind::Eq,
                TokenKind::NotEq => CmpOpKind::NotEq,
                TokenKind::Lt => CmpOpKind::Lt,
                TokenKind::LtE => CmpOpKind::LtE,
                TokenKind::Gt => CmpOpKind::Gt,
                TokenKind::GtE => CmpOpKind::GtE,
                TokenKind::In => CmpOpKind::In,
                TokenKind::Is => {
                    self.advance();
                    let op = if self.matches(&TokenKind::Not) {
                        CmpOpKind::IsNot
                    } else {
                        CmpOpKind::Is
                    };
                    ops.push(op);
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                TokenKind::Not if *self.peek_ahead(1) == TokenKind::In => {
                    self.advance();
                    self.advance();
                    ops.push(CmpOpKind::NotIn);
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare { left: Box::new(left), ops, comparators, line })
        }
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bitand()?;
        while self.check(&TokenKind::Pipe) {
            let line = self.line();
            self.advance();
            let right = self.parse_bitand()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: BinOpKind::BitOr,
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let mut left = self.parse_arith()?;
        while self.check(&TokenKind::Amp) {
            let line = self.line();
            self.advance();
            let right = self.parse_arith()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: BinOpKind::BitAnd,
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOpKind::Add,
                TokenKind::Minus => BinOpKind::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), line };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOpKind::Mul,
                TokenKind::Slash => BinOpKind::Div,
                TokenKind::DoubleSlash => BinOpKind::FloorDiv,
                TokenKind::Percent => BinOpKind::Mod,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), line };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let line = self.line();
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOpKind::Neg),
            TokenKind::Plus => Some(UnaryOpKind::Pos),
            TokenKind::Tilde => Some(UnaryOpKind::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Expr::UnaryOp { op, operand: Box::new(operand), line });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let left = self.parse_postfix()?;
        if self.check(&TokenKind::DoubleStar) {
            let line = self.line();
            self.advance();
            // Right-associative; unary binds tighter on the right.
            let right = self.parse_factor()?;
            return Ok(Expr::BinOp {
                left: Box::new(left),
                op: BinOpKind::Pow,
                right: Box::new(right),
                line,
            });
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => expr = self.parse_call(expr)?,
                TokenKind::Dot => {
                    let line = self.line();
                    self.advance();
                    let attr = self.expect_ident("after '.'")?;
                    expr = Expr::Attribute { value: Box::new(expr), attr, line };
                }
                TokenKind::LBracket => expr = self.parse_subscript(expr)?,
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call(&mut self, func: Expr) -> Result<Expr> {
        let line = self.line();
        self.advance();
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let is_kwarg = matches!(self.peek_kind(), TokenKind::Ident(_))
                && *self.peek_ahead(1) == TokenKind::Assign;
            if is_kwarg {
                let name = self.expect_ident("in keyword argument")?;
                self.advance();
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "to close call")?;
        Ok(Expr::Call { func: Box::new(func), args, kwargs, line })
    }

    fn parse_subscript(&mut self, value: Expr) -> Result<Expr> {
        let line = self.line();
        self.advance();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(self.parse_testlist()?)
        };
        let index = if self.matches(&TokenKind::Colon) {
            let upper = if self.check(&TokenKind::RBracket) || self.check(&TokenKind::Colon) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let step = if self.matches(&TokenKind::Colon) {
                if self.check(&TokenKind::RBracket) {
                    None
                } else {
                    Some(self.parse_expr()?)
                }
            } else {
                None
            };
            Index::Slice { lower, upper, step }
        } else {
            match lower {
                Some(expr) => Index::One(expr),
                None => return Err(self.error("empty subscript")),
            }
        };
        self.expect(&TokenKind::RBracket, "to close subscript")?;
        Ok(Expr::Subscript { value: Box::new(value), index: Box::new(index), line })
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek_kind().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Int(v), line })
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Float(v), line })
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Str(s), line })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Bool(true), line })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Bool(false), line })
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::Literal { value: Lit::None, line })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Name { id: name, line })
            }
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::LParen => self.parse_paren(),
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_brace(),
            other => Err(self.error(format!("expected expression, found {}", other.describe()))),
        }
    }

    fn parse_paren(&mut self) -> Result<Expr> {
        let line = self.line();
        self.advance();
        if self.matches(&TokenKind::RParen) {
            return Ok(Expr::Tuple { elts: Vec::new(), line });
        }
        let first = self.parse_expr()?;
        if self.check(&TokenKind::Comma) {
            let mut elts = vec![first];
            while self.matches(&TokenKind::Comma) {
                if self.check(&TokenKind::RParen) {
                    break;
                }
                elts.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::RParen, "to close tuple")?;
            return Ok(Expr::Tuple { elts, line });
        }
        self.expect(&TokenKind::RParen, "to close parenthesis")?;
        Ok(first)
    }

    fn parse_list(&mut self) -> Result<Expr> {
        let line = self.line();
        self.advance();
        if self.matches(&TokenKind::RBracket) {
            return Ok(Expr::List { elts: Vec::new(), line });
        }
        let first = self.parse_expr()?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_generators()?;
            self.expect(&TokenKind::RBracket, "to close comprehension")?;
            return Ok(Expr::ListComp { elt: Box::new(first), generators, line });
        }
        let mut elts = vec![first];
        while self.matches(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elts.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::RBracket, "to close list")?;
        Ok(Expr::List { elts, line })
    }

    fn parse_brace(&mut self) -> Result<Expr> {
        let line = self.line();
        self.advance();
        if self.matches(&TokenKind::RBrace) {
            return Ok(Expr::Dict { keys: Vec::new(), values: Vec::new(), line });
        }
        let first = self.parse_expr()?;
        if self.matches(&TokenKind::Colon) {
            let first_value = self.parse_expr()?;
            if self.check(&TokenKind::For) {
                let generators = self.parse_generators()?;
                self.expect(&TokenKind::RBrace, "to close comprehension")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(first_value),
                    generators,
                    line,
                });
            }
            let mut keys = vec![first];
            let mut values = vec![first_value];
            while self.matches(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                keys.push(self.parse_expr()?);
                self.expect(&TokenKind::Colon, "in dict literal")?;
                values.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::RBrace, "to close dict")?;
            return Ok(Expr::Dict { keys, values, line });
        }
        if self.check(&TokenKind::For) {
            let generators = self.parse_generators()?;
            self.expect(&TokenKind::RBrace, "to close comprehension")?;
            return Ok(Expr::SetComp { elt: Box::new(first), generators, line });
        }
        let mut elts = vec![first];
        while self.matches(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            elts.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::RBrace, "to close set")?;
        Ok(Expr::Set { elts, line })
    }

    fn parse_generators(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.matches(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In, "in comprehension")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.matches(&TokenKind::If) {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groupby_chain() {
        let program = parse("result = df.groupby('region')['sales'].sum()").unwrap();
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::Assign { targets, value, .. } => {
                assert!(matches!(&targets[0], Expr::Name { id, .. } if id == "result"));
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison() {
        let program = parse("x = 1 < y <= 10").unwrap();
        match &program.body[0] {
            Stmt::Assign { value: Expr::Compare { ops, .. }, .. } => {
                assert_eq!(ops, &[CmpOpKind::Lt, CmpOpKind::LtE]);
            }
            other => panic!("expected compare, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let src = "if x > 1:\n    y = 1\nelif x < 0:\n    y = 2\nelse:\n    y = 3\n";
        let program = parse(src).unwrap();
        match &program.body[0] {
            Stmt::If { orelse, .. } => {
                assert!(matches!(&orelse[0], Stmt::If { orelse, .. } if !orelse.is_empty()));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_function_def_with_return() {
        let src = "def double(x):\n    return x * 2\n";
        let program = parse(src).unwrap();
        assert!(matches!(&program.body[0], Stmt::FunctionDef { params, .. } if params == &["x"]));
    }

    #[test]
    fn test_import_parses_for_analyzer() {
        let program = parse("import os").unwrap();
        assert!(matches!(&program.body[0], Stmt::Import { names, .. } if names == &["os"]));
    }

    #[test]
    fn test_list_comprehension_with_filter() {
        let program = parse("xs = [x * 2 for x in ys if x > 0]").unwrap();
        match &program.body[0] {
            Stmt::Assign { value: Expr::ListComp { generators, .. }, .. } => {
                assert_eq!(generators.len(), 1);
                assert_eq!(generators[0].ifs.len(), 1);
            }
            other => panic!("expected list comprehension, got {:?}", other),
        }
    }

    #[test]
    fn test_dict_literal_and_comp() {
        assert!(parse("d = {'a': 1, 'b': 2}").is_ok());
        assert!(parse("d = {k: v * 2 for k, v in pairs}").is_ok());
    }

    #[test]
    fn test_mask_expression_precedence() {
        // & binds tighter than comparison, so parens are required.
        let program = parse("out = df[(df['a'] > 1) & (df['b'] < 2)]").unwrap();
        match &program.body[0] {
            Stmt::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(
                    index.as_ref(),
                    Index::One(Expr::BinOp { op: BinOpKind::BitAnd, .. })
                ));
            }
            other => panic!("expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_slice_forms() {
        assert!(parse("x = xs[1:3]").is_ok());
        assert!(parse("x = xs[:3]").is_ok());
        assert!(parse("x = xs[::2]").is_ok());
        assert!(parse("x = xs[1]").is_ok());
    }

    #[test]
    fn test_tuple_unpacking_assignment() {
        let program = parse("a, b = 1, 2").unwrap();
        match &program.body[0] {
            Stmt::Assign { targets, value, .. } => {
                assert!(matches!(&targets[0], Expr::Tuple { .. }));
                assert!(matches!(value, Expr::Tuple { .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_for_loop_single_target() {
        let program = parse("for x in xs:\n    y = x\n").unwrap();
        match &program.body[0] {
            Stmt::For { target, iter, .. } => {
                assert!(matches!(target, Expr::Name { id, .. } if id == "x"));
                assert!(matches!(iter, Expr::Name { id, .. } if id == "xs"));
            }
            other => panic!("expected for loop, got {:?}", other),
        }
    }

    #[test]
    fn test_for_loop_tuple_target() {
        let program = parse("for k, v in pairs:\n    y = v\n").unwrap();
        match &program.body[0] {
            Stmt::For { target: Expr::Tuple { elts, .. }, .. } => assert_eq!(elts.len(), 2),
            other => panic!("expected tuple target, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_suite() {
        let program = parse("while True: pass\n").unwrap();
        assert!(matches!(&program.body[0], Stmt::While { body, .. } if body.len() == 1));
    }

    #[test]
    fn test_unparseable_text_is_syntax_error() {
        let err = parse("this is not valid python $$").unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }

    #[test]
    fn test_keyword_arguments() {
        let program = parse("out = df.sort_values('sales', ascending=False)").unwrap();
        match &program.body[0] {
            Stmt::Assign { value: Expr::Call { args, kwargs, .. }, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs[0].0, "ascending");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_lambda_expression() {
        let program = parse("f = lambda a, b: a + b").unwrap();
        assert!(matches!(
            &program.body[0],
            Stmt::Assign { value: Expr::Lambda { params, .. }, .. } if params.len() == 2
        ));
    }
}
