//! Lexical analysis for the analysis-code subset.
//!
//! Indentation-sensitive: logical lines produce `Newline` tokens and block
//! structure is expressed as `Indent`/`Dedent` pairs, suppressed inside
//! brackets (implicit line joining). Tabs advance to the next multiple of
//! eight columns.

use crate::errors::{Result, SandboxError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Newline,
    Indent,
    Dedent,
    Eof,
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    // Keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    For,
    While,
    In,
    Not,
    And,
    Or,
    Lambda,
    True,
    False,
    None,
    Pass,
    Break,
    Continue,
    Import,
    From,
    With,
    As,
    Try,
    Except,
    Finally,
    Class,
    Del,
    Raise,
    Assert,
    Global,
    Is,
    // Operators and delimiters
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Tilde,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Int(v) => format!("'{}'", v),
            TokenKind::Float(v) => format!("'{}'", v),
            TokenKind::Str(_) => "string literal".to_string(),
            other => format!("'{:?}'", other).to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    paren_depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            paren_depth: 0,
            indents: vec![0],
            at_line_start: true,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                self.lex_indentation(&mut tokens)?;
                if self.is_at_end() {
                    break;
                }
            }
            if self.is_at_end() {
                break;
            }
            match self.next_token()? {
                Some(token) => {
                    if token.kind == TokenKind::Newline {
                        self.at_line_start = true;
                    }
                    tokens.push(token);
                }
                None => continue,
            }
        }
        if matches!(tokens.last(), Some(t) if t.kind != TokenKind::Newline) {
            tokens.push(Token { kind: TokenKind::Newline, line: self.line });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(Token { kind: TokenKind::Dedent, line: self.line });
        }
        tokens.push(Token { kind: TokenKind::Eof, line: self.line });
        Ok(tokens)
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Syntax { line: self.line, message: message.into() }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> char {
        *self.chars.get(self.pos).unwrap_or(&'\0')
    }

    fn peek_next(&self) -> char {
        *self.chars.get(self.pos + 1).unwrap_or(&'\0')
    }

    fn advance(&mut self) -> char {
        let c = self.peek();
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Measure leading whitespace of the upcoming logical line, emitting
    /// Indent/Dedent tokens. Blank and comment-only lines are skipped.
    fn lex_indentation(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        loop {
            let mut width = 0usize;
            loop {
                match self.peek() {
                    ' ' => {
                        width += 1;
                        self.advance();
                    }
                    '\t' => {
                        width = (width / 8 + 1) * 8;
                        self.advance();
                    }
                    _ => break,
                }
            }
            match self.peek() {
                '\n' => {
                    self.advance();
                    continue;
                }
                '#' => {
                    while !self.is_at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                    continue;
                }
                '\0' if self.is_at_end() => {
                    self.at_line_start = false;
                    return Ok(());
                }
                _ => {}
            }
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                tokens.push(Token { kind: TokenKind::Indent, line: self.line });
            } else {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    tokens.push(Token { kind: TokenKind::Dedent, line: self.line });
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            self.at_line_start = false;
            return Ok(());
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let line = self.line;
        let c = self.peek();
        let kind = match c {
            ' ' | '\r' => {
                self.advance();
                return Ok(None);
            }
            '\t' => {
                self.advance();
                return Ok(None);
            }
            '#' => {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
                return Ok(None);
            }
            '\\' if self.peek_next() == '\n' => {
                self.advance();
                self.advance();
                return Ok(None);
            }
            '\n' => {
                self.advance();
                if self.paren_depth > 0 {
                    return Ok(None);
                }
                TokenKind::Newline
            }
            '\'' | '"' => return self.lex_string().map(Some),
            c if c.is_ascii_digit() => return self.lex_number().map(Some),
            c if c.is_ascii_alphabetic() || c == '_' => return Ok(Some(self.lex_ident())),
            '(' => {
                self.advance();
                self.paren_depth += 1;
                TokenKind::LParen
            }
            ')' => {
                self.advance();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RParen
            }
            '[' => {
                self.advance();
                self.paren_depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.advance();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            '{' => {
                self.advance();
                self.paren_depth += 1;
                TokenKind::LBrace
            }
            '}' => {
                self.advance();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RBrace
            }
            ',' => {
                self.advance();
                TokenKind::Comma
            }
            ':' => {
                self.advance();
                TokenKind::Colon
            }
            ';' => {
                self.advance();
                TokenKind::Semicolon
            }
            '.' => {
                self.advance();
                TokenKind::Dot
            }
            '+' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                self.advance();
                if self.matches('*') {
                    TokenKind::DoubleStar
                } else if self.matches('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                self.advance();
                if self.matches('/') {
                    TokenKind::DoubleSlash
                } else if self.matches('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                self.advance();
                TokenKind::Percent
            }
            '&' => {
                self.advance();
                TokenKind::Amp
            }
            '|' => {
                self.advance();
                TokenKind::Pipe
            }
            '~' => {
                self.advance();
                TokenKind::Tilde
            }
            '=' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::NotEq
                } else {
                    return Err(self.error("unexpected character '!'"));
                }
            }
            '<' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::LtE
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.advance();
                if self.matches('=') {
                    TokenKind::GtE
                } else {
                    TokenKind::Gt
                }
            }
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(Some(Token { kind, line }))
    }

    fn lex_string(&mut self) -> Result<Token> {
        let line = self.line;
        let quote = self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() || self.peek() == '\n' {
                return Err(self.error("unterminated string literal"));
            }
            let c = self.advance();
            if c == quote {
                break;
            }
            if c == '\\' {
                let escaped = self.advance();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else {
                value.push(c);
            }
        }
        Ok(Token { kind: TokenKind::Str(value), line })
    }

    fn lex_number(&mut self) -> Result<Token> {
        let line = self.line;
        let start = self.pos;
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if self.peek() == 'e' || self.peek() == 'E' {
            let save = self.pos;
            self.advance();
            if self.peek() == '+' || self.peek() == '-' {
                self.advance();
            }
            if self.peek().is_ascii_digit() {
                is_float = true;
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid number literal '{}'", text)))?;
            TokenKind::Float(v)
        } else {
            let v: i64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid number literal '{}'", text)))?;
            TokenKind::Int(v)
        };
        Ok(Token { kind, line })
    }

    fn lex_ident(&mut self) -> Token {
        let line = self.line;
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = match text.as_str() {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "in" => TokenKind::In,
            "not" => TokenKind::Not,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "lambda" => TokenKind::Lambda,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            "pass" => TokenKind::Pass,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "with" => TokenKind::With,
            "as" => TokenKind::As,
            "try" => TokenKind::Try,
            "except" => TokenKind::Except,
            "finally" => TokenKind::Finally,
            "class" => TokenKind::Class,
            "del" => TokenKind::Del,
            "raise" => TokenKind::Raise,
            "assert" => TokenKind::Assert,
            "global" | "nonlocal" => TokenKind::Global,
            "is" => TokenKind::Is,
            _ => TokenKind::Ident(text),
        };
        Token { kind, line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_dedent_pairs() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let toks = kinds("x = 1\n\n# comment\n\ny = 2\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 0);
    }

    #[test]
    fn test_implicit_line_joining() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_escapes() {
        let toks = kinds("s = 'a\\nb'");
        assert!(toks.contains(&TokenKind::Str("a\nb".to_string())));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = Lexer::new("s = 'oops").tokenize().unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }

    #[test]
    fn test_float_and_exponent() {
        assert!(kinds("x = 2.5e3").contains(&TokenKind::Float(2500.0)));
    }

    #[test]
    fn test_inconsistent_dedent_is_error() {
        let err = Lexer::new("if x:\n        y = 1\n   z = 2\n").tokenize().unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }

    #[test]
    fn test_compound_operators() {
        let toks = kinds("x **= 2");
        // `**=` is not supported; `**` then `=` is what comes out.
        assert!(toks.contains(&TokenKind::DoubleStar));
        let toks = kinds("a // b != c");
        assert!(toks.contains(&TokenKind::DoubleSlash));
        assert!(toks.contains(&TokenKind::NotEq));
    }
}
