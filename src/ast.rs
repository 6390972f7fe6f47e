//! Abstract syntax tree for the analysis-code subset.
//!
//! The parser accepts a deliberately wider language than the sandbox will
//! run: statements like `import`, `with`, `try` and `class` parse into
//! their own variants so the analyzer can reject them by category with a
//! precise message instead of a generic parse failure.
//!
//! Every variant maps to exactly one [`NodeCategory`]; the analyzer's
//! allowlist is a set of categories, so adding a variant here without
//! classifying it leaves it rejected by default.

use std::fmt;

/// A parsed module: the top-level statement sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr { value: Expr, line: u32 },
    Assign { targets: Vec<Expr>, value: Expr, line: u32 },
    AugAssign { target: Expr, op: BinOpKind, value: Expr, line: u32 },
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>, line: u32 },
    For { target: Expr, iter: Expr, body: Vec<Stmt>, line: u32 },
    While { test: Expr, body: Vec<Stmt>, line: u32 },
    FunctionDef { name: String, params: Vec<String>, body: Vec<Stmt>, line: u32 },
    Return { value: Option<Expr>, line: u32 },
    Pass { line: u32 },
    Break { line: u32 },
    Continue { line: u32 },
    // Parsed so the analyzer can name them when rejecting.
    Import { names: Vec<String>, line: u32 },
    ImportFrom { module: String, names: Vec<String>, line: u32 },
    With { items: Vec<Expr>, body: Vec<Stmt>, line: u32 },
    Try { body: Vec<Stmt>, handlers: Vec<Vec<Stmt>>, orelse: Vec<Stmt>, finalbody: Vec<Stmt>, line: u32 },
    ClassDef { name: String, body: Vec<Stmt>, line: u32 },
    Del { targets: Vec<Expr>, line: u32 },
    Raise { exc: Option<Expr>, line: u32 },
    Assert { test: Expr, msg: Option<Expr>, line: u32 },
    Global { names: Vec<String>, line: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name { id: String, line: u32 },
    Literal { value: Lit, line: u32 },
    BinOp { left: Box<Expr>, op: BinOpKind, right: Box<Expr>, line: u32 },
    UnaryOp { op: UnaryOpKind, operand: Box<Expr>, line: u32 },
    BoolOp { op: BoolOpKind, values: Vec<Expr>, line: u32 },
    Compare { left: Box<Expr>, ops: Vec<CmpOpKind>, comparators: Vec<Expr>, line: u32 },
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)>, line: u32 },
    Attribute { value: Box<Expr>, attr: String, line: u32 },
    Subscript { value: Box<Expr>, index: Box<Index>, line: u32 },
    List { elts: Vec<Expr>, line: u32 },
    Tuple { elts: Vec<Expr>, line: u32 },
    Set { elts: Vec<Expr>, line: u32 },
    Dict { keys: Vec<Expr>, values: Vec<Expr>, line: u32 },
    ListComp { elt: Box<Expr>, generators: Vec<Comprehension>, line: u32 },
    SetComp { elt: Box<Expr>, generators: Vec<Comprehension>, line: u32 },
    DictComp { key: Box<Expr>, value: Box<Expr>, generators: Vec<Comprehension>, line: u32 },
    Lambda { params: Vec<String>, body: Box<Expr>, line: u32 },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr>, line: u32 },
}

/// Subscript payload: plain index or slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    One(Expr),
    Slice { lower: Option<Expr>, upper: Option<Expr>, step: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

/// Construct category used by the analyzer's allowlist check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    ExprStmt,
    Assign,
    AugAssign,
    If,
    For,
    While,
    FunctionDef,
    Return,
    Pass,
    Break,
    Continue,
    Import,
    ImportFrom,
    With,
    Try,
    ClassDef,
    Del,
    Raise,
    Assert,
    Global,
    Name,
    Literal,
    BinOp,
    UnaryOp,
    BoolOp,
    Compare,
    Call,
    Attribute,
    Subscript,
    Slice,
    List,
    Tuple,
    Set,
    Dict,
    ListComp,
    SetComp,
    DictComp,
    Lambda,
    IfExp,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeCategory::ExprStmt => "expression statement",
            NodeCategory::Assign => "assignment",
            NodeCategory::AugAssign => "augmented assignment",
            NodeCategory::If => "if statement",
            NodeCategory::For => "for loop",
            NodeCategory::While => "while loop",
            NodeCategory::FunctionDef => "function definition",
            NodeCategory::Return => "return statement",
            NodeCategory::Pass => "pass",
            NodeCategory::Break => "break",
            NodeCategory::Continue => "continue",
            NodeCategory::Import => "import",
            NodeCategory::ImportFrom => "from-import",
            NodeCategory::With => "with statement",
            NodeCategory::Try => "try statement",
            NodeCategory::ClassDef => "class definition",
            NodeCategory::Del => "del statement",
            NodeCategory::Raise => "raise statement",
            NodeCategory::Assert => "assert statement",
            NodeCategory::Global => "global declaration",
            NodeCategory::Name => "name",
            NodeCategory::Literal => "literal",
            NodeCategory::BinOp => "binary operation",
            NodeCategory::UnaryOp => "unary operation",
            NodeCategory::BoolOp => "boolean operation",
            NodeCategory::Compare => "comparison",
            NodeCategory::Call => "call",
            NodeCategory::Attribute => "attribute access",
            NodeCategory::Subscript => "subscript",
            NodeCategory::Slice => "slice",
            NodeCategory::List => "list literal",
            NodeCategory::Tuple => "tuple literal",
            NodeCategory::Set => "set literal",
            NodeCategory::Dict => "dict literal",
            NodeCategory::ListComp => "list comprehension",
            NodeCategory::SetComp => "set comprehension",
            NodeCategory::DictComp => "dict comprehension",
            NodeCategory::Lambda => "lambda",
            NodeCategory::IfExp => "conditional expression",
        };
        f.write_str(name)
    }
}

impl Stmt {
    pub fn category(&self) -> NodeCategory {
        match self {
            Stmt::Expr { .. } => NodeCategory::ExprStmt,
            Stmt::Assign { .. } => NodeCategory::Assign,
            Stmt::AugAssign { .. } => NodeCategory::AugAssign,
            Stmt::If { .. } => NodeCategory::If,
            Stmt::For { .. } => NodeCategory::For,
            Stmt::While { .. } => NodeCategory::While,
            Stmt::FunctionDef { .. } => NodeCategory::FunctionDef,
            Stmt::Return { .. } => NodeCategory::Return,
            Stmt::Pass { .. } => NodeCategory::Pass,
            Stmt::Break { .. } => NodeCategory::Break,
            Stmt::Continue { .. } => NodeCategory::Continue,
            Stmt::Import { .. } => NodeCategory::Import,
            Stmt::ImportFrom { .. } => NodeCategory::ImportFrom,
            Stmt::With { .. } => NodeCategory::With,
            Stmt::Try { .. } => NodeCategory::Try,
            Stmt::ClassDef { .. } => NodeCategory::ClassDef,
            Stmt::Del { .. } => NodeCategory::Del,
            Stmt::Raise { .. } => NodeCategory::Raise,
            Stmt::Assert { .. } => NodeCategory::Assert,
            Stmt::Global { .. } => NodeCategory::Global,
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            Stmt::Expr { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::AugAssign { line, .. }
            | Stmt::If { line, .. }
            | Stmt::For { line, .. }
            | Stmt::While { line, .. }
            | Stmt::FunctionDef { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Pass { line }
            | Stmt::Break { line }
            | Stmt::Continue { line }
            | Stmt::Import { line, .. }
            | Stmt::ImportFrom { line, .. }
            | Stmt::With { line, .. }
            | Stmt::Try { line, .. }
            | Stmt::ClassDef { line, .. }
            | Stmt::Del { line, .. }
            | Stmt::Raise { line, .. }
            | Stmt::Assert { line, .. }
            | Stmt::Global { line, .. } => *line,
        }
    }
}

impl Expr {
    pub fn category(&self) -> NodeCategory {
        match self {
            Expr::Name { .. } => NodeCategory::Name,
            Expr::Literal { .. } => NodeCategory::Literal,
            Expr::BinOp { .. } => NodeCategory::BinOp,
            Expr::UnaryOp { .. } => NodeCategory::UnaryOp,
            Expr::BoolOp { .. } => NodeCategory::BoolOp,
            Expr::Compare { .. } => NodeCategory::Compare,
            Expr::Call { .. } => NodeCategory::Call,
            Expr::Attribute { .. } => NodeCategory::Attribute,
            Expr::Subscript { .. } => NodeCategory::Subscript,
            Expr::List { .. } => NodeCategory::List,
            Expr::Tuple { .. } => NodeCategory::Tuple,
            Expr::Set { .. } => NodeCategory::Set,
            Expr::Dict { .. } => NodeCategory::Dict,
            Expr::ListComp { .. } => NodeCategory::ListComp,
            Expr::SetComp { .. } => NodeCategory::SetComp,
            Expr::DictComp { .. } => NodeCategory::DictComp,
            Expr::Lambda { .. } => NodeCategory::Lambda,
            Expr::IfExp { .. } => NodeCategory::IfExp,
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            Expr::Name { line, .. }
            | Expr::Literal { line, .. }
            | Expr::BinOp { line, .. }
            | Expr::UnaryOp { line, .. }
            | Expr::BoolOp { line, .. }
            | Expr::Compare { line, .. }
            | Expr::Call { line, .. }
            | Expr::Attribute { line, .. }
            | Expr::Subscript { line, .. }
            | Expr::List { line, .. }
            | Expr::Tuple { line, .. }
            | Expr::Set { line, .. }
            | Expr::Dict { line, .. }
            | Expr::ListComp { line, .. }
            | Expr::SetComp { line, .. }
            | Expr::DictComp { line, .. }
            | Expr::Lambda { line, .. }
            | Expr::IfExp { line, .. } => *line,
        }
    }
}
