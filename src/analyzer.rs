//! Static analysis: the syntax allowlist.
//!
//! The real safety boundary. After parsing, every node in the tree is
//! checked against a closed set of permitted construct categories; any
//! category outside the set fails the whole program before a single
//! statement runs. Allowlisting structure is deliberately stronger than
//! the lexical screen: it governs what shapes of code can exist at all,
//! and it fails closed: a new AST variant is rejected until it is added
//! here.
//!
//! Lambdas and function definitions are permitted: with only the dataset
//! and the library handles reachable, they cannot perform I/O. `return`
//! is permitted only inside a function body.

use crate::ast::{Expr, Index, NodeCategory, Program, Stmt};
use crate::errors::{Result, SandboxError};
use std::collections::HashSet;

/// The default closed set of permitted construct categories.
pub fn default_allowed() -> HashSet<NodeCategory> {
    use NodeCategory::*;
    [
        ExprStmt, Assign, AugAssign, If, For, While, FunctionDef, Return, Pass, Break, Continue,
        Name, Literal, BinOp, UnaryOp, BoolOp, Compare, Call, Attribute, Subscript, Slice, List,
        Tuple, Set, Dict, ListComp, SetComp, DictComp, Lambda, IfExp,
    ]
    .into_iter()
    .collect()
}

/// Validate a parsed program against the default allowlist.
pub fn analyze(program: &Program) -> Result<()> {
    analyze_with(program, &default_allowed())
}

pub fn analyze_with(program: &Program, allowed: &HashSet<NodeCategory>) -> Result<()> {
    let mut walker = Walker { allowed, fn_depth: 0 };
    for stmt in &program.body {
        walker.check_stmt(stmt)?;
    }
    Ok(())
}

struct Walker<'a> {
    allowed: &'a HashSet<NodeCategory>,
    fn_depth: usize,
}

impl Walker<'_> {
    fn reject(&self, category: NodeCategory, line: u32) -> SandboxError {
        tracing::warn!(%category, line, "analyzer rejected construct");
        SandboxError::UnsafeConstruct(format!("{} (line {})", category, line))
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let category = stmt.category();
        if category != NodeCategory::Literal && !self.allowed.contains(&category) {
            return Err(self.reject(category, stmt.line()));
        }
        match stmt {
            Stmt::Expr { value, .. } => self.check_expr(value),
            Stmt::Assign { targets, value, .. } => {
                for target in targets {
                    self.check_expr(target)?;
                }
                self.check_expr(value)
            }
            Stmt::AugAssign { target, value, .. } => {
                self.check_expr(target)?;
                self.check_expr(value)
            }
            Stmt::If { test, body, orelse, .. } => {
                self.check_expr(test)?;
                self.check_body(body)?;
                self.check_body(orelse)
            }
            Stmt::For { target, iter, body, .. } => {
                self.check_expr(target)?;
                self.check_expr(iter)?;
                self.check_body(body)
            }
            Stmt::While { test, body, .. } => {
                self.check_expr(test)?;
                self.check_body(body)
            }
            Stmt::FunctionDef { body, .. } => {
                self.fn_depth += 1;
                let out = self.check_body(body);
                self.fn_depth -= 1;
                out
            }
            Stmt::Return { value, line } => {
                if self.fn_depth == 0 {
                    return Err(SandboxError::UnsafeConstruct(format!(
                        "return statement outside a function (line {})",
                        line
                    )));
                }
                match value {
                    Some(expr) => self.check_expr(expr),
                    None => Ok(()),
                }
            }
            Stmt::Pass { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
            // Denied categories never get here; the membership check above
            // rejects them before recursion.
            _ => Ok(()),
        }
    }

    fn check_body(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<()> {
        let category = expr.category();
        if category != NodeCategory::Literal && !self.allowed.contains(&category) {
            return Err(self.reject(category, expr.line()));
        }
        match expr {
            Expr::Name { .. } | Expr::Literal { .. } => Ok(()),
            Expr::BinOp { left, right, .. } => {
                self.check_expr(left)?;
                self.check_expr(right)
            }
            Expr::UnaryOp { operand, .. } => self.check_expr(operand),
            Expr::BoolOp { values, .. } => {
                for value in values {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Expr::Compare { left, comparators, .. } => {
                self.check_expr(left)?;
                for comparator in comparators {
                    self.check_expr(comparator)?;
                }
                Ok(())
            }
            Expr::Call { func, args, kwargs, .. } => {
                self.check_expr(func)?;
                for arg in args {
                    self.check_expr(arg)?;
                }
                for (_, value) in kwargs {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Expr::Attribute { value, .. } => self.check_expr(value),
            Expr::Subscript { value, index, .. } => {
                self.check_expr(value)?;
                match index.as_ref() {
                    Index::One(expr) => self.check_expr(expr),
                    Index::Slice { lower, upper, step } => {
                        if !self.allowed.contains(&NodeCategory::Slice) {
                            return Err(self.reject(NodeCategory::Slice, expr.line()));
                        }
                        for part in [lower, upper, step].into_iter().flatten() {
                            self.check_expr(part)?;
                        }
                        Ok(())
                    }
                }
            }
            Expr::List { elts, .. } | Expr::Tuple { elts, .. } | Expr::Set { elts, .. } => {
                for elt in elts {
                    self.check_expr(elt)?;
                }
                Ok(())
            }
            Expr::Dict { keys, values, .. } => {
                for expr in keys.iter().chain(values.iter()) {
                    self.check_expr(expr)?;
                }
                Ok(())
            }
            Expr::ListComp { elt, generators, .. } | Expr::SetComp { elt, generators, .. } => {
                self.check_expr(elt)?;
                self.check_generators(generators)
            }
            Expr::DictComp { key, value, generators, .. } => {
                self.check_expr(key)?;
                self.check_expr(value)?;
                self.check_generators(generators)
            }
            Expr::Lambda { body, .. } => {
                self.fn_depth += 1;
                let out = self.check_expr(body);
                self.fn_depth -= 1;
                out
            }
            Expr::IfExp { test, body, orelse, .. } => {
                self.check_expr(test)?;
                self.check_expr(body)?;
                self.check_expr(orelse)
            }
        }
    }

    fn check_generators(&mut self, generators: &[crate::ast::Comprehension]) -> Result<()> {
        for generator in generators {
            self.check_expr(&generator.target)?;
            self.check_expr(&generator.iter)?;
            for cond in &generator.ifs {
                self.check_expr(cond)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn analyze_src(src: &str) -> Result<()> {
        analyze(&parse(src)?)
    }

    #[test]
    fn test_plain_analysis_code_passes() {
        assert!(analyze_src("result = df.groupby('region')['sales'].sum()").is_ok());
        assert!(analyze_src("x = df.head(3)\ny = x.sort_values('a', ascending=False)").is_ok());
    }

    #[test]
    fn test_import_rejected_by_category() {
        let err = analyze_src("import numpy").unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeConstruct(msg) if msg.contains("import")));
    }

    #[test]
    fn test_with_try_class_del_rejected() {
        for src in [
            "with ctx:\n    x = 1\n",
            "try:\n    x = 1\nexcept:\n    x = 2\n",
            "class Foo:\n    pass\n",
            "del df",
        ] {
            let err = analyze_src(src).unwrap_err();
            assert!(
                matches!(err, SandboxError::UnsafeConstruct(_)),
                "expected rejection for {:?}",
                src
            );
        }
    }

    #[test]
    fn test_module_level_return_rejected() {
        let err = analyze_src("return 1").unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeConstruct(msg) if msg.contains("return")));
    }

    #[test]
    fn test_return_inside_function_allowed() {
        assert!(analyze_src("def f(x):\n    return x + 1\n").is_ok());
    }

    #[test]
    fn test_lambda_and_comprehension_allowed() {
        assert!(analyze_src("f = lambda v: v * 2").is_ok());
        assert!(analyze_src("xs = [v for v in vs if v > 0]").is_ok());
    }

    #[test]
    fn test_while_loop_allowed() {
        assert!(analyze_src("while x < 10:\n    x = x + 1\n").is_ok());
    }

    #[test]
    fn test_custom_allowlist_fails_closed() {
        let mut allowed = default_allowed();
        allowed.remove(&NodeCategory::While);
        let program = parse("while True: pass\n").unwrap();
        let err = analyze_with(&program, &allowed).unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeConstruct(msg) if msg.contains("while")));
    }

    #[test]
    fn test_nested_violation_found() {
        let err = analyze_src("if x:\n    raise y\n").unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeConstruct(msg) if msg.contains("raise")));
    }
}
