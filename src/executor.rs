//! The execution sandbox.
//!
//! Runs a vetted syntax tree against a namespace seeded with exactly three
//! bindings: `df` (a working clone of the caller's dataset), `pd`, and
//! `np`. Name resolution never reaches the host process: a miss falls back
//! to a fixed intrinsic table and then fails. Everything `print` writes
//! lands in a buffer owned by this executor, so capture needs no
//! process-stream redirection and two executions can never interfere.
//!
//! The allowed syntax includes unbounded loops; every interpreter step
//! charges a cooperative op budget and periodically checks a wall-clock
//! deadline, so a hostile `while True` fails with a typed error instead of
//! hanging the caller.

use crate::ast::*;
use crate::config::ExecutionOptions;
use crate::errors::{Result, SandboxError};
use crate::frame::{AggOp, ArithOp, CmpKind, Frame, FrameError, Scalar, Series};
use crate::value::{Builtin, LambdaFunction, LibModule, UserFunction, Value};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Fixed identifier the dataset is bound to; generated code is instructed
/// to use it.
pub const DATASET_NAME: &str = "df";

const MAX_CALL_DEPTH: usize = 64;
const MAX_RANGE_LEN: i64 = 10_000_000;

/// Insertion-ordered name → value map. Updating an existing name keeps its
/// original position, matching dict semantics, which the result extractor
/// relies on for its reverse-order scan.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: Vec<(String, Value)>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }
}

/// Namespaces and captured output of a completed execution, handed to the
/// result extractor.
#[derive(Debug)]
pub struct SandboxRun {
    pub globals: Namespace,
    pub locals: Namespace,
    pub output: String,
}

/// Execute a vetted program against a working copy of the dataset.
pub fn execute(program: &Program, dataset: Frame, options: &ExecutionOptions) -> Result<SandboxRun> {
    let mut globals = Namespace::new();
    globals.insert(DATASET_NAME, Value::Frame(dataset));
    globals.insert("pd", Value::Module(LibModule::Pandas));
    globals.insert("np", Value::Module(LibModule::Numpy));

    let mut executor = Executor {
        globals,
        locals: Namespace::new(),
        frames: Vec::new(),
        output: String::new(),
        ops: 0,
        op_budget: options.op_budget,
        deadline: options.timeout.map(|t| (Instant::now() + t, t)),
        line: 0,
    };

    for stmt in &program.body {
        match executor.exec_stmt(stmt)? {
            ControlFlow::Normal => {}
            // The analyzer blocks module-level return/break/continue, so
            // a stray signal here is an interpreter bug.
            _ => {
                return Err(SandboxError::Execution {
                    message: "control flow escaped module scope".to_string(),
                    trace: String::new(),
                })
            }
        }
    }

    tracing::debug!(
        locals = executor.locals.len(),
        output_bytes = executor.output.len(),
        ops = executor.ops,
        "sandboxed execution completed"
    );

    Ok(SandboxRun {
        globals: executor.globals,
        locals: executor.locals,
        output: executor.output,
    })
}

enum ControlFlow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Executor {
    globals: Namespace,
    locals: Namespace,
    /// Function call frames; the innermost is the active local scope.
    frames: Vec<Namespace>,
    output: String,
    ops: u64,
    op_budget: Option<u64>,
    deadline: Option<(Instant, Duration)>,
    line: u32,
}

impl Executor {
    fn fail(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Execution {
            message: message.into(),
            trace: format!("  line {}, in <generated>", self.line),
        }
    }

    fn frame_err(&self, err: FrameError) -> SandboxError {
        self.fail(err.to_string())
    }

    fn tick(&mut self) -> Result<()> {
        self.ops += 1;
        if let Some(budget) = self.op_budget {
            if self.ops > budget {
                return Err(SandboxError::Budget { limit: budget });
            }
        }
        if self.ops & 0xFFF == 0 {
            if let Some((deadline, timeout)) = self.deadline {
                if Instant::now() > deadline {
                    return Err(SandboxError::Deadline(timeout));
                }
            }
        }
        Ok(())
    }

    /// Charges a whole batch of work up front. Bulk materializations call
    /// this before allocating so the budget stops them, not the allocator.
    fn charge(&mut self, amount: u64) -> Result<()> {
        self.ops = self.ops.saturating_add(amount);
        if let Some(budget) = self.op_budget {
            if self.ops > budget {
                return Err(SandboxError::Budget { limit: budget });
            }
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() > deadline {
                return Err(SandboxError::Deadline(timeout));
            }
        }
        Ok(())
    }

    fn truthy(&self, value: &Value) -> Result<bool> {
        value.truthy().map_err(|msg| self.fail(msg))
    }

    // ---- name resolution ------------------------------------------------

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(v) = frame.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.locals.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(self.fail(format!("name '{}' is not defined", name)))
    }

    fn set_name(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name, value),
            None => self.locals.insert(name, value),
        }
    }

    fn get_mut_name(&mut self, name: &str) -> Result<&mut Value> {
        let line = self.line;
        let missing = move || SandboxError::Execution {
            message: format!("name '{}' is not defined", name),
            trace: format!("  line {}, in <generated>", line),
        };
        if self.frames.last().is_some_and(|f| f.contains(name)) {
            return self
                .frames
                .last_mut()
                .and_then(|f| f.get_mut(name))
                .ok_or_else(missing);
        }
        if self.locals.contains(name) {
            return self.locals.get_mut(name).ok_or_else(missing);
        }
        self.globals.get_mut(name).ok_or_else(missing)
    }

    // ---- statements -----------------------------------------------------

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<ControlFlow> {
        self.line = stmt.line();
        self.tick()?;
        match stmt {
            Stmt::Expr { value, .. } => {
                self.eval(value)?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Assign { targets, value, .. } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign_target(target, value.clone())?;
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::AugAssign { target, op, value, .. } => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                let combined = self.binary_op(*op, current, rhs)?;
                self.assign_target(target, combined)?;
                Ok(ControlFlow::Normal)
            }
            Stmt::If { test, body, orelse, .. } => {
                let test = self.eval(test)?;
                let branch = if self.truthy(&test)? { body } else { orelse };
                self.exec_body(branch)
            }
            Stmt::While { test, body, .. } => {
                loop {
                    self.tick()?;
                    let test_value = self.eval(test)?;
                    if !self.truthy(&test_value)? {
                        break;
                    }
                    match self.exec_body(body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Continue | ControlFlow::Normal => {}
                        ret @ ControlFlow::Return(_) => return Ok(ret),
                    }
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::For { target, iter, body, .. } => {
                let iterable = self.eval(iter)?;
                let items = self.iter_values(&iterable)?;
                for item in items {
                    self.tick()?;
                    self.assign_target(target, item)?;
                    match self.exec_body(body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Continue | ControlFlow::Normal => {}
                        ret @ ControlFlow::Return(_) => return Ok(ret),
                    }
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::FunctionDef { name, params, body, .. } => {
                let func = UserFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                };
                self.set_name(name, Value::Function(Rc::new(func)));
                Ok(ControlFlow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Ok(ControlFlow::Return(value))
            }
            Stmt::Pass { .. } => Ok(ControlFlow::Normal),
            Stmt::Break { .. } => Ok(ControlFlow::Break),
            Stmt::Continue { .. } => Ok(ControlFlow::Continue),
            // The analyzer rejects these before execution.
            other => Err(self.fail(format!("{} is not executable", other.category()))),
        }
    }

    fn exec_body(&mut self, body: &[Stmt]) -> Result<ControlFlow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                ControlFlow::Normal => {}
                signal => return Ok(signal),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn assign_target(&mut self, target: &Expr, value: Value) -> Result<()> {
        match target {
            Expr::Name { id, .. } => {
                self.set_name(id, value);
                Ok(())
            }
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                let items = match value {
                    Value::List(items) | Value::Tuple(items) => items,
                    other => {
                        return Err(self.fail(format!(
                            "cannot unpack {} into {} targets",
                            other.type_name(),
                            elts.len()
                        )))
                    }
                };
                if items.len() != elts.len() {
                    return Err(self.fail(format!(
                        "expected {} values to unpack, got {}",
                        elts.len(),
                        items.len()
                    )));
                }
                for (elt, item) in elts.iter().zip(items) {
                    self.assign_target(elt, item)?;
                }
                Ok(())
            }
            Expr::Subscript { value: base, index, .. } => {
                let key = match index.as_ref() {
                    Index::One(expr) => self.eval(expr)?,
                    Index::Slice { .. } => {
                        return Err(self.fail("slice assignment is not supported"))
                    }
                };
                let Expr::Name { id, .. } = base.as_ref() else {
                    return Err(self.fail("only simple subscript assignment is supported"));
                };
                self.assign_subscript(id, key, value)
            }
            other => Err(self.fail(format!("cannot assign to {}", other.category()))),
        }
    }

    fn assign_subscript(&mut self, name: &str, key: Value, value: Value) -> Result<()> {
        let line = self.line;
        let fail = |message: String| SandboxError::Execution {
            message,
            trace: format!("  line {}, in <generated>", line),
        };
        // Column values are materialized before borrowing the container.
        let column: Option<Vec<Scalar>> = match &value {
            Value::Series(s) => Some(s.values().to_vec()),
            Value::List(items) => Some(
                items
                    .iter()
                    .map(|v| v.to_scalar().ok_or_else(|| fail("column values must be scalars".to_string())))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Array(items) => Some(items.iter().map(|v| Scalar::Float(*v)).collect()),
            _ => None,
        };
        let container = self.get_mut_name(name)?;
        match container {
            Value::Frame(frame) => {
                let Value::Str(column_name) = key else {
                    return Err(fail("frame columns are keyed by string".to_string()));
                };
                let values = match column {
                    Some(values) => values,
                    None => {
                        let scalar = value
                            .to_scalar()
                            .ok_or_else(|| fail(format!("cannot store {} in a column", value.type_name())))?;
                        vec![scalar; frame.n_rows()]
                    }
                };
                frame
                    .insert_column(&column_name, values)
                    .map_err(|e| fail(e.to_string()))
            }
            Value::Dict(pairs) => {
                match pairs.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, slot)) => *slot = value,
                    None => pairs.push((key, value)),
                }
                Ok(())
            }
            Value::List(items) => {
                let Value::Int(i) = key else {
                    return Err(fail("list indices must be integers".to_string()));
                };
                let n = items.len() as i64;
                let i = if i < 0 { i + n } else { i };
                if i < 0 || i >= n {
                    return Err(fail("list assignment index out of range".to_string()));
                }
                items[i as usize] = value;
                Ok(())
            }
            other => Err(fail(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    // ---- expressions ----------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.line = expr.line();
        self.tick()?;
        match expr {
            Expr::Name { id, .. } => self.lookup(id),
            Expr::Literal { value, .. } => Ok(match value {
                Lit::None => Value::None,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Int(v) => Value::Int(*v),
                Lit::Float(v) => Value::Float(*v),
                Lit::Str(s) => Value::Str(s.clone()),
            }),
            Expr::BinOp { left, op, right, .. } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                self.binary_op(*op, lhs, rhs)
            }
            Expr::UnaryOp { op, operand, .. } => {
                let value = self.eval(operand)?;
                self.unary_op(*op, value)
            }
            Expr::BoolOp { op, values, .. } => {
                // Short-circuits to the deciding operand, like Python.
                let mut last = Value::None;
                for expr in values {
                    last = self.eval(expr)?;
                    let truth = self.truthy(&last)?;
                    let decided = match op {
                        BoolOpKind::And => !truth,
                        BoolOpKind::Or => truth,
                    };
                    if decided {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Expr::Compare { left, ops, comparators, .. } => {
                self.eval_compare(left, ops, comparators)
            }
            Expr::Call { func, args, kwargs, .. } => {
                let callee = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(expr)?));
                }
                self.call(callee, arg_values, kwarg_values)
            }
            Expr::Attribute { value, attr, .. } => {
                let recv = self.eval(value)?;
                self.attribute(recv, attr)
            }
            Expr::Subscript { value, index, .. } => {
                let recv = self.eval(value)?;
                self.subscript(recv, index)
            }
            Expr::List { elts, .. } => {
                let items = elts.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            Expr::Tuple { elts, .. } => {
                let items = elts.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                Ok(Value::Tuple(items))
            }
            Expr::Set { elts, .. } => {
                let mut items: Vec<Value> = Vec::new();
                for elt in elts {
                    let v = self.eval(elt)?;
                    if !items.contains(&v) {
                        items.push(v);
                    }
                }
                Ok(Value::Set(items))
            }
            Expr::Dict { keys, values, .. } => {
                let mut pairs: Vec<(Value, Value)> = Vec::new();
                for (k, v) in keys.iter().zip(values.iter()) {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    match pairs.iter_mut().find(|(existing, _)| *existing == key) {
                        Some((_, slot)) => *slot = value,
                        None => pairs.push((key, value)),
                    }
                }
                Ok(Value::Dict(pairs))
            }
            Expr::ListComp { elt, generators, .. } => {
                let mut items = Vec::new();
                self.run_generators(generators, 0, &mut |me| {
                    let v = me.eval(elt)?;
                    items.push(v);
                    Ok(())
                })?;
                Ok(Value::List(items))
            }
            Expr::SetComp { elt, generators, .. } => {
                let mut items: Vec<Value> = Vec::new();
                self.run_generators(generators, 0, &mut |me| {
                    let v = me.eval(elt)?;
                    if !items.contains(&v) {
                        items.push(v);
                    }
                    Ok(())
                })?;
                Ok(Value::Set(items))
            }
            Expr::DictComp { key, value, generators, .. } => {
                let mut pairs: Vec<(Value, Value)> = Vec::new();
                self.run_generators(generators, 0, &mut |me| {
                    let k = me.eval(key)?;
                    let v = me.eval(value)?;
                    match pairs.iter_mut().find(|(existing, _)| *existing == k) {
                        Some((_, slot)) => *slot = v,
                        None => pairs.push((k, v)),
                    }
                    Ok(())
                })?;
                Ok(Value::Dict(pairs))
            }
            Expr::Lambda { params, body, .. } => Ok(Value::Lambda(Rc::new(LambdaFunction {
                params: params.clone(),
                body: (**body).clone(),
            }))),
            Expr::IfExp { test, body, orelse, .. } => {
                let test = self.eval(test)?;
                if self.truthy(&test)? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    fn run_generators(
        &mut self,
        generators: &[Comprehension],
        depth: usize,
        emit: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if depth == generators.len() {
            return emit(self);
        }
        let generator = &generators[depth];
        let iterable = self.eval(&generator.iter)?;
        let items = self.iter_values(&iterable)?;
        'items: for item in items {
            self.tick()?;
            self.assign_target(&generator.target, item)?;
            for cond in &generator.ifs {
                let v = self.eval(cond)?;
                if !self.truthy(&v)? {
                    continue 'items;
                }
            }
            self.run_generators(generators, depth + 1, emit)?;
        }
        Ok(())
    }

    fn iter_values(&self, value: &Value) -> Result<Vec<Value>> {
        match value {
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(items.clone()),
            Value::Dict(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Array(items) => Ok(items.iter().map(|v| Value::Float(*v)).collect()),
            Value::Series(s) => Ok(s.values().iter().cloned().map(Value::from_scalar).collect()),
            // Iterating a frame yields its column names, like pandas.
            Value::Frame(df) => Ok(df.column_names().into_iter().map(Value::Str).collect()),
            other => Err(self.fail(format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    // ---- operators ------------------------------------------------------

    fn binary_op(&mut self, op: BinOpKind, lhs: Value, rhs: Value) -> Result<Value> {
        use BinOpKind::*;
        match (op, &lhs, &rhs) {
            (BitAnd, Value::Series(a), Value::Series(b)) => {
                Ok(Value::Series(a.mask_combine(b, true).map_err(|e| self.frame_err(e))?))
            }
            (BitOr, Value::Series(a), Value::Series(b)) => {
                Ok(Value::Series(a.mask_combine(b, false).map_err(|e| self.frame_err(e))?))
            }
            (BitAnd, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            (BitOr, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            (BitAnd, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            (BitOr, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            (BitAnd | BitOr, _, _) => Err(self.fail(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                if op == BitAnd { "&" } else { "|" },
                lhs.type_name(),
                rhs.type_name()
            ))),
            _ => {
                let arith = match op {
                    Add => ArithOp::Add,
                    Sub => ArithOp::Sub,
                    Mul => ArithOp::Mul,
                    Div => ArithOp::Div,
                    FloorDiv => ArithOp::FloorDiv,
                    Mod => ArithOp::Mod,
                    Pow => ArithOp::Pow,
                    BitAnd | BitOr => unreachable!(),
                };
                self.arith_op(arith, lhs, rhs)
            }
        }
    }

    fn arith_op(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> Result<Value> {
        match (&lhs, &rhs) {
            (Value::Series(a), Value::Series(b)) => {
                Ok(Value::Series(a.arith(op, b).map_err(|e| self.frame_err(e))?))
            }
            (Value::Series(a), b) if b.to_scalar().is_some() => {
                let s = b.to_scalar().unwrap_or(Scalar::Null);
                Ok(Value::Series(a.arith_scalar(op, &s).map_err(|e| self.frame_err(e))?))
            }
            (a, Value::Series(b)) if a.to_scalar().is_some() => {
                // Broadcast the left operand so non-commutative ops order
                // correctly.
                let s = a.to_scalar().unwrap_or(Scalar::Null);
                let constant = Series::with_index(
                    b.name().to_string(),
                    b.index().to_vec(),
                    vec![s; b.len()],
                )
                .map_err(|e| self.frame_err(e))?;
                Ok(Value::Series(constant.arith(op, b).map_err(|e| self.frame_err(e))?))
            }
            (Value::Array(a), b) if b.to_scalar().and_then(|s| s.as_f64()).is_some() => {
                let y = b.to_scalar().and_then(|s| s.as_f64()).unwrap_or(0.0);
                Ok(Value::Array(self.array_arith(op, a, &vec![y; a.len()])?))
            }
            (a, Value::Array(b)) if a.to_scalar().and_then(|s| s.as_f64()).is_some() => {
                let x = a.to_scalar().and_then(|s| s.as_f64()).unwrap_or(0.0);
                Ok(Value::Array(self.array_arith(op, &vec![x; b.len()], b)?))
            }
            (Value::Array(a), Value::Array(b)) => Ok(Value::Array(self.array_arith(op, a, b)?)),
            (Value::List(a), Value::List(b)) if op == ArithOp::Add => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::List(out))
            }
            (Value::Tuple(a), Value::Tuple(b)) if op == ArithOp::Add => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::Tuple(out))
            }
            (Value::List(a), Value::Int(n)) if op == ArithOp::Mul => {
                let reps = (*n).max(0) as u64;
                self.charge(reps.saturating_mul(a.len() as u64))?;
                let mut out = Vec::with_capacity(a.len().saturating_mul(reps as usize));
                for _ in 0..reps {
                    out.extend(a.iter().cloned());
                }
                Ok(Value::List(out))
            }
            (Value::Str(s), Value::Int(n)) if op == ArithOp::Mul => {
                let reps = (*n).max(0) as u64;
                self.charge(reps.saturating_mul(s.len() as u64))?;
                Ok(Value::Str(s.repeat(reps as usize)))
            }
            _ => match (lhs.to_scalar(), rhs.to_scalar()) {
                (Some(a), Some(b)) => crate::frame::scalar_arith(&a, op, &b)
                    .map(Value::from_scalar)
                    .map_err(|e| self.frame_err(e)),
                _ => Err(self.fail(format!(
                    "unsupported operand types: '{}' and '{}'",
                    lhs.type_name(),
                    rhs.type_name()
                ))),
            },
        }
    }

    fn array_arith(&self, op: ArithOp, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        if a.len() != b.len() {
            return Err(self.fail(format!(
                "operands could not be broadcast together ({} vs {})",
                a.len(),
                b.len()
            )));
        }
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                crate::frame::scalar_arith(&Scalar::Float(*x), op, &Scalar::Float(*y))
                    .map(|s| s.as_f64().unwrap_or(f64::NAN))
                    .map_err(|e| self.frame_err(e))
            })
            .collect()
    }

    fn unary_op(&self, op: UnaryOpKind, value: Value) -> Result<Value> {
        match (op, &value) {
            (UnaryOpKind::Not, v) => Ok(Value::Bool(!self.truthy(v)?)),
            (UnaryOpKind::Neg, Value::Int(v)) => Ok(Value::Int(-v)),
            (UnaryOpKind::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
            (UnaryOpKind::Neg, Value::Series(s)) => Ok(Value::Series(
                s.arith_scalar(ArithOp::Mul, &Scalar::Int(-1))
                    .map_err(|e| self.frame_err(e))?,
            )),
            (UnaryOpKind::Neg, Value::Array(items)) => {
                Ok(Value::Array(items.iter().map(|v| -v).collect()))
            }
            (UnaryOpKind::Pos, Value::Int(_) | Value::Float(_) | Value::Series(_) | Value::Array(_)) => {
                Ok(value)
            }
            (UnaryOpKind::Invert, Value::Series(s)) => {
                Ok(Value::Series(s.mask_invert().map_err(|e| self.frame_err(e))?))
            }
            (UnaryOpKind::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOpKind::Invert, Value::Int(v)) => Ok(Value::Int(!v)),
            _ => Err(self.fail(format!(
                "bad operand type for unary operator: '{}'",
                value.type_name()
            ))),
        }
    }

    fn eval_compare(&mut self, left: &Expr, ops: &[CmpOpKind], comparators: &[Expr]) -> Result<Value> {
        let first = self.eval(left)?;
        // A single comparison against a series produces a boolean mask.
        if ops.len() == 1 {
            let right = self.eval(&comparators[0])?;
            if let Some(mask) = self.series_compare(&first, ops[0], &right)? {
                return Ok(mask);
            }
            return Ok(Value::Bool(self.compare_values(&first, ops[0], &right)?));
        }
        let mut prev = first;
        for (op, comparator) in ops.iter().zip(comparators.iter()) {
            let next = self.eval(comparator)?;
            if matches!(prev, Value::Series(_)) || matches!(next, Value::Series(_)) {
                return Err(self.fail("chained comparisons are not supported for Series"));
            }
            if !self.compare_values(&prev, *op, &next)? {
                return Ok(Value::Bool(false));
            }
            prev = next;
        }
        Ok(Value::Bool(true))
    }

    fn series_compare(&self, lhs: &Value, op: CmpOpKind, rhs: &Value) -> Result<Option<Value>> {
        let kind = match op {
            CmpOpKind::Eq => CmpKind::Eq,
            CmpOpKind::NotEq => CmpKind::Ne,
            CmpOpKind::Lt => CmpKind::Lt,
            CmpOpKind::LtE => CmpKind::Le,
            CmpOpKind::Gt => CmpKind::Gt,
            CmpOpKind::GtE => CmpKind::Ge,
            _ => return Ok(None),
        };
        match (lhs, rhs) {
            (Value::Series(a), Value::Series(b)) => Ok(Some(Value::Series(
                a.compare(kind, b).map_err(|e| self.frame_err(e))?,
            ))),
            (Value::Series(a), b) if b.to_scalar().is_some() => {
                let s = b.to_scalar().unwrap_or(Scalar::Null);
                Ok(Some(Value::Series(a.compare_scalar(kind, &s))))
            }
            (a, Value::Series(b)) if a.to_scalar().is_some() => {
                let s = a.to_scalar().unwrap_or(Scalar::Null);
                let flipped = match kind {
                    CmpKind::Lt => CmpKind::Gt,
                    CmpKind::Le => CmpKind::Ge,
                    CmpKind::Gt => CmpKind::Lt,
                    CmpKind::Ge => CmpKind::Le,
                    other => other,
                };
                Ok(Some(Value::Series(b.compare_scalar(flipped, &s))))
            }
            _ => Ok(None),
        }
    }

    fn compare_values(&self, lhs: &Value, op: CmpOpKind, rhs: &Value) -> Result<bool> {
        use CmpOpKind::*;
        match op {
            Eq => Ok(self.values_equal(lhs, rhs)),
            NotEq => Ok(!self.values_equal(lhs, rhs)),
            Is => Ok(self.values_equal(lhs, rhs)),
            IsNot => Ok(!self.values_equal(lhs, rhs)),
            In => self.contains_value(rhs, lhs),
            NotIn => self.contains_value(rhs, lhs).map(|b| !b),
            Lt | LtE | Gt | GtE => {
                let (a, b) = match (lhs.to_scalar(), rhs.to_scalar()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(self.fail(format!(
                            "'<' not supported between '{}' and '{}'",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                let kind = match op {
                    Lt => CmpKind::Lt,
                    LtE => CmpKind::Le,
                    Gt => CmpKind::Gt,
                    _ => CmpKind::Ge,
                };
                Ok(crate::frame::scalar_compare(&a, kind, &b))
            }
        }
    }

    fn values_equal(&self, lhs: &Value, rhs: &Value) -> bool {
        match (lhs.to_scalar(), rhs.to_scalar()) {
            (Some(a), Some(b)) => crate::frame::scalar_compare(&a, CmpKind::Eq, &b),
            _ => lhs == rhs,
        }
    }

    fn contains_value(&self, haystack: &Value, needle: &Value) -> Result<bool> {
        match haystack {
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                Ok(items.iter().any(|v| self.values_equal(v, needle)))
            }
            Value::Dict(pairs) => Ok(pairs.iter().any(|(k, _)| self.values_equal(k, needle))),
            Value::Str(s) => match needle {
                Value::Str(sub) => Ok(s.contains(sub.as_str())),
                _ => Err(self.fail("'in <string>' requires string operand")),
            },
            Value::Series(series) => {
                let needle = needle
                    .to_scalar()
                    .ok_or_else(|| self.fail("membership test requires a scalar"))?;
                Ok(series
                    .values()
                    .iter()
                    .any(|v| crate::frame::scalar_compare(v, CmpKind::Eq, &needle)))
            }
            Value::Frame(df) => match needle {
                Value::Str(name) => Ok(df.column_names().contains(name)),
                _ => Ok(false),
            },
            other => Err(self.fail(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ---- attributes, subscripts, calls ----------------------------------

    fn attribute(&self, recv: Value, attr: &str) -> Result<Value> {
        match &recv {
            Value::Module(LibModule::Pandas) => match attr {
                "DataFrame" => Ok(Value::Builtin(Builtin::PdDataFrame)),
                "Series" => Ok(Value::Builtin(Builtin::PdSeries)),
                _ => Err(self.fail(format!("module 'pd' has no attribute '{}'", attr))),
            },
            Value::Module(LibModule::Numpy) => match attr {
                "mean" => Ok(Value::Builtin(Builtin::NpMean)),
                "sum" => Ok(Value::Builtin(Builtin::NpSum)),
                "min" => Ok(Value::Builtin(Builtin::NpMin)),
                "max" => Ok(Value::Builtin(Builtin::NpMax)),
                "abs" => Ok(Value::Builtin(Builtin::NpAbs)),
                "sqrt" => Ok(Value::Builtin(Builtin::NpSqrt)),
                "round" => Ok(Value::Builtin(Builtin::NpRound)),
                "array" => Ok(Value::Builtin(Builtin::NpArray)),
                _ => Err(self.fail(format!("module 'np' has no attribute '{}'", attr))),
            },
            Value::Frame(df) => match attr {
                "shape" => {
                    let (rows, cols) = df.shape();
                    Ok(Value::Tuple(vec![Value::Int(rows as i64), Value::Int(cols as i64)]))
                }
                "columns" => Ok(Value::List(
                    df.column_names().into_iter().map(Value::Str).collect(),
                )),
                "index" => Ok(Value::List(
                    df.row_index().iter().cloned().map(Value::from_scalar).collect(),
                )),
                "empty" => Ok(Value::Bool(df.n_rows() == 0)),
                "head" | "tail" | "sort_values" | "groupby" | "copy" => {
                    Ok(Value::BoundMethod { recv: Box::new(recv), method: attr.to_string() })
                }
                // Attribute-style column access, like pandas.
                name if df.column_names().iter().any(|c| c == name) => {
                    Ok(Value::Series(df.column(name).map_err(|e| self.frame_err(e))?))
                }
                _ => Err(self.fail(format!("'DataFrame' object has no attribute '{}'", attr))),
            },
            Value::Series(s) => match attr {
                "values" => Ok(Value::List(
                    s.values().iter().cloned().map(Value::from_scalar).collect(),
                )),
                "index" => Ok(Value::List(
                    s.index().iter().cloned().map(Value::from_scalar).collect(),
                )),
                "name" => Ok(Value::Str(s.name().to_string())),
                "empty" => Ok(Value::Bool(s.is_empty())),
                "sum" | "mean" | "min" | "max" | "count" | "unique" | "value_counts" | "head"
                | "tail" | "sort_values" | "abs" | "round" | "tolist" => {
                    Ok(Value::BoundMethod { recv: Box::new(recv), method: attr.to_string() })
                }
                _ => Err(self.fail(format!("'Series' object has no attribute '{}'", attr))),
            },
            Value::GroupBy(_) | Value::GroupedSeries(_) => match attr {
                "sum" | "mean" | "min" | "max" | "count" => {
                    Ok(Value::BoundMethod { recv: Box::new(recv), method: attr.to_string() })
                }
                _ => Err(self.fail(format!(
                    "'{}' object has no attribute '{}'",
                    recv.type_name(),
                    attr
                ))),
            },
            Value::Str(_) => match attr {
                "upper" | "lower" | "strip" => {
                    Ok(Value::BoundMethod { recv: Box::new(recv), method: attr.to_string() })
                }
                _ => Err(self.fail(format!("'str' object has no attribute '{}'", attr))),
            },
            Value::Dict(_) => match attr {
                "keys" | "values" | "items" | "get" => {
                    Ok(Value::BoundMethod { recv: Box::new(recv), method: attr.to_string() })
                }
                _ => Err(self.fail(format!("'dict' object has no attribute '{}'", attr))),
            },
            other => Err(self.fail(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                attr
            ))),
        }
    }

    fn subscript(&mut self, recv: Value, index: &Index) -> Result<Value> {
        let key_expr = match index {
            Index::One(expr) => expr,
            Index::Slice { .. } => return self.subscript_slice(recv, index),
        };
        let key = self.eval(key_expr)?;
        match (&recv, &key) {
            (Value::Frame(df), Value::Str(name)) => {
                Ok(Value::Series(df.column(name).map_err(|e| self.frame_err(e))?))
            }
            (Value::Frame(df), Value::List(items)) => {
                let names = items
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Ok(s.clone()),
                        other => Err(self.fail(format!(
                            "column selection list must contain strings, not {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Frame(df.select(&names).map_err(|e| self.frame_err(e))?))
            }
            (Value::Frame(df), Value::Series(mask)) => {
                Ok(Value::Frame(df.filter_mask(mask).map_err(|e| self.frame_err(e))?))
            }
            (Value::GroupBy(g), Value::Str(name)) => Ok(Value::GroupedSeries(
                g.column(name).map_err(|e| self.frame_err(e))?,
            )),
            (Value::Series(s), Value::Int(i)) => s
                .get(*i)
                .cloned()
                .map(Value::from_scalar)
                .ok_or_else(|| self.fail(format!("index {} is out of bounds", i))),
            (Value::Series(s), Value::Series(mask)) => {
                if mask.len() != s.len() {
                    return Err(self.fail("boolean mask length mismatch"));
                }
                let mut index = Vec::new();
                let mut values = Vec::new();
                for ((label, v), keep) in s.index().iter().zip(s.values()).zip(mask.values()) {
                    if keep.as_bool() == Some(true) {
                        index.push(label.clone());
                        values.push(v.clone());
                    }
                }
                Series::with_index(s.name().to_string(), index, values)
                    .map(Value::Series)
                    .map_err(|e| self.frame_err(e))
            }
            (Value::List(items), Value::Int(i)) | (Value::Tuple(items), Value::Int(i)) => {
                let n = items.len() as i64;
                let idx = if *i < 0 { i + n } else { *i };
                if idx < 0 || idx >= n {
                    return Err(self.fail(format!("index {} is out of range", i)));
                }
                Ok(items[idx as usize].clone())
            }
            (Value::Array(items), Value::Int(i)) => {
                let n = items.len() as i64;
                let idx = if *i < 0 { i + n } else { *i };
                if idx < 0 || idx >= n {
                    return Err(self.fail(format!("index {} is out of range", i)));
                }
                Ok(Value::Float(items[idx as usize]))
            }
            (Value::Dict(pairs), key) => pairs
                .iter()
                .find(|(k, _)| self.values_equal(k, key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| self.fail(format!("KeyError: {}", key.repr()))),
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let n = chars.len() as i64;
                let idx = if *i < 0 { i + n } else { *i };
                if idx < 0 || idx >= n {
                    return Err(self.fail(format!("string index {} out of range", i)));
                }
                Ok(Value::Str(chars[idx as usize].to_string()))
            }
            (recv, key) => Err(self.fail(format!(
                "'{}' indices cannot be '{}'",
                recv.type_name(),
                key.type_name()
            ))),
        }
    }

    fn subscript_slice(&mut self, recv: Value, index: &Index) -> Result<Value> {
        let Index::Slice { lower, upper, step } = index else { unreachable!() };
        let lower = self.eval_slice_bound(lower)?;
        let upper = self.eval_slice_bound(upper)?;
        let step = self.eval_slice_bound(step)?.unwrap_or(1);
        if step == 0 {
            return Err(self.fail("slice step cannot be zero"));
        }
        self.apply_slice(recv, lower, upper, step)
    }

    fn eval_slice_bound(&mut self, expr: &Option<Expr>) -> Result<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(expr) => match self.eval(expr)? {
                Value::Int(i) => Ok(Some(i)),
                other => Err(self.fail(format!(
                    "slice indices must be integers, not {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn apply_slice(&self, recv: Value, lower: Option<i64>, upper: Option<i64>, step: i64) -> Result<Value> {
        let positions = |len: usize| -> Vec<usize> {
            let n = len as i64;
            let clamp = |i: i64| -> i64 {
                let i = if i < 0 { i + n } else { i };
                i.clamp(0, n)
            };
            if step > 0 {
                let start = clamp(lower.unwrap_or(0));
                let stop = clamp(upper.unwrap_or(n));
                (start..stop).step_by(step as usize).map(|i| i as usize).collect()
            } else {
                let start = lower.map(clamp).unwrap_or(n - 1).min(n - 1);
                let stop = upper.map(clamp).unwrap_or(-1);
                let mut out = Vec::new();
                let mut i = start;
                while i > stop && i >= 0 {
                    out.push(i as usize);
                    i += step;
                }
                out
            }
        };
        match recv {
            Value::List(items) => {
                let picked = positions(items.len()).into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::List(picked))
            }
            Value::Tuple(items) => {
                let picked = positions(items.len()).into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::Tuple(picked))
            }
            Value::Array(items) => {
                let picked = positions(items.len()).into_iter().map(|i| items[i]).collect();
                Ok(Value::Array(picked))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked: String = positions(chars.len()).into_iter().map(|i| chars[i]).collect();
                Ok(Value::Str(picked))
            }
            Value::Series(s) => {
                let order = positions(s.len());
                let index = order.iter().map(|&i| s.index()[i].clone()).collect();
                let values = order.iter().map(|&i| s.values()[i].clone()).collect();
                Series::with_index(s.name().to_string(), index, values)
                    .map(Value::Series)
                    .map_err(|e| self.frame_err(e))
            }
            Value::Frame(df) => {
                let order = positions(df.n_rows());
                let head_like = if order.iter().enumerate().all(|(i, &p)| i == p) {
                    df.head(order.len())
                } else {
                    // Arbitrary row slices go through sort-free selection.
                    let mask: Vec<Scalar> = (0..df.n_rows())
                        .map(|i| Scalar::Bool(order.contains(&i)))
                        .collect();
                    let mask = Series::new("mask", mask);
                    df.filter_mask(&mask).map_err(|e| self.frame_err(e))?
                };
                Ok(Value::Frame(head_like))
            }
            other => Err(self.fail(format!("'{}' object cannot be sliced", other.type_name()))),
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value> {
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, args, kwargs),
            Value::BoundMethod { recv, method } => self.call_method(*recv, &method, args, kwargs),
            Value::Function(func) => {
                if !kwargs.is_empty() {
                    return Err(self.fail("keyword arguments are not supported for user functions"));
                }
                self.call_user(&func.name, &func.params, args, |me| me.exec_body(&func.body))
                    .map(|flow| match flow {
                        ControlFlow::Return(value) => value,
                        _ => Value::None,
                    })
            }
            Value::Lambda(lambda) => {
                if !kwargs.is_empty() {
                    return Err(self.fail("keyword arguments are not supported for lambdas"));
                }
                let body = lambda.body.clone();
                self.call_user("<lambda>", &lambda.params, args, move |me| {
                    me.eval(&body).map(ControlFlow::Return)
                })
                .map(|flow| match flow {
                    ControlFlow::Return(value) => value,
                    _ => Value::None,
                })
            }
            other => Err(self.fail(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn call_user(
        &mut self,
        name: &str,
        params: &[String],
        args: Vec<Value>,
        run: impl FnOnce(&mut Self) -> Result<ControlFlow>,
    ) -> Result<ControlFlow> {
        if args.len() != params.len() {
            return Err(self.fail(format!(
                "{}() takes {} arguments but {} were given",
                name,
                params.len(),
                args.len()
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.fail("maximum recursion depth exceeded"));
        }
        let mut frame = Namespace::new();
        for (param, arg) in params.iter().zip(args) {
            frame.insert(param, arg);
        }
        self.frames.push(frame);
        let out = run(self);
        self.frames.pop();
        out
    }

    fn kwarg<'a>(kwargs: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
        kwargs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn bool_kwarg(&self, kwargs: &[(String, Value)], name: &str, default: bool) -> Result<bool> {
        match Self::kwarg(kwargs, name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.fail(format!(
                "argument '{}' must be a bool, not {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn numeric_items(&self, value: &Value) -> Result<Vec<Scalar>> {
        match value {
            Value::List(items) | Value::Tuple(items) => items
                .iter()
                .map(|v| {
                    v.to_scalar()
                        .ok_or_else(|| self.fail(format!("expected scalar, got {}", v.type_name())))
                })
                .collect(),
            Value::Array(items) => Ok(items.iter().map(|v| Scalar::Float(*v)).collect()),
            Value::Series(s) => Ok(s.values().to_vec()),
            other => Err(self.fail(format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match builtin {
            Builtin::Print => {
                let parts: Vec<String> = args.iter().map(|v| v.to_string()).collect();
                self.output.push_str(&parts.join(" "));
                self.output.push('\n');
                Ok(Value::None)
            }
            Builtin::Len => match args.first() {
                Some(Value::List(v)) | Some(Value::Tuple(v)) | Some(Value::Set(v)) => {
                    Ok(Value::Int(v.len() as i64))
                }
                Some(Value::Dict(v)) => Ok(Value::Int(v.len() as i64)),
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                Some(Value::Series(s)) => Ok(Value::Int(s.len() as i64)),
                Some(Value::Frame(df)) => Ok(Value::Int(df.n_rows() as i64)),
                Some(Value::Array(v)) => Ok(Value::Int(v.len() as i64)),
                Some(other) => {
                    Err(self.fail(format!("object of type '{}' has no len()", other.type_name())))
                }
                None => Err(self.fail("len() takes exactly one argument")),
            },
            Builtin::Range => {
                let as_int = |v: &Value| -> Result<i64> {
                    match v {
                        Value::Int(i) => Ok(*i),
                        other => Err(self.fail(format!(
                            "range() arguments must be integers, not {}",
                            other.type_name()
                        ))),
                    }
                };
                let (start, stop, step) = match args.len() {
                    1 => (0, as_int(&args[0])?, 1),
                    2 => (as_int(&args[0])?, as_int(&args[1])?, 1),
                    3 => (as_int(&args[0])?, as_int(&args[1])?, as_int(&args[2])?),
                    n => return Err(self.fail(format!("range() takes 1 to 3 arguments, got {}", n))),
                };
                if step == 0 {
                    return Err(self.fail("range() step must not be zero"));
                }
                // Widen to i128: the span of two valid i64 bounds can itself
                // overflow i64.
                let span = if step > 0 {
                    stop as i128 - start as i128
                } else {
                    start as i128 - stop as i128
                };
                let step_abs = step.unsigned_abs() as i128;
                let len = if span <= 0 { 0 } else { (span + step_abs - 1) / step_abs };
                if len > MAX_RANGE_LEN as i128 {
                    return Err(self.fail("range() result is too large"));
                }
                self.charge(len as u64)?;
                let mut out = Vec::with_capacity(len as usize);
                let mut i = start as i128;
                for _ in 0..len {
                    out.push(Value::Int(i as i64));
                    i += step as i128;
                }
                Ok(Value::List(out))
            }
            Builtin::Sum | Builtin::NpSum => self.reduce(args, AggOp::Sum),
            Builtin::NpMean => self.reduce(args, AggOp::Mean),
            Builtin::Min | Builtin::NpMin => self.min_max(args, AggOp::Min),
            Builtin::Max | Builtin::NpMax => self.min_max(args, AggOp::Max),
            Builtin::Abs | Builtin::NpAbs => match args.first() {
                Some(Value::Int(v)) => Ok(Value::Int(v.abs())),
                Some(Value::Float(v)) => Ok(Value::Float(v.abs())),
                Some(Value::Series(s)) => {
                    Ok(Value::Series(s.abs().map_err(|e| self.frame_err(e))?))
                }
                Some(Value::Array(items)) => {
                    Ok(Value::Array(items.iter().map(|v| v.abs()).collect()))
                }
                Some(other) => {
                    Err(self.fail(format!("bad operand type for abs(): '{}'", other.type_name())))
                }
                None => Err(self.fail("abs() takes exactly one argument")),
            },
            Builtin::Round | Builtin::NpRound => {
                let digits = match args.get(1) {
                    Some(Value::Int(d)) => *d as i32,
                    None => 0,
                    Some(other) => {
                        return Err(self.fail(format!(
                            "round() digits must be an integer, not {}",
                            other.type_name()
                        )))
                    }
                };
                let factor = 10f64.powi(digits);
                match args.first() {
                    Some(Value::Float(v)) => {
                        let rounded = (v * factor).round() / factor;
                        if digits <= 0 && args.get(1).is_none() {
                            Ok(Value::Int(rounded as i64))
                        } else {
                            Ok(Value::Float(rounded))
                        }
                    }
                    Some(Value::Int(v)) => Ok(Value::Int(*v)),
                    Some(Value::Series(s)) => Ok(Value::Series(s.round(digits))),
                    Some(Value::Array(items)) => Ok(Value::Array(
                        items.iter().map(|v| (v * factor).round() / factor).collect(),
                    )),
                    Some(other) => Err(self.fail(format!(
                        "round() argument must be numeric, not {}",
                        other.type_name()
                    ))),
                    None => Err(self.fail("round() takes at least one argument")),
                }
            }
            Builtin::NpSqrt => match args.first() {
                Some(Value::Int(v)) => Ok(Value::Float((*v as f64).sqrt())),
                Some(Value::Float(v)) => Ok(Value::Float(v.sqrt())),
                Some(value @ (Value::List(_) | Value::Tuple(_) | Value::Array(_) | Value::Series(_))) => {
                    let items = self.numeric_items(value)?;
                    let out = items
                        .iter()
                        .map(|s| {
                            s.as_f64().map(|v| v.sqrt()).ok_or_else(|| {
                                self.fail("sqrt() requires numeric values".to_string())
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Value::Array(out))
                }
                _ => Err(self.fail("sqrt() requires a numeric argument")),
            },
            Builtin::NpArray => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.fail("array() takes one argument"))?;
                let items = self.numeric_items(arg)?;
                let out = items
                    .iter()
                    .map(|s| {
                        s.as_f64()
                            .ok_or_else(|| self.fail("array() requires numeric values".to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(out))
            }
            Builtin::Sorted => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.fail("sorted() takes one argument"))?;
                if Self::kwarg(&kwargs, "key").is_some() {
                    return Err(self.fail("sorted() key functions are not supported"));
                }
                let reverse = self.bool_kwarg(&kwargs, "reverse", false)?;
                let mut items = self.numeric_items(arg)?;
                items.sort_by(|a, b| a.total_cmp(b));
                if reverse {
                    items.reverse();
                }
                Ok(Value::List(items.into_iter().map(Value::from_scalar).collect()))
            }
            Builtin::Str => Ok(Value::Str(
                args.first().map(|v| v.to_string()).unwrap_or_default(),
            )),
            Builtin::Int => match args.first() {
                Some(Value::Int(v)) => Ok(Value::Int(*v)),
                Some(Value::Float(v)) => Ok(Value::Int(*v as i64)),
                Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| self.fail(format!("invalid literal for int(): '{}'", s))),
                _ => Err(self.fail("int() requires a number or numeric string")),
            },
            Builtin::Float => match args.first() {
                Some(Value::Int(v)) => Ok(Value::Float(*v as f64)),
                Some(Value::Float(v)) => Ok(Value::Float(*v)),
                Some(Value::Bool(b)) => Ok(Value::Float(*b as i64 as f64)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| self.fail(format!("could not convert string to float: '{}'", s))),
                _ => Err(self.fail("float() requires a number or numeric string")),
            },
            Builtin::Bool => match args.first() {
                Some(v) => Ok(Value::Bool(self.truthy(v)?)),
                None => Ok(Value::Bool(false)),
            },
            Builtin::List => match args.first() {
                None => Ok(Value::List(Vec::new())),
                Some(v) => Ok(Value::List(self.iter_values(v)?)),
            },
            Builtin::Enumerate => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.fail("enumerate() takes one argument"))?;
                let items = self.iter_values(arg)?;
                Ok(Value::List(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| Value::Tuple(vec![Value::Int(i as i64), v]))
                        .collect(),
                ))
            }
            Builtin::Zip => {
                let lists = args
                    .iter()
                    .map(|v| self.iter_values(v))
                    .collect::<Result<Vec<_>>>()?;
                let n = lists.iter().map(|l| l.len()).min().unwrap_or(0);
                Ok(Value::List(
                    (0..n)
                        .map(|i| Value::Tuple(lists.iter().map(|l| l[i].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::PdDataFrame => {
                let data = args
                    .first()
                    .or_else(|| Self::kwarg(&kwargs, "data"))
                    .ok_or_else(|| self.fail("DataFrame() requires a data argument"))?;
                let Value::Dict(pairs) = data else {
                    return Err(self.fail(format!(
                        "DataFrame() expects a dict of columns, got {}",
                        data.type_name()
                    )));
                };
                let mut columns = Vec::new();
                for (key, value) in pairs {
                    let Value::Str(name) = key else {
                        return Err(self.fail("DataFrame() column names must be strings"));
                    };
                    columns.push((name.clone(), self.numeric_items(value)?));
                }
                Frame::from_columns(columns)
                    .map(Value::Frame)
                    .map_err(|e| self.frame_err(e))
            }
            Builtin::PdSeries => {
                let data = args
                    .first()
                    .or_else(|| Self::kwarg(&kwargs, "data"))
                    .ok_or_else(|| self.fail("Series() requires a data argument"))?;
                let values = self.numeric_items(data)?;
                let name = match Self::kwarg(&kwargs, "name") {
                    Some(Value::Str(s)) => s.clone(),
                    _ => String::new(),
                };
                match Self::kwarg(&kwargs, "index") {
                    Some(index_value) => {
                        let index = self.numeric_items(index_value)?;
                        Series::with_index(name, index, values)
                            .map(Value::Series)
                            .map_err(|e| self.frame_err(e))
                    }
                    None => Ok(Value::Series(Series::new(name, values))),
                }
            }
        }
    }

    fn reduce(&self, args: Vec<Value>, op: AggOp) -> Result<Value> {
        let arg = args
            .first()
            .ok_or_else(|| self.fail(format!("{}() takes one argument", op.name())))?;
        match arg {
            Value::Series(s) => Ok(Value::from_scalar(s.agg(op))),
            other => {
                let items = self.numeric_items(other)?;
                let series = Series::new("", items);
                Ok(Value::from_scalar(series.agg(op)))
            }
        }
    }

    fn min_max(&self, args: Vec<Value>, op: AggOp) -> Result<Value> {
        if args.len() > 1 {
            return self.reduce(vec![Value::List(args)], op);
        }
        self.reduce(args, op)
    }

    fn call_method(
        &mut self,
        recv: Value,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match recv {
            Value::Frame(df) => self.frame_method(df, method, args, kwargs),
            Value::Series(s) => self.series_method(s, method, args, kwargs),
            Value::GroupBy(g) => {
                let op = self.agg_op(method)?;
                g.agg(op).map(Value::Frame).map_err(|e| self.frame_err(e))
            }
            Value::GroupedSeries(g) => {
                let op = self.agg_op(method)?;
                Ok(Value::Series(g.agg(op)))
            }
            Value::Str(s) => match method {
                "upper" => Ok(Value::Str(s.to_uppercase())),
                "lower" => Ok(Value::Str(s.to_lowercase())),
                "strip" => Ok(Value::Str(s.trim().to_string())),
                other => Err(self.fail(format!("'str' object has no method '{}'", other))),
            },
            Value::Dict(pairs) => match method {
                "keys" => Ok(Value::List(pairs.into_iter().map(|(k, _)| k).collect())),
                "values" => Ok(Value::List(pairs.into_iter().map(|(_, v)| v).collect())),
                "items" => Ok(Value::List(
                    pairs
                        .into_iter()
                        .map(|(k, v)| Value::Tuple(vec![k, v]))
                        .collect(),
                )),
                "get" => {
                    let key = args
                        .first()
                        .ok_or_else(|| self.fail("get() takes at least one argument"))?;
                    Ok(pairs
                        .iter()
                        .find(|(k, _)| self.values_equal(k, key))
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
                }
                other => Err(self.fail(format!("'dict' object has no method '{}'", other))),
            },
            other => Err(self.fail(format!(
                "'{}' object has no method '{}'",
                other.type_name(),
                method
            ))),
        }
    }

    fn agg_op(&self, method: &str) -> Result<AggOp> {
        match method {
            "sum" => Ok(AggOp::Sum),
            "mean" => Ok(AggOp::Mean),
            "count" => Ok(AggOp::Count),
            "min" => Ok(AggOp::Min),
            "max" => Ok(AggOp::Max),
            other => Err(self.fail(format!("unsupported aggregation '{}'", other))),
        }
    }

    fn head_arg(&self, args: &[Value]) -> Result<usize> {
        match args.first() {
            None => Ok(5),
            Some(Value::Int(n)) => Ok((*n).max(0) as usize),
            Some(other) => Err(self.fail(format!(
                "head()/tail() argument must be an integer, not {}",
                other.type_name()
            ))),
        }
    }

    fn frame_method(
        &mut self,
        df: Frame,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match method {
            "head" => Ok(Value::Frame(df.head(self.head_arg(&args)?))),
            "tail" => Ok(Value::Frame(df.tail(self.head_arg(&args)?))),
            "copy" => Ok(Value::Frame(df)),
            "sort_values" => {
                let by = args
                    .first()
                    .or_else(|| Self::kwarg(&kwargs, "by"))
                    .ok_or_else(|| self.fail("sort_values() requires a 'by' argument"))?;
                let keys: Vec<String> = match by {
                    Value::Str(s) => vec![s.clone()],
                    Value::List(items) => items
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => Ok(s.clone()),
                            other => Err(self.fail(format!(
                                "sort keys must be strings, not {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        return Err(self.fail(format!(
                            "'by' must be a string or list of strings, not {}",
                            other.type_name()
                        )))
                    }
                };
                let ascending = match args.get(1) {
                    Some(Value::Bool(b)) => *b,
                    _ => self.bool_kwarg(&kwargs, "ascending", true)?,
                };
                // Stable sorts applied from the last key to the first give
                // multi-key ordering.
                let mut out = df;
                for key in keys.iter().rev() {
                    out = out.sort_values(key, ascending).map_err(|e| self.frame_err(e))?;
                }
                Ok(Value::Frame(out))
            }
            "groupby" => {
                let by = args
                    .first()
                    .or_else(|| Self::kwarg(&kwargs, "by"))
                    .ok_or_else(|| self.fail("groupby() requires a 'by' argument"))?;
                let keys: Vec<String> = match by {
                    Value::Str(s) => vec![s.clone()],
                    Value::List(items) => items
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => Ok(s.clone()),
                            other => Err(self.fail(format!(
                                "groupby keys must be strings, not {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        return Err(self.fail(format!(
                            "groupby() key must be a string or list, not {}",
                            other.type_name()
                        )))
                    }
                };
                df.groupby(keys)
                    .map(Value::GroupBy)
                    .map_err(|e| self.frame_err(e))
            }
            other => Err(self.fail(format!("'DataFrame' object has no method '{}'", other))),
        }
    }

    fn series_method(
        &mut self,
        s: Series,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match method {
            "sum" | "mean" | "count" | "min" | "max" => {
                let op = self.agg_op(method)?;
                Ok(Value::from_scalar(s.agg(op)))
            }
            "unique" => Ok(Value::Series(s.unique())),
            "value_counts" => Ok(Value::Series(s.value_counts())),
            "head" => Ok(Value::Series(s.head(self.head_arg(&args)?))),
            "tail" => Ok(Value::Series(s.tail(self.head_arg(&args)?))),
            "sort_values" => {
                let ascending = self.bool_kwarg(&kwargs, "ascending", true)?;
                Ok(Value::Series(s.sort_values(ascending)))
            }
            "abs" => Ok(Value::Series(s.abs().map_err(|e| self.frame_err(e))?)),
            "round" => {
                let digits = match args.first() {
                    Some(Value::Int(d)) => *d as i32,
                    None => 0,
                    Some(other) => {
                        return Err(self.fail(format!(
                            "round() digits must be an integer, not {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Series(s.round(digits)))
            }
            "tolist" => Ok(Value::List(
                s.values().iter().cloned().map(Value::from_scalar).collect(),
            )),
            other => Err(self.fail(format!("'Series' object has no method '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn dataset() -> Frame {
        Frame::from_columns(vec![
            (
                "region".to_string(),
                vec![
                    Scalar::Str("east".into()),
                    Scalar::Str("west".into()),
                    Scalar::Str("east".into()),
                ],
            ),
            (
                "sales".to_string(),
                vec![Scalar::Int(10), Scalar::Int(20), Scalar::Int(5)],
            ),
        ])
        .unwrap()
    }

    fn run(code: &str) -> Result<SandboxRun> {
        execute(&parse(code)?, dataset(), &ExecutionOptions::default())
    }

    fn local<'a>(run: &'a SandboxRun, name: &str) -> &'a Value {
        run.locals.get(name).expect("binding missing")
    }

    #[test]
    fn test_groupby_sum_into_result() {
        let out = run("result = df.groupby('region')['sales'].sum()").unwrap();
        match local(&out, "result") {
            Value::Series(s) => {
                assert_eq!(s.index(), &[Scalar::Str("east".into()), Scalar::Str("west".into())]);
                assert_eq!(s.values(), &[Scalar::Int(15), Scalar::Int(20)]);
            }
            other => panic!("expected series, got {}", other.type_name()),
        }
        assert!(out.output.is_empty());
    }

    #[test]
    fn test_missing_column_is_execution_error() {
        let err = run("result = df['profit'].sum()").unwrap_err();
        match err {
            SandboxError::Execution { message, .. } => {
                assert!(message.contains("not found"), "message: {}", message);
            }
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_print_is_captured() {
        let out = run("print('rows:', len(df))\nresult = 1").unwrap();
        assert_eq!(out.output, "rows: 3\n");
    }

    #[test]
    fn test_namespace_has_only_seeded_bindings() {
        let out = run("x = 1").unwrap();
        let names: Vec<&str> = out.globals.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["df", "pd", "np"]);
    }

    #[test]
    fn test_while_true_exhausts_budget() {
        let program = parse("while True: pass\n").unwrap();
        let options = ExecutionOptions {
            op_budget: Some(10_000),
            timeout: None,
        };
        let err = execute(&program, dataset(), &options).unwrap_err();
        assert!(matches!(err, SandboxError::Budget { limit: 10_000 }));
    }

    #[test]
    fn test_range_spanning_the_integer_line_is_too_large() {
        let program =
            parse("x = range(-9000000000000000000, 9000000000000000000)").unwrap();
        let options = ExecutionOptions {
            op_budget: Some(1_000),
            timeout: None,
        };
        let err = execute(&program, dataset(), &options).unwrap_err();
        match err {
            SandboxError::Execution { message, .. } => {
                assert!(message.contains("too large"), "message: {}", message);
            }
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_range_length_counts_against_budget() {
        let program = parse("x = range(100000)").unwrap();
        let options = ExecutionOptions {
            op_budget: Some(1_000),
            timeout: None,
        };
        let err = execute(&program, dataset(), &options).unwrap_err();
        assert!(matches!(err, SandboxError::Budget { limit: 1_000 }));
    }

    #[test]
    fn test_list_repetition_counts_against_budget() {
        let program = parse("x = [0] * 200000000").unwrap();
        let options = ExecutionOptions {
            op_budget: Some(1_000),
            timeout: None,
        };
        let err = execute(&program, dataset(), &options).unwrap_err();
        assert!(matches!(err, SandboxError::Budget { limit: 1_000 }));
    }

    #[test]
    fn test_string_repetition_counts_against_budget() {
        let program = parse("x = 'ab' * 100000000").unwrap();
        let options = ExecutionOptions {
            op_budget: Some(1_000),
            timeout: None,
        };
        let err = execute(&program, dataset(), &options).unwrap_err();
        assert!(matches!(err, SandboxError::Budget { limit: 1_000 }));
    }

    #[test]
    fn test_boolean_mask_filter() {
        let out = run("result = df[df['sales'] > 7]").unwrap();
        match local(&out, "result") {
            Value::Frame(f) => assert_eq!(f.n_rows(), 2),
            other => panic!("expected frame, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_combined_mask() {
        let out = run("result = df[(df['sales'] > 4) & (df['region'] == 'east')]").unwrap();
        match local(&out, "result") {
            Value::Frame(f) => assert_eq!(f.n_rows(), 2),
            other => panic!("expected frame, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_new_column_assignment_mutates_working_copy_only() {
        let original = dataset();
        let program = parse("df['double'] = df['sales'] * 2\nresult = df").unwrap();
        let out = execute(&program, original.clone(), &ExecutionOptions::default()).unwrap();
        match out.globals.get("df") {
            Some(Value::Frame(f)) => assert_eq!(f.n_cols(), 3),
            other => panic!("unexpected df binding: {:?}", other),
        }
        assert_eq!(original.n_cols(), 2);
    }

    #[test]
    fn test_function_definition_and_call() {
        let out = run("def double(x):\n    return x * 2\nresult = double(21)").unwrap();
        assert_eq!(local(&out, "result"), &Value::Int(42));
    }

    #[test]
    fn test_lambda_call() {
        let out = run("f = lambda a, b: a + b\nresult = f(1, 2)").unwrap();
        assert_eq!(local(&out, "result"), &Value::Int(3));
    }

    #[test]
    fn test_comprehension_with_filter() {
        let out = run("result = [x * x for x in range(5) if x % 2 == 0]").unwrap();
        assert_eq!(
            local(&out, "result"),
            &Value::List(vec![Value::Int(0), Value::Int(4), Value::Int(16)])
        );
    }

    #[test]
    fn test_dict_comprehension() {
        let out = run("result = {x: x + 1 for x in range(2)}").unwrap();
        assert_eq!(
            local(&out, "result"),
            &Value::Dict(vec![
                (Value::Int(0), Value::Int(1)),
                (Value::Int(1), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn test_for_loop_accumulation() {
        let out = run("total = 0\nfor v in df['sales']:\n    total += v\nresult = total").unwrap();
        assert_eq!(local(&out, "result"), &Value::Int(35));
    }

    #[test]
    fn test_tuple_unpacking() {
        let out = run("a, b = 1, 2\nresult = a + b").unwrap();
        assert_eq!(local(&out, "result"), &Value::Int(3));
    }

    #[test]
    fn test_pd_dataframe_constructor() {
        let out = run("result = pd.DataFrame({'a': [1, 2], 'b': [3, 4]})").unwrap();
        match local(&out, "result") {
            Value::Frame(f) => assert_eq!(f.shape(), (2, 2)),
            other => panic!("expected frame, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_np_helpers() {
        let out = run("result = np.mean(df['sales'])").unwrap();
        match local(&out, "result") {
            Value::Float(v) => assert!((v - 35.0 / 3.0).abs() < 1e-9),
            other => panic!("expected float, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_chained_comparison_runtime() {
        let out = run("result = 1 < 2 < 3").unwrap();
        assert_eq!(local(&out, "result"), &Value::Bool(true));
        let out = run("result = 1 < 2 > 5").unwrap();
        assert_eq!(local(&out, "result"), &Value::Bool(false));
    }

    #[test]
    fn test_division_by_zero_is_execution_error() {
        let err = run("result = 1 / 0").unwrap_err();
        assert!(matches!(err, SandboxError::Execution { message, .. } if message.contains("zero")));
    }

    #[test]
    fn test_sort_values_on_frame() {
        let out = run("result = df.sort_values('sales', ascending=False).head(1)").unwrap();
        match local(&out, "result") {
            Value::Frame(f) => {
                let sales = f.column("sales").unwrap();
                assert_eq!(sales.values(), &[Scalar::Int(20)]);
            }
            other => panic!("expected frame, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_undefined_name() {
        let err = run("result = undefined_thing + 1").unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Execution { message, .. } if message.contains("not defined")
        ));
    }

    #[test]
    fn test_recursion_depth_limited() {
        let err = run("def f(x):\n    return f(x)\nresult = f(1)").unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Execution { message, .. } if message.contains("recursion")
        ));
    }

    #[test]
    fn test_insertion_order_preserved_on_rebind() {
        let out = run("a = 1\nb = 2\na = 3").unwrap();
        let names: Vec<&str> = out.locals.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
