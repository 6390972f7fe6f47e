//! Runtime value representation for sandboxed execution.
//!
//! One closed enum covers everything generated code can hold: plain
//! scalars, containers, the tabular types from [`crate::frame`], numeric
//! arrays, callables, and the two library handles seeded into the
//! namespace. Extraction later pattern-matches on these variants, so the
//! capability of a value (tabular, labeled sequence, array, ...) is its
//! variant, not a runtime inspection.

use crate::ast::{Expr, Stmt};
use crate::frame::{Frame, GroupBy, GroupedSeries, Scalar, Series};
use std::fmt;
use std::rc::Rc;

/// A function defined by the generated code itself.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaFunction {
    pub params: Vec<String>,
    pub body: Expr,
}

/// The two library handles reachable from inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibModule {
    Pandas,
    Numpy,
}

impl LibModule {
    pub fn name(&self) -> &'static str {
        match self {
            LibModule::Pandas => "pd",
            LibModule::Numpy => "np",
        }
    }
}

/// Interpreter intrinsics and library functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Sum,
    Min,
    Max,
    Abs,
    Round,
    Sorted,
    Str,
    Int,
    Float,
    Bool,
    List,
    Enumerate,
    Zip,
    PdDataFrame,
    PdSeries,
    NpMean,
    NpSum,
    NpMin,
    NpMax,
    NpAbs,
    NpSqrt,
    NpRound,
    NpArray,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::PdDataFrame => "DataFrame",
            Builtin::PdSeries => "Series",
            Builtin::NpMean => "mean",
            Builtin::NpSum => "sum",
            Builtin::NpMin => "min",
            Builtin::NpMax => "max",
            Builtin::NpAbs => "abs",
            Builtin::NpSqrt => "sqrt",
            Builtin::NpRound => "round",
            Builtin::NpArray => "array",
        }
    }

    /// Resolve a bare name to an intrinsic. These are a lookup fallback,
    /// not namespace entries, so the namespace stays exactly
    /// dataset + library handles.
    pub fn lookup(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "sum" => Builtin::Sum,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "abs" => Builtin::Abs,
            "round" => Builtin::Round,
            "sorted" => Builtin::Sorted,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "enumerate" => Builtin::Enumerate,
            "zip" => Builtin::Zip,
            _ => return None,
        };
        Some(builtin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    /// Numeric array (`np.array`).
    Array(Vec<f64>),
    Series(Series),
    Frame(Frame),
    GroupBy(GroupBy),
    GroupedSeries(GroupedSeries),
    Function(Rc<UserFunction>),
    Lambda(Rc<LambdaFunction>),
    Builtin(Builtin),
    Module(LibModule),
    BoundMethod { recv: Box<Value>, method: String },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Array(_) => "ndarray",
            Value::Series(_) => "Series",
            Value::Frame(_) => "DataFrame",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::GroupedSeries(_) => "SeriesGroupBy",
            Value::Function(_) | Value::Lambda(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::BoundMethod { .. } => "method",
        }
    }

    pub fn from_scalar(scalar: Scalar) -> Value {
        match scalar {
            Scalar::Null => Value::None,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(v) => Value::Int(v),
            Scalar::Float(v) => Value::Float(v),
            Scalar::Str(s) => Value::Str(s),
        }
    }

    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Value::None => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Int(v) => Some(Scalar::Int(*v)),
            Value::Float(v) => Some(Scalar::Float(*v)),
            Value::Str(s) => Some(Scalar::Str(s.clone())),
            _ => None,
        }
    }

    /// Python truthiness. Tabular values have no truth value, matching the
    /// "ambiguous" error pandas raises.
    pub fn truthy(&self) -> Result<bool, String> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
            Value::Array(v) => !v.is_empty(),
            Value::Series(_) | Value::Frame(_) => {
                return Err(format!(
                    "the truth value of a {} is ambiguous",
                    self.type_name()
                ))
            }
            _ => true,
        })
    }

    /// `repr()`-style rendering: strings quoted, used inside containers.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                if parts.len() == 1 {
                    write!(f, "({},)", parts[0])
                } else {
                    write!(f, "({})", parts.join(", "))
                }
            }
            Value::Set(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Dict(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "array([{}])", parts.join(", "))
            }
            Value::Series(s) => write!(f, "{}", s),
            Value::Frame(df) => write!(f, "{}", df),
            Value::GroupBy(g) => write!(f, "<groupby on {:?}>", g.keys()),
            Value::GroupedSeries(g) => write!(f, "<grouped column '{}'>", g.name()),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Lambda(_) => write!(f, "<lambda>"),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Module(m) => write!(f, "<module {}>", m.name()),
            Value::BoundMethod { method, recv } => {
                write!(f, "<bound method {}.{}>", recv.type_name(), method)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy().unwrap());
        assert!(!Value::Str(String::new()).truthy().unwrap());
        assert!(Value::List(vec![Value::Int(1)]).truthy().unwrap());
        assert!(Value::Series(Series::new("s", vec![])).truthy().is_err());
    }

    #[test]
    fn test_display_containers() {
        let v = Value::Dict(vec![(Value::Str("a".into()), Value::Int(1))]);
        assert_eq!(v.to_string(), "{'a': 1}");
        let t = Value::Tuple(vec![Value::Int(1)]);
        assert_eq!(t.to_string(), "(1,)");
    }

    #[test]
    fn test_builtin_lookup_excludes_library_names() {
        assert!(Builtin::lookup("print").is_some());
        assert!(Builtin::lookup("DataFrame").is_none());
        assert!(Builtin::lookup("getattr").is_none());
    }
}
