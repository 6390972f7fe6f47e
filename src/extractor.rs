//! Result extraction from a finished sandbox run.
//!
//! Generated code is asked to leave its answer in a variable named
//! `result`, but models do not always comply. Extraction therefore applies
//! a fixed precedence: an explicit `result` binding wins (locals before
//! globals), otherwise the most recently bound data-shaped value in the
//! execution namespace is taken, otherwise the run has no result. The
//! fallback scans bindings in reverse insertion order so the last thing
//! the code produced is what the caller sees.

use crate::executor::Namespace;
use crate::frame::{Frame, Scalar, Series};
use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// Variable name the generated code is instructed to bind its answer to.
pub const RESULT_NAME: &str = "result";

/// What a sandbox run produced, classified by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExecutionResult {
    Table(Frame),
    Series(Series),
    Array(Vec<f64>),
    Sequence(Vec<Scalar>),
    Mapping(Vec<(Scalar, Scalar)>),
    Scalar(Scalar),
    /// The run completed but bound nothing extractable.
    Absent,
}

impl ExecutionResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionResult::Table(_) => "table",
            ExecutionResult::Series(_) => "series",
            ExecutionResult::Array(_) => "array",
            ExecutionResult::Sequence(_) => "sequence",
            ExecutionResult::Mapping(_) => "mapping",
            ExecutionResult::Scalar(_) => "scalar",
            ExecutionResult::Absent => "absent",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ExecutionResult::Absent)
    }

    pub fn to_json(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Table(frame) => write!(f, "{}", frame),
            ExecutionResult::Series(series) => write!(f, "{}", series),
            ExecutionResult::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            ExecutionResult::Sequence(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            ExecutionResult::Mapping(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            ExecutionResult::Scalar(s) => write!(f, "{}", s),
            ExecutionResult::Absent => f.write_str("(no result)"),
        }
    }
}

/// Pick the result out of a finished run's namespaces.
pub fn extract(locals: &Namespace, globals: &Namespace) -> ExecutionResult {
    if let Some(value) = locals.get(RESULT_NAME).or_else(|| globals.get(RESULT_NAME)) {
        return match classify(value) {
            Some(result) => result,
            None => {
                // An explicit binding ends the search even when it has no
                // extractable shape; the fallback scan must never shadow it.
                tracing::debug!(
                    type_name = value.type_name(),
                    "explicit result binding has no extractable shape"
                );
                ExecutionResult::Absent
            }
        };
    }
    // No explicit binding: newest data-shaped local wins. Library handles
    // never land in locals, so everything here came from the code itself.
    for (name, value) in locals.entries().iter().rev() {
        if let Some(result) = classify_data(value) {
            tracing::debug!(binding = %name, kind = result.kind(), "result taken from fallback scan");
            return result;
        }
    }
    ExecutionResult::Absent
}

/// Classify any binding, scalars included. Used for the explicit `result`
/// variable, where even `result = 42` is an answer.
fn classify(value: &Value) -> Option<ExecutionResult> {
    if let Some(result) = classify_data(value) {
        return Some(result);
    }
    value.to_scalar().map(ExecutionResult::Scalar)
}

/// Classify data-shaped values only. The fallback scan must not promote a
/// loop counter or an intermediate flag to a result, so bare scalars are
/// excluded here.
fn classify_data(value: &Value) -> Option<ExecutionResult> {
    match value {
        Value::Frame(frame) => Some(ExecutionResult::Table(frame.clone())),
        Value::Series(series) => Some(ExecutionResult::Series(series.clone())),
        Value::Array(items) => Some(ExecutionResult::Array(items.clone())),
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
            let scalars: Option<Vec<Scalar>> = items.iter().map(Value::to_scalar).collect();
            scalars.map(ExecutionResult::Sequence)
        }
        Value::Dict(pairs) => {
            let mapping: Option<Vec<(Scalar, Scalar)>> = pairs
                .iter()
                .map(|(k, v)| Some((k.to_scalar()?, v.to_scalar()?)))
                .collect();
            mapping.map(ExecutionResult::Mapping)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionOptions;
    use crate::executor::execute;
    use crate::frame::Frame;
    use crate::parser::parse;

    fn dataset() -> Frame {
        Frame::from_columns(vec![(
            "sales".to_string(),
            vec![Scalar::Int(10), Scalar::Int(20), Scalar::Int(5)],
        )])
        .unwrap()
    }

    fn run_extract(code: &str) -> ExecutionResult {
        let program = parse(code).unwrap();
        let run = execute(&program, dataset(), &ExecutionOptions::default()).unwrap();
        extract(&run.locals, &run.globals)
    }

    #[test]
    fn test_explicit_result_wins_over_later_bindings() {
        let out = run_extract("result = df['sales'].sum()\nother = df.head(2)");
        assert_eq!(out, ExecutionResult::Scalar(Scalar::Int(35)));
    }

    #[test]
    fn test_explicit_scalar_result_is_extracted() {
        let out = run_extract("result = 42");
        assert_eq!(out, ExecutionResult::Scalar(Scalar::Int(42)));
    }

    #[test]
    fn test_fallback_takes_newest_data_binding() {
        let out = run_extract("first = df.head(1)\nsecond = df['sales'] * 2");
        match out {
            ExecutionResult::Series(s) => {
                assert_eq!(s.values(), &[Scalar::Int(20), Scalar::Int(40), Scalar::Int(10)]);
            }
            other => panic!("expected series, got {}", other.kind()),
        }
    }

    #[test]
    fn test_fallback_skips_bare_scalars() {
        let out = run_extract("count = 3\nsummary = df.head(2)\nflag = True");
        match out {
            ExecutionResult::Table(f) => assert_eq!(f.n_rows(), 2),
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn test_no_bindings_yields_absent() {
        let out = run_extract("print('hello')");
        assert!(out.is_absent());
    }

    #[test]
    fn test_scalar_only_namespace_yields_absent() {
        let out = run_extract("x = 1\ny = 2.5");
        assert!(out.is_absent());
    }

    #[test]
    fn test_list_becomes_sequence() {
        let out = run_extract("result = [1, 2, 3]");
        assert_eq!(
            out,
            ExecutionResult::Sequence(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)])
        );
    }

    #[test]
    fn test_dict_becomes_mapping() {
        let out = run_extract("result = {'a': 1, 'b': 2}");
        assert_eq!(
            out,
            ExecutionResult::Mapping(vec![
                (Scalar::Str("a".into()), Scalar::Int(1)),
                (Scalar::Str("b".into()), Scalar::Int(2)),
            ])
        );
    }

    #[test]
    fn test_set_result_becomes_sequence() {
        let out = run_extract("result = {1, 2, 3}");
        assert_eq!(
            out,
            ExecutionResult::Sequence(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)])
        );
    }

    #[test]
    fn test_unshapeable_result_blocks_fallback() {
        let out = run_extract("summary = df.head(2)\nresult = lambda x: x");
        assert!(out.is_absent());
    }

    #[test]
    fn test_display_absent() {
        assert_eq!(ExecutionResult::Absent.to_string(), "(no result)");
    }

    #[test]
    fn test_json_round_trip_kind_tag() {
        let json = ExecutionResult::Scalar(Scalar::Int(7)).to_json().unwrap();
        assert!(json.contains("\"kind\":\"scalar\""), "json: {}", json);
    }
}
