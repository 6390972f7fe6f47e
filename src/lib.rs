//! Sandboxed execution of model-generated tabular analysis code.
//!
//! Large-language models are good at turning "total sales by region?"
//! into a few lines of pandas, and terrible at being trusted with a
//! process. This crate runs such snippets through a layered pipeline so
//! the host only ever executes vetted code against an in-memory dataset:
//!
//! 1. **Policy screen** ([`policy`]): a lexical denylist rejects code
//!    containing disallowed tokens before anything is parsed.
//! 2. **Parse** ([`parser`]): the snippet is parsed into a typed syntax
//!    tree covering the analysis subset of Python.
//! 3. **Structural vetting** ([`analyzer`]): every node is checked
//!    against an allowlist of construct categories; anything outside it
//!    fails closed.
//! 4. **Execution** ([`executor`]): a tree-walking interpreter runs the
//!    vetted tree in a namespace holding only the dataset and the `pd`/
//!    `np` handles, with an operation budget and deadline.
//! 5. **Extraction** ([`extractor`]): the run's namespaces are searched
//!    for the answer under a fixed precedence rule.
//!
//! The pipeline either completes all stages or fails with a typed
//! [`SandboxError`]; a snippet that fails vetting executes zero
//! statements.
//!
//! ```no_run
//! use tablebox::{run_sandboxed, ExecutionOptions, Frame, Scalar};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let df = Frame::from_columns(vec![
//!     ("sales".to_string(), vec![Scalar::Int(10), Scalar::Int(20)]),
//! ])?;
//! let run = run_sandboxed("result = df['sales'].sum()", &df, &ExecutionOptions::default())?;
//! println!("{}", run.result);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod executor;
pub mod extractor;
pub mod frame;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod value;

pub use codegen::{CodeGenerator, OpenAiGenerator};
pub use config::{ExecutionOptions, GeneratorConfig};
pub use errors::{Result, SandboxError};
pub use extractor::ExecutionResult;
pub use frame::{Frame, Scalar, Series};
pub use policy::TokenPolicy;

use std::collections::BTreeMap;

/// Outcome of one sandboxed execution: the extracted result plus whatever
/// the code printed.
#[derive(Debug)]
pub struct Execution {
    pub result: ExecutionResult,
    /// Captured `print` output, in emission order.
    pub logs: String,
}

/// Run one code snippet through the full validation and execution
/// pipeline against a working copy of `dataset`.
///
/// The caller's frame is never mutated; generated code that assigns
/// columns sees its own copy. Stage order is fixed: the policy screen
/// runs before parsing, so a disallowed token is reported even when the
/// snippet would not parse.
pub fn run_sandboxed(
    code: &str,
    dataset: &Frame,
    options: &ExecutionOptions,
) -> Result<Execution> {
    run_with_policy(code, dataset, options, &TokenPolicy::default())
}

/// [`run_sandboxed`] with a caller-supplied token policy.
pub fn run_with_policy(
    code: &str,
    dataset: &Frame,
    options: &ExecutionOptions,
    policy: &TokenPolicy,
) -> Result<Execution> {
    policy.screen(code)?;
    let program = parser::parse(code)?;
    analyzer::analyze(&program)?;
    tracing::debug!(statements = program.body.len(), "code vetted, executing");
    let run = executor::execute(&program, dataset.clone(), options)?;
    let result = extractor::extract(&run.locals, &run.globals);
    tracing::debug!(kind = result.kind(), "execution finished");
    Ok(Execution { result, logs: run.output })
}

/// End-to-end question answering: generate code for a natural-language
/// question, vet it, execute it, extract the result.
pub struct QueryPipeline {
    generator: Box<dyn CodeGenerator>,
    policy: TokenPolicy,
    options: ExecutionOptions,
}

/// What a [`QueryPipeline`] run produced, including the generated code so
/// callers can display or audit it.
#[derive(Debug)]
pub struct QueryOutcome {
    pub code: String,
    pub result: ExecutionResult,
    pub logs: String,
}

impl QueryPipeline {
    pub fn new(generator: Box<dyn CodeGenerator>) -> Self {
        Self {
            generator,
            policy: TokenPolicy::default(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: TokenPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Answer a question about `dataset`. Generation failures and vetting
    /// failures surface as errors; the dataset itself is never modified.
    pub async fn ask(&self, question: &str, dataset: &Frame) -> Result<QueryOutcome> {
        let schema: BTreeMap<String, String> = dataset.schema();
        let code = self
            .generator
            .generate(question, &schema, dataset.n_rows())
            .await?;
        tracing::info!(bytes = code.len(), "generated candidate code");
        let execution = run_with_policy(&code, dataset, &self.options, &self.policy)?;
        Ok(QueryOutcome {
            code,
            result: execution.result,
            logs: execution.logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn dataset() -> Frame {
        Frame::from_columns(vec![
            (
                "region".to_string(),
                vec![
                    Scalar::Str("east".into()),
                    Scalar::Str("west".into()),
                    Scalar::Str("east".into()),
                    Scalar::Str("west".into()),
                ],
            ),
            (
                "sales".to_string(),
                vec![Scalar::Int(10), Scalar::Int(20), Scalar::Int(5), Scalar::Int(7)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_disallowed_token_fails_before_parsing() {
        // Unbalanced bracket: a parser would reject this, but the policy
        // screen must win.
        let err = run_sandboxed("x = [import", &dataset(), &ExecutionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(_)));
    }

    #[test]
    fn test_token_inside_string_literal_still_rejected() {
        let err = run_sandboxed(
            "result = 'the os module'",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(_)));
    }

    #[test]
    fn test_dunder_access_rejected() {
        let err = run_sandboxed(
            "result = df.__class__",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(_)));
    }

    #[test]
    fn test_denied_construct_executes_nothing() {
        let df = dataset();
        // The raise on line 2 fails structural vetting, so the column
        // assignment on line 1 must never run.
        let err = run_sandboxed(
            "df['double'] = df['sales'] * 2\nraise ValueError('boom')",
            &df,
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeConstruct(_)));
        assert_eq!(df.n_cols(), 2);
    }

    #[test]
    fn test_dataset_is_isolated_from_mutation() {
        let df = dataset();
        let run = run_sandboxed(
            "df['double'] = df['sales'] * 2\nresult = df",
            &df,
            &ExecutionOptions::default(),
        )
        .unwrap();
        match &run.result {
            ExecutionResult::Table(out) => assert_eq!(out.shape(), (4, 3)),
            other => panic!("expected table, got {}", other.kind()),
        }
        assert_eq!(df.shape(), (4, 2));
    }

    #[test]
    fn test_groupby_aggregation_end_to_end() {
        let run = run_sandboxed(
            "result = df.groupby('region')['sales'].sum()",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap();
        match &run.result {
            ExecutionResult::Series(s) => {
                assert_eq!(
                    s.index(),
                    &[Scalar::Str("east".into()), Scalar::Str("west".into())]
                );
                assert_eq!(s.values(), &[Scalar::Int(15), Scalar::Int(27)]);
            }
            other => panic!("expected series, got {}", other.kind()),
        }
    }

    #[test]
    fn test_same_code_twice_gives_same_result() {
        let df = dataset();
        let code = "result = df.sort_values('sales', ascending=False).head(2)";
        let first = run_sandboxed(code, &df, &ExecutionOptions::default()).unwrap();
        let second = run_sandboxed(code, &df, &ExecutionOptions::default()).unwrap();
        assert_eq!(first.result, second.result);
    }

    #[test]
    fn test_missing_column_is_reported_with_name() {
        let err = run_sandboxed(
            "result = df['profit'].mean()",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        match err {
            SandboxError::Execution { message, .. } => {
                assert!(message.contains("profit"), "message: {}", message);
            }
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_unnamed_binding_is_extracted_as_fallback() {
        let run = run_sandboxed(
            "x = df.head(3)",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap();
        match &run.result {
            ExecutionResult::Table(f) => assert_eq!(f.n_rows(), 3),
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn test_print_only_run_has_logs_but_no_result() {
        let run = run_sandboxed(
            "print(len(df))",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert!(run.result.is_absent());
        assert_eq!(run.logs, "4\n");
    }

    #[test]
    fn test_infinite_loop_hits_budget() {
        let options = ExecutionOptions {
            op_budget: Some(50_000),
            timeout: None,
        };
        let err = run_sandboxed("while True: pass", &dataset(), &options).unwrap_err();
        assert!(matches!(err, SandboxError::Budget { .. }));
    }

    #[test]
    fn test_syntax_error_carries_line() {
        let err = run_sandboxed(
            "result = df['sales'].sum(",
            &dataset(),
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }

    struct CannedGenerator {
        code: String,
    }

    #[async_trait]
    impl CodeGenerator for CannedGenerator {
        async fn generate(
            &self,
            _question: &str,
            _schema: &BTreeMap<String, String>,
            _n_rows: usize,
        ) -> Result<String> {
            Ok(self.code.clone())
        }
    }

    #[tokio::test]
    async fn test_pipeline_answers_with_canned_generator() {
        let pipeline = QueryPipeline::new(Box::new(CannedGenerator {
            code: "result = df['sales'].sum()".to_string(),
        }));
        let outcome = pipeline.ask("total sales?", &dataset()).await.unwrap();
        assert_eq!(outcome.result, ExecutionResult::Scalar(Scalar::Int(42)));
        assert_eq!(outcome.code, "result = df['sales'].sum()");
    }

    #[tokio::test]
    async fn test_pipeline_rejects_generated_code_with_denied_token() {
        let pipeline = QueryPipeline::new(Box::new(CannedGenerator {
            code: "import os\nresult = 1".to_string(),
        }));
        let err = pipeline.ask("anything", &dataset()).await.unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(_)));
    }
}
