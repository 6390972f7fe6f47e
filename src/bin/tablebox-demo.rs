//! Run a snippet or a natural-language question against a canned sales
//! dataset and print the outcome.
//!
//! ```text
//! tablebox-demo "result = df.groupby('region')['sales'].sum()"
//! OPENAI_API_KEY=sk-... tablebox-demo "total sales by region?"
//! ```
//!
//! With `OPENAI_API_KEY` set the argument is treated as a question and
//! code is generated for it; otherwise the argument is executed as code
//! directly. Without an argument a built-in groupby example runs. Set
//! `RUST_LOG` to see pipeline tracing.

use anyhow::Context;
use tablebox::{
    run_sandboxed, ExecutionOptions, ExecutionResult, Frame, GeneratorConfig, OpenAiGenerator,
    QueryPipeline, Scalar,
};
use tracing_subscriber::EnvFilter;

fn sample_frame() -> anyhow::Result<Frame> {
    Frame::from_columns(vec![
        (
            "region".to_string(),
            vec![
                Scalar::Str("east".into()),
                Scalar::Str("west".into()),
                Scalar::Str("east".into()),
                Scalar::Str("north".into()),
                Scalar::Str("west".into()),
            ],
        ),
        (
            "sales".to_string(),
            vec![
                Scalar::Int(120),
                Scalar::Int(95),
                Scalar::Int(43),
                Scalar::Int(210),
                Scalar::Int(66),
            ],
        ),
        (
            "margin".to_string(),
            vec![
                Scalar::Float(0.21),
                Scalar::Float(0.18),
                Scalar::Float(0.25),
                Scalar::Float(0.30),
                Scalar::Float(0.12),
            ],
        ),
    ])
    .context("building sample dataset")
}

fn print_outcome(result: &ExecutionResult, logs: &str) {
    if !logs.is_empty() {
        println!("output:\n{}", logs);
    }
    match result {
        ExecutionResult::Absent => println!("result: (no result variable was bound)"),
        other => println!("result ({}):\n{}", other.kind(), other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let df = sample_frame()?;
    println!("dataset:\n{}\n", df);

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if !api_key.trim().is_empty() {
        let question = std::env::args()
            .nth(1)
            .unwrap_or_else(|| "total sales by region?".to_string());
        println!("question:\n{}\n", question);
        let generator = OpenAiGenerator::new(GeneratorConfig::new(api_key))
            .context("building code generator")?;
        let pipeline = QueryPipeline::new(Box::new(generator));
        let outcome = pipeline
            .ask(&question, &df)
            .await
            .context("question pipeline failed")?;
        println!("generated code:\n{}\n", outcome.code);
        print_outcome(&outcome.result, &outcome.logs);
        return Ok(());
    }

    let code = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "result = df.groupby('region')['sales'].sum()".to_string());
    println!("code:\n{}\n", code);

    let run = run_sandboxed(&code, &df, &ExecutionOptions::default())
        .context("sandboxed execution failed")?;
    print_outcome(&run.result, &run.logs);
    Ok(())
}
