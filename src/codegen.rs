//! Code generation boundary.
//!
//! The sandbox itself never talks to a model; it receives code as a
//! string. This module is the adapter that turns a natural-language
//! question plus a dataset schema into candidate analysis code via an
//! OpenAI-style chat completions endpoint. The trait seam exists so tests
//! and alternative backends can stand in for the HTTP client.

use crate::config::GeneratorConfig;
use crate::errors::{Result, SandboxError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Produces analysis code for a question about a dataset.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        schema: &BTreeMap<String, String>,
        n_rows: usize,
    ) -> Result<String>;
}

/// Chat-completions backed generator.
#[derive(Debug)]
pub struct OpenAiGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(SandboxError::Configuration(
                "generator API key is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = "You write short Python snippets that analyze a pandas \
DataFrame named df. Respond with code only, no explanations.";

/// The instructions sent alongside every question. The variable contract
/// and the banned constructs mirror what the validation pipeline enforces,
/// so compliant output passes vetting on the first attempt.
fn build_prompt(question: &str, schema: &BTreeMap<String, String>, n_rows: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("A pandas DataFrame named `df` is already loaded. Do not create or load data.\n");
    prompt.push_str(&format!("It has {} rows and these columns:\n", n_rows));
    for (name, dtype) in schema {
        prompt.push_str(&format!("- {}: {}\n", name, dtype));
    }
    prompt.push_str(
        "\nWrite Python code answering the question below. Rules:\n\
         - assign the final answer to a variable named `result`\n\
         - only pandas (as `pd`) and numpy (as `np`) are available\n\
         - no imports, no file or network access, no exec/eval\n\
         - code only, no markdown and no commentary\n\n",
    );
    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt
}

/// Models wrap answers in markdown fences despite instructions; strip one
/// leading/trailing fence pair if present.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string ("python", "py", ...) on the opening fence.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => return trimmed.to_string(),
    };
    let body = rest.strip_suffix("```").unwrap_or(rest);
    body.trim().to_string()
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        question: &str,
        schema: &BTreeMap<String, String>,
        n_rows: usize,
    ) -> Result<String> {
        let prompt = build_prompt(question, schema, n_rows);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        tracing::debug!(model = %self.config.model, "requesting code generation");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "code generation request rejected");
            return Err(SandboxError::Api(format!(
                "generation endpoint returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }
        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| SandboxError::Api("generation response had no choices".to_string()))?;
        Ok(strip_code_fences(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_fences() {
        let out = strip_code_fences("```\nresult = df.head()\n```");
        assert_eq!(out, "result = df.head()");
    }

    #[test]
    fn test_strip_python_fences() {
        let out = strip_code_fences("```python\nresult = df.head()\n```");
        assert_eq!(out, "result = df.head()");
    }

    #[test]
    fn test_unfenced_text_passes_through() {
        let out = strip_code_fences("result = df.head()\n");
        assert_eq!(out, "result = df.head()");
    }

    #[test]
    fn test_prompt_names_columns_and_contract() {
        let mut schema = BTreeMap::new();
        schema.insert("sales".to_string(), "int64".to_string());
        schema.insert("region".to_string(), "object".to_string());
        let prompt = build_prompt("total sales by region?", &schema, 120);
        assert!(prompt.contains("- sales: int64"));
        assert!(prompt.contains("- region: object"));
        assert!(prompt.contains("120 rows"));
        assert!(prompt.contains("`result`"));
        assert!(prompt.contains("total sales by region?"));
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        let err = OpenAiGenerator::new(GeneratorConfig::new("  ")).unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }
}
