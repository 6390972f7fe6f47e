//! Execution and code-generation configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource discipline for one sandboxed execution.
///
/// The allowed syntax includes unbounded loops, so every execution carries
/// a cooperative operation budget and a wall-clock deadline checked from
/// inside the interpreter loop. Either limit can be disabled for callers
/// that supervise execution themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Maximum interpreter operations before the run is aborted.
    pub op_budget: Option<u64>,
    /// Wall-clock limit for one execution.
    pub timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            op_budget: Some(2_000_000),
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ExecutionOptions {
    /// No budget, no deadline. Only sensible when the caller enforces its
    /// own supervision.
    pub fn unbounded() -> Self {
        Self { op_budget: None, timeout: None }
    }
}

/// Settings for the code-generation adapter. Injected explicitly; the
/// library never reads credentials from the process environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
}

impl GeneratorConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4-turbo".to_string(),
            temperature: 0.0,
            max_tokens: 800,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_bounded() {
        let options = ExecutionOptions::default();
        assert!(options.op_budget.is_some());
        assert!(options.timeout.is_some());
    }

    #[test]
    fn test_generator_config_builder() {
        let config = GeneratorConfig::new("key").with_model("gpt-4o");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, 0.0);
    }
}
