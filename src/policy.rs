//! Lexical policy screen.
//!
//! The first, cheapest gate in the pipeline: a case-insensitive substring
//! scan over the raw code text. It runs before parsing on purpose, so
//! dangerous-but-malformed text is rejected for the real reason instead of
//! whatever unrelated parse error it happens to trip. Matching is plain
//! substring, even inside string literals and comments; false positives
//! are accepted, false negatives are not.

use crate::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};

/// The tokens whose presence anywhere in code text forces rejection:
/// the import keyword, file/exec/eval builtins, process and network
/// module names, and the dunder prefix that reaches interpreter internals.
pub const DEFAULT_DISALLOWED_TOKENS: &[&str] = &[
    "import",
    "open",
    "exec",
    "eval",
    "subprocess",
    "socket",
    "os",
    "system",
    "shutil",
    "__",
];

/// Configurable denylist applied to raw code text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPolicy {
    pub disallowed: Vec<String>,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            disallowed: DEFAULT_DISALLOWED_TOKENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TokenPolicy {
    /// Reject code containing any disallowed token as a substring of the
    /// lowercased text.
    pub fn screen(&self, code: &str) -> Result<()> {
        let lower = code.to_lowercase();
        for token in &self.disallowed {
            if lower.contains(token.as_str()) {
                tracing::warn!(token = token.as_str(), "policy screen rejected code");
                return Err(SandboxError::PolicyViolation(token.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_rejected() {
        let err = TokenPolicy::default().screen("import os\nresult = 1").unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(t) if t == "import"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(TokenPolicy::default().screen("x = EVAL").is_err());
    }

    #[test]
    fn test_token_inside_string_literal_rejected() {
        assert!(TokenPolicy::default().screen("x = 'please exec this'").is_err());
    }

    #[test]
    fn test_dunder_rejected() {
        assert!(TokenPolicy::default().screen("x = df.__class__").is_err());
    }

    #[test]
    fn test_clean_code_passes() {
        let code = "result = df.groupby('region')['sales'].sum()";
        assert!(TokenPolicy::default().screen(code).is_ok());
    }

    #[test]
    fn test_false_positive_accepted_by_design() {
        // "cost" contains "os"; coarse matching rejects it anyway.
        assert!(TokenPolicy::default().screen("x = df['cost']").is_err());
    }
}
