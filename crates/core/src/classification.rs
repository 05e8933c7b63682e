use serde::{Deserialize, Serialize};
use std::fmt;

use super::account::AccountPath;

/// How a result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ExactMatch,
    RegexMatch,
    KeywordMatch,
    Inherited,
    LlmMatch,
    Unresolved,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::ExactMatch,
        Method::RegexMatch,
        Method::KeywordMatch,
        Method::Inherited,
        Method::LlmMatch,
        Method::Unresolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::ExactMatch => "exact_match",
            Method::RegexMatch => "regex_match",
            Method::KeywordMatch => "keyword_match",
            Method::Inherited => "inherited",
            Method::LlmMatch => "llm_match",
            Method::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// `None` means unresolved.
    pub account: Option<AccountPath>,
    pub confidence: f64,
    pub method: Method,
    pub needs_review: bool,
    pub reasoning: String,
}

impl ClassificationResult {
    pub fn matched(
        account: AccountPath,
        confidence: f64,
        method: Method,
        reasoning: String,
    ) -> Self {
        ClassificationResult {
            account: Some(account),
            confidence: confidence.clamp(0.0, 1.0),
            method,
            needs_review: false,
            reasoning,
        }
    }

    pub fn unresolved(reasoning: impl Into<String>) -> Self {
        ClassificationResult {
            account: None,
            confidence: 0.0,
            method: Method::Unresolved,
            needs_review: true,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.account.is_some()
    }

    pub fn account_label(&self) -> &str {
        self.account.as_ref().map_or("unresolved", AccountPath::as_str)
    }

    /// Appends a clause to the reasoning, `; `-separated.
    pub fn annotate(&mut self, note: &str) {
        if self.reasoning.is_empty() {
            self.reasoning = note.to_string();
        } else {
            self.reasoning.push_str("; ");
            self.reasoning.push_str(note);
        }
    }
}
