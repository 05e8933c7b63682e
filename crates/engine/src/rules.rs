use ledgersort_core::{AccountPathError, ChartError, ChartOfAccounts};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const HOUSEHOLD_RULES: &str = include_str!("../data/household-rules.toml");
const HOUSEHOLD_CHART: &str = include_str!("../data/chart-of-accounts.txt");

/// The bundled household chart of accounts the household rules target.
pub fn household_chart() -> Result<ChartOfAccounts, ChartError> {
    ChartOfAccounts::parse(HOUSEHOLD_CHART)
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse rules TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{tier} rule #{index} has an empty pattern")]
    EmptyPattern { tier: &'static str, index: usize },
    #[error("Exact key '{key}' maps to both {first} and {second}")]
    ConflictingExact {
        key: String,
        first: String,
        second: String,
    },
    #[error("Keyword '{key}' maps to both {first} and {second}")]
    ConflictingKeyword {
        key: String,
        first: String,
        second: String,
    },
    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Regex rule '{0}' must set exactly one of `account` or `inherit`")]
    RegexTarget(String),
    #[error("Rule '{rule}' has a malformed account: {source}")]
    InvalidAccount {
        rule: String,
        #[source]
        source: AccountPathError,
    },
    #[error("Rule '{rule}' targets {account}, which is not in the chart of accounts")]
    UnknownAccount { rule: String, account: String },
    #[error("Rule '{rule}' has an unusable account template '{template}': {reason}")]
    InvalidTemplate {
        rule: String,
        template: String,
        reason: String,
    },
}

/// `description` is normalized before lookup, so authored case does not matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactRule {
    pub description: String,
    pub account: String,
}

/// Strips the modifier phrase that marks a transaction as deferring to
/// another one; what remains is the key of the base transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InheritSpec {
    pub strip: String,
}

/// `account` may reference capture groups as `{1}`, `{2}`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexRule {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<InheritSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub account: String,
}

/// The three rule tiers, in authored order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    #[serde(default)]
    pub exact: Vec<ExactRule>,
    #[serde(default)]
    pub regex: Vec<RegexRule>,
    #[serde(default)]
    pub keyword: Vec<KeywordRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleCounts {
    pub exact: usize,
    pub regex: usize,
    pub keyword: usize,
}

impl RuleCounts {
    pub fn total(&self) -> usize {
        self.exact + self.regex + self.keyword
    }
}

impl RuleTable {
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        Ok(toml::from_str(toml_content)?)
    }

    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// The bundled household rule set.
    pub fn household() -> Result<Self, RuleError> {
        Self::from_toml(HOUSEHOLD_RULES)
    }

    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            exact: self.exact.len(),
            regex: self.regex.len(),
            keyword: self.keyword.len(),
        }
    }

    pub fn with_exact(mut self, description: &str, account: &str) -> Self {
        self.exact.push(ExactRule {
            description: description.to_string(),
            account: account.to_string(),
        });
        self
    }

    pub fn with_regex(mut self, pattern: &str, account: &str) -> Self {
        self.regex.push(RegexRule {
            pattern: pattern.to_string(),
            account: Some(account.to_string()),
            inherit: None,
        });
        self
    }

    pub fn with_inherit(mut self, pattern: &str, strip: &str) -> Self {
        self.regex.push(RegexRule {
            pattern: pattern.to_string(),
            account: None,
            inherit: Some(InheritSpec {
                strip: strip.to_string(),
            }),
        });
        self
    }

    pub fn with_keyword(mut self, keyword: &str, account: &str) -> Self {
        self.keyword.push(KeywordRule {
            keyword: keyword.to_string(),
            account: account.to_string(),
        });
        self
    }
}
