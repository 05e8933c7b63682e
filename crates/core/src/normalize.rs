use serde::{Deserialize, Serialize};
use std::fmt;

/// A description lower-cased with whitespace runs collapsed to one space and
/// the ends trimmed. Only constructible through [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedDescription(String);

impl NormalizedDescription {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedDescription {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn normalize(text: &str) -> NormalizedDescription {
    NormalizedDescription(
        text.split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
