//! Second-pass resolution of transactions that defer to a related one,
//! e.g. an "exceed" surcharge taking the account of the original purchase.

use ledgersort_core::{normalize, AccountPath, ClassificationResult, Method, NormalizedDescription};
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::strategy::Candidate;

#[derive(Debug, Clone, PartialEq)]
pub struct InheritDirective {
    /// Normalized description with the modifier phrase removed.
    pub base_key: NormalizedDescription,
    /// Participating capture groups of the triggering pattern, in order.
    pub captures: Vec<String>,
    pub pattern: String,
}

impl InheritDirective {
    pub fn from_match(
        text: &NormalizedDescription,
        caps: &Captures,
        pattern: &str,
        strip: &Regex,
    ) -> Self {
        let base_key = normalize(&strip.replace_all(text.as_str(), " "));
        let captures = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect();
        InheritDirective {
            base_key,
            captures,
            pattern: pattern.to_string(),
        }
    }
}

/// A finalized transaction that pending ones may inherit from.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseEntry {
    /// Position in the batch.
    pub position: usize,
    pub description: NormalizedDescription,
    pub account: AccountPath,
    pub confidence: f64,
    pub method: Method,
    pub needs_review: bool,
}

/// Normalized description → most recently finalized transaction with that
/// description. Built once after the first pass and read-only afterwards.
#[derive(Debug, Default)]
pub struct InheritanceIndex {
    by_key: HashMap<NormalizedDescription, BaseEntry>,
}

impl InheritanceIndex {
    /// Entries must arrive in batch order; a later entry replaces an earlier
    /// one with the same key. Unresolved results are ignored.
    pub fn build<'a, I>(finalized: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'a NormalizedDescription, &'a ClassificationResult)>,
    {
        let mut by_key = HashMap::new();
        for (position, description, result) in finalized {
            let Some(account) = &result.account else {
                continue;
            };
            by_key.insert(
                description.clone(),
                BaseEntry {
                    position,
                    description: description.clone(),
                    account: account.clone(),
                    confidence: result.confidence,
                    method: result.method,
                    needs_review: result.needs_review,
                },
            );
        }
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn lookup(&self, directive: &InheritDirective) -> Option<&BaseEntry> {
        if directive.base_key.is_empty() {
            return None;
        }
        self.by_key.get(&directive.base_key)
    }

    /// Resolves `directive` into a candidate carrying the base account, with
    /// `penalty` taken off the base confidence.
    pub fn resolve(
        &self,
        directive: &InheritDirective,
        penalty: f64,
    ) -> Option<(Candidate, &BaseEntry)> {
        let base = self.lookup(directive)?;
        let candidate = Candidate {
            account: base.account.clone(),
            confidence: (base.confidence - penalty).clamp(0.0, 1.0),
            method: Method::Inherited,
            reasoning: format!(
                "Inherited from transaction #{} '{}' ({})",
                base.position + 1,
                base.description,
                base.method
            ),
        };
        Some((candidate, base))
    }
}
