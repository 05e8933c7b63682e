use ledgersort_core::{ClassificationResult, Method};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Aggregate view of one classified batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatistics {
    pub total: usize,
    /// Every method is present, with zero counts included.
    pub by_method: BTreeMap<Method, usize>,
    pub needs_review: usize,
    pub review_percentage: f64,
    pub input_errors: usize,
    pub inherited: usize,
    /// Finalized without waiting for the inheritance pass.
    pub first_pass: usize,
    /// Pending inherit transactions revisited after the barrier.
    pub second_pass: usize,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl BatchStatistics {
    pub fn compute(
        results: &[ClassificationResult],
        input_errors: usize,
        second_pass: usize,
        elapsed: Duration,
    ) -> Self {
        let mut by_method: BTreeMap<Method, usize> = Method::ALL.iter().map(|m| (*m, 0)).collect();
        let mut needs_review = 0;
        for result in results {
            *by_method.entry(result.method).or_insert(0) += 1;
            if result.needs_review {
                needs_review += 1;
            }
        }

        let total = results.len();
        let review_percentage = if total == 0 {
            0.0
        } else {
            needs_review as f64 * 100.0 / total as f64
        };

        BatchStatistics {
            total,
            inherited: by_method.get(&Method::Inherited).copied().unwrap_or(0),
            by_method,
            needs_review,
            review_percentage,
            input_errors,
            first_pass: total.saturating_sub(second_pass),
            second_pass,
            elapsed,
        }
    }

    pub fn count(&self, method: Method) -> usize {
        self.by_method.get(&method).copied().unwrap_or(0)
    }

    pub fn resolved(&self) -> usize {
        self.total - self.count(Method::Unresolved)
    }
}
