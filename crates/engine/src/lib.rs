pub mod config;
pub mod csv;
pub mod direction;
pub mod engine;
pub mod fallback;
pub mod inherit;
pub mod llm;
pub mod rules;
pub mod stats;
pub mod strategy;

pub use config::{ClassifierConfig, ConfigError};
pub use csv::CsvError;
pub use direction::{DirectionCheck, DirectionPolicy};
pub use engine::{BatchOutcome, Classifier};
pub use fallback::{
    CircuitBreaker, CircuitState, FallbackAnswer, FallbackError, FallbackRequest, FallbackStrategy,
    Guarded, RejectedCandidate,
};
pub use inherit::{InheritDirective, InheritanceIndex};
pub use llm::{ChatCompletionFallback, ChatFallbackConfig};
pub use rules::{household_chart, RuleCounts, RuleError, RuleTable};
pub use stats::BatchStatistics;
pub use strategy::{Cascade, EXACT_CONFIDENCE, KEYWORD_CONFIDENCE, REGEX_CONFIDENCE};
