use ledgersort_core::{
    AccountPath, ChartOfAccounts, ClassificationResult, InputError, Method, NormalizedDescription,
    RawTransaction, ValidatedTransaction,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ClassifierConfig;
use crate::direction::{DirectionCheck, DirectionPolicy};
use crate::fallback::{
    FallbackAnswer, FallbackError, FallbackRequest, FallbackStrategy, RejectedCandidate,
};
use crate::inherit::{InheritDirective, InheritanceIndex};
use crate::rules::{RuleError, RuleTable};
use crate::stats::BatchStatistics;
use crate::strategy::{Candidate, Cascade, Hit};

/// How many closest accounts to name when a result is not in the chart.
const SUGGESTIONS: usize = 3;

/// Index-aligned results plus the batch summary.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ClassificationResult>,
    pub statistics: BatchStatistics,
}

impl BatchOutcome {
    /// Positions and results flagged for review, in input order.
    pub fn review_items(&self) -> impl Iterator<Item = (usize, &ClassificationResult)> {
        self.results.iter().enumerate().filter(|(_, r)| r.needs_review)
    }
}

/// Outcome of the local tiers for one transaction.
enum FirstPass {
    Invalid(InputError),
    Matched(ValidatedTransaction, Candidate),
    Pending(ValidatedTransaction, InheritDirective),
    Miss(ValidatedTransaction),
}

/// A transaction the local tiers could not settle.
struct Gap {
    position: usize,
    validated: ValidatedTransaction,
    rejected: Vec<RejectedCandidate>,
    reason: String,
}

/// Runs the rule cascade, the inheritance pass and the optional fallback
/// over transactions. Rules and chart are fixed at construction.
pub struct Classifier {
    cascade: Arc<Cascade>,
    chart: ChartOfAccounts,
    fallback: Option<Arc<dyn FallbackStrategy>>,
    direction: DirectionPolicy,
    config: ClassifierConfig,
}

impl Classifier {
    /// Fails if any rule is malformed or targets an account outside `chart`.
    pub fn new(
        rules: &RuleTable,
        chart: ChartOfAccounts,
        config: ClassifierConfig,
    ) -> Result<Self, RuleError> {
        let cascade = Arc::new(Cascade::compile(rules, &chart)?);
        let counts = rules.counts();
        info!(
            exact = counts.exact,
            regex = counts.regex,
            keyword = counts.keyword,
            accounts = chart.len(),
            "classifier ready"
        );
        Ok(Self {
            cascade,
            chart,
            fallback: None,
            direction: config.direction_policy(),
            config,
        })
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackStrategy>) -> Self {
        info!(fallback = fallback.name(), "fallback enabled");
        self.fallback = Some(fallback);
        self
    }

    pub fn chart(&self) -> &ChartOfAccounts {
        &self.chart
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Classifies one transaction on its own. An inherit transaction has no
    /// peers here, so it goes straight to the fallback.
    pub async fn classify(&self, tx: &RawTransaction) -> ClassificationResult {
        let gap = match match_local(&self.cascade, tx) {
            FirstPass::Invalid(e) => return input_error(&e),
            FirstPass::Matched(validated, candidate) => {
                return self.finalize(&validated, candidate)
            }
            FirstPass::Pending(validated, directive) => no_base(0, validated, &directive),
            FirstPass::Miss(validated) => no_rule(0, validated),
        };
        self.settle(std::slice::from_ref(tx), vec![gap])
            .await
            .into_iter()
            .next()
            .map_or_else(|| ClassificationResult::unresolved("Not classified"), |(_, r)| r)
    }

    /// Classifies a batch. Results are index-aligned with `transactions` and
    /// reproducible for the same input order.
    pub async fn classify_batch(&self, transactions: &[RawTransaction]) -> BatchOutcome {
        let span = info_span!("classify_batch", batch_id = %Uuid::new_v4());
        self.run_batch(transactions).instrument(span).await
    }

    async fn run_batch(&self, transactions: &[RawTransaction]) -> BatchOutcome {
        let started = Instant::now();
        info!(transactions = transactions.len(), "batch started");

        let total = transactions.len();
        let mut results: Vec<Option<ClassificationResult>> = vec![None; total];
        // Keys of finalized transactions; pending ones stay `None` so they never become bases.
        let mut keys: Vec<Option<NormalizedDescription>> = vec![None; total];
        let mut misses = Vec::new();
        let mut pending = Vec::new();
        let mut input_errors = 0;

        let first_pass = self.first_pass(transactions).await;
        for (position, outcome) in first_pass.into_iter().enumerate() {
            match outcome {
                FirstPass::Invalid(e) => {
                    warn!(position, error = %e, "skipping invalid transaction");
                    input_errors += 1;
                    results[position] = Some(input_error(&e));
                }
                FirstPass::Matched(validated, candidate) => {
                    keys[position] = Some(validated.normalized.clone());
                    results[position] = Some(self.finalize(&validated, candidate));
                }
                FirstPass::Miss(validated) => {
                    keys[position] = Some(validated.normalized.clone());
                    misses.push(no_rule(position, validated));
                }
                FirstPass::Pending(validated, directive) => {
                    pending.push((position, validated, directive))
                }
            }
        }

        // Fallback answers land before the barrier so they can serve as bases.
        for (position, result) in self.settle(transactions, misses).await {
            results[position] = Some(result);
        }

        let bases = InheritanceIndex::build(
            results
                .iter()
                .zip(&keys)
                .enumerate()
                .filter_map(|(position, (result, key))| {
                    Some((position, key.as_ref()?, result.as_ref()?))
                }),
        );
        debug!(bases = bases.len(), pending = pending.len(), "first pass complete");

        let second_pass = pending.len();
        let mut orphans = Vec::new();
        for (position, validated, directive) in pending {
            match bases.resolve(&directive, self.config.inherit_penalty) {
                Some((candidate, base)) => {
                    let base_flagged = base.needs_review;
                    let mut result = self.finalize(&validated, candidate);
                    if base_flagged && !result.needs_review {
                        result.needs_review = true;
                        result.annotate("base transaction is flagged for review");
                    }
                    results[position] = Some(result);
                }
                None => {
                    debug!(position, base_key = %directive.base_key, "no base transaction");
                    orphans.push(no_base(position, validated, &directive));
                }
            }
        }

        for (position, result) in self.settle(transactions, orphans).await {
            results[position] = Some(result);
        }

        let results: Vec<ClassificationResult> = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ClassificationResult::unresolved("Not classified")))
            .collect();
        let statistics =
            BatchStatistics::compute(&results, input_errors, second_pass, started.elapsed());

        info!(
            total = statistics.total,
            resolved = statistics.resolved(),
            needs_review = statistics.needs_review,
            inherited = statistics.inherited,
            elapsed_ms = statistics.elapsed.as_millis() as u64,
            "batch finished"
        );
        BatchOutcome { results, statistics }
    }

    /// Local tiers over the whole batch. Larger batches run on the blocking
    /// pool, split across worker threads. Output order matches the input.
    async fn first_pass(&self, transactions: &[RawTransaction]) -> Vec<FirstPass> {
        let workers = self.config.worker_count().min(transactions.len());
        if workers <= 1 {
            return transactions
                .iter()
                .map(|tx| match_local(&self.cascade, tx))
                .collect();
        }

        let cascade = Arc::clone(&self.cascade);
        let owned = transactions.to_vec();
        let span = tracing::Span::current();
        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            match_parallel(&cascade, &owned, workers)
        })
        .await;

        match joined {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(error = %e, "first-pass task cancelled, matching inline");
                transactions
                    .iter()
                    .map(|tx| match_local(&self.cascade, tx))
                    .collect()
            }
        }
    }

    /// Turns a candidate into a result: chart check, direction check, then
    /// the review threshold. An unknown account or a direction mismatch
    /// always flags review.
    fn finalize(
        &self,
        validated: &ValidatedTransaction,
        candidate: Candidate,
    ) -> ClassificationResult {
        let account = candidate.account.clone();
        let mut result = ClassificationResult::matched(
            candidate.account,
            candidate.confidence,
            candidate.method,
            candidate.reasoning,
        );

        if !self.chart.contains(&account) {
            let closest: Vec<&str> = self
                .chart
                .suggest(account.as_str(), SUGGESTIONS)
                .into_iter()
                .map(AccountPath::as_str)
                .collect();
            warn!(%account, method = %result.method, "account is not in the chart of accounts");
            result.needs_review = true;
            result.annotate(&format!(
                "'{account}' is not in the chart of accounts (closest: {})",
                closest.join(", ")
            ));
        }

        if let DirectionCheck::Mismatch { expected } =
            self.direction.check(validated.direction, &validated.normalized, &account)
        {
            warn!(%account, direction = %validated.direction, expected, "direction mismatch");
            result.confidence = (result.confidence - self.config.direction_penalty).max(0.0);
            result.needs_review = true;
            result.annotate(&format!(
                "'{}' money usually goes to a {expected}",
                validated.direction
            ));
        }

        if result.confidence < self.config.review_threshold {
            result.needs_review = true;
        }
        result
    }

    /// Consults the fallback for every gap and settles each one, either with
    /// the fallback's account or as unresolved.
    async fn settle(
        &self,
        transactions: &[RawTransaction],
        gaps: Vec<Gap>,
    ) -> Vec<(usize, ClassificationResult)> {
        if gaps.is_empty() {
            return Vec::new();
        }
        let requests = gaps
            .iter()
            .map(|gap| {
                (
                    gap.position,
                    FallbackRequest {
                        transaction: transactions[gap.position].clone(),
                        normalized: gap.validated.normalized.clone(),
                        direction: gap.validated.direction,
                        rejected: gap.rejected.clone(),
                    },
                )
            })
            .collect();
        let mut answers = self.consult_fallback(requests).await;

        gaps.into_iter()
            .map(|gap| {
                let answer = answers.remove(&gap.position);
                (gap.position, self.settle_gap(gap, answer))
            })
            .collect()
    }

    fn settle_gap(
        &self,
        gap: Gap,
        answer: Option<Result<FallbackAnswer, FallbackError>>,
    ) -> ClassificationResult {
        let mut unresolved = ClassificationResult::unresolved(gap.reason);
        let Some(fallback) = &self.fallback else {
            return unresolved;
        };
        match answer {
            None => unresolved.annotate("fallback unavailable"),
            Some(Err(e)) => {
                warn!(
                    position = gap.position,
                    fallback = fallback.name(),
                    error = %e,
                    "fallback failed"
                );
                unresolved.annotate(&format!("fallback failed: {e}"));
            }
            Some(Ok(answer)) => match answer.account.as_deref().map(AccountPath::parse) {
                None => {
                    unresolved.annotate(&format!("fallback had no answer: {}", answer.reasoning))
                }
                Some(Err(e)) => {
                    warn!(
                        position = gap.position,
                        error = %e,
                        "fallback proposed a malformed account"
                    );
                    unresolved.annotate(&format!("fallback proposed a malformed account: {e}"));
                }
                Some(Ok(account)) => {
                    let candidate = Candidate {
                        account,
                        confidence: answer.confidence,
                        method: Method::LlmMatch,
                        reasoning: answer.reasoning,
                    };
                    return self.finalize(&gap.validated, candidate);
                }
            },
        }
        unresolved
    }

    /// Calls the fallback concurrently, bounded by the configured limit, each
    /// call cut off at the configured timeout. Answers are keyed by position.
    async fn consult_fallback(
        &self,
        requests: Vec<(usize, FallbackRequest)>,
    ) -> HashMap<usize, Result<FallbackAnswer, FallbackError>> {
        let mut answers = HashMap::with_capacity(requests.len());
        let Some(fallback) = &self.fallback else {
            return answers;
        };

        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_fallbacks));
        let timeout = self.config.fallback_timeout();
        let mut tasks = JoinSet::new();
        for (position, request) in requests {
            let fallback = Arc::clone(fallback);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let outcome = match limiter.acquire_owned().await {
                    Ok(_permit) => {
                        match tokio::time::timeout(timeout, fallback.classify(request)).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(FallbackError::Timeout(timeout)),
                        }
                    }
                    Err(_) => Err(FallbackError::Transport("fallback limiter closed".to_string())),
                };
                (position, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => {
                    answers.insert(position, outcome);
                }
                Err(e) => warn!(error = %e, "fallback task did not complete"),
            }
        }
        answers
    }
}

fn match_local(cascade: &Cascade, tx: &RawTransaction) -> FirstPass {
    let validated = match tx.validate() {
        Ok(v) => v,
        Err(e) => return FirstPass::Invalid(e),
    };
    match cascade.evaluate(&validated.normalized) {
        Some(Hit::Account(candidate)) => FirstPass::Matched(validated, candidate),
        Some(Hit::Inherit(directive)) => FirstPass::Pending(validated, directive),
        None => FirstPass::Miss(validated),
    }
}

/// Splits `transactions` into one chunk per worker on scoped threads.
fn match_parallel(
    cascade: &Cascade,
    transactions: &[RawTransaction],
    workers: usize,
) -> Vec<FirstPass> {
    let chunk_size = transactions.len().div_ceil(workers.max(1));
    let span = tracing::Span::current();
    std::thread::scope(|scope| {
        let handles: Vec<_> = transactions
            .chunks(chunk_size)
            .map(|chunk| {
                let span = span.clone();
                scope.spawn(move || {
                    let _entered = span.enter();
                    chunk
                        .iter()
                        .map(|tx| match_local(cascade, tx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| {
                h.join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

fn input_error(e: &InputError) -> ClassificationResult {
    ClassificationResult::unresolved(format!("Input error: {e}"))
}

fn no_rule(position: usize, validated: ValidatedTransaction) -> Gap {
    Gap {
        position,
        reason: format!("No rule matched '{}'", validated.normalized),
        validated,
        rejected: Vec::new(),
    }
}

fn no_base(
    position: usize,
    validated: ValidatedTransaction,
    directive: &InheritDirective,
) -> Gap {
    Gap {
        position,
        reason: format!("No base transaction found for '{}'", directive.base_key),
        validated,
        rejected: vec![RejectedCandidate {
            method: Method::Inherited,
            account: None,
            reason: format!(
                "no base transaction '{}' (pattern '{}')",
                directive.base_key, directive.pattern
            ),
        }],
    }
}
