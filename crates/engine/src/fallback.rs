use ledgersort_core::{AccountPath, Direction, Method, NormalizedDescription, RawTransaction};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("Fallback transport error: {0}")]
    Transport(String),
    #[error("Fallback returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("Fallback circuit is open")]
    CircuitOpen,
    #[error("Fallback timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for FallbackError {
    fn from(e: reqwest::Error) -> Self {
        FallbackError::Transport(e.to_string())
    }
}

/// A classification the local tiers produced but could not use.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandidate {
    pub method: Method,
    pub account: Option<AccountPath>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub transaction: RawTransaction,
    pub normalized: NormalizedDescription,
    pub direction: Direction,
    pub rejected: Vec<RejectedCandidate>,
}

/// What the fallback proposes. The account is raw text; the engine parses
/// and validates it like any other result.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAnswer {
    pub account: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
}

pub type FallbackFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FallbackAnswer, FallbackError>> + Send + 'a>>;

/// Last-resort classifier consulted only when every local tier misses.
/// Any error is treated as "no classification available".
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, request: FallbackRequest) -> FallbackFuture<'_>;
}

// ── Circuit breaker ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `failure_threshold` consecutive failures and rejects calls
/// until `cooldown` has passed; then lets one trial call through.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker still holds consistent counters.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may go through right now.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let cooled = inner.opened_at.map_or(true, |t| t.elapsed() >= self.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        if inner.state == CircuitState::HalfOpen || inner.failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }
}

/// Wraps a fallback with a [`CircuitBreaker`].
pub struct Guarded<F> {
    inner: F,
    breaker: CircuitBreaker,
}

impl<F: FallbackStrategy> Guarded<F> {
    pub fn new(inner: F, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<F: FallbackStrategy> FallbackStrategy for Guarded<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn classify(&self, request: FallbackRequest) -> FallbackFuture<'_> {
        Box::pin(async move {
            if !self.breaker.try_acquire() {
                return Err(FallbackError::CircuitOpen);
            }
            let outcome = self.inner.classify(request).await;
            match &outcome {
                Ok(_) => self.breaker.record_success(),
                Err(e) => {
                    tracing::debug!(
                        fallback = self.inner.name(),
                        error = %e,
                        "fallback call failed"
                    );
                    self.breaker.record_failure();
                }
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ledgersort_core::{normalize, Money};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FallbackStrategy for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn classify(&self, _request: FallbackRequest) -> FallbackFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(FallbackError::Transport("connection refused".into()))
                } else {
                    Ok(FallbackAnswer {
                        account: Some("Expenses:Food:Dining".into()),
                        confidence: 0.7,
                        reasoning: "looks like food".into(),
                    })
                }
            })
        }
    }

    fn request() -> FallbackRequest {
        let tx = RawTransaction::outgoing(
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            "mystery",
            Money::from_cents(100),
        );
        FallbackRequest {
            normalized: normalize(&tx.description),
            direction: Direction::Out,
            transaction: tx,
            rejected: vec![],
        }
    }

    #[test]
    fn breaker_opens_after_threshold() {
        let b = CircuitBreaker::new(2, Duration::from_secs(60));
        assert!(b.try_acquire());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.try_acquire());
    }

    #[test]
    fn breaker_half_opens_after_cooldown() {
        let b = CircuitBreaker::new(1, Duration::ZERO);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Only one trial call while half-open.
        assert!(!b.try_acquire());
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failures(), 0);
    }

    #[test]
    fn failed_trial_reopens() {
        let b = CircuitBreaker::new(3, Duration::ZERO);
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.try_acquire());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn guarded_short_circuits_when_open() {
        let guarded = Guarded::new(
            Flaky {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            CircuitBreaker::new(2, Duration::from_secs(60)),
        );
        for _ in 0..2 {
            assert!(matches!(guarded.classify(request()).await, Err(FallbackError::Transport(_))));
        }
        assert!(matches!(guarded.classify(request()).await, Err(FallbackError::CircuitOpen)));
        assert_eq!(guarded.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn guarded_passes_answers_through() {
        let guarded = Guarded::new(
            Flaky {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            CircuitBreaker::new(2, Duration::from_secs(60)),
        );
        let answer = guarded.classify(request()).await.unwrap();
        assert_eq!(answer.account.as_deref(), Some("Expenses:Food:Dining"));
        assert_eq!(guarded.breaker().state(), CircuitState::Closed);
    }
}
