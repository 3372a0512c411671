//! Condition polling with bounded retry
//!
//! Repeatedly evaluates an async check until it reports ready, the timeout
//! elapses, or an attached cancellation token fires:
//! - attempts run strictly one after another, never overlapping
//! - the first attempt is always made, whatever the timeout, unless the
//!   token was cancelled before the poll started
//! - attempt counts only include checks that ran to completion
//! - an `Err` from the check aborts the loop immediately and is not retried
//! - a timeout is reported only once `elapsed >= timeout`
//!
//! Two call shapes share the loop: [`poll`] for checks that produce a value
//! ([`Readiness::Ready`]) and [`poll_until`] for boolean checks, where only
//! an explicit `true` counts as ready.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, PollError, PollTimeoutError, Result};

/// Default overall timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default pause between attempts (100ms)
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// How long to keep polling and how long to pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Total budget, measured from the start of the first attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between the end of one attempt and the start of the next
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl PollConfig {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    pub fn from_durations(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reject configs that cannot describe a useful wait.
    ///
    /// The poll loop itself accepts a zero timeout (one attempt, then time
    /// out); this is for configs read from spec files, where zero is
    /// almost certainly a typo.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.interval_ms >= self.timeout_ms {
            debug!(
                timeout_ms = self.timeout_ms,
                interval_ms = self.interval_ms,
                "poll interval is not shorter than timeout; at most one attempt will run"
            );
        }
        Ok(())
    }
}

/// What one attempt reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    /// Not ready yet; try again after the interval
    Pending,
    /// Ready, carrying the produced value
    Ready(T),
}

impl<T> Readiness<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

impl<T> From<Option<T>> for Readiness<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Readiness::Ready(v),
            None => Readiness::Pending,
        }
    }
}

/// How a poll ended when the check itself never failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
    },
    Cancelled {
        attempts: u32,
        elapsed: Duration,
    },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. }
            | PollOutcome::TimedOut { attempts, .. }
            | PollOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Ready { elapsed, .. }
            | PollOutcome::TimedOut { elapsed, .. }
            | PollOutcome::Cancelled { elapsed, .. } => *elapsed,
        }
    }

    /// Convert into the value or a poll error, naming the awaited condition.
    pub fn into_result<E>(
        self,
        config: &PollConfig,
        description: Option<&str>,
    ) -> std::result::Result<T, PollError<E>> {
        match self {
            PollOutcome::Ready { value, .. } => Ok(value),
            PollOutcome::TimedOut { attempts, elapsed } => {
                Err(PollError::Timeout(PollTimeoutError {
                    description: description.map(str::to_string),
                    attempts,
                    elapsed,
                    timeout: config.timeout(),
                }))
            }
            PollOutcome::Cancelled { attempts, elapsed } => {
                Err(PollError::Cancelled { attempts, elapsed })
            }
        }
    }
}

/// A single polling operation.
///
/// Built per call; nothing is shared between two polls.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
    description: Option<String>,
    cancel: Option<CancellationToken>,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            description: None,
            cancel: None,
        }
    }

    /// Name the awaited condition for timeout messages and logs.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Abort the wait early when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll a value-producing check.
    pub async fn run<T, E, F, Fut>(&self, check: F) -> std::result::Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Readiness<T>, E>>,
    {
        self.outcome(check)
            .await
            .map_err(PollError::Check)?
            .into_result(&self.config, self.description.as_deref())
    }

    /// Poll a boolean check; resolves to `true` once it reports `true`.
    pub async fn run_until<E, F, Fut>(
        &self,
        mut check: F,
    ) -> std::result::Result<bool, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<bool, E>>,
    {
        self.run(|| {
            let attempt = check();
            async move {
                Ok::<_, E>(if attempt.await? {
                    Readiness::Ready(true)
                } else {
                    Readiness::Pending
                })
            }
        })
        .await
    }

    /// Run the loop and report how it ended.
    ///
    /// Only the check's own error is returned as `Err`; timeouts and
    /// cancellation are outcomes.
    pub async fn outcome<T, E, F, Fut>(
        &self,
        mut check: F,
    ) -> std::result::Result<PollOutcome<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Readiness<T>, E>>,
    {
        let timeout = self.config.timeout();
        let interval = self.config.interval();
        let what = self.description.as_deref().unwrap_or("condition");
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            // `attempts` counts completed checks only
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Ok(self.cancelled(attempts, start.elapsed()));
            }
            trace!(attempt = attempts.saturating_add(1), "polling {}", what);

            let readiness = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Ok(self.cancelled(attempts, start.elapsed()));
                    }
                    result = check() => result?,
                },
                None => check().await?,
            };
            attempts = attempts.saturating_add(1);

            let elapsed = start.elapsed();
            if let Readiness::Ready(value) = readiness {
                trace!(attempts, elapsed_ms = elapsed.as_millis() as u64, "{} ready", what);
                return Ok(PollOutcome::Ready {
                    value,
                    attempts,
                    elapsed,
                });
            }

            if elapsed >= timeout {
                return Ok(self.timed_out(attempts, elapsed));
            }

            // An attempt must start before the deadline. When the next one
            // could not, wait out the budget and report the timeout.
            let remaining = timeout - elapsed;
            let last = interval >= remaining;
            let pause = interval.min(remaining);

            match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Ok(self.cancelled(attempts, start.elapsed()));
                    }
                    _ = sleep(pause) => {}
                },
                None => sleep(pause).await,
            }

            if last {
                return Ok(self.timed_out(attempts, start.elapsed()));
            }
        }
    }

    fn timed_out<T>(&self, attempts: u32, elapsed: Duration) -> PollOutcome<T> {
        debug!(
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_ms = self.config.timeout_ms,
            "timed out waiting for {}",
            self.description.as_deref().unwrap_or("condition")
        );
        PollOutcome::TimedOut { attempts, elapsed }
    }

    fn cancelled<T>(&self, attempts: u32, elapsed: Duration) -> PollOutcome<T> {
        debug!(
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "cancelled while waiting for {}",
            self.description.as_deref().unwrap_or("condition")
        );
        PollOutcome::Cancelled { attempts, elapsed }
    }
}

/// Poll `check` until it produces a value.
pub async fn poll<T, E, F, Fut>(
    config: &PollConfig,
    check: F,
) -> std::result::Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Readiness<T>, E>>,
{
    Poller::new(*config).run(check).await
}

/// Poll a boolean `check` until it returns `true`.
pub async fn poll_until<E, F, Fut>(
    config: &PollConfig,
    check: F,
) -> std::result::Result<bool, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, E>>,
{
    Poller::new(*config).run_until(check).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use test_case::test_case;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("bad selector: {0}")]
    struct BadSelector(String);

    #[tokio::test(start_paused = true)]
    async fn test_counter_reaches_threshold() {
        let counter = AtomicU32::new(0);
        let start = Instant::now();

        let ready = poll_until(&PollConfig::new(5000, 100), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, Infallible>(n >= 5)
        })
        .await
        .unwrap();

        assert!(ready);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        // Four pauses between five attempts
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_true_times_out() {
        let counter = AtomicU32::new(0);
        let start = Instant::now();

        let err = poll_until(&PollConfig::new(2000, 100), || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(false)
        })
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        match err {
            PollError::Timeout(t) => {
                assert_eq!(t.attempts, 20);
                assert_eq!(t.attempts, counter.load(Ordering::SeqCst));
                assert!(t.elapsed >= Duration::from_millis(2000));
                assert_eq!(t.timeout, Duration::from_millis(2000));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[test_case(0, 100 ; "zero timeout")]
    #[test_case(50, 100 ; "timeout shorter than interval")]
    #[test_case(100, 100 ; "timeout equal to interval")]
    #[tokio::test(start_paused = true)]
    async fn test_at_least_one_attempt(timeout_ms: u64, interval_ms: u64) {
        let counter = AtomicU32::new(0);

        let err = poll_until(&PollConfig::new(timeout_ms, interval_ms), || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(false)
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_short_circuits() {
        let counter = AtomicU32::new(0);
        let start = Instant::now();

        let value = poll(&PollConfig::new(10_000, 250), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, Infallible>(if n == 3 {
                Readiness::Ready(format!("ready after {}", n))
            } else {
                Readiness::Pending
            })
        })
        .await
        .unwrap();

        assert_eq!(value, "ready after 3");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_propagates_immediately() {
        let counter = AtomicU32::new(0);

        let err = poll_until(&PollConfig::new(60_000, 10), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 2 {
                Err(BadSelector("#missing[".to_string()))
            } else {
                Ok(false)
            }
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(err.into_check(), Some(BadSelector("#missing[".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_overlap() {
        let spans: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let _ = poll_until(&PollConfig::new(1000, 20), || {
            let spans = spans.clone();
            async move {
                let entered = Instant::now();
                sleep(Duration::from_millis(35)).await;
                spans.lock().unwrap().push((entered, Instant::now()));
                Ok::<_, Infallible>(false)
            }
        })
        .await;

        let spans = spans.lock().unwrap();
        assert!(spans.len() > 1);
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "attempts overlapped: {:?}", pair);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounded_by_slow_check() {
        let start = Instant::now();

        let err = poll_until(&PollConfig::new(1000, 100), || async {
            sleep(Duration::from_millis(300)).await;
            Ok::<_, Infallible>(false)
        })
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1000 + 100 + 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = Poller::new(PollConfig::new(10_000, 100))
            .describe("job to finish")
            .with_cancellation(token)
            .run_until(|| async { Ok::<_, Infallible>(false) })
            .await
            .unwrap_err();

        match err {
            PollError::Cancelled { attempts, elapsed } => {
                assert_eq!(attempts, 3);
                assert_eq!(elapsed, Duration::from_millis(250));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let counter = AtomicU32::new(0);

        let err = Poller::new(PollConfig::new(1000, 10))
            .with_cancellation(token)
            .run_until(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(true)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Cancelled { .. }), "{:?}", err);
        assert_eq!(err.attempts(), Some(0));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_check_counts_completed_attempts() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });
        let started = AtomicU32::new(0);

        // Checks run 0-100ms and 200-300ms; the second is cut off at 250ms
        let err = Poller::new(PollConfig::new(10_000, 100))
            .with_cancellation(token)
            .run_until(|| async {
                started.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(100)).await;
                Ok::<_, Infallible>(false)
            })
            .await
            .unwrap_err();

        match err {
            PollError::Cancelled { attempts, elapsed } => {
                assert_eq!(attempts, 1);
                assert_eq!(elapsed, Duration::from_millis(250));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_durations_saturates() {
        let config = PollConfig::from_durations(Duration::MAX, Duration::from_millis(250));
        assert_eq!(config.timeout_ms, u64::MAX);
        assert_eq!(config.interval_ms, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_reports_attempts_on_success() {
        let outcome = Poller::new(PollConfig::new(1000, 10))
            .outcome(|| async { Ok::<_, Infallible>(Readiness::Ready(7)) })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Ready {
                value: 7,
                attempts: 1,
                elapsed: Duration::ZERO,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_message_names_condition() {
        let err = Poller::new(PollConfig::new(300, 100))
            .describe("toast to disappear")
            .run::<(), _, _, _>(|| async { Ok::<_, Infallible>(Readiness::Pending) })
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("toast to disappear"), "{}", message);
        assert!(message.contains("3 attempt(s)"), "{}", message);
    }

    #[test]
    fn test_readiness_from_option() {
        assert_eq!(Readiness::from(Some(1)), Readiness::Ready(1));
        assert_eq!(Readiness::<i32>::from(None), Readiness::Pending);
    }

    #[test]
    fn test_config_validation() {
        assert!(PollConfig::default().validate().is_ok());
        assert!(PollConfig::new(0, 10).validate().is_err());
        assert!(PollConfig::new(100, 500).validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: PollConfig = serde_json::from_str(r#"{"timeout_ms": 750}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(750));
        assert_eq!(config.interval_ms, DEFAULT_INTERVAL_MS);
    }
}
