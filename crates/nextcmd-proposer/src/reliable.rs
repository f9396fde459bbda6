use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use nextcmd_core::errors::ProposerError;
use nextcmd_core::proposer::{GenerativeProposer, ProposeOptions};
use nextcmd_settings::Settings;

/// Retry and circuit breaker tuning for [`ReliableProposer`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
    /// Deadline for one `propose` call, retries included. Expiry counts as a
    /// failure, so it must be shorter than any timeout the caller applies.
    pub call_timeout: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(1),
        }
    }
}

impl ReliableConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let model = &settings.model;
        let budget = Duration::from_millis(settings.engine.generative_timeout_ms);
        Self {
            max_retries: model.max_retries,
            circuit_breaker_threshold: model.circuit_breaker_threshold.max(1),
            circuit_breaker_cooldown: Duration::from_millis(model.circuit_breaker_cooldown_ms),
            call_timeout: deadline_within(budget),
            ..Self::default()
        }
    }
}

/// A call deadline that expires before `budget` does: 90% of it, at least 1 ms.
pub fn deadline_within(budget: Duration) -> Duration {
    budget
        .saturating_sub(budget / 10)
        .max(Duration::from_millis(1))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a proposer with retry logic and a circuit breaker.
///
/// - Retries retryable errors with exponential backoff + jitter
/// - Respects `retry_after` hints from rate limit responses
/// - Circuit breaker: N consecutive failures → open → cooldown → half-open → success → closed
///
/// While the circuit is open calls fail fast with
/// [`ProposerError::Unavailable`], which the engine treats like any other
/// proposer failure.
pub struct ReliableProposer<P: GenerativeProposer> {
    inner: P,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
    trial_in_flight: AtomicBool,
}

/// Clears the half-open trial slot when the trial call ends, however it ends.
struct TrialSlot<'a>(&'a AtomicBool);

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P: GenerativeProposer> ReliableProposer<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Admit a call. While half-open only one trial call is let through; it
    /// holds the returned slot until it finishes.
    fn check_circuit(&self) -> Result<Option<TrialSlot<'_>>, ProposerError> {
        {
            let state = self.circuit_state.read();
            match &*state {
                CircuitState::Closed => return Ok(None),
                CircuitState::HalfOpen => {}
                CircuitState::Open { since } => {
                    if since.elapsed() < self.config.circuit_breaker_cooldown {
                        return Err(ProposerError::Unavailable("circuit breaker open".into()));
                    }
                    drop(state);
                    // Re-check under the write lock; another caller may have moved it.
                    let mut state = self.circuit_state.write();
                    let cooling = match &*state {
                        CircuitState::Closed => return Ok(None),
                        CircuitState::Open { since } => {
                            since.elapsed() < self.config.circuit_breaker_cooldown
                        }
                        CircuitState::HalfOpen => false,
                    };
                    if cooling {
                        return Err(ProposerError::Unavailable("circuit breaker open".into()));
                    }
                    *state = CircuitState::HalfOpen;
                }
            }
        }

        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Some(TrialSlot(&self.trial_in_flight)))
            .map_err(|_| {
                ProposerError::Unavailable("circuit breaker half-open, trial call in flight".into())
            })
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!(proposer = self.inner.name(), "circuit breaker closed");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.circuit_state.write();
        // A failed half-open trial reopens immediately.
        let trip = *state == CircuitState::HalfOpen
            || (*state == CircuitState::Closed
                && failures >= self.config.circuit_breaker_threshold);
        if trip {
            warn!(
                proposer = self.inner.name(),
                failures,
                cooldown_ms = self.config.circuit_breaker_cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: GenerativeProposer> GenerativeProposer for ReliableProposer<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn propose(
        &self,
        prefix: &str,
        options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError> {
        let _trial = self.check_circuit()?;

        let deadline = self.config.call_timeout;
        match tokio::time::timeout(deadline, self.call_with_retries(prefix, options)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    proposer = self.inner.name(),
                    timeout_ms = deadline.as_millis() as u64,
                    "proposer call exceeded its deadline"
                );
                self.record_failure();
                Err(ProposerError::Timeout(deadline))
            }
        }
    }
}

impl<P: GenerativeProposer> ReliableProposer<P> {
    async fn call_with_retries(
        &self,
        prefix: &str,
        options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError> {
        let mut attempt = 0;
        loop {
            match self.inner.propose(prefix, options).await {
                Ok(candidates) => {
                    self.record_success();
                    return Ok(candidates);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        self.record_failure();
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "retrying proposer call"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
