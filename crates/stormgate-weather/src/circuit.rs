//! Per-provider circuit breakers.
//!
//! # States
//! - Closed: requests pass through, failures are counted in a sliding window
//! - Open: provider assumed down, requests are refused
//! - Half-Open: one probe request is allowed to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within window >= threshold
//! Open → Half-Open: first can_request() after the recovery time
//! Half-Open → Closed: probe succeeds (failure history cleared)
//! Half-Open → Open: probe fails (recovery window restarts)
//! ```
//!
//! There are no background timers. The Open → Half-Open transition happens
//! inside [`CircuitBreakerRegistry::can_request`], which is therefore a query
//! with a side effect.
//!
//! The policy ([`CircuitBreakerConfig`]) is supplied on every call and is
//! never stored on the circuit.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use stormgate_core::{CircuitBreakerConfig, Clock, ProviderId, SystemClock};

/// Circuit state for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one provider's circuit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    /// Failures currently inside the sliding window
    pub recent_failures: usize,
    pub retry_in: Duration,
}

#[derive(Debug, Default)]
struct ProviderCircuit {
    state: CircuitState,
    failures: VecDeque<DateTime<Utc>>,
    /// When the circuit last opened
    opened_at: Option<DateTime<Utc>>,
    /// When the outstanding half-open probe was granted
    probe_started_at: Option<DateTime<Utc>>,
}

impl ProviderCircuit {
    fn prune(&mut self, now: DateTime<Utc>, window: ChronoDuration) {
        while let Some(oldest) = self.failures.front() {
            if now - *oldest > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started_at = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures.clear();
        self.opened_at = None;
        self.probe_started_at = None;
    }

    fn retry_in(&self, now: DateTime<Utc>, recovery: ChronoDuration) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                (recovery - (now - opened_at)).to_std().unwrap_or_default()
            }
            _ => Duration::ZERO,
        }
    }
}

fn millis(ms: u64) -> ChronoDuration {
    ChronoDuration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Registry holding one independent circuit per provider.
///
/// Circuits are created lazily in the closed state. All mutation for a
/// provider happens under one lock, so concurrent `record_failure` calls
/// cannot both observe a pre-threshold count.
pub struct CircuitBreakerRegistry {
    circuits: Mutex<HashMap<ProviderId, ProviderCircuit>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Whether a request to `provider` may be attempted now.
    ///
    /// Side effect: an open circuit whose recovery time has elapsed moves to
    /// half-open and this call returns `true` for that single probe. Further
    /// calls return `false` until the probe reports back, or until another
    /// recovery period passes without a report.
    pub fn can_request(&self, provider: &ProviderId, config: &CircuitBreakerConfig) -> bool {
        let now = self.clock.now();
        let recovery = millis(config.recovery_time_ms);
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(provider.clone()).or_default();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                if now - opened_at >= recovery {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_started_at = Some(now);
                    tracing::info!(
                        provider = %provider,
                        from = %CircuitState::Open,
                        to = %CircuitState::HalfOpen,
                        "Circuit transition, allowing probe"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match circuit.probe_started_at {
                Some(started) if now - started < recovery => false,
                _ => {
                    // The previous probe never reported; grant a fresh one
                    tracing::debug!(provider = %provider, "Half-open probe abandoned, granting another");
                    circuit.probe_started_at = Some(now);
                    true
                }
            },
        }
    }

    /// Record a successful call.
    ///
    /// Closed: prunes expired failures. Half-open: closes the circuit and
    /// clears failure history. Open: ignored.
    pub fn record_success(&self, provider: &ProviderId, config: &CircuitBreakerConfig) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(provider.clone()).or_default();

        match circuit.state {
            CircuitState::Closed => circuit.prune(now, millis(config.failure_window_ms)),
            CircuitState::HalfOpen => {
                circuit.close();
                tracing::info!(
                    provider = %provider,
                    from = %CircuitState::HalfOpen,
                    to = %CircuitState::Closed,
                    "Circuit transition, provider recovered"
                );
            }
            CircuitState::Open => {
                tracing::debug!(provider = %provider, "Success recorded on open circuit, ignoring");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: &ProviderId, config: &CircuitBreakerConfig) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(provider.clone()).or_default();

        circuit.failures.push_back(now);

        match circuit.state {
            CircuitState::Closed => {
                circuit.prune(now, millis(config.failure_window_ms));
                let count = circuit.failures.len();
                let threshold = usize::try_from(config.failure_threshold).unwrap_or(usize::MAX);
                if count >= threshold {
                    circuit.open(now);
                    tracing::warn!(
                        provider = %provider,
                        from = %CircuitState::Closed,
                        to = %CircuitState::Open,
                        failures = count,
                        "Circuit transition, failure threshold reached"
                    );
                } else {
                    tracing::debug!(
                        provider = %provider,
                        failures = count,
                        threshold = config.failure_threshold,
                        "Failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                circuit.open(now);
                tracing::warn!(
                    provider = %provider,
                    from = %CircuitState::HalfOpen,
                    to = %CircuitState::Open,
                    "Circuit transition, probe failed"
                );
            }
            CircuitState::Open => {
                circuit.prune(now, millis(config.failure_window_ms));
                tracing::debug!(
                    provider = %provider,
                    failures = circuit.failures.len(),
                    "Late failure recorded on open circuit"
                );
            }
        }
    }

    /// Current state, `Closed` for providers never seen.
    pub fn get_circuit_state(&self, provider: &ProviderId) -> CircuitState {
        self.circuits
            .lock()
            .get(provider)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    /// Time until an open circuit becomes eligible for a probe; zero otherwise.
    pub fn get_time_until_retry(
        &self,
        provider: &ProviderId,
        config: &CircuitBreakerConfig,
    ) -> Duration {
        let now = self.clock.now();
        self.circuits
            .lock()
            .get(provider)
            .map(|c| c.retry_in(now, millis(config.recovery_time_ms)))
            .unwrap_or_default()
    }

    /// Force a provider's circuit closed with empty history.
    pub fn reset_circuit(&self, provider: &ProviderId) {
        if let Some(circuit) = self.circuits.lock().get_mut(provider) {
            circuit.close();
            tracing::info!(provider = %provider, "Circuit reset");
        }
    }

    /// Force every circuit closed with empty history.
    pub fn reset_all_circuits(&self) {
        let mut circuits = self.circuits.lock();
        let count = circuits.len();
        circuits.clear();
        tracing::info!(circuits = count, "All circuits reset");
    }

    /// Diagnostic view of every known circuit, sorted by provider.
    pub fn snapshot(&self, config: &CircuitBreakerConfig) -> Vec<CircuitSnapshot> {
        let now = self.clock.now();
        let window = millis(config.failure_window_ms);
        let recovery = millis(config.recovery_time_ms);
        let circuits = self.circuits.lock();

        let mut snapshots: Vec<CircuitSnapshot> = circuits
            .iter()
            .map(|(provider, circuit)| CircuitSnapshot {
                provider: provider.clone(),
                state: circuit.state,
                recent_failures: circuit
                    .failures
                    .iter()
                    .filter(|t| now - **t <= window)
                    .count(),
                retry_in: circuit.retry_in(now, recovery),
            })
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    #[cfg(test)]
    fn failure_count(&self, provider: &ProviderId) -> usize {
        self.circuits
            .lock()
            .get(provider)
            .map(|c| c.failures.len())
            .unwrap_or(0)
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("circuits", &self.circuits.lock().len())
            .finish()
    }
}
