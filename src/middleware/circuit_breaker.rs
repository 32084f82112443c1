use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Provider is healthy, calls go through
    Closed,
    /// Provider keeps failing; calls fail fast without touching the network
    Open,
    /// Cool-down elapsed, probe calls decide whether to close again
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before probing
    pub timeout: Duration,
    /// Consecutive half-open successes that close it again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerSettings::default())
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            timeout: Duration::from_secs(s.open_seconds),
            success_threshold: s.success_threshold,
        }
    }
}

/// Per-provider circuit breaker.
///
/// While open, the provider answers `ProviderUnavailable` immediately, so a
/// dead backend costs nothing instead of a full race timeout per group.
/// Timing follows the tokio clock.
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    health: Mutex<Health>,
}

struct Health {
    state: CircuitState,
    failure_streak: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
    trips: usize,
}

impl CircuitBreaker {
    pub fn new(provider: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.to_string(),
            config,
            health: Mutex::new(Health {
                state: CircuitState::Closed,
                failure_streak: 0,
                probe_successes: 0,
                opened_at: None,
                trips: 0,
            }),
        }
    }

    /// Whether a call may go out. An open circuit turns half-open once the
    /// cool-down has passed.
    pub fn allow_request(&self) -> bool {
        let mut health = self.health.lock();
        if health.state != CircuitState::Open {
            return true;
        }

        let cooled = health
            .opened_at
            .is_some_and(|t| t.elapsed() >= self.config.timeout);
        if cooled {
            info!("Circuit for provider {} half-open, probing", self.provider);
            health.state = CircuitState::HalfOpen;
            health.probe_successes = 0;
        }
        cooled
    }

    pub fn record_success(&self) {
        let mut health = self.health.lock();
        health.failure_streak = 0;

        match health.state {
            CircuitState::Closed => {}
            // a call admitted before the trip came back late
            CircuitState::Open => {
                health.state = CircuitState::HalfOpen;
                health.probe_successes = 1;
            }
            CircuitState::HalfOpen => {
                health.probe_successes += 1;
                if health.probe_successes >= self.config.success_threshold {
                    info!("Circuit for provider {} closed, provider recovered", self.provider);
                    health.state = CircuitState::Closed;
                    health.opened_at = None;
                }
            }
        }
    }

    /// Returns `true` when this failure tripped the circuit
    pub fn record_failure(&self) -> bool {
        let mut health = self.health.lock();
        health.failure_streak += 1;
        health.probe_successes = 0;

        let trip = match health.state {
            CircuitState::Closed => health.failure_streak >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                "Circuit for provider {} opened after {} consecutive failures",
                self.provider, health.failure_streak
            );
            health.state = CircuitState::Open;
            health.opened_at = Some(Instant::now());
            health.trips += 1;
        }
        trip
    }

    pub fn state(&self) -> CircuitState {
        self.health.lock().state
    }

    /// Times this circuit has opened
    pub fn trips(&self) -> usize {
        self.health.lock().trips
    }

    pub fn reset(&self) {
        let mut health = self.health.lock();
        health.state = CircuitState::Closed;
        health.failure_streak = 0;
        health.probe_successes = 0;
        health.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: usize, open_secs: u64, successes: usize) -> CircuitBreaker {
        CircuitBreaker::new(
            "deep_google",
            CircuitBreakerConfig {
                failure_threshold: failures,
                timeout: Duration::from_secs(open_secs),
                success_threshold: successes,
            },
        )
    }

    #[test]
    fn test_trips_on_failure_streak_only() {
        let b = breaker(3, 60, 2);
        assert!(b.allow_request());

        assert!(!b.record_failure());
        assert!(!b.record_failure());
        b.record_success();
        assert!(!b.record_failure());
        assert!(!b.record_failure());
        assert_eq!(b.state(), CircuitState::Closed);

        assert!(b.record_failure());
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
        assert_eq!(b.trips(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cool_down_then_recovery() {
        let b = breaker(1, 60, 2);
        b.record_failure();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!b.allow_request());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.allow_request());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let b = breaker(2, 30, 1);
        b.record_failure();
        b.record_failure();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(b.allow_request());
        assert!(b.record_failure());
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.trips(), 2);

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow_request());
    }
}
