use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-Location circuit breaker: `Closed` while the Location is healthy,
/// `Open` to fail fast without I/O after `F` consecutive failures,
/// `HalfOpen` to let exactly one probe through once the `Open` timer
/// elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    current_backoff: Duration,
    /// Guards the single probe request a `HalfOpen` breaker admits; taken
    /// by whichever caller gets there first, released on outcome.
    probe_in_flight: bool,
}

impl Breaker {
    fn closed(base_backoff: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: None,
            current_backoff: base_backoff,
            probe_in_flight: false,
        }
    }
}

/// What a caller should do before issuing a downstream call. Once a
/// Location has racked up `F` consecutive failures, admission short-circuits
/// every request until the breaker's open timer elapses, so a dead
/// Location stops costing the Gateway outbound I/O and latency.
pub enum Admission {
    /// Proceed with the call normally.
    Closed,
    /// Proceed: this caller won the race to be the `HalfOpen` probe.
    Probe,
    /// Fail immediately without any I/O.
    ShortCircuit,
}

/// Tracks every registered Location's breaker. The internal mutex is only
/// ever held for the duration of a state lookup or transition, never across
/// a network call.
pub struct CircuitBreakers {
    breakers: Mutex<HashMap<String, Breaker>>,
    failure_threshold: u32,
    base_open: Duration,
    open_ceiling: Duration,
}

impl CircuitBreakers {
    pub fn new(failure_threshold: u32, base_open: Duration, open_ceiling: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            base_open,
            open_ceiling,
        }
    }

    pub fn admit(&self, location_id: &str) -> Admission {
        let now = Instant::now();
        let mut guard = self.breakers.lock().expect("circuit breaker mutex poisoned");
        let breaker = guard
            .entry(location_id.to_string())
            .or_insert_with(|| Breaker::closed(self.base_open));

        match breaker.state {
            BreakerState::Closed => Admission::Closed,
            BreakerState::Open => {
                let elapsed = breaker.open_until.map(|until| now >= until).unwrap_or(true);
                if !elapsed {
                    return Admission::ShortCircuit;
                }
                breaker.state = BreakerState::HalfOpen;
                breaker.probe_in_flight = true;
                Admission::Probe
            }
            BreakerState::HalfOpen => {
                if breaker.probe_in_flight {
                    Admission::ShortCircuit
                } else {
                    breaker.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub fn record_success(&self, location_id: &str) -> Option<&'static str> {
        let mut guard = self.breakers.lock().expect("circuit breaker mutex poisoned");
        let breaker = guard
            .entry(location_id.to_string())
            .or_insert_with(|| Breaker::closed(self.base_open));
        let transitioned = !matches!(breaker.state, BreakerState::Closed);
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
        breaker.current_backoff = self.base_open;
        breaker.probe_in_flight = false;
        breaker.open_until = None;
        transitioned.then_some("closed")
    }

    pub fn record_failure(&self, location_id: &str) -> Option<&'static str> {
        let now = Instant::now();
        let mut guard = self.breakers.lock().expect("circuit breaker mutex poisoned");
        let breaker = guard
            .entry(location_id.to_string())
            .or_insert_with(|| Breaker::closed(self.base_open));

        breaker.probe_in_flight = false;

        match breaker.state {
            BreakerState::HalfOpen => {
                // A failed probe re-opens with the backoff doubled, capped
                // at the ceiling.
                breaker.current_backoff = (breaker.current_backoff * 2).min(self.open_ceiling);
                breaker.state = BreakerState::Open;
                breaker.open_until = Some(now + breaker.current_backoff);
                Some("reopened")
            }
            BreakerState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    breaker.state = BreakerState::Open;
                    breaker.current_backoff = self.base_open;
                    breaker.open_until = Some(now + breaker.current_backoff);
                    Some("opened")
                } else {
                    None
                }
            }
            BreakerState::Open => None,
        }
    }

    pub fn state_of(&self, location_id: &str) -> BreakerState {
        self.breakers
            .lock()
            .expect("circuit breaker mutex poisoned")
            .get(location_id)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers() -> CircuitBreakers {
        CircuitBreakers::new(3, Duration::from_millis(20), Duration::from_secs(60))
    }

    #[test]
    fn stays_closed_under_threshold() {
        let b = breakers();
        b.record_failure("loc-a");
        b.record_failure("loc-a");
        assert!(matches!(b.admit("loc-a"), Admission::Closed));
    }

    #[test]
    fn opens_after_threshold_and_short_circuits() {
        let b = breakers();
        for _ in 0..3 {
            b.record_failure("loc-a");
        }
        assert!(matches!(b.state_of("loc-a"), BreakerState::Open));
        assert!(matches!(b.admit("loc-a"), Admission::ShortCircuit));
    }

    #[test]
    fn half_opens_after_timer_and_admits_one_probe() {
        let b = breakers();
        for _ in 0..3 {
            b.record_failure("loc-a");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(b.admit("loc-a"), Admission::Probe));
        // A second concurrent caller is short-circuited while the probe
        // is in flight.
        assert!(matches!(b.admit("loc-a"), Admission::ShortCircuit));
    }

    #[test]
    fn successful_probe_closes_the_breaker() {
        let b = breakers();
        for _ in 0..3 {
            b.record_failure("loc-a");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(b.admit("loc-a"), Admission::Probe));
        b.record_success("loc-a");
        assert!(matches!(b.state_of("loc-a"), BreakerState::Closed));
        assert!(matches!(b.admit("loc-a"), Admission::Closed));
    }

    #[test]
    fn failed_probe_reopens_with_doubled_backoff() {
        let b = breakers();
        for _ in 0..3 {
            b.record_failure("loc-a");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(b.admit("loc-a"), Admission::Probe));
        b.record_failure("loc-a");
        assert!(matches!(b.state_of("loc-a"), BreakerState::Open));
        // Base open was 20ms; after doubling it should still be open at 30ms.
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(b.admit("loc-a"), Admission::ShortCircuit));
    }
}
