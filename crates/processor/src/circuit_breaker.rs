//! Per-worker-pool circuit breaker guarding the chain-custody and chain-rpc
//! calls a job's allocation attempt makes. Opens after a run of consecutive
//! failures; after the timeout elapses, the next claim is let through as a
//! trial — a success closes the circuit, a failure reopens it and resets the
//! clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
}

pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    consecutive_failures: AtomicU32,
    state: Mutex<(State, Option<Instant>)>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            consecutive_failures: AtomicU32::new(0),
            state: Mutex::new((State::Closed, None)),
        }
    }

    /// Whether a worker may claim and attempt a job right now. `false` means
    /// the circuit is open and still within its timeout window.
    pub fn allow_request(&self) -> bool {
        let (state, opened_at) = *self.state.lock().unwrap();
        match state {
            State::Closed => true,
            State::Open => match opened_at {
                Some(t) => t.elapsed() >= self.timeout,
                None => true,
            },
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.state.lock().unwrap() = (State::Closed, None);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            *self.state.lock().unwrap() = (State::Open, Some(Instant::now()));
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow_request()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow_request());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request(), "two failures after a reset shouldn't trip a threshold of 3");
    }

    #[test]
    fn trial_request_allowed_once_timeout_elapses() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request(), "timeout elapsed, a trial request should be allowed");
    }

    proptest! {
        #[test]
        fn open_state_tracks_consecutive_failures(outcomes in proptest::collection::vec(any::<bool>(), 0..200)) {
            let threshold = 4u32;
            // A timeout long enough that it never elapses mid-test.
            let breaker = CircuitBreaker::new(threshold, Duration::from_secs(3600));
            let mut consecutive_failures = 0u32;
            for success in outcomes {
                if success {
                    breaker.record_success();
                    consecutive_failures = 0;
                } else {
                    breaker.record_failure();
                    consecutive_failures += 1;
                }
                let expected_open = consecutive_failures >= threshold;
                prop_assert_eq!(breaker.is_open(), expected_open);
            }
        }
    }
}
