use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Per-operation-category circuit breaker. Not internally synchronized;
/// the owning manager serializes access behind its own lock.
///
/// HALF_OPEN admits exactly one trial call after the cooldown elapses.
/// The trial's outcome decides whether the breaker closes or re-opens.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_taken: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            trial_taken: false,
        }
    }

    /// Advances OPEN to HALF_OPEN once the cooldown has elapsed and reports
    /// whether a call would currently be admitted. Does not consume the
    /// half-open trial; `acquire` does that at grant time.
    pub fn poll(&mut self) -> bool {
        if self.state == BreakerState::Open {
            let elapsed = self
                .last_failure
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if elapsed {
                self.state = BreakerState::HalfOpen;
                self.trial_taken = false;
                tracing::debug!("circuit breaker entering half-open after cooldown");
            }
        }

        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !self.trial_taken,
        }
    }

    /// Marks the admission. Returns true when a HALF_OPEN trial slot was
    /// consumed; the caller must later resolve it with `record_success`,
    /// `record_failure`, or `release_trial`.
    pub fn acquire(&mut self) -> bool {
        if self.state == BreakerState::HalfOpen && !self.trial_taken {
            self.trial_taken = true;
            return true;
        }
        false
    }

    /// Hands an unresolved HALF_OPEN trial slot back, for admissions whose
    /// outcome was reported under a different category.
    pub fn release_trial(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.trial_taken = false;
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            tracing::debug!("circuit breaker trial succeeded, closing");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
        self.trial_taken = false;
    }

    /// Returns true when this failure tripped the breaker into OPEN.
    pub fn record_failure(&mut self) -> bool {
        self.last_failure = Some(Instant::now());

        match self.state {
            BreakerState::HalfOpen => {
                // Failed trial re-opens immediately, no threshold counting.
                self.state = BreakerState::Open;
                self.trial_taken = false;
                true
            }
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.state = BreakerState::Open;
                    true
                } else {
                    false
                }
            }
            BreakerState::Open => false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Seconds until an OPEN breaker will admit its half-open trial.
    pub fn cooldown_remaining_secs(&self) -> Option<u64> {
        if self.state != BreakerState::Open {
            return None;
        }
        let last = self.last_failure?;
        Some(self.cooldown.saturating_sub(last.elapsed()).as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.poll());

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.poll());
        assert!(breaker.cooldown_remaining_secs().is_some());
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let mut breaker = CircuitBreaker::new(1, Duration::ZERO);
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), BreakerState::Open);

        // Zero cooldown: first poll moves to half-open.
        assert!(breaker.poll());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.acquire());

        // The single trial slot is taken.
        assert!(!breaker.poll());
        assert!(!breaker.acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.poll());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.poll());
        assert!(breaker.acquire());

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_released_trial_admits_again() {
        let mut breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.poll());
        assert!(breaker.acquire());
        assert!(!breaker.poll());

        // An admission resolved elsewhere gives the slot back instead of
        // leaving the category stuck half-open.
        breaker.release_trial();
        assert!(breaker.poll());
        assert!(breaker.acquire());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
