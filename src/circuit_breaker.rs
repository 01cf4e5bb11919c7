use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker guarding the remote scoring model.
pub type ScorerBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates the circuit breaker that sits in front of the remote scorer.
///
/// - **Failure threshold**: 5 consecutive failed scoring calls (after their
///   own retries) open the breaker.
/// - **Backoff**: exponential from 10s to 60s before a trial call is let through.
///
/// While open, candidates go straight to the deterministic fallback score
/// instead of waiting out another round of retries.
pub fn create_scorer_circuit_breaker() -> ScorerBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_scorer_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("scorer timeout"));
            assert!(result.is_err());
        }

        assert!(!cb.is_call_permitted());
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_scorer_circuit_breaker();

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));

        assert_eq!(result.unwrap(), 42);
        assert!(cb.is_call_permitted());
    }
}
