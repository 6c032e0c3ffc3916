//! Routing decisions
//!
//! Pure function from an execution result and circuit state to one of
//! acknowledge, retry or quarantine. Side effects (closing a circuit after a
//! successful probe, emitting to a downstream channel) belong to the consumer.

use crate::circuit::CircuitState;
use crate::executor::{ErrorCode, ExecutionOutcome};
use std::fmt;

/// Why a job was sent to the terminal-failure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuarantineReason {
    /// Suppressed without execution by an open circuit
    CircuitOpen,
    /// The circuit was open after this failure was recorded
    CircuitTripped,
    /// Retry budget exhausted
    MaxRetriesExceeded,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::CircuitOpen => "circuit breaker is open",
            QuarantineReason::CircuitTripped => "circuit opened due to repeated failures",
            QuarantineReason::MaxRetriesExceeded => "max retries exceeded",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the current delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Remove the job; `closes_circuit` is set when the execution was a probe
    Ack { closes_circuit: bool },
    /// Re-enqueue with `attemptCount = next_attempt`
    Retry { next_attempt: u32, max_retries: u32 },
    Quarantine { reason: QuarantineReason },
}

impl RoutingDecision {
    /// Human-readable reason, as attached to logs and quarantine messages
    pub fn reason(&self) -> String {
        match self {
            RoutingDecision::Ack {
                closes_circuit: true,
            } => "probe succeeded".to_string(),
            RoutingDecision::Ack { .. } => "execution succeeded".to_string(),
            RoutingDecision::Retry {
                next_attempt,
                max_retries,
            } => format!("retry attempt {} of {}", next_attempt, max_retries),
            RoutingDecision::Quarantine { reason } => reason.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::Ack { .. } => "ACK",
            RoutingDecision::Retry { .. } => "RETRY",
            RoutingDecision::Quarantine { .. } => "QUARANTINE",
        }
    }
}

/// Inputs to one routing decision
#[derive(Debug, Clone, Copy)]
pub struct RoutingInput<'a> {
    /// Circuit state read before execution
    pub state_before: CircuitState,
    pub outcome: &'a ExecutionOutcome,
    /// Circuit state re-read after the failure was recorded
    ///
    /// Ignored for successes and suppressed jobs.
    pub state_after: CircuitState,
    pub attempt_count: u32,
    pub max_retries: u32,
}

/// Route one execution result
///
/// An open circuit wins over the retry budget: a first-attempt job is
/// quarantined when its failure opens the circuit.
pub fn decide(input: RoutingInput<'_>) -> RoutingDecision {
    let error_code = match input.outcome {
        ExecutionOutcome::Success => {
            return RoutingDecision::Ack {
                closes_circuit: input.state_before == CircuitState::Open,
            };
        }
        ExecutionOutcome::Failure { error_code, .. } => error_code,
    };

    if *error_code == ErrorCode::CIRCUIT_OPEN {
        return RoutingDecision::Quarantine {
            reason: QuarantineReason::CircuitOpen,
        };
    }

    if input.state_after == CircuitState::Open {
        return RoutingDecision::Quarantine {
            reason: QuarantineReason::CircuitTripped,
        };
    }

    if input.attempt_count >= input.max_retries {
        return RoutingDecision::Quarantine {
            reason: QuarantineReason::MaxRetriesExceeded,
        };
    }

    RoutingDecision::Retry {
        next_attempt: input.attempt_count + 1,
        max_retries: input.max_retries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(
        state_before: CircuitState,
        outcome: &'a ExecutionOutcome,
        state_after: CircuitState,
        attempt_count: u32,
    ) -> RoutingInput<'a> {
        RoutingInput {
            state_before,
            outcome,
            state_after,
            attempt_count,
            max_retries: 3,
        }
    }

    #[test]
    fn test_success_acks() {
        let ok = ExecutionOutcome::Success;
        let decision = decide(input(CircuitState::Closed, &ok, CircuitState::Closed, 0));
        assert_eq!(
            decision,
            RoutingDecision::Ack {
                closes_circuit: false
            }
        );
    }

    #[test]
    fn test_success_through_open_circuit_is_probe() {
        let ok = ExecutionOutcome::Success;
        let decision = decide(input(CircuitState::Open, &ok, CircuitState::Open, 2));
        assert_eq!(
            decision,
            RoutingDecision::Ack {
                closes_circuit: true
            }
        );
        assert_eq!(decision.reason(), "probe succeeded");
    }

    #[test]
    fn test_suppressed_job_is_quarantined() {
        let suppressed = ExecutionOutcome::circuit_open();
        let decision = decide(input(CircuitState::Open, &suppressed, CircuitState::Open, 0));
        assert_eq!(decision.reason(), "circuit breaker is open");
    }

    #[test]
    fn test_open_circuit_beats_retry_budget() {
        let failed = ExecutionOutcome::failure("API_TIMEOUT", "slow");
        let decision = decide(input(CircuitState::Closed, &failed, CircuitState::Open, 0));
        assert_eq!(
            decision,
            RoutingDecision::Quarantine {
                reason: QuarantineReason::CircuitTripped
            }
        );
        assert_eq!(decision.reason(), "circuit opened due to repeated failures");
    }

    #[test]
    fn test_failed_probe_is_quarantined() {
        let failed = ExecutionOutcome::failure("API_TIMEOUT", "still slow");
        let decision = decide(input(CircuitState::Open, &failed, CircuitState::Open, 0));
        assert_eq!(
            decision,
            RoutingDecision::Quarantine {
                reason: QuarantineReason::CircuitTripped
            }
        );
    }

    #[test]
    fn test_retry_budget() {
        let failed = ExecutionOutcome::failure("API_TIMEOUT", "slow");

        for attempt in 0..3 {
            let decision = decide(input(
                CircuitState::Closed,
                &failed,
                CircuitState::Closed,
                attempt,
            ));
            assert_eq!(
                decision,
                RoutingDecision::Retry {
                    next_attempt: attempt + 1,
                    max_retries: 3
                }
            );
        }

        let decision = decide(input(CircuitState::Closed, &failed, CircuitState::Closed, 3));
        assert_eq!(decision.reason(), "max retries exceeded");
    }

    #[test]
    fn test_retry_reason_names_next_attempt() {
        let failed = ExecutionOutcome::failure("API_TIMEOUT", "slow");
        let decision = decide(input(CircuitState::Closed, &failed, CircuitState::Closed, 1));
        assert_eq!(decision.reason(), "retry attempt 2 of 3");
        assert_eq!(decision.label(), "RETRY");
    }

    #[test]
    fn test_zero_retry_budget_quarantines_first_failure() {
        let failed = ExecutionOutcome::failure("API_TIMEOUT", "slow");
        let decision = decide(RoutingInput {
            state_before: CircuitState::Closed,
            outcome: &failed,
            state_after: CircuitState::Closed,
            attempt_count: 0,
            max_retries: 0,
        });
        assert_eq!(
            decision,
            RoutingDecision::Quarantine {
                reason: QuarantineReason::MaxRetriesExceeded
            }
        );
    }
}
