//! Pure breaker state machine.
//!
//! [`transition`] has no side effects: it takes the current state and one
//! event and returns the next state, whether a call is admitted, and the
//! phase change (if any) the caller should report.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Breaker thresholds and cool-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive trial successes that close a half-open breaker.
    pub success_threshold: u32,
    /// Time an open breaker waits before admitting a trial.
    pub cooldown: Duration,
}

impl BreakerConfig {
    /// Build a config; thresholds below one are raised to one.
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cooldown,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(5, 2, Duration::from_secs(30))
    }
}

/// Coarse phase reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state with the counters that belong to each phase.
///
/// Counters live inside the variant, so entering a phase always starts them
/// from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        opened_at: DateTime<Utc>,
    },
    HalfOpen {
        consecutive_successes: u32,
        trial_in_flight: bool,
    },
}

impl BreakerState {
    /// A fresh, closed breaker.
    pub const fn initial() -> Self {
        Self::Closed {
            consecutive_failures: 0,
        }
    }

    pub fn phase(&self) -> BreakerPhase {
        match self {
            Self::Closed { .. } => BreakerPhase::Closed,
            Self::Open { .. } => BreakerPhase::Open,
            Self::HalfOpen { .. } => BreakerPhase::HalfOpen,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    /// A caller asks to run a protected call.
    Admit { now: DateTime<Utc> },
    /// An admitted call succeeded.
    Success,
    /// An admitted call failed.
    Failure { now: DateTime<Utc> },
}

/// A real change of phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: BreakerPhase,
    pub to: BreakerPhase,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: BreakerState,
    /// For [`BreakerEvent::Admit`], whether the call may run. Always `false`
    /// for outcome events.
    pub admitted: bool,
    pub change: Option<PhaseChange>,
}

impl Step {
    fn new(previous: BreakerState, state: BreakerState, admitted: bool) -> Self {
        let (from, to) = (previous.phase(), state.phase());
        Self {
            state,
            admitted,
            change: (from != to).then_some(PhaseChange { from, to }),
        }
    }
}

/// Apply `event` to `state`.
pub fn transition(state: BreakerState, event: BreakerEvent, config: &BreakerConfig) -> Step {
    use BreakerEvent::{Admit, Failure, Success};
    use BreakerState::{Closed, HalfOpen, Open};

    match (state, event) {
        (Closed { .. }, Admit { .. }) => Step::new(state, state, true),
        (Closed { .. }, Success) => Step::new(state, BreakerState::initial(), false),
        (
            Closed {
                consecutive_failures,
            },
            Failure { now },
        ) => {
            let failures = consecutive_failures.saturating_add(1);
            let next = if failures >= config.failure_threshold {
                Open { opened_at: now }
            } else {
                Closed {
                    consecutive_failures: failures,
                }
            };
            Step::new(state, next, false)
        }

        (Open { opened_at }, Admit { now }) if cooldown_elapsed(opened_at, now, config.cooldown) => {
            let trial = HalfOpen {
                consecutive_successes: 0,
                trial_in_flight: true,
            };
            Step::new(state, trial, true)
        }
        (Open { .. }, _) => Step::new(state, state, false),

        (
            HalfOpen {
                trial_in_flight: true,
                ..
            },
            Admit { .. },
        ) => Step::new(state, state, false),
        (
            HalfOpen {
                consecutive_successes,
                trial_in_flight: false,
            },
            Admit { .. },
        ) => {
            let trial = HalfOpen {
                consecutive_successes,
                trial_in_flight: true,
            };
            Step::new(state, trial, true)
        }
        (
            HalfOpen {
                consecutive_successes,
                ..
            },
            Success,
        ) => {
            let successes = consecutive_successes.saturating_add(1);
            let next = if successes >= config.success_threshold {
                BreakerState::initial()
            } else {
                HalfOpen {
                    consecutive_successes: successes,
                    trial_in_flight: false,
                }
            };
            Step::new(state, next, false)
        }
        (HalfOpen { .. }, Failure { now }) => Step::new(state, Open { opened_at: now }, false),
    }
}

fn cooldown_elapsed(opened_at: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    // An unrepresentable cool-down would hold the breaker open forever.
    let Ok(cooldown) = chrono::Duration::from_std(cooldown) else {
        return true;
    };
    now >= opened_at + cooldown
}
