//! Circuit breaker guarding a fallible dependency on the request path.
//!
//! The state machine lives in [`state`] as a pure function; this module owns
//! the shared state, the clock, and the state-change hook. The state mutex is
//! only held while applying one event, never across the protected future or
//! while the hook runs.
//!
//! Phase changes are queued under the state mutex in the order they happen
//! and drained by one reporter at a time, so the hook sees them in that same
//! order even when several tasks change phase concurrently.
//!
//! Every admission records the breaker generation. Any real phase change bumps
//! the generation, so outcomes of calls admitted in an earlier phase are
//! ignored instead of closing or reopening the breaker.

mod state;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mockable::Clock;
use tracing::{debug, warn};

pub use state::{
    BreakerConfig, BreakerEvent, BreakerPhase, BreakerState, PhaseChange, Step, transition,
};

/// Observer invoked with `(previous, next)` after every real phase change.
///
/// Calls arrive in transition order, each `previous` equal to the preceding
/// call's `next`. The hook may read [`CircuitBreaker::phase`] but must not run
/// calls through the breaker it observes.
pub type StateChangeHook = Box<dyn Fn(BreakerPhase, BreakerPhase) + Send + Sync>;

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit breaker `{name}` is open")]
    Open { name: String },
    /// The protected call ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Shared {
    state: BreakerState,
    generation: u64,
    unreported: VecDeque<PhaseChange>,
}

/// Breaker owned by one protected resource.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    shared: Mutex<Shared>,
    reporter: Mutex<()>,
    hook: Option<StateChangeHook>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            shared: Mutex::new(Shared {
                state: BreakerState::initial(),
                generation: 0,
                unreported: VecDeque::new(),
            }),
            reporter: Mutex::new(()),
            hook: None,
        }
    }

    /// Attach a state-change observer.
    pub fn with_hook(
        mut self,
        hook: impl Fn(BreakerPhase, BreakerPhase) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current coarse phase.
    pub fn phase(&self) -> BreakerPhase {
        self.lock_shared().state.phase()
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// `Ok` counts as success and `Err` as failure. A call whose future is
    /// dropped before completing counts as a failure.
    pub async fn call<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some(generation) = self.admit() else {
            debug!(breaker = %self.name, "circuit breaker rejected call");
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        };

        let mut ticket = Ticket {
            breaker: self,
            generation,
            settled: false,
        };
        let result = operation.await;
        match &result {
            Ok(_) => ticket.settle(BreakerEvent::Success),
            Err(_) => ticket.settle(BreakerEvent::Failure {
                now: self.clock.utc(),
            }),
        }
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Option<u64> {
        let now = self.clock.utc();
        let (step, generation) = {
            let mut shared = self.lock_shared();
            let step = transition(shared.state, BreakerEvent::Admit { now }, &self.config);
            apply(&mut shared, step);
            (step, shared.generation)
        };
        if step.change.is_some() {
            self.report();
        }
        step.admitted.then_some(generation)
    }

    fn record(&self, generation: u64, event: BreakerEvent) {
        let changed = {
            let mut shared = self.lock_shared();
            if shared.generation != generation {
                debug!(breaker = %self.name, "ignoring outcome from an earlier breaker phase");
                return;
            }
            let step = transition(shared.state, event, &self.config);
            apply(&mut shared, step);
            step.change.is_some()
        };
        if changed {
            self.report();
        }
    }

    /// Drain queued phase changes in order.
    ///
    /// A change queued while another task holds the reporter is drained by
    /// that task before it lets go.
    fn report(&self) {
        let _reporter = self.reporter.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let next = self.lock_shared().unreported.pop_front();
            let Some(PhaseChange { from, to }) = next else {
                break;
            };
            warn!(breaker = %self.name, %from, %to, "circuit breaker state transition");
            if let Some(hook) = &self.hook {
                hook(from, to);
            }
        }
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        // Each event is applied atomically, so a poisoned guard still holds a
        // consistent state.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply(shared: &mut Shared, step: Step) {
    shared.state = step.state;
    if let Some(change) = step.change {
        shared.generation = shared.generation.wrapping_add(1);
        shared.unreported.push_back(change);
    }
}

struct Ticket<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Ticket<'_> {
    fn settle(&mut self, event: BreakerEvent) {
        self.settled = true;
        self.breaker.record(self.generation, event);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let now = self.breaker.clock.utc();
            self.breaker
                .record(self.generation, BreakerEvent::Failure { now });
        }
    }
}

#[cfg(test)]
mod tests;
