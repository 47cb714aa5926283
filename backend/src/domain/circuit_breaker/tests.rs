//! Tests for the breaker state machine and its async wrapper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};
use tokio::sync::oneshot;

use super::*;
use crate::test_support::MutableClock;

const COOLDOWN: Duration = Duration::from_secs(30);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn config() -> BreakerConfig {
    BreakerConfig::new(3, 2, COOLDOWN)
}

type Transitions = Arc<Mutex<Vec<(BreakerPhase, BreakerPhase)>>>;

struct Harness {
    breaker: CircuitBreaker,
    clock: Arc<MutableClock>,
    transitions: Transitions,
}

impl Harness {
    fn transitions(&self) -> Vec<(BreakerPhase, BreakerPhase)> {
        self.transitions.lock().expect("transitions mutex").clone()
    }

    async fn fail(&self) -> Result<(), BreakerError<&'static str>> {
        self.breaker.call(async { Err::<(), _>("boom") }).await
    }

    async fn succeed(&self) -> Result<(), BreakerError<&'static str>> {
        self.breaker.call(async { Ok::<(), &'static str>(()) }).await
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(MutableClock::new(t0()));
    let transitions: Transitions = Arc::default();
    let sink = Arc::clone(&transitions);
    let breaker = CircuitBreaker::new("users", config(), clock.clone()).with_hook(move |from, to| {
        sink.lock().expect("transitions mutex").push((from, to));
    });
    Harness {
        breaker,
        clock,
        transitions,
    }
}

#[rstest]
fn closed_admits_and_counts_failures() {
    let step = transition(BreakerState::initial(), BreakerEvent::Failure { now: t0() }, &config());
    assert_eq!(
        step.state,
        BreakerState::Closed {
            consecutive_failures: 1
        }
    );
    assert!(step.change.is_none());

    let admit = transition(step.state, BreakerEvent::Admit { now: t0() }, &config());
    assert!(admit.admitted);
}

#[rstest]
fn success_resets_consecutive_failures_without_transition() {
    let state = BreakerState::Closed {
        consecutive_failures: 2,
    };
    let step = transition(state, BreakerEvent::Success, &config());
    assert_eq!(step.state, BreakerState::initial());
    assert!(step.change.is_none());
}

#[rstest]
fn threshold_failure_opens() {
    let state = BreakerState::Closed {
        consecutive_failures: 2,
    };
    let step = transition(state, BreakerEvent::Failure { now: t0() }, &config());
    assert_eq!(step.state, BreakerState::Open { opened_at: t0() });
    assert_eq!(
        step.change,
        Some(PhaseChange {
            from: BreakerPhase::Closed,
            to: BreakerPhase::Open
        })
    );
}

#[rstest]
#[case(Duration::from_secs(29), false, BreakerPhase::Open)]
#[case(COOLDOWN, true, BreakerPhase::HalfOpen)]
fn open_admits_trial_only_after_cooldown(
    #[case] waited: Duration,
    #[case] admitted: bool,
    #[case] phase: BreakerPhase,
) {
    let state = BreakerState::Open { opened_at: t0() };
    let now = t0() + chrono::Duration::from_std(waited).expect("representable");
    let step = transition(state, BreakerEvent::Admit { now }, &config());
    assert_eq!(step.admitted, admitted);
    assert_eq!(step.state.phase(), phase);
}

#[rstest]
fn half_open_allows_one_trial_at_a_time() {
    let state = BreakerState::HalfOpen {
        consecutive_successes: 0,
        trial_in_flight: true,
    };
    let step = transition(state, BreakerEvent::Admit { now: t0() }, &config());
    assert!(!step.admitted);
    assert_eq!(step.state, state);
}

#[rstest]
fn half_open_failure_reopens() {
    let state = BreakerState::HalfOpen {
        consecutive_successes: 1,
        trial_in_flight: true,
    };
    let step = transition(state, BreakerEvent::Failure { now: t0() }, &config());
    assert_eq!(step.state, BreakerState::Open { opened_at: t0() });
}

#[rstest]
fn outcomes_while_open_are_null_transitions() {
    let state = BreakerState::Open { opened_at: t0() };
    for event in [BreakerEvent::Success, BreakerEvent::Failure { now: t0() }] {
        let step = transition(state, event, &config());
        assert_eq!(step.state, state);
        assert!(step.change.is_none());
    }
}

#[rstest]
#[tokio::test]
async fn opens_after_consecutive_failures_and_rejects(harness: Harness) {
    for _ in 0..3 {
        assert!(matches!(harness.fail().await, Err(BreakerError::Inner("boom"))));
    }
    assert_eq!(harness.breaker.phase(), BreakerPhase::Open);

    let invoked = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&invoked);
    let result = harness
        .breaker
        .call(async move {
            *flag.lock().expect("flag mutex") = true;
            Ok::<(), &'static str>(())
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Open { .. })));
    assert!(!*invoked.lock().expect("flag mutex"));
    assert_eq!(
        harness.transitions(),
        vec![(BreakerPhase::Closed, BreakerPhase::Open)]
    );
}

#[rstest]
#[tokio::test]
async fn recovers_after_cooldown_and_successful_trials(harness: Harness) {
    for _ in 0..3 {
        let _ = harness.fail().await;
    }
    harness.clock.advance(COOLDOWN);

    harness.succeed().await.expect("trial admitted");
    assert_eq!(harness.breaker.phase(), BreakerPhase::HalfOpen);
    harness.succeed().await.expect("second trial admitted");
    assert_eq!(harness.breaker.phase(), BreakerPhase::Closed);

    assert_eq!(
        harness.transitions(),
        vec![
            (BreakerPhase::Closed, BreakerPhase::Open),
            (BreakerPhase::Open, BreakerPhase::HalfOpen),
            (BreakerPhase::HalfOpen, BreakerPhase::Closed),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_trial_reopens_and_restarts_cooldown(harness: Harness) {
    for _ in 0..3 {
        let _ = harness.fail().await;
    }
    harness.clock.advance(COOLDOWN);
    let _ = harness.fail().await;

    assert_eq!(harness.breaker.phase(), BreakerPhase::Open);
    assert!(matches!(harness.succeed().await, Err(BreakerError::Open { .. })));
    assert_eq!(harness.transitions().len(), 3);
}

#[rstest]
#[tokio::test]
async fn intermittent_failures_never_open(harness: Harness) {
    for _ in 0..5 {
        let _ = harness.fail().await;
        let _ = harness.fail().await;
        harness.succeed().await.expect("closed breaker admits");
    }
    assert_eq!(harness.breaker.phase(), BreakerPhase::Closed);
    assert!(harness.transitions().is_empty());
}

#[rstest]
#[tokio::test]
async fn concurrent_call_is_rejected_while_trial_in_flight(harness: Harness) {
    for _ in 0..3 {
        let _ = harness.fail().await;
    }
    harness.clock.advance(COOLDOWN);

    let (release, gate) = oneshot::channel::<()>();
    let trial = harness.breaker.call(async move {
        let _ = gate.await;
        Ok::<(), &'static str>(())
    });
    let second = async {
        tokio::task::yield_now().await;
        let rejected = harness.succeed().await;
        let _ = release.send(());
        rejected
    };

    let (trial_result, second_result) = tokio::join!(trial, second);
    trial_result.expect("trial admitted");
    assert!(matches!(second_result, Err(BreakerError::Open { .. })));
}

#[rstest]
#[tokio::test]
async fn stale_success_from_earlier_phase_is_ignored(harness: Harness) {
    let (release, gate) = oneshot::channel::<()>();
    let slow = harness.breaker.call(async move {
        let _ = gate.await;
        Ok::<(), &'static str>(())
    });
    let trip = async {
        tokio::task::yield_now().await;
        for _ in 0..3 {
            let _ = harness.fail().await;
        }
        let _ = release.send(());
    };

    let (slow_result, ()) = tokio::join!(slow, trip);
    slow_result.expect("slow call admitted while closed");
    assert_eq!(harness.breaker.phase(), BreakerPhase::Open);
}

#[rstest]
#[tokio::test]
async fn dropped_trial_counts_as_failure(harness: Harness) {
    for _ in 0..3 {
        let _ = harness.fail().await;
    }
    harness.clock.advance(COOLDOWN);

    let pending = harness
        .breaker
        .call(std::future::pending::<Result<(), &'static str>>());
    let timed_out = tokio::time::timeout(Duration::from_millis(5), pending).await;
    assert!(timed_out.is_err());

    assert_eq!(harness.breaker.phase(), BreakerPhase::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hook_sees_concurrent_transitions_in_order() {
    let transitions: Transitions = Arc::default();
    let sink = Arc::clone(&transitions);
    let clock = Arc::new(MutableClock::new(t0()));
    let breaker = Arc::new(
        CircuitBreaker::new("users", BreakerConfig::new(1, 1, Duration::ZERO), clock).with_hook(
            move |from, to| {
                sink.lock().expect("transitions mutex").push((from, to));
            },
        ),
    );

    let workers: Vec<_> = (0..8_usize)
        .map(|worker| {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                for round in 0..200_usize {
                    let fail = (worker + round) % 2 == 0;
                    let _ = breaker
                        .call(async move {
                            if fail {
                                Err::<(), &'static str>("boom")
                            } else {
                                Ok(())
                            }
                        })
                        .await;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.expect("worker task");
    }

    let seen = transitions.lock().expect("transitions mutex").clone();
    assert_eq!(seen.first().map(|(from, _)| *from), Some(BreakerPhase::Closed));
    for pair in seen.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "hook calls out of order: {pair:?}");
    }
    assert_eq!(seen.last().map(|(_, to)| *to), Some(breaker.phase()));
}
