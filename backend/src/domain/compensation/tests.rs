//! Tests for feedback handling and the consumer loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockable::Clock;
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::outbox::NewOutboxEvent;
use crate::domain::ports::{MockOutboxStore, MockUserRepository, OutboxStore, SoftDeleteOutcome};
use crate::domain::user::{Email, User, UserId, Username};
use crate::test_support::{InMemoryAccountsStore, MutableClock, ScriptedFeedbackSource};

struct World {
    store: Arc<InMemoryAccountsStore>,
    handler: CompensationHandler,
}

#[fixture]
fn world() -> World {
    let store = Arc::new(InMemoryAccountsStore::new());
    let handler = CompensationHandler::new(store.clone(), store.clone());
    World { store, handler }
}

fn user(name: &str) -> User {
    User {
        id: UserId::random(),
        username: Username::new(name).expect("valid username"),
        email: Email::new(format!("{name}@example.com")).expect("valid email"),
        deleted: false,
        created_at: Utc::now(),
    }
}

/// Soft-delete a fresh user and optionally mark the event sent.
async fn deleted_user(store: &InMemoryAccountsStore, sent: bool) -> (UserId, EventId) {
    use crate::domain::ports::UserRepository;

    let user = user("deleted_user");
    let id = user.id.clone();
    store.insert_user(user);
    let event_id = EventId::random();
    let outcome = store.soft_delete(&id, event_id).await.expect("soft delete");
    assert!(matches!(outcome, SoftDeleteOutcome::Deleted { .. }));
    if sent {
        store.mark_sent(&[event_id]).await.expect("mark sent");
    }
    (id, event_id)
}

fn feedback(event_id: EventId, status: &str) -> FeedbackMessage {
    FeedbackMessage {
        event_id,
        status: status.to_owned(),
    }
}

#[rstest]
fn feedback_parses_wire_format() {
    let id = EventId::random();
    let parsed = FeedbackMessage::parse(&format!(r#"{{"event_id":"{id}","status":"OK"}}"#))
        .expect("valid feedback");
    assert_eq!(parsed.event_id, id);
    assert!(parsed.is_success());
    assert!(!feedback(id, "FAILED").is_success());
}

#[rstest]
#[tokio::test]
async fn ok_feedback_completes_sent_event(world: World) {
    let (user_id, event_id) = deleted_user(&world.store, true).await;

    let outcome = world
        .handler
        .handle(&feedback(event_id, FEEDBACK_OK))
        .await
        .expect("handled");

    assert_eq!(outcome, CompensationOutcome::Completed);
    let event = world.store.event(event_id).expect("event stored");
    assert_eq!(event.status, OutboxStatus::Success);
    assert!(world.store.user(&user_id).expect("user kept").deleted);
}

#[rstest]
#[tokio::test]
async fn failure_feedback_restores_user_and_marks_error(world: World) {
    let (user_id, event_id) = deleted_user(&world.store, true).await;

    let outcome = world
        .handler
        .handle(&feedback(event_id, "POSTS_DELETE_FAILED"))
        .await
        .expect("handled");

    assert_eq!(outcome, CompensationOutcome::Compensated);
    assert_eq!(
        world.store.event(event_id).expect("event stored").status,
        OutboxStatus::Error
    );
    assert!(!world.store.user(&user_id).expect("user kept").deleted);
}

#[rstest]
#[case(FEEDBACK_OK)]
#[case("FAILED")]
#[tokio::test]
async fn duplicate_feedback_is_a_no_op(world: World, #[case] second_status: &str) {
    let (user_id, event_id) = deleted_user(&world.store, true).await;
    world
        .handler
        .handle(&feedback(event_id, FEEDBACK_OK))
        .await
        .expect("first feedback");

    let outcome = world
        .handler
        .handle(&feedback(event_id, second_status))
        .await
        .expect("duplicate feedback");

    assert_eq!(
        outcome,
        CompensationOutcome::AlreadyFinal(OutboxStatus::Success)
    );
    assert!(world.store.user(&user_id).expect("user kept").deleted);
}

#[rstest]
#[tokio::test]
async fn feedback_before_dispatch_is_retried(world: World) {
    let (_, event_id) = deleted_user(&world.store, false).await;

    let outcome = world
        .handler
        .handle(&feedback(event_id, FEEDBACK_OK))
        .await
        .expect("handled");

    assert_eq!(outcome, CompensationOutcome::Retry);
    assert_eq!(
        world.store.event(event_id).expect("event stored").status,
        OutboxStatus::Waiting
    );
}

#[rstest]
#[tokio::test]
async fn feedback_for_unknown_event_is_retried(world: World) {
    let outcome = world
        .handler
        .handle(&feedback(EventId::random(), FEEDBACK_OK))
        .await
        .expect("handled");
    assert_eq!(outcome, CompensationOutcome::Retry);
}

#[rstest]
#[tokio::test]
async fn unsupported_event_type_is_permanent(world: World) {
    let event_id = EventId::random();
    world.store.push_event(NewOutboxEvent {
        event_id,
        event_type: "subscriber-removed".to_owned(),
        payload: b"{}".to_vec(),
    });
    world.store.mark_sent(&[event_id]).await.expect("mark sent");

    let err = world
        .handler
        .handle(&feedback(event_id, "FAILED"))
        .await
        .expect_err("no compensation");

    assert!(err.is_permanent());
    assert_eq!(
        world.store.event(event_id).expect("event stored").status,
        OutboxStatus::Sent
    );
}

#[rstest]
#[tokio::test]
async fn restore_failure_leaves_event_sent_for_retry() {
    let event_id = EventId::random();
    let snapshot = user("ada_l").snapshot();
    let event = OutboxEvent {
        event_id,
        event_type: USER_DELETED_EVENT.to_owned(),
        payload: snapshot.to_payload().expect("encode snapshot"),
        status: OutboxStatus::Sent,
        retry_count: 0,
        created_at: Utc::now(),
    };

    let mut store = MockOutboxStore::new();
    store
        .expect_find()
        .return_once(move |_| Ok(Some(event)));
    store.expect_mark_final().never();
    let mut users = MockUserRepository::new();
    users
        .expect_restore()
        .return_once(|_| Err(UserPersistenceError::connection("refused")));

    let handler = CompensationHandler::new(Arc::new(store), Arc::new(users));
    let err = handler
        .handle(&feedback(event_id, "FAILED"))
        .await
        .expect_err("restore fails");

    assert!(!err.is_permanent());
}

struct ConsumerWorld {
    store: Arc<InMemoryAccountsStore>,
    source: Arc<ScriptedFeedbackSource>,
    clock: Arc<MutableClock>,
    consumer: FeedbackConsumer,
}

fn consumer_config(max_deliveries: u32) -> FeedbackConsumerConfig {
    FeedbackConsumerConfig {
        batch_size: 4,
        max_deliveries,
        retry_base_delay: Duration::from_secs(1),
        retry_max_delay: Duration::from_secs(4),
    }
}

fn consumer_world(max_deliveries: u32) -> ConsumerWorld {
    let store = Arc::new(InMemoryAccountsStore::new());
    let source = Arc::new(ScriptedFeedbackSource::new());
    let clock = Arc::new(MutableClock::new(Utc::now()));
    let consumer = FeedbackConsumer::new(
        source.clone(),
        CompensationHandler::new(store.clone(), store.clone()),
        consumer_config(max_deliveries),
        clock.clone(),
    );
    ConsumerWorld {
        store,
        source,
        clock,
        consumer,
    }
}

#[rstest]
#[case(1, Duration::from_secs(1))]
#[case(2, Duration::from_secs(2))]
#[case(3, Duration::from_secs(4))]
#[case(9, Duration::from_secs(4))]
#[case(u32::MAX, Duration::from_secs(4))]
fn retry_delay_doubles_up_to_the_cap(#[case] attempt: u32, #[case] expected: Duration) {
    assert_eq!(retry_delay(&consumer_config(10), attempt), expected);
}

#[rstest]
#[tokio::test]
async fn consumer_acks_settled_feedback() {
    let world = consumer_world(3);
    let (_, event_id) = deleted_user(&world.store, true).await;
    world.source.push_feedback(event_id, FEEDBACK_OK);

    let report = world.consumer.run_batch().await.expect("batch");

    assert_eq!(report.acked, 1);
    assert_eq!(world.source.acked().len(), 1);
    assert_eq!(
        world.store.event(event_id).expect("event stored").status,
        OutboxStatus::Success
    );
}

#[rstest]
#[tokio::test]
async fn consumer_dead_letters_malformed_payloads() {
    let world = consumer_world(3);
    world.source.push("not json");

    let report = world.consumer.run_batch().await.expect("batch");

    assert_eq!(report.dead_lettered, 1);
    let dead = world.source.dead_lettered();
    assert!(dead[0].1.starts_with("malformed feedback"));
}

#[rstest]
#[tokio::test]
async fn early_feedback_waits_for_its_retry_time() {
    let world = consumer_world(5);
    let (_, event_id) = deleted_user(&world.store, false).await;
    world.source.push_feedback(event_id, FEEDBACK_OK);

    let first = world.consumer.run_batch().await.expect("first batch");
    assert_eq!(first.requeued, 1);

    world
        .store
        .mark_sent(&[event_id])
        .await
        .expect("dispatcher marks sent");

    // Not due yet: put back without spending an attempt.
    let second = world.consumer.run_batch().await.expect("second batch");
    assert!(second.only_deferred());
    assert_eq!(second.acked, 0);
    assert_eq!(
        second.next_due,
        Some(world.clock.utc() + chrono::TimeDelta::seconds(1))
    );

    world.clock.advance(Duration::from_secs(1));
    let third = world.consumer.run_batch().await.expect("third batch");

    assert_eq!(third.acked, 1);
    assert_eq!(world.source.acked()[0].attempt, 2);
    assert_eq!(
        world.store.event(event_id).expect("event stored").status,
        OutboxStatus::Success
    );
}

#[rstest]
#[tokio::test]
async fn unknown_event_feedback_is_dead_lettered_after_max_deliveries() {
    let world = consumer_world(3);
    world.source.push_feedback(EventId::random(), FEEDBACK_OK);

    for _ in 0..3 {
        world.consumer.run_batch().await.expect("batch");
        world.clock.advance(Duration::from_secs(4));
    }

    assert_eq!(world.source.requeued().len(), 2);
    let dead = world.source.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.attempt, 3);
    assert_eq!(world.source.pending(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn run_loop_does_not_spend_attempts_while_waiting() {
    let world = consumer_world(3);
    let (_, event_id) = deleted_user(&world.store, false).await;
    world.source.push_feedback(event_id, "FAILED");

    let ConsumerWorld {
        source, consumer, ..
    } = world;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    // The test clock never reaches the retry time, so the loop must idle.
    tokio::time::sleep(Duration::from_millis(30_500)).await;
    shutdown.cancel();
    task.await.expect("consumer joins");

    assert!(source.dead_lettered().is_empty());
    assert_eq!(source.pending(), 1);
    assert!(source.requeued().iter().skip(1).all(|copy| copy.attempt == 2));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn run_loop_stops_on_cancellation() {
    let world = consumer_world(3);
    let (user_id, event_id) = deleted_user(&world.store, true).await;
    world.source.push_feedback(event_id, "FAILED");

    let ConsumerWorld {
        store,
        source,
        consumer,
        ..
    } = world;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    task.await.expect("consumer joins");

    assert_eq!(source.acked().len(), 1);
    assert!(!store.user(&user_id).expect("user kept").deleted);
}
