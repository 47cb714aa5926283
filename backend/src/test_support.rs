//! Test utilities for the accounts crate.
//!
//! In-memory adapters shared by unit tests (in `src/`) and integration tests
//! (in `tests/`). Compiled for tests and when the `test-support` feature is
//! enabled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::idempotency::{IdempotencyAdmission, IdempotencyKey, IdempotencyRecord};
use crate::domain::outbox::{
    EventId, FinalStatus, FinalizeOutcome, NewOutboxEvent, OutboxEvent, OutboxStatus,
};
use crate::domain::ports::{
    CreateUserOutcome, EventPublisher, EventPublisherError, FeedbackDelivery, FeedbackSource,
    FeedbackSourceError, IdempotencyStore, IdempotencyStoreError, OutboxStore, OutboxStoreError,
    Redelivery, RestoreOutcome, SoftDeleteOutcome, UserPersistenceError, UserRepository,
};
use crate::domain::user::{NewUser, User, UserId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}

/// Clock whose time only moves when a test advances it.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}")
            }
        };
        *lock(&self.0) += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

#[derive(Default)]
struct StoreState {
    users: HashMap<UserId, User>,
    outbox: Vec<OutboxEvent>,
    keys: HashMap<IdempotencyKey, IdempotencyRecord>,
    fail_next_append: bool,
    users_unavailable: bool,
    listing_fails: bool,
    mark_sent_fails: bool,
}

impl StoreState {
    fn event_mut(&mut self, id: EventId) -> Option<&mut OutboxEvent> {
        self.outbox.iter_mut().find(|event| event.event_id == id)
    }

    fn check_users(&self) -> Result<(), UserPersistenceError> {
        if self.users_unavailable {
            return Err(UserPersistenceError::connection("user store unavailable"));
        }
        Ok(())
    }
}

/// Users, outbox and idempotency keys behind one lock, so a soft delete and
/// its outbox append commit or roll back together like a database
/// transaction.
#[derive(Default)]
pub struct InMemoryAccountsStore {
    state: Mutex<StoreState>,
}

impl InMemoryAccountsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing user.
    pub fn insert_user(&self, user: User) {
        lock(&self.state).users.insert(user.id.clone(), user);
    }

    /// Read a user regardless of the deleted flag.
    pub fn user(&self, id: &UserId) -> Option<User> {
        lock(&self.state).users.get(id).cloned()
    }

    /// Append an event outside any business operation.
    pub fn push_event(&self, event: NewOutboxEvent) {
        lock(&self.state).outbox.push(waiting(event));
    }

    /// All outbox rows in insertion order.
    pub fn events(&self) -> Vec<OutboxEvent> {
        lock(&self.state).outbox.clone()
    }

    pub fn event(&self, id: EventId) -> Option<OutboxEvent> {
        lock(&self.state)
            .outbox
            .iter()
            .find(|event| event.event_id == id)
            .cloned()
    }

    /// Number of stored users, deleted ones included.
    pub fn user_count(&self) -> usize {
        lock(&self.state).users.len()
    }

    /// Number of admitted idempotency keys.
    pub fn key_count(&self) -> usize {
        lock(&self.state).keys.len()
    }

    /// Make the next outbox append inside a soft delete fail.
    pub fn fail_next_append(&self) {
        lock(&self.state).fail_next_append = true;
    }

    /// Make every user repository call fail with a connection error.
    pub fn set_users_unavailable(&self, unavailable: bool) {
        lock(&self.state).users_unavailable = unavailable;
    }

    pub fn set_listing_fails(&self, fails: bool) {
        lock(&self.state).listing_fails = fails;
    }

    pub fn set_mark_sent_fails(&self, fails: bool) {
        lock(&self.state).mark_sent_fails = fails;
    }
}

fn waiting(event: NewOutboxEvent) -> OutboxEvent {
    OutboxEvent {
        event_id: event.event_id,
        event_type: event.event_type,
        payload: event.payload,
        status: OutboxStatus::Waiting,
        retry_count: 0,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl OutboxStore for InMemoryAccountsStore {
    async fn list_pending(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let state = lock(&self.state);
        if state.listing_fails {
            return Err(OutboxStoreError::connection("outbox listing unavailable"));
        }
        Ok(state
            .outbox
            .iter()
            .filter(|event| event.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError> {
        let mut state = lock(&self.state);
        if state.mark_sent_fails {
            return Err(OutboxStoreError::query("mark sent rejected"));
        }
        let mut moved = 0;
        for id in ids {
            if let Some(event) = state.event_mut(*id)
                && event.status == OutboxStatus::Waiting
            {
                event.status = OutboxStatus::Sent;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn mark_final(
        &self,
        id: EventId,
        status: FinalStatus,
    ) -> Result<FinalizeOutcome, OutboxStoreError> {
        let mut state = lock(&self.state);
        let Some(event) = state.event_mut(id) else {
            return Ok(FinalizeOutcome::NotFound);
        };
        Ok(match event.status {
            OutboxStatus::Sent => {
                event.status = status.into();
                FinalizeOutcome::Finalized
            }
            OutboxStatus::Waiting => FinalizeOutcome::NotSent,
            current => FinalizeOutcome::AlreadyFinal(current),
        })
    }

    async fn find(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        Ok(self.event(id))
    }

    async fn record_publish_failures(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError> {
        let mut state = lock(&self.state);
        let mut touched = 0;
        for id in ids {
            if let Some(event) = state.event_mut(*id)
                && event.status == OutboxStatus::Waiting
            {
                event.retry_count = event.retry_count.saturating_add(1);
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryAccountsStore {
    async fn insert_if_absent(
        &self,
        key: &IdempotencyKey,
    ) -> Result<IdempotencyAdmission, IdempotencyStoreError> {
        let mut state = lock(&self.state);
        if state.keys.contains_key(key) {
            return Ok(IdempotencyAdmission::Duplicate);
        }
        state
            .keys
            .insert(*key, IdempotencyRecord::admitted(*key, Utc::now()));
        Ok(IdempotencyAdmission::Admitted)
    }
}

#[async_trait]
impl UserRepository for InMemoryAccountsStore {
    async fn create(&self, user: &NewUser) -> Result<CreateUserOutcome, UserPersistenceError> {
        let mut state = lock(&self.state);
        state.check_users()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Ok(CreateUserOutcome::UsernameTaken);
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Ok(CreateUserOutcome::EmailTaken);
        }
        let created = User {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            deleted: false,
            created_at: Utc::now(),
        };
        state.users.insert(created.id.clone(), created.clone());
        Ok(CreateUserOutcome::Created(created))
    }

    async fn find(&self, id: &UserId) -> Result<Option<User>, UserPersistenceError> {
        let state = lock(&self.state);
        state.check_users()?;
        Ok(state.users.get(id).filter(|user| !user.deleted).cloned())
    }

    async fn soft_delete(
        &self,
        id: &UserId,
        event_id: EventId,
    ) -> Result<SoftDeleteOutcome, UserPersistenceError> {
        let mut state = lock(&self.state);
        state.check_users()?;
        let Some(user) = state.users.get(id).cloned() else {
            return Ok(SoftDeleteOutcome::NotFound);
        };
        if user.deleted {
            return Ok(SoftDeleteOutcome::AlreadyDeleted);
        }

        let snapshot = user.snapshot();
        let event = NewOutboxEvent::user_deleted(event_id, &snapshot)
            .map_err(|err| UserPersistenceError::serialization(err.to_string()))?;
        if std::mem::take(&mut state.fail_next_append) {
            // Nothing has been written yet, so returning here is the rollback.
            return Err(UserPersistenceError::query("outbox append failed"));
        }

        if let Some(stored) = state.users.get_mut(id) {
            stored.deleted = true;
        }
        state.outbox.push(waiting(event));
        Ok(SoftDeleteOutcome::Deleted { snapshot, event_id })
    }

    async fn restore(&self, id: &UserId) -> Result<RestoreOutcome, UserPersistenceError> {
        let mut state = lock(&self.state);
        state.check_users()?;
        Ok(match state.users.get_mut(id) {
            None => RestoreOutcome::NotFound,
            Some(user) if !user.deleted => RestoreOutcome::AlreadyActive,
            Some(user) => {
                user.deleted = false;
                RestoreOutcome::Restored
            }
        })
    }
}

#[derive(Default)]
struct PublisherState {
    published: Vec<OutboxEvent>,
    failing: HashSet<EventId>,
    fail_all: bool,
    hang: bool,
}

/// Publisher that records what it was asked to deliver.
#[derive(Default)]
pub struct RecordingPublisher {
    state: Mutex<PublisherState>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<OutboxEvent> {
        lock(&self.state).published.clone()
    }

    /// Reject publishes of one event.
    pub fn fail_event(&self, id: EventId) {
        lock(&self.state).failing.insert(id);
    }

    /// Reject every publish.
    pub fn set_fail_all(&self, fail: bool) {
        lock(&self.state).fail_all = fail;
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.failing.clear();
        state.fail_all = false;
    }

    /// Make publishes never complete.
    pub fn hang(&self, hang: bool) {
        lock(&self.state).hang = hang;
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), EventPublisherError> {
        let hang = {
            let mut state = lock(&self.state);
            if state.fail_all || state.failing.contains(&event.event_id) {
                return Err(EventPublisherError::publish("broker rejected event"));
            }
            if !state.hang {
                state.published.push(event.clone());
            }
            state.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FeedbackState {
    queue: VecDeque<FeedbackDelivery>,
    acked: Vec<FeedbackDelivery>,
    requeued: Vec<FeedbackDelivery>,
    dead_lettered: Vec<(FeedbackDelivery, String)>,
    next_receipt: u64,
}

impl FeedbackState {
    fn enqueue(&mut self, payload: String, attempt: u32, not_before: Option<DateTime<Utc>>) {
        self.next_receipt += 1;
        self.queue.push_back(FeedbackDelivery {
            receipt: format!("{}-0", self.next_receipt),
            payload,
            attempt,
            not_before,
        });
    }
}

/// Feedback channel fed by the test.
///
/// Requeued deliveries go to the back of the queue carrying the attempt and
/// retry time they were requeued with, like the Redis adapter. Every
/// requeue, deferrals included, is recorded in [`Self::requeued`].
#[derive(Default)]
pub struct ScriptedFeedbackSource {
    state: Mutex<FeedbackState>,
}

impl ScriptedFeedbackSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload.
    pub fn push(&self, payload: impl Into<String>) {
        lock(&self.state).enqueue(payload.into(), 1, None);
    }

    /// Queue a well-formed feedback message.
    pub fn push_feedback(&self, event_id: EventId, status: &str) {
        self.push(serde_json::json!({ "event_id": event_id, "status": status }).to_string());
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn acked(&self) -> Vec<FeedbackDelivery> {
        lock(&self.state).acked.clone()
    }

    pub fn requeued(&self) -> Vec<FeedbackDelivery> {
        lock(&self.state).requeued.clone()
    }

    pub fn dead_lettered(&self) -> Vec<(FeedbackDelivery, String)> {
        lock(&self.state).dead_lettered.clone()
    }
}

#[async_trait]
impl FeedbackSource for ScriptedFeedbackSource {
    async fn receive(&self, max: usize) -> Result<Vec<FeedbackDelivery>, FeedbackSourceError> {
        let batch: Vec<FeedbackDelivery> = {
            let mut state = lock(&self.state);
            let take = max.min(state.queue.len());
            state.queue.drain(..take).collect()
        };
        if batch.is_empty() {
            // Stand-in for a blocking read.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(batch)
    }

    async fn ack(&self, delivery: &FeedbackDelivery) -> Result<(), FeedbackSourceError> {
        lock(&self.state).acked.push(delivery.clone());
        Ok(())
    }

    async fn requeue(
        &self,
        delivery: &FeedbackDelivery,
        redelivery: Redelivery,
    ) -> Result<(), FeedbackSourceError> {
        let mut state = lock(&self.state);
        state.requeued.push(delivery.clone());
        state.enqueue(
            delivery.payload.clone(),
            redelivery.attempt,
            Some(redelivery.not_before),
        );
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &FeedbackDelivery,
        reason: &str,
    ) -> Result<(), FeedbackSourceError> {
        lock(&self.state)
            .dead_lettered
            .push((delivery.clone(), reason.to_owned()));
        Ok(())
    }
}
