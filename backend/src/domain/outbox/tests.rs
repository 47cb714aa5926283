//! Tests for outbox lifecycle types.

use super::*;
use crate::domain::user::{Email, UserId, Username};
use rstest::rstest;

#[rstest]
#[case("waiting", OutboxStatus::Waiting)]
#[case("sent", OutboxStatus::Sent)]
#[case("success", OutboxStatus::Success)]
#[case("error", OutboxStatus::Error)]
fn status_parses_stored_values(#[case] raw: &str, #[case] expected: OutboxStatus) {
    let parsed: OutboxStatus = raw.parse().expect("known status");
    assert_eq!(parsed, expected);
    assert_eq!(parsed.as_str(), raw);
}

#[rstest]
fn status_rejects_unknown_values() {
    let err = "pending".parse::<OutboxStatus>().expect_err("unknown status");
    assert_eq!(err.input, "pending");
}

#[rstest]
#[case(OutboxStatus::Waiting, OutboxStatus::Sent, true)]
#[case(OutboxStatus::Sent, OutboxStatus::Success, true)]
#[case(OutboxStatus::Sent, OutboxStatus::Error, true)]
#[case(OutboxStatus::Waiting, OutboxStatus::Success, false)]
#[case(OutboxStatus::Success, OutboxStatus::Error, false)]
#[case(OutboxStatus::Error, OutboxStatus::Waiting, false)]
#[case(OutboxStatus::Sent, OutboxStatus::Waiting, false)]
fn lifecycle_only_moves_forward(
    #[case] from: OutboxStatus,
    #[case] to: OutboxStatus,
    #[case] allowed: bool,
) {
    assert_eq!(from.can_transition_to(to), allowed);
}

#[rstest]
fn only_success_and_error_are_terminal() {
    assert!(!OutboxStatus::Waiting.is_terminal());
    assert!(!OutboxStatus::Sent.is_terminal());
    assert!(OutboxStatus::Success.is_terminal());
    assert!(OutboxStatus::Error.is_terminal());
}

#[rstest]
fn user_deleted_event_carries_snapshot() {
    let snapshot = UserSnapshot {
        id: UserId::random(),
        username: Username::new("grace_h").expect("valid username"),
        email: Email::new("grace@example.com").expect("valid email"),
    };
    let event_id = EventId::random();

    let event = NewOutboxEvent::user_deleted(event_id, &snapshot).expect("encode event");

    assert_eq!(event.event_id, event_id);
    assert_eq!(event.event_type, USER_DELETED_EVENT);
    let decoded = UserSnapshot::from_payload(&event.payload).expect("decode payload");
    assert_eq!(decoded, snapshot);
}
