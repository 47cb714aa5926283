//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly. When the
//! migrations change, regenerate with `diesel print-schema` or update by hand.

diesel::table! {
    /// Registered accounts. Deleting a user only flips `deleted`.
    users (id) {
        id -> Uuid,
        username -> Varchar,
        email -> Varchar,
        deleted -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Transactional outbox. `position` gives the append order.
    outbox_events (position) {
        position -> Int8,
        event_id -> Uuid,
        event_type -> Text,
        payload -> Bytea,
        status -> Text,
        retry_count -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Admitted request keys.
    idempotency_keys (id) {
        id -> Uuid,
        idempotency_key -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(users, outbox_events, idempotency_keys);
