//! The `req-id` request key.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Why a `req-id` value was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyKeyValidationError {
    #[error("idempotency key must not be empty")]
    EmptyKey,
    #[error("idempotency key must be a hyphenated UUID")]
    InvalidKey,
}

/// Client-chosen request identifier, unique per logical request.
///
/// Only the canonical hyphenated UUID form is accepted, so two spellings of
/// one key cannot slip past the unique constraint as different requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Parse a raw `req-id` value.
    ///
    /// # Errors
    ///
    /// [`IdempotencyKeyValidationError::EmptyKey`] for an empty value and
    /// [`IdempotencyKeyValidationError::InvalidKey`] for anything that is not
    /// a hyphenated UUID, surrounding whitespace included.
    ///
    /// ```
    /// # use accounts::domain::idempotency::IdempotencyKey;
    /// let key = IdempotencyKey::new("550E8400-e29b-41d4-a716-446655440000").expect("valid key");
    /// assert_eq!(key.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    /// ```
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdempotencyKeyValidationError> {
        raw.as_ref().parse()
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = IdempotencyKeyValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(IdempotencyKeyValidationError::EmptyKey);
        }
        // 36 characters rules out the simple, braced and URN spellings.
        if raw.len() != 36 {
            return Err(IdempotencyKeyValidationError::InvalidKey);
        }
        Uuid::try_parse(raw)
            .map(Self)
            .map_err(|_| IdempotencyKeyValidationError::InvalidKey)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}
