//! Outbox lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Waiting,
    Sent,
    Success,
    Error,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Sent => "sent",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Terminal states are never changed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Sent) | (Self::Sent, Self::Success) | (Self::Sent, Self::Error)
        )
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse error for [`OutboxStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutboxStatusError {
    pub input: String,
}

impl fmt::Display for ParseOutboxStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid outbox status: {}", self.input)
    }
}

impl std::error::Error for ParseOutboxStatusError {}

impl FromStr for OutboxStatus {
    type Err = ParseOutboxStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "sent" => Ok(Self::Sent),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(ParseOutboxStatusError {
                input: value.to_owned(),
            }),
        }
    }
}

/// Terminal status requested when finalizing a sent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    Error,
}

impl From<FinalStatus> for OutboxStatus {
    fn from(value: FinalStatus) -> Self {
        match value {
            FinalStatus::Success => Self::Success,
            FinalStatus::Error => Self::Error,
        }
    }
}
