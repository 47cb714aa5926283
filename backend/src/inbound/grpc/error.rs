//! gRPC status mapping for domain errors.
//!
//! Keeps the domain error transport agnostic; internal failures are logged
//! here and redacted before they reach the client.

use tonic::{Code, Status};
use tracing::error;

use crate::domain::{Error, ErrorCode};

const REDACTED_MESSAGE: &str = "Internal server error";

fn code_for(code: ErrorCode) -> Code {
    match code {
        ErrorCode::InvalidRequest => Code::InvalidArgument,
        ErrorCode::Unauthorized => Code::Unauthenticated,
        ErrorCode::NotFound => Code::NotFound,
        ErrorCode::Conflict => Code::AlreadyExists,
        ErrorCode::ServiceUnavailable => Code::Unavailable,
        ErrorCode::InternalError => Code::Internal,
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let code = code_for(err.code());
        if code == Code::Internal {
            error!(error = %err, "internal error returned to gRPC client");
            return Self::new(code, REDACTED_MESSAGE);
        }
        Self::new(code, err.message())
    }
}
