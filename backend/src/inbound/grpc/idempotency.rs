//! Extraction of the `req-id` idempotency key from request metadata.

use tonic::metadata::MetadataMap;

use crate::domain::Error;
use crate::domain::idempotency::{IdempotencyKey, IdempotencyKeyValidationError};

/// Metadata key carrying the client's idempotency key.
pub const REQ_ID_METADATA: &str = "req-id";

/// Read and validate `req-id`; rejection happens before any storage access.
pub fn extract_request_key(metadata: &MetadataMap) -> Result<IdempotencyKey, Error> {
    let Some(value) = metadata.get(REQ_ID_METADATA) else {
        return Err(Error::invalid_request("req-id metadata is required"));
    };

    value
        .to_str()
        .map_err(|_| IdempotencyKeyValidationError::InvalidKey)
        .and_then(IdempotencyKey::new)
        .map_err(|err| Error::invalid_request(format!("invalid req-id metadata: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::rstest;
    use tonic::metadata::MetadataValue;

    const KEY: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn metadata_with(value: &'static str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(REQ_ID_METADATA, MetadataValue::from_static(value));
        metadata
    }

    #[rstest]
    fn valid_key_is_extracted() {
        let key = extract_request_key(&metadata_with(KEY)).expect("valid key");
        assert_eq!(key.to_string(), KEY);
    }

    #[rstest]
    fn missing_key_is_rejected() {
        let err = extract_request_key(&MetadataMap::new()).expect_err("missing key");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[rstest]
    #[case("")]
    #[case("not-a-uuid")]
    #[case("550e8400e29b41d4a716446655440000")]
    fn malformed_key_is_rejected(#[case] raw: &'static str) {
        let err = extract_request_key(&metadata_with(raw)).expect_err("malformed key");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }
}
