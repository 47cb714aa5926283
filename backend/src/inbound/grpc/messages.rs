//! Wire messages for `accounts.v1.Accounts`.
//!
//! Declared with `prost` derives instead of a `.proto` file; field tags are
//! the wire contract and must never be reused.

/// `RegisterUser` request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterUserRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub email: String,
}

/// `GetUser` request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetUserRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

/// `DeleteUser` request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteUserRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

/// Public view of an active user.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserReply {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(string, tag = "3")]
    pub email: String,
    /// RFC 3339 timestamp.
    #[prost(string, tag = "4")]
    pub created_at: String,
}

/// Acknowledges that the deletion saga has started.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteUserReply {
    #[prost(string, tag = "1")]
    pub user_id: String,
    /// Outbox event carrying the deletion downstream.
    #[prost(string, tag = "2")]
    pub event_id: String,
}
