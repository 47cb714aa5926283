//! gRPC adapter for `accounts.v1.Accounts`.
//!
//! Handlers translate wire messages into [`AccountsService`] calls. Mutating
//! RPCs (`RegisterUser`, `DeleteUser`) first pass the `req-id` key through the
//! [`IdempotencyGuard`]; `GetUser` is read-only and unguarded.

mod error;
mod idempotency;
pub mod messages;

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::domain::{AccountsService, IdempotencyGuard, User};

pub use idempotency::{REQ_ID_METADATA, extract_request_key};
use messages::{
    DeleteUserReply, DeleteUserRequest, GetUserRequest, RegisterUserRequest, UserReply,
};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/accounts.v1.Accounts.rs"));
}

pub use generated::accounts_server::{Accounts, AccountsServer};

/// tonic service implementation backed by the domain services.
#[derive(Clone)]
pub struct AccountsGrpc {
    accounts: Arc<AccountsService>,
    guard: IdempotencyGuard,
}

impl AccountsGrpc {
    pub fn new(accounts: Arc<AccountsService>, guard: IdempotencyGuard) -> Self {
        Self { accounts, guard }
    }

    /// Wrap in the generated tonic server type.
    pub fn into_server(self) -> AccountsServer<Self> {
        AccountsServer::new(self)
    }
}

fn user_reply(user: User) -> UserReply {
    UserReply {
        user_id: user.id.to_string(),
        username: user.username.into(),
        email: user.email.into(),
        created_at: user.created_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl Accounts for AccountsGrpc {
    #[instrument(skip_all)]
    async fn register_user(
        &self,
        request: Request<RegisterUserRequest>,
    ) -> Result<Response<UserReply>, Status> {
        let key = extract_request_key(request.metadata())?;
        let RegisterUserRequest { username, email } = request.into_inner();

        let user = self
            .guard
            .admit_then(&key, || self.accounts.register_user(&username, &email))
            .await?;
        Ok(Response::new(user_reply(user)))
    }

    #[instrument(skip_all)]
    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<UserReply>, Status> {
        let GetUserRequest { user_id } = request.into_inner();
        let user = self.accounts.get_user(&user_id).await?;
        Ok(Response::new(user_reply(user)))
    }

    #[instrument(skip_all)]
    async fn delete_user(
        &self,
        request: Request<DeleteUserRequest>,
    ) -> Result<Response<DeleteUserReply>, Status> {
        let key = extract_request_key(request.metadata())?;
        let DeleteUserRequest { user_id } = request.into_inner();

        let deleted = self
            .guard
            .admit_then(&key, || self.accounts.delete_user(&user_id))
            .await?;
        Ok(Response::new(DeleteUserReply {
            user_id: deleted.user_id.to_string(),
            event_id: deleted.event_id.to_string(),
        }))
    }
}
