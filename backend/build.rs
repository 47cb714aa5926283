//! Generates the `accounts.v1.Accounts` gRPC service stubs.
//!
//! Messages are declared by hand with `prost` derives in
//! `src/inbound/grpc/messages.rs`, so the manual builder only needs the
//! method table and no `.proto` compilation.

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::Method {
    tonic_build::manual::Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::inbound::grpc::messages::{input}"))
        .output_type(format!("crate::inbound::grpc::messages::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = tonic_build::manual::Service::builder()
        .name("Accounts")
        .package("accounts.v1")
        .method(method(
            "register_user",
            "RegisterUser",
            "RegisterUserRequest",
            "UserReply",
        ))
        .method(method("get_user", "GetUser", "GetUserRequest", "UserReply"))
        .method(method(
            "delete_user",
            "DeleteUser",
            "DeleteUserRequest",
            "DeleteUserReply",
        ))
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
