//! Inbound adapters that translate external requests into domain service
//! calls while keeping transport details at the edge.
//!
//! The gRPC surface lives under [`grpc`].

pub mod grpc;
