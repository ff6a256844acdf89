//! The transport layer: an axum HTTP gateway over `ObjectService`. A
//! gRPC binding would live alongside `http` behind the same trait.

pub mod http;
