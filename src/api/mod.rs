//! API module - REST and gRPC handlers

pub mod dto;
pub mod grpc;
pub mod rest;

pub use rest::create_rest_router;
