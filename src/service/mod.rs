//! Service layer module

pub mod types;
pub mod xray_service;

pub use types::*;
pub use xray_service::XrayService;
