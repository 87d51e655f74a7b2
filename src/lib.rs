//! Chest X-ray Classification Service Library

pub mod api;
pub mod config;
pub mod engine;
pub mod service;
pub mod utils;

pub use config::Config;
