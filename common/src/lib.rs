//! Shared building blocks for the query resolution workspace.
//!
//! - `config`: environment driven service configuration
//! - `errors`: the error taxonomy surfaced at the HTTP boundary
//! - `models`: connection, schema, query and session models
//! - `response`: the unified API response wrapper
//! - `middleware`: request id and identity middleware
//! - `utils`: id generation and read-only SQL validation

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;

pub use errors::{AppError, AppResult};
