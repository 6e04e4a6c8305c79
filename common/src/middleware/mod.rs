//! Middleware components shared by the services.

pub mod identity;
pub mod request_id;

// Re-export commonly used types
pub use identity::{identity_middleware, AuthenticatedUser, UserIdHeader};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
