//! Engine driver abstraction.
//!
//! The schema catalog, the executor and the connection test all reach the
//! target database through [`EngineDriver`], so they can be exercised with an
//! in-process fake.

use async_trait::async_trait;
use common::errors::{ExecutionError, SchemaFetchError};
use common::models::{ConnectionConfig, Engine, QueryResult, TableInfo};
use thiserror::Error;

/// Driver failure, classified for retry and error mapping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Network-level failure: refused, reset, pool acquire timeout.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Query(String),

    #[error("no driver available for engine {0}")]
    Unsupported(Engine),

    /// The pool was released while the call was waiting for a connection.
    #[error("connection pool closed")]
    Closed,
}

impl DriverError {
    /// Whether one more attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Connect(_))
    }
}

/// SQLSTATE classes and MySQL codes reporting rejected credentials.
const AUTH_CODES: [&str; 4] = ["28000", "28P01", "1045", "1044"];

impl From<sqlx::Error> for DriverError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => DriverError::Connect(e.to_string()),
            sqlx::Error::PoolClosed => DriverError::Closed,
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.code() {
                    Some(code) if AUTH_CODES.iter().any(|c| *c == code) => DriverError::Auth(message),
                    _ => DriverError::Query(message),
                }
            }
            other => DriverError::Query(other.to_string()),
        }
    }
}

impl From<DriverError> for SchemaFetchError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Auth(m) => SchemaFetchError::AuthFailed(m),
            DriverError::Connect(m) => SchemaFetchError::Unreachable(m),
            other => SchemaFetchError::Engine(other.to_string()),
        }
    }
}

impl From<DriverError> for ExecutionError {
    fn from(e: DriverError) -> Self {
        ExecutionError::EngineError {
            message: e.to_string(),
        }
    }
}

#[async_trait]
pub trait EngineDriver: Send + Sync {
    /// Reads table, column and key metadata of the connected database.
    async fn fetch_schema(&self, config: &ConnectionConfig) -> Result<Vec<TableInfo>, DriverError>;

    /// Runs an already validated statement. Column and row order are the
    /// engine's.
    async fn query(&self, config: &ConnectionConfig, sql: &str) -> Result<QueryResult, DriverError>;

    /// Round-trips a trivial statement.
    async fn ping(&self, config: &ConnectionConfig) -> Result<(), DriverError>;

    /// Drops any pooled connections held for `connection_id`.
    async fn release(&self, connection_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connect_errors_are_transient() {
        assert!(DriverError::Connect("reset".into()).is_transient());
        assert!(!DriverError::Auth("denied".into()).is_transient());
        assert!(!DriverError::Query("syntax error".into()).is_transient());
        assert!(!DriverError::Unsupported(Engine::Oracle).is_transient());
    }

    #[test]
    fn test_sqlx_error_classification() {
        assert!(DriverError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert_eq!(
            DriverError::from(sqlx::Error::RowNotFound),
            DriverError::Query(sqlx::Error::RowNotFound.to_string())
        );

        // a released pool must not be rebuilt by a retry
        let closed = DriverError::from(sqlx::Error::PoolClosed);
        assert_eq!(closed, DriverError::Closed);
        assert!(!closed.is_transient());
    }

    #[test]
    fn test_mapping_into_taxonomy() {
        assert_eq!(
            SchemaFetchError::from(DriverError::Auth("bad password".into())),
            SchemaFetchError::AuthFailed("bad password".into())
        );
        assert_eq!(
            SchemaFetchError::from(DriverError::Connect("refused".into())).kind(),
            "unreachable"
        );
        assert_eq!(
            SchemaFetchError::from(DriverError::Unsupported(Engine::Mssql)),
            SchemaFetchError::Engine("no driver available for engine mssql".into())
        );
    }
}
