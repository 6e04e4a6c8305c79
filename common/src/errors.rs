//! Error taxonomy.
//!
//! Component failures are converted into one of these variants before they
//! reach the session layer, and every variant maps to a stable error code and
//! HTTP status at the API boundary.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::response::ApiResponse;

pub type AppResult<T> = Result<T, AppError>;

/// Bad connection input. User-correctable and surfaced verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown database engine: {0}")]
    UnknownEngine(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Failure to load table metadata for a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaFetchError {
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("schema fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("schema fetch failed: {0}")]
    Engine(String),
}

impl SchemaFetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaFetchError::AuthFailed(_) => "auth_failed",
            SchemaFetchError::Unreachable(_) => "unreachable",
            SchemaFetchError::Timeout(_) => "timeout",
            SchemaFetchError::Engine(_) => "engine",
        }
    }
}

/// Failure to turn a question into SQL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("connect and load schema first")]
    NoSchemaLoaded,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Only produced while ranking; `resolve` degrades it to the default query.
    #[error("no query template matched the question with enough confidence")]
    AmbiguousIntent,
}

/// Failure while running a validated statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{message}")]
    EngineError { message: String },

    #[error("query timed out after {0:?}")]
    ExecutionTimeout(Duration),
}

/// Application error surfaced to API clients.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    SchemaFetch(#[from] SchemaFetchError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("unsafe statement rejected: {0}")]
    UnsafeStatement(String),

    #[error("{error}")]
    Execution {
        error: ExecutionError,
        /// Statement that failed, so the caller can edit and retry it.
        sql: Option<String>,
    },

    #[error("no connection configured for {0}")]
    ConnectionNotFound(String),

    #[error("request is not authenticated")]
    Unauthenticated,

    #[error("superseded by a newer request for this session")]
    Superseded,

    #[error("request cancelled because the session was closed")]
    Cancelled,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExecutionError> for AppError {
    fn from(error: ExecutionError) -> Self {
        AppError::Execution { error, sql: None }
    }
}

impl AppError {
    /// Attaches the failing statement to an execution error.
    pub fn with_sql(self, statement: &str) -> Self {
        match self {
            AppError::Execution { error, .. } => AppError::Execution {
                error,
                sql: Some(statement.to_string()),
            },
            other => other,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::SchemaFetch(_) => "SCHEMA_FETCH_ERROR",
            AppError::Resolution(ResolutionError::NoSchemaLoaded) => "NO_SCHEMA_LOADED",
            AppError::Resolution(ResolutionError::EmptyQuestion) => "VALIDATION_ERROR",
            AppError::Resolution(ResolutionError::AmbiguousIntent) => "AMBIGUOUS_INTENT",
            AppError::Resolution(ResolutionError::UnknownTable(_)) => "TABLE_NOT_FOUND",
            AppError::UnsafeStatement(_) => "UNSAFE_STATEMENT",
            AppError::Execution {
                error: ExecutionError::EngineError { .. },
                ..
            } => "ENGINE_ERROR",
            AppError::Execution {
                error: ExecutionError::ExecutionTimeout(_),
                ..
            } => "EXECUTION_TIMEOUT",
            AppError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Superseded => "SUPERSEDED",
            AppError::Cancelled => "CANCELLED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::UnsafeStatement(_)
            | AppError::BadRequest(_)
            | AppError::Resolution(ResolutionError::EmptyQuestion) => StatusCode::BAD_REQUEST,
            AppError::Resolution(ResolutionError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            AppError::Resolution(_) | AppError::Superseded | AppError::Cancelled => {
                StatusCode::CONFLICT
            }
            AppError::SchemaFetch(SchemaFetchError::Timeout(_))
            | AppError::Execution {
                error: ExecutionError::ExecutionTimeout(_),
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            AppError::SchemaFetch(_) | AppError::Execution { .. } => StatusCode::BAD_GATEWAY,
            AppError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::SchemaFetch(e) => Some(json!({ "kind": e.kind(), "retryable": true })),
            AppError::Execution { sql: Some(sql), .. } => Some(json!({ "sql": sql })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "请求处理失败");
        } else {
            tracing::warn!(code = self.code(), error = %self, "请求被拒绝");
        }

        let body = match self.details() {
            Some(details) => ApiResponse::err_with_details(self.code(), self.to_string(), details),
            None => ApiResponse::err(self.code(), self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_schema_message_guides_user() {
        let err = AppError::from(ResolutionError::NoSchemaLoaded);
        assert_eq!(err.code(), "NO_SCHEMA_LOADED");
        assert_eq!(err.to_string(), "connect and load schema first");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_execution_error_keeps_sql() {
        let err = AppError::from(ExecutionError::EngineError {
            message: "relation \"x\" does not exist".into(),
        })
        .with_sql("SELECT * FROM x");
        assert_eq!(err.code(), "ENGINE_ERROR");
        assert_eq!(err.details(), Some(json!({ "sql": "SELECT * FROM x" })));
    }

    #[test]
    fn test_timeouts_map_to_gateway_timeout() {
        assert_eq!(
            AppError::from(ExecutionError::ExecutionTimeout(Duration::from_secs(30))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(SchemaFetchError::Timeout(Duration::from_secs(15))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_unknown_table_is_not_found() {
        let err = AppError::from(ResolutionError::UnknownTable("invoices".into()));
        assert_eq!(err.code(), "TABLE_NOT_FOUND");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "unknown table: invoices");
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = AppError::from(ValidationError::MissingField("host"));
        assert_eq!(err.to_string(), "missing required field: host");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
