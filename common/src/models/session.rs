//! Session view models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::connection::ConnectionItem;
use super::query::{QueryResult, ResolvedQuery};

/// Last known state of a user's session, as redisplayed by the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    /// True when the session holds no query yet.
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionItem>,
    /// Version of the loaded catalog, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u64>,
    /// Question/SQL of the last natural-language query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_query: Option<ResolvedQuery>,
    /// SQL of the last executed statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<QueryResult>,
}
