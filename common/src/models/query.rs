//! Query models.
//!
//! Contains the query endpoint payloads, the resolver output and the
//! tabular result returned by the executor.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// Request body for the query endpoint: a question or a raw statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "exactly_one_input"))]
pub struct QueryRequest {
    /// Natural-language question to resolve into SQL.
    #[validate(length(min = 1, max = 2000, message = "Question must be 1-2000 characters"))]
    pub natural_language_text: Option<String>,

    /// SQL statement to run as-is (still subject to read-only validation).
    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub raw_sql: Option<String>,
}

fn exactly_one_input(req: &QueryRequest) -> Result<(), ValidationError> {
    match (&req.natural_language_text, &req.raw_sql) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new("exactly_one_input")
            .with_message("provide exactly one of natural_language_text or raw_sql".into())),
    }
}

/// Request body for resolving a question without running it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 2000, message = "Question must be 1-2000 characters"))]
    pub natural_language_text: String,
}

/// Template family chosen by the resolver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Aggregate,
    Filter,
    Join,
    Select,
    /// Bounded `SELECT * ... LIMIT n` used when nothing matched confidently.
    Default,
}

/// SQL produced for a natural-language question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ResolvedQuery {
    pub natural_language_text: String,
    pub generated_sql: String,
    /// Version of the catalog snapshot the SQL was resolved against.
    pub source_schema_version: u64,
    pub intent: QueryIntent,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Tables referenced by the SQL, primary table first.
    pub tables: Vec<String>,
    /// Visible note when the resolver fell back to the default query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Result of a SQL query execution.
///
/// `rows[i][j]` is the value of `columns[j]` in the i-th row. SQL NULL is
/// `Value::Null`, never the string `"null"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct QueryResult {
    /// Column names in result-set order.
    pub columns: Vec<String>,

    /// Row data in server order.
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Number of rows returned.
    #[serde(default)]
    pub row_count: usize,

    /// Query execution time in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms: 0,
        }
    }

    /// The i-th row as a column→value record.
    pub fn record(&self, index: usize) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.rows.get(index).map(|row| {
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }
}

/// Response body of the query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub result: QueryResult,
}
