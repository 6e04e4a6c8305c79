//! Shared data models.

pub mod connection;
pub mod query;
pub mod schema;
pub mod session;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionItem, ConnectionRequest, ConnectionTestResult, Engine,
};
pub use query::{
    GenerateRequest, QueryIntent, QueryRequest, QueryResponse, QueryResult, ResolvedQuery,
};
pub use schema::{ColumnInfo, ForeignKey, SchemaCatalog, TableInfo};
pub use session::SessionSnapshot;
