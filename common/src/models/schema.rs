//! Schema catalog models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::connection::Engine;

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-reported data type (e.g. `integer`, `varchar(255)`).
    pub data_type: String,
    pub nullable: bool,
    pub is_primary: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.nullable = false;
        self
    }

    /// Whether the type can be summed or averaged.
    pub fn is_numeric(&self) -> bool {
        const NUMERIC: [&str; 11] = [
            "int", "decimal", "numeric", "float", "double", "real", "money", "number", "serial",
            "bigint", "smallint",
        ];
        let ty = self.data_type.to_ascii_lowercase();
        NUMERIC.iter().any(|n| ty.contains(n))
    }

    /// Whether the type holds a point in time.
    pub fn is_temporal(&self) -> bool {
        let ty = self.data_type.to_ascii_lowercase();
        ["date", "time"].iter().any(|n| ty.contains(n))
    }

    /// Whether the column looks like a surrogate or foreign key.
    pub fn is_key_like(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        self.is_primary || name == "id" || name.ends_with("_id")
    }
}

/// Foreign key from a column of the owning table to another table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// Estimated row count when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn new(name: &str, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            row_count: None,
            foreign_keys: vec![],
        }
    }

    pub fn with_foreign_key(mut self, column: &str, table: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: table.to_string(),
            references_column: references.to_string(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Immutable snapshot of the tables known for a connection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaCatalog {
    pub connection_id: String,
    pub engine: Engine,
    /// Monotonic snapshot version; each fetch produces a new one.
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    pub tables: Vec<TableInfo>,
}

impl SchemaCatalog {
    pub fn new(connection_id: &str, engine: Engine, version: u64, tables: Vec<TableInfo>) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            engine,
            version,
            fetched_at: Utc::now(),
            tables,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Whether `table.column` exists in this snapshot.
    pub fn contains(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.column(column).is_some())
    }

    /// Foreign keys linking `a` and `b` in either direction, as
    /// `(from_table, foreign_key)` pairs.
    pub fn links_between<'a>(&'a self, a: &str, b: &str) -> Vec<(&'a str, &'a ForeignKey)> {
        self.tables
            .iter()
            .filter(|t| t.name == a || t.name == b)
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| (t.name.as_str(), fk)))
            .filter(|(from, fk)| {
                (*from == a && fk.references_table == b) || (*from == b && fk.references_table == a)
            })
            .collect()
    }
}
