//! Database connection pool manager.
//!
//! Keeps one sqlx pool per accepted connection and implements
//! [`EngineDriver`] on top of it for MySQL, PostgreSQL and SQLite. MSSQL and
//! Oracle are recognised engines without a driver.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::config::AppConfig;
use common::models::{ColumnInfo, ConnectionConfig, Engine, ForeignKey, QueryResult, TableInfo};
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, ColumnIndex, Database, Decode, Executor, MySqlPool, PgPool, Row, SqlitePool, Type, TypeInfo};
use tokio::sync::RwLock;

use crate::driver::{DriverError, EngineDriver};

/// Connection pool wrapper for the engines with a driver.
#[derive(Clone)]
pub enum DatabasePool {
    MySQL(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DatabasePool {
    async fn close(&self) {
        match self {
            DatabasePool::MySQL(p) => p.close().await,
            DatabasePool::Postgres(p) => p.close().await,
            DatabasePool::SQLite(p) => p.close().await,
        }
    }
}

/// Manages database connection pools.
///
/// Pools are created lazily on first use and indexed by connection id; a new
/// connection submission gets a new id and therefore a new pool.
pub struct PoolManager {
    connect_timeout: Duration,
    max_connections: u32,
    pools: RwLock<HashMap<String, DatabasePool>>,
}

impl PoolManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_connections: config.max_connections,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached pool for `config`, creating it on first use.
    async fn pool(&self, config: &ConnectionConfig) -> Result<DatabasePool, DriverError> {
        if let Some(pool) = self.pools.read().await.get(&config.id) {
            return Ok(pool.clone());
        }

        let pool = self.create_pool(config).await?;
        let mut pools = self.pools.write().await;
        // another request may have raced us here
        let pool = pools.entry(config.id.clone()).or_insert(pool).clone();
        tracing::info!(id = %config.id, engine = %config.engine, "连接池已创建");
        Ok(pool)
    }

    async fn create_pool(&self, config: &ConnectionConfig) -> Result<DatabasePool, DriverError> {
        match config.engine {
            Engine::Mysql => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .username(&config.username)
                    .database(&config.database);
                if let Some(port) = config.port {
                    options = options.port(port);
                }
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                let pool = MySqlPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DatabasePool::MySQL(pool))
            }
            Engine::Postgresql => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .username(&config.username)
                    .database(&config.database);
                if let Some(port) = config.port {
                    options = options.port(port);
                }
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                let pool = PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DatabasePool::Postgres(pool))
            }
            Engine::Sqlite => {
                // an in-memory database lives as long as its single connection
                let (options, pool_options) = if config.database.trim().is_empty() {
                    (
                        SqliteConnectOptions::new().in_memory(true),
                        SqlitePoolOptions::new()
                            .min_connections(1)
                            .idle_timeout(None)
                            .max_lifetime(None),
                    )
                } else {
                    (
                        SqliteConnectOptions::new()
                            .filename(config.database.trim())
                            .read_only(true)
                            .busy_timeout(self.connect_timeout),
                        SqlitePoolOptions::new(),
                    )
                };
                let pool = pool_options
                    .max_connections(1)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DatabasePool::SQLite(pool))
            }
            engine @ (Engine::Mssql | Engine::Oracle) => Err(DriverError::Unsupported(engine)),
        }
    }

    /// Number of live pools.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// Failures while opening a pool are unreachable-class unless the server
/// rejected the credentials.
fn connect_error(e: sqlx::Error) -> DriverError {
    match DriverError::from(e) {
        DriverError::Query(message) => DriverError::Connect(message),
        other => other,
    }
}

#[async_trait]
impl EngineDriver for PoolManager {
    async fn fetch_schema(&self, config: &ConnectionConfig) -> Result<Vec<TableInfo>, DriverError> {
        match self.pool(config).await? {
            DatabasePool::MySQL(p) => mysql_schema(&p).await,
            DatabasePool::Postgres(p) => postgres_schema(&p).await,
            DatabasePool::SQLite(p) => sqlite_schema(&p).await,
        }
    }

    async fn query(&self, config: &ConnectionConfig, sql: &str) -> Result<QueryResult, DriverError> {
        let (columns, rows) = match self.pool(config).await? {
            DatabasePool::MySQL(p) => {
                let rows = sqlx::query(sql).fetch_all(&p).await?;
                let columns = column_names(&p, sql, &rows).await?;
                (columns, decode_rows(&rows, mysql_cell))
            }
            DatabasePool::Postgres(p) => {
                let rows = sqlx::query(sql).fetch_all(&p).await?;
                let columns = column_names(&p, sql, &rows).await?;
                (columns, decode_rows(&rows, postgres_cell))
            }
            DatabasePool::SQLite(p) => {
                let rows = sqlx::query(sql).fetch_all(&p).await?;
                let columns = column_names(&p, sql, &rows).await?;
                (columns, decode_rows(&rows, sqlite_cell))
            }
        };
        Ok(QueryResult::new(columns, rows))
    }

    async fn ping(&self, config: &ConnectionConfig) -> Result<(), DriverError> {
        match self.pool(config).await? {
            DatabasePool::MySQL(p) => sqlx::query("SELECT 1").execute(&p).await.map(drop)?,
            DatabasePool::Postgres(p) => sqlx::query("SELECT 1").execute(&p).await.map(drop)?,
            DatabasePool::SQLite(p) => sqlx::query("SELECT 1").execute(&p).await.map(drop)?,
        }
        Ok(())
    }

    async fn release(&self, connection_id: &str) {
        let pool = self.pools.write().await.remove(connection_id);
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(id = %connection_id, "连接池已关闭");
        }
    }
}

// ============== Result decoding ==============

/// Column names in result-set order. An empty result carries no row to read
/// them from, so the statement is described instead.
async fn column_names<'p, DB, R>(
    pool: &'p sqlx::Pool<DB>,
    sql: &'p str,
    rows: &[R],
) -> Result<Vec<String>, DriverError>
where
    DB: Database,
    R: Row<Database = DB>,
    &'p sqlx::Pool<DB>: Executor<'p, Database = DB>,
{
    if let Some(first) = rows.first() {
        return Ok(first.columns().iter().map(|c| c.name().to_string()).collect());
    }
    let described = pool.describe(sql).await?;
    Ok(described.columns().iter().map(|c| c.name().to_string()).collect())
}

fn decode_rows<R: Row>(rows: &[R], cell: fn(&R, usize) -> Value) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| (0..row.len()).map(|idx| cell(row, idx)).collect())
        .collect()
}

/// Decodes one cell as `T`, mapping SQL NULL to `Value::Null`.
fn decode<'r, R, T>(row: &'r R, idx: usize, to_json: impl FnOnce(T) -> Value) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(to_json(v)),
        Ok(None) => Some(Value::Null),
        Err(_) => None,
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn decimal(v: Decimal) -> Value {
    let text = v.to_string();
    text.parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

fn bytes(v: Vec<u8>) -> Value {
    Value::String(String::from_utf8_lossy(&v).into_owned())
}

fn timestamp(v: NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Falls back through common representations for types without a direct mapping.
fn fallback<R>(row: &R, idx: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
{
    decode(row, idx, Value::String)
        .or_else(|| decode(row, idx, |v: i64| Value::from(v)))
        .or_else(|| decode(row, idx, float))
        .unwrap_or_else(|| {
            tracing::debug!(
                column = row.column(idx).name(),
                ty = row.column(idx).type_info().name(),
                "无法解码的列类型"
            );
            Value::Null
        })
}

fn postgres_cell(row: &PgRow, idx: usize) -> Value {
    let ty = row.column(idx).type_info().name().to_ascii_uppercase();
    let value = match ty.as_str() {
        "BOOL" => decode(row, idx, Value::Bool),
        "INT2" => decode(row, idx, |v: i16| Value::from(v)),
        "INT4" => decode(row, idx, |v: i32| Value::from(v)),
        "INT8" => decode(row, idx, |v: i64| Value::from(v)),
        "FLOAT4" => decode(row, idx, |v: f32| float(f64::from(v))),
        "FLOAT8" => decode(row, idx, float),
        "NUMERIC" => decode(row, idx, decimal),
        "DATE" => decode(row, idx, |v: NaiveDate| Value::String(v.to_string())),
        "TIME" => decode(row, idx, |v: NaiveTime| Value::String(v.to_string())),
        "TIMESTAMP" => decode(row, idx, timestamp),
        "TIMESTAMPTZ" => decode(row, idx, |v: DateTime<Utc>| Value::String(v.to_rfc3339())),
        "UUID" => decode(row, idx, |v: Uuid| Value::String(v.to_string())),
        "JSON" | "JSONB" => decode(row, idx, |v: Value| v),
        "BYTEA" => decode(row, idx, bytes),
        _ => None,
    };
    value.unwrap_or_else(|| fallback(row, idx))
}

fn mysql_cell(row: &MySqlRow, idx: usize) -> Value {
    let ty = row.column(idx).type_info().name().to_ascii_uppercase();
    let value = match ty.as_str() {
        "NULL" => Some(Value::Null),
        "BOOLEAN" => decode(row, idx, Value::Bool),
        t if t.ends_with("INT UNSIGNED") => decode(row, idx, |v: u64| Value::from(v)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            decode(row, idx, |v: i64| Value::from(v))
        }
        "FLOAT" => decode(row, idx, |v: f32| float(f64::from(v))),
        "DOUBLE" => decode(row, idx, float),
        "DECIMAL" => decode(row, idx, decimal),
        "DATE" => decode(row, idx, |v: NaiveDate| Value::String(v.to_string())),
        "TIME" => decode(row, idx, |v: NaiveTime| Value::String(v.to_string())),
        "DATETIME" => decode(row, idx, timestamp),
        "TIMESTAMP" => decode(row, idx, |v: DateTime<Utc>| Value::String(v.to_rfc3339())),
        "JSON" => decode(row, idx, |v: Value| v),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            decode(row, idx, bytes)
        }
        _ => None,
    };
    value.unwrap_or_else(|| fallback(row, idx))
}

fn sqlite_cell(row: &SqliteRow, idx: usize) -> Value {
    // SQLite reports the storage class of the value, or the declared type.
    let ty = row.column(idx).type_info().name().to_ascii_uppercase();
    let value = match ty.as_str() {
        "NULL" => Some(Value::Null),
        "BOOLEAN" => decode(row, idx, Value::Bool),
        "INTEGER" => decode(row, idx, |v: i64| Value::from(v)),
        "REAL" => decode(row, idx, float),
        "BLOB" => decode(row, idx, bytes),
        "NUMERIC" => decode(row, idx, |v: i64| Value::from(v)).or_else(|| decode(row, idx, float)),
        _ => None,
    };
    value.unwrap_or_else(|| fallback(row, idx))
}

// ============== Schema introspection ==============

/// Builds ordered tables from `(table, column)` rows sorted by table.
fn group_columns(rows: Vec<(String, ColumnInfo)>) -> Vec<TableInfo> {
    let mut tables: Vec<TableInfo> = Vec::new();
    for (table, column) in rows {
        match tables.last_mut() {
            Some(last) if last.name == table => last.columns.push(column),
            _ => tables.push(TableInfo::new(&table, vec![column])),
        }
    }
    tables
}

fn attach_keys(
    tables: &mut [TableInfo],
    primary: &[(String, String)],
    foreign: Vec<(String, ForeignKey)>,
) {
    for (table, column) in primary {
        if let Some(c) = tables
            .iter_mut()
            .find(|t| &t.name == table)
            .and_then(|t| t.columns.iter_mut().find(|c| &c.name == column))
        {
            c.is_primary = true;
        }
    }
    for (table, fk) in foreign {
        if let Some(t) = tables.iter_mut().find(|t| t.name == table) {
            t.foreign_keys.push(fk);
        }
    }
}

async fn postgres_schema(pool: &PgPool) -> Result<Vec<TableInfo>, DriverError> {
    let rows = sqlx::query(
        "SELECT table_name::text AS table_name, column_name::text AS column_name,
                data_type::text AS data_type, is_nullable::text AS is_nullable
         FROM information_schema.columns
         WHERE table_schema = current_schema()
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut column = ColumnInfo::new(
            &row.try_get::<String, _>("column_name")?,
            &row.try_get::<String, _>("data_type")?,
        );
        column.nullable = row.try_get::<String, _>("is_nullable")? == "YES";
        columns.push((row.try_get::<String, _>("table_name")?, column));
    }
    let mut tables = group_columns(columns);

    let primary: Vec<(String, String)> = sqlx::query_as(
        "SELECT kcu.table_name::text, kcu.column_name::text
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage kcu
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
         WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = current_schema()",
    )
    .fetch_all(pool)
    .await?;

    let foreign: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT kcu.table_name::text, kcu.column_name::text,
                ccu.table_name::text, ccu.column_name::text
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage kcu
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
         JOIN information_schema.constraint_column_usage ccu
           ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
         WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema()
         ORDER BY kcu.table_name, kcu.column_name",
    )
    .fetch_all(pool)
    .await?;

    attach_keys(
        &mut tables,
        &primary,
        foreign
            .into_iter()
            .map(|(table, column, references_table, references_column)| {
                (
                    table,
                    ForeignKey {
                        column,
                        references_table,
                        references_column,
                    },
                )
            })
            .collect(),
    );

    let estimates: Vec<(String, i64)> = sqlx::query_as(
        "SELECT c.relname::text, c.reltuples::bigint
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE n.nspname = current_schema() AND c.relkind = 'r'",
    )
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    for (name, estimate) in estimates {
        if let Some(t) = tables.iter_mut().find(|t| t.name == name) {
            t.row_count = u64::try_from(estimate).ok();
        }
    }

    Ok(tables)
}

async fn mysql_schema(pool: &MySqlPool) -> Result<Vec<TableInfo>, DriverError> {
    let rows = sqlx::query(
        "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(COLUMN_TYPE AS CHAR) AS data_type, CAST(IS_NULLABLE AS CHAR) AS is_nullable,
                CAST(COLUMN_KEY AS CHAR) AS column_key
         FROM information_schema.COLUMNS
         WHERE TABLE_SCHEMA = DATABASE()
         ORDER BY TABLE_NAME, ORDINAL_POSITION",
    )
    .fetch_all(pool)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut column = ColumnInfo::new(
            &row.try_get::<String, _>("column_name")?,
            &row.try_get::<String, _>("data_type")?,
        );
        column.nullable = row.try_get::<String, _>("is_nullable")? == "YES";
        column.is_primary = row.try_get::<String, _>("column_key")? == "PRI";
        columns.push((row.try_get::<String, _>("table_name")?, column));
    }
    let mut tables = group_columns(columns);

    let foreign: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR),
                CAST(REFERENCED_TABLE_NAME AS CHAR), CAST(REFERENCED_COLUMN_NAME AS CHAR)
         FROM information_schema.KEY_COLUMN_USAGE
         WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL
         ORDER BY TABLE_NAME, COLUMN_NAME",
    )
    .fetch_all(pool)
    .await?;
    attach_keys(
        &mut tables,
        &[],
        foreign
            .into_iter()
            .map(|(table, column, references_table, references_column)| {
                (
                    table,
                    ForeignKey {
                        column,
                        references_table,
                        references_column,
                    },
                )
            })
            .collect(),
    );

    let estimates: Vec<(String, Option<u64>)> = sqlx::query_as(
        "SELECT CAST(TABLE_NAME AS CHAR), TABLE_ROWS
         FROM information_schema.TABLES
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'",
    )
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    for (name, estimate) in estimates {
        if let Some(t) = tables.iter_mut().find(|t| t.name == name) {
            t.row_count = estimate;
        }
    }

    Ok(tables)
}

async fn sqlite_schema(pool: &SqlitePool) -> Result<Vec<TableInfo>, DriverError> {
    let names: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(names.len());
    for (name,) in names {
        let rows = sqlx::query(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut column = ColumnInfo::new(
                &row.try_get::<String, _>("name")?,
                &row.try_get::<String, _>("type")?,
            );
            column.nullable = row.try_get::<i64, _>("notnull")? == 0;
            column.is_primary = row.try_get::<i64, _>("pk")? > 0;
            columns.push(column);
        }

        let foreign: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?;

        let mut table = TableInfo::new(&name, columns);
        table.foreign_keys = foreign
            .into_iter()
            .map(|(column, references_table, to)| ForeignKey {
                column,
                // an omitted target column means the referenced primary key
                references_column: to.unwrap_or_default(),
                references_table,
            })
            .collect();
        tables.push(table);
    }

    // resolve implicit primary-key targets now that every table is known
    let primary_keys: HashMap<String, String> = tables
        .iter()
        .filter_map(|t| {
            t.columns
                .iter()
                .find(|c| c.is_primary)
                .map(|c| (t.name.clone(), c.name.clone()))
        })
        .collect();
    for table in &mut tables {
        for fk in &mut table.foreign_keys {
            if fk.references_column.is_empty() {
                fk.references_column = primary_keys
                    .get(&fk.references_table)
                    .cloned()
                    .unwrap_or_default();
            }
        }
    }

    Ok(tables)
}
