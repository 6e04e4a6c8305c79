//! In-process engine driver for unit and router tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common::models::{ColumnInfo, ConnectionConfig, QueryResult, TableInfo};
use serde_json::json;

use crate::driver::{DriverError, EngineDriver};

/// Two-table shop schema: `customers` and `orders` linked by `customer_id`.
pub fn shop_tables() -> Vec<TableInfo> {
    vec![
        TableInfo::new(
            "customers",
            vec![
                ColumnInfo::new("customer_id", "integer").primary(),
                ColumnInfo::new("name", "text"),
                ColumnInfo::new("email", "text"),
            ],
        ),
        TableInfo::new(
            "orders",
            vec![
                ColumnInfo::new("order_id", "integer").primary(),
                ColumnInfo::new("customer_id", "integer"),
                ColumnInfo::new("total_amount", "numeric"),
                ColumnInfo::new("status", "text"),
                ColumnInfo::new("order_date", "timestamp"),
            ],
        )
        .with_foreign_key("customer_id", "customers", "customer_id"),
    ]
}

pub struct FakeDriver {
    tables: Vec<TableInfo>,
    delay: Duration,
    failures: Mutex<VecDeque<DriverError>>,
    schema_calls: AtomicUsize,
    query_calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            tables: shop_tables(),
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            schema_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tables(mut self, tables: Vec<TableInfo>) -> Self {
        self.tables = tables;
        self
    }

    /// Makes the next call, of any kind, fail with `error`.
    pub fn fail_next(&self, error: DriverError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    async fn answer(&self) -> Result<(), DriverError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EngineDriver for FakeDriver {
    async fn fetch_schema(&self, _config: &ConnectionConfig) -> Result<Vec<TableInfo>, DriverError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.tables.clone())
    }

    async fn query(&self, _config: &ConnectionConfig, sql: &str) -> Result<QueryResult, DriverError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(sql.to_string());
        self.answer().await?;
        Ok(QueryResult::new(
            vec!["customer_id".into(), "name".into()],
            vec![
                vec![json!(1), json!("Ada")],
                vec![json!(2), serde_json::Value::Null],
            ],
        ))
    }

    async fn ping(&self, _config: &ConnectionConfig) -> Result<(), DriverError> {
        self.answer().await
    }

    async fn release(&self, connection_id: &str) {
        self.released.lock().unwrap().push(connection_id.to_string());
    }
}

/// A validated postgresql config with a password.
pub fn config() -> ConnectionConfig {
    common::models::ConnectionRequest {
        engine: "postgresql".into(),
        host: "db.internal".into(),
        port: String::new(),
        username: "analyst".into(),
        password: "s3cret".into(),
        database: "shop".into(),
    }
    .validate()
    .unwrap()
}
