//! Query executor.
//!
//! Every statement is checked by [`SqlValidator`] before it reaches a driver;
//! a rejected statement is never dispatched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::AppConfig;
use common::errors::{AppError, AppResult, ExecutionError};
use common::models::{ConnectionConfig, QueryResult};
use common::utils::SqlValidator;

use crate::driver::{DriverError, EngineDriver};

pub struct QueryExecutor {
    driver: Arc<dyn EngineDriver>,
    timeout: Duration,
    max_retries: u32,
}

impl QueryExecutor {
    pub fn new(driver: Arc<dyn EngineDriver>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            driver,
            timeout,
            max_retries,
        }
    }

    pub fn from_config(driver: Arc<dyn EngineDriver>, config: &AppConfig) -> Self {
        Self::new(driver, config.query_timeout(), config.max_retries)
    }

    /// Validates and runs `sql` against the connection.
    ///
    /// # Errors
    /// - `UnsafeStatement` when validation fails, before any dispatch
    /// - `Execution` with the statement attached for engine errors and timeouts
    pub async fn execute(&self, config: &ConnectionConfig, sql: &str) -> AppResult<QueryResult> {
        SqlValidator::validate(sql)?;

        let started = Instant::now();
        let mut attempt = 0;
        let mut result = loop {
            match tokio::time::timeout(self.timeout, self.driver.query(config, sql)).await {
                Err(_) => {
                    tracing::warn!(id = %config.id, timeout = ?self.timeout, "查询超时");
                    return Err(
                        AppError::from(ExecutionError::ExecutionTimeout(self.timeout))
                            .with_sql(sql),
                    );
                }
                Ok(Ok(result)) => break result,
                Ok(Err(e)) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(id = %config.id, error = %e, attempt, "查询重试");
                }
                Ok(Err(e)) => {
                    return Err(AppError::from(ExecutionError::from(e)).with_sql(sql));
                }
            }
        };

        result.row_count = result.rows.len();
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            id = %config.id,
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "查询执行完成"
        );
        Ok(result)
    }

    /// Round-trips a trivial statement and reports the latency.
    pub async fn health_check(&self, config: &ConnectionConfig) -> Result<Duration, DriverError> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.driver.ping(config)).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DriverError::Connect(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, FakeDriver};
    use serde_json::Value;

    fn executor(driver: Arc<FakeDriver>) -> QueryExecutor {
        QueryExecutor::new(driver, Duration::from_secs(5), 1)
    }

    #[tokio::test]
    async fn test_destructive_statements_are_never_dispatched() {
        let driver = Arc::new(FakeDriver::new());
        let executor = executor(driver.clone());

        for sql in [
            "DROP TABLE orders",
            "insert into orders values (1)",
            "Update orders set status = 'x'",
            "DELETE FROM orders",
            "alter table orders add column x int",
        ] {
            let err = executor.execute(&config(), sql).await.unwrap_err();
            assert!(matches!(err, AppError::UnsafeStatement(_)), "{sql}");
        }
        assert_eq!(driver.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_result_keeps_engine_order_and_nulls() {
        let driver = Arc::new(FakeDriver::new());
        let result = executor(driver.clone())
            .execute(&config(), "SELECT customer_id, name FROM customers")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["customer_id", "name"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1][1], Value::Null);
        assert_eq!(driver.queries(), vec!["SELECT customer_id, name FROM customers"]);
    }

    #[tokio::test]
    async fn test_engine_error_carries_statement() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_next(DriverError::Query("relation \"x\" does not exist".into()));

        let err = executor(driver.clone())
            .execute(&config(), "SELECT * FROM x")
            .await
            .unwrap_err();
        match err {
            AppError::Execution {
                error: ExecutionError::EngineError { message },
                sql,
            } => {
                assert_eq!(message, "relation \"x\" does not exist");
                assert_eq!(sql.as_deref(), Some("SELECT * FROM x"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(driver.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_next(DriverError::Connect("reset".into()));
        executor(driver.clone())
            .execute(&config(), "SELECT 1")
            .await
            .unwrap();
        assert_eq!(driver.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(300)));
        let executor = QueryExecutor::new(driver.clone(), Duration::from_millis(20), 1);

        let err = executor.execute(&config(), "SELECT 1").await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_TIMEOUT");
        assert_eq!(err.to_string(), "query timed out after 20ms");
        assert_eq!(driver.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let driver = Arc::new(FakeDriver::new());
        let executor = executor(driver.clone());
        assert!(executor.health_check(&config()).await.is_ok());

        driver.fail_next(DriverError::Auth("denied".into()));
        assert_eq!(
            executor.health_check(&config()).await.unwrap_err(),
            DriverError::Auth("denied".into())
        );
    }
}
