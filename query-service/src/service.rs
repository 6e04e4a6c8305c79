//! Query resolution service.
//!
//! Wires the registry, schema catalog, resolver, executor and session store
//! into the operations exposed over HTTP. Failures never clear the session's
//! last good state.

use std::future::Future;
use std::sync::Arc;

use common::config::AppConfig;
use common::errors::{AppError, AppResult, ResolutionError};
use common::models::{
    ConnectionConfig, ConnectionItem, ConnectionRequest, ConnectionTestResult, QueryResponse,
    ResolvedQuery, SchemaCatalog, SessionSnapshot,
};
use text2sql::{preview_sql, QueryResolver, ResolveContext, ResolverConfig, SchemaAwareResolver};

use crate::catalog::SchemaCatalogCache;
use crate::driver::EngineDriver;
use crate::executor::QueryExecutor;
use crate::registry::{ConnectionRegistry, ConnectionStore};
use crate::session::{SessionStore, Ticket};

/// Upper bound for a table preview.
const MAX_PREVIEW_ROWS: u32 = 1_000;

pub struct QueryResolutionService {
    driver: Arc<dyn EngineDriver>,
    registry: ConnectionRegistry,
    catalog: SchemaCatalogCache,
    resolver: Arc<dyn QueryResolver>,
    executor: QueryExecutor,
    sessions: SessionStore,
    preview_limit: u32,
}

impl QueryResolutionService {
    pub fn new(
        config: &AppConfig,
        driver: Arc<dyn EngineDriver>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        let resolver = SchemaAwareResolver::new(ResolverConfig {
            default_limit: config.default_row_limit,
            min_confidence: config.min_confidence,
        });
        Self {
            registry: ConnectionRegistry::new(store),
            catalog: SchemaCatalogCache::from_config(driver.clone(), config),
            resolver: Arc::new(resolver),
            executor: QueryExecutor::from_config(driver.clone(), config),
            sessions: SessionStore::new(),
            preview_limit: config.default_row_limit,
            driver,
        }
    }

    /// Validates and stores the user's connection, replacing any previous
    /// one. No network connection is opened.
    pub async fn connect(
        &self,
        user_id: &str,
        request: ConnectionRequest,
    ) -> AppResult<ConnectionItem> {
        let previous = self.registry.retrieve(user_id).await.ok();
        let config = self.registry.register(user_id, request).await?;

        let item = ConnectionItem::from(&config);
        self.sessions.set_connection(user_id, item.clone()).await;
        if let Some(previous) = previous {
            self.release(&previous.id).await;
        }
        Ok(item)
    }

    pub async fn connection(&self, user_id: &str) -> AppResult<ConnectionItem> {
        let config = self.registry.retrieve(user_id).await?;
        Ok(ConnectionItem::from(&config))
    }

    /// Forgets the connection and clears the session. In-flight work is
    /// cancelled.
    pub async fn disconnect(&self, user_id: &str) -> AppResult<()> {
        let config = self.registry.retrieve(user_id).await?;
        self.sessions.reset(user_id).await;
        self.release(&config.id).await;
        self.registry.remove(user_id).await?;
        tracing::info!(user_id = %user_id, id = %config.id, "连接已断开");
        Ok(())
    }

    pub async fn test_connection(&self, user_id: &str) -> AppResult<ConnectionTestResult> {
        let config = self.registry.retrieve(user_id).await?;
        let result = match self.executor.health_check(&config).await {
            Ok(latency) => ConnectionTestResult {
                id: config.id,
                success: true,
                latency_ms: Some(latency.as_millis() as u64),
                error: None,
            },
            Err(e) => {
                tracing::warn!(id = %config.id, error = %e, "连接测试失败");
                ConnectionTestResult {
                    id: config.id,
                    success: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(result)
    }

    pub async fn schema(&self, user_id: &str, refresh: bool) -> AppResult<Arc<SchemaCatalog>> {
        let config = self.registry.retrieve(user_id).await?;
        let catalog = self.catalog.fetch(&config, refresh).await?;
        self.sessions.set_schema_version(user_id, catalog.version).await;
        Ok(catalog)
    }

    /// Resolves a question against the connection's catalog and runs the
    /// generated statement.
    pub async fn ask(&self, user_id: &str, question: &str) -> AppResult<QueryResponse> {
        if question.trim().is_empty() {
            return Err(ResolutionError::EmptyQuestion.into());
        }
        let ticket = self.sessions.begin(user_id).await;
        let config = self.question_config(user_id).await?;

        let (resolved, result) = guarded(&ticket, async {
            let resolved = self.resolve(user_id, &config, question).await?;
            let result = self.executor.execute(&config, &resolved.generated_sql).await?;
            Ok::<_, AppError>((resolved, result))
        })
        .await?;

        let response = QueryResponse {
            generated_sql: Some(resolved.generated_sql.clone()),
            note: resolved.note.clone(),
            result: result.clone(),
        };
        let sql = resolved.generated_sql.clone();
        self.sessions
            .put(user_id, &ticket, Some(resolved), &sql, result)
            .await?;
        Ok(response)
    }

    /// Resolves a question without running it, so the statement can be
    /// reviewed or edited first. The session is left untouched.
    pub async fn generate(&self, user_id: &str, question: &str) -> AppResult<ResolvedQuery> {
        if question.trim().is_empty() {
            return Err(ResolutionError::EmptyQuestion.into());
        }
        let config = self.question_config(user_id).await?;
        self.resolve(user_id, &config, question).await
    }

    /// A question without a connection has no schema to resolve against.
    async fn question_config(&self, user_id: &str) -> AppResult<ConnectionConfig> {
        self.registry.retrieve(user_id).await.map_err(|e| match e {
            AppError::ConnectionNotFound(_) => ResolutionError::NoSchemaLoaded.into(),
            other => other,
        })
    }

    async fn resolve(
        &self,
        user_id: &str,
        config: &ConnectionConfig,
        question: &str,
    ) -> AppResult<ResolvedQuery> {
        let catalog = self.catalog.fetch(config, false).await?;
        let recent = self.sessions.recent_tables(user_id).await;
        let context = ResolveContext {
            recent_tables: &recent,
        };
        Ok(self.resolver.resolve(question, &catalog, context).await?)
    }

    /// Runs a user-supplied statement after read-only validation.
    pub async fn run_sql(&self, user_id: &str, sql: &str) -> AppResult<QueryResponse> {
        let ticket = self.sessions.begin(user_id).await;
        let config = self.registry.retrieve(user_id).await?;

        let result = guarded(&ticket, self.executor.execute(&config, sql)).await?;
        self.sessions
            .put(user_id, &ticket, None, sql, result.clone())
            .await?;
        Ok(QueryResponse {
            generated_sql: None,
            note: None,
            result,
        })
    }

    /// Runs a bounded `SELECT *` over one table of the connection's catalog.
    pub async fn preview(
        &self,
        user_id: &str,
        table: &str,
        limit: Option<u32>,
    ) -> AppResult<QueryResponse> {
        let ticket = self.sessions.begin(user_id).await;
        let config = self.registry.retrieve(user_id).await?;
        let limit = limit.unwrap_or(self.preview_limit).clamp(1, MAX_PREVIEW_ROWS);

        let (sql, result) = guarded(&ticket, async {
            let catalog = self.catalog.fetch(&config, false).await?;
            let sql = preview_sql(&catalog, table, limit)?;
            let result = self.executor.execute(&config, &sql).await?;
            Ok::<_, AppError>((sql, result))
        })
        .await?;

        self.sessions
            .put(user_id, &ticket, None, &sql, result.clone())
            .await?;
        Ok(QueryResponse {
            generated_sql: Some(sql),
            note: None,
            result,
        })
    }

    /// Last state of the user's session.
    pub async fn last(&self, user_id: &str) -> SessionSnapshot {
        let mut snapshot = self.sessions.get(user_id).await;
        if snapshot.connection.is_none() {
            snapshot.connection = self
                .registry
                .retrieve(user_id)
                .await
                .ok()
                .map(|config| ConnectionItem::from(&config));
        }
        snapshot
    }

    /// Ends the session. The stored connection config is kept; its password,
    /// pooled connections and cached catalog are dropped.
    pub async fn logout(&self, user_id: &str) -> AppResult<()> {
        self.sessions.end(user_id).await;
        if let Ok(config) = self.registry.retrieve(user_id).await {
            self.release(&config.id).await;
        }
        self.registry.forget_secret(user_id).await;
        tracing::info!(user_id = %user_id, "用户已登出");
        Ok(())
    }

    async fn release(&self, connection_id: &str) {
        self.catalog.invalidate(connection_id).await;
        self.driver.release(connection_id).await;
    }
}

/// Runs `work` unless the session is torn down first.
async fn guarded<T>(ticket: &Ticket, work: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    tokio::select! {
        _ = ticket.token().cancelled() => Err(AppError::Cancelled),
        outcome = work => outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::DriverError;
    use crate::registry::InMemoryStore;
    use crate::testing::FakeDriver;

    fn request() -> ConnectionRequest {
        ConnectionRequest {
            engine: "postgresql".into(),
            host: "db.internal".into(),
            port: String::new(),
            username: "analyst".into(),
            password: "s3cret".into(),
            database: "shop".into(),
        }
    }

    fn service(driver: Arc<FakeDriver>) -> QueryResolutionService {
        QueryResolutionService::new(&AppConfig::default(), driver, Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_ask_without_connection_needs_schema() {
        let service = service(Arc::new(FakeDriver::new()));
        let err = service.ask("u1", "how many orders").await.unwrap_err();
        assert_eq!(err.code(), "NO_SCHEMA_LOADED");
        assert_eq!(err.to_string(), "connect and load schema first");
    }

    #[tokio::test]
    async fn test_connect_ask_and_redisplay() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        let item = service.connect("u1", request()).await.unwrap();
        assert_eq!(item.port, Some(5432));

        let response = service.ask("u1", "how many orders").await.unwrap();
        let sql = response.generated_sql.unwrap();
        assert!(sql.starts_with("SELECT COUNT(*)"), "{sql}");
        assert!(sql.contains("FROM orders"), "{sql}");
        assert_eq!(driver.queries(), vec![sql.clone()]);

        let last = service.last("u1").await;
        assert!(!last.empty);
        assert_eq!(last.last_sql, Some(sql));
        assert_eq!(last.schema_version, Some(1));
        assert_eq!(last.connection.unwrap().id, item.id);
    }

    #[tokio::test]
    async fn test_failures_keep_last_result() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        service.connect("u1", request()).await.unwrap();
        service.run_sql("u1", "SELECT 1").await.unwrap();

        let err = service.run_sql("u1", "DROP TABLE orders").await.unwrap_err();
        assert!(matches!(err, AppError::UnsafeStatement(_)));
        driver.fail_next(DriverError::Query("syntax error".into()));
        assert!(service.run_sql("u1", "SELECT * FROM").await.is_err());

        assert_eq!(driver.query_calls(), 2);
        assert_eq!(service.last("u1").await.last_sql.as_deref(), Some("SELECT 1"));
    }

    #[tokio::test]
    async fn test_newer_request_supersedes_older() {
        let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(100)));
        let service = service(driver);
        service.connect("u1", request()).await.unwrap();

        let (first, second) = tokio::join!(service.run_sql("u1", "SELECT 1"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            service.run_sql("u1", "SELECT 2").await
        });

        assert!(matches!(first, Err(AppError::Superseded)));
        assert!(second.is_ok());
        assert_eq!(service.last("u1").await.last_sql.as_deref(), Some("SELECT 2"));
    }

    #[tokio::test]
    async fn test_logout_cancels_inflight_work() {
        let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(200)));
        let service = service(driver.clone());
        let item = service.connect("u1", request()).await.unwrap();

        let (outcome, _) = tokio::join!(service.run_sql("u1", "SELECT 1"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            service.logout("u1").await
        });
        assert!(matches!(outcome, Err(AppError::Cancelled)));

        // the config survives logout, the pool does not
        assert_eq!(service.connection("u1").await.unwrap().id, item.id);
        assert_eq!(driver.released(), vec![item.id]);
        assert!(service.last("u1").await.empty);
    }

    #[tokio::test]
    async fn test_disconnect_forgets_connection() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        let item = service.connect("u1", request()).await.unwrap();
        service.run_sql("u1", "SELECT 1").await.unwrap();

        service.disconnect("u1").await.unwrap();
        assert!(matches!(
            service.connection("u1").await,
            Err(AppError::ConnectionNotFound(_))
        ));
        assert!(service.last("u1").await.empty);
        assert_eq!(driver.released(), vec![item.id]);
        assert!(service.disconnect("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_releases_previous_connection() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        let first = service.connect("u1", request()).await.unwrap();
        let second = service.connect("u1", request()).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(driver.released(), vec![first.id]);
    }

    #[tokio::test]
    async fn test_reconnect_cancels_query_on_previous_connection() {
        let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(150)));
        let service = service(driver.clone());
        service.connect("u1", request()).await.unwrap();

        let (outcome, second) = tokio::join!(
            service.run_sql("u1", "SELECT 'from first connection'"),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                service.connect("u1", request()).await.unwrap()
            }
        );
        assert!(matches!(outcome, Err(AppError::Cancelled)));

        let last = service.last("u1").await;
        assert!(last.empty);
        assert!(last.last_sql.is_none());
        assert_eq!(last.connection.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_invalid_reconnect_keeps_previous_connection() {
        let service = service(Arc::new(FakeDriver::new()));
        let first = service.connect("u1", request()).await.unwrap();

        let mut bad = request();
        bad.engine = "db2".into();
        let err = service.connect("u1", bad).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown database engine: db2");
        assert_eq!(service.connection("u1").await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_schema_refresh_bumps_version() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        service.connect("u1", request()).await.unwrap();

        let first = service.schema("u1", false).await.unwrap();
        assert_eq!(first.tables.len(), 2);
        let cached = service.schema("u1", false).await.unwrap();
        assert_eq!(cached.version, first.version);
        let refreshed = service.schema("u1", true).await.unwrap();
        assert!(refreshed.version > first.version);
        assert_eq!(driver.schema_calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_does_not_execute() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        assert_eq!(
            service.generate("u1", "how many orders").await.unwrap_err().code(),
            "NO_SCHEMA_LOADED"
        );

        service.connect("u1", request()).await.unwrap();
        let resolved = service.generate("u1", "how many orders").await.unwrap();
        assert!(resolved.generated_sql.starts_with("SELECT COUNT(*)"));
        assert_eq!(driver.query_calls(), 0);
        assert!(service.last("u1").await.empty);
    }

    #[tokio::test]
    async fn test_preview_table_rows() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        service.connect("u1", request()).await.unwrap();

        let response = service.preview("u1", "orders", None).await.unwrap();
        assert_eq!(response.generated_sql.as_deref(), Some("SELECT * FROM orders LIMIT 100"));
        assert_eq!(response.result.row_count, 2);
        assert_eq!(
            service.last("u1").await.last_sql.as_deref(),
            Some("SELECT * FROM orders LIMIT 100")
        );

        let response = service.preview("u1", "orders", Some(50_000)).await.unwrap();
        assert_eq!(response.generated_sql.as_deref(), Some("SELECT * FROM orders LIMIT 1000"));

        let err = service.preview("u1", "invoices", None).await.unwrap_err();
        assert_eq!(err.code(), "TABLE_NOT_FOUND");
        assert_eq!(driver.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_connection_test_reports_failure() {
        let driver = Arc::new(FakeDriver::new());
        let service = service(driver.clone());
        service.connect("u1", request()).await.unwrap();

        assert!(service.test_connection("u1").await.unwrap().success);

        driver.fail_next(DriverError::Auth("password authentication failed".into()));
        let result = service.test_connection("u1").await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("authentication rejected: password authentication failed")
        );
    }
}
