//! Connection registry.
//!
//! Turns raw connection submissions into validated configs and keeps one
//! config per user. Configs go through a [`ConnectionStore`]; passwords never
//! do. They live in process memory only and are merged back on retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::{AppError, AppResult, ValidationError};
use common::models::{ConnectionConfig, ConnectionRequest, Engine};
use sqlx::MySqlPool;
use tokio::sync::RwLock;

/// Persistence seam for connection configs, keyed by user id.
///
/// Implementations receive configs whose password is already cleared.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn save(&self, user_id: &str, config: &ConnectionConfig) -> AppResult<()>;

    async fn load(&self, user_id: &str) -> AppResult<Option<ConnectionConfig>>;

    /// Returns whether a config was stored.
    async fn delete(&self, user_id: &str) -> AppResult<bool>;
}

/// Process-local store, used when no metadata database is configured.
#[derive(Default)]
pub struct InMemoryStore {
    configs: RwLock<HashMap<String, ConnectionConfig>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryStore {
    async fn save(&self, user_id: &str, config: &ConnectionConfig) -> AppResult<()> {
        self.configs
            .write()
            .await
            .insert(user_id.to_string(), config.clone());
        Ok(())
    }

    async fn load(&self, user_id: &str) -> AppResult<Option<ConnectionConfig>> {
        Ok(self.configs.read().await.get(user_id).cloned())
    }

    async fn delete(&self, user_id: &str) -> AppResult<bool> {
        Ok(self.configs.write().await.remove(user_id).is_some())
    }
}

/// Row from the `connections` metadata table.
#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: String,
    engine: String,
    host: String,
    port: Option<u16>,
    username: String,
    database_name: String,
    created_at: String,
}

impl ConnectionRow {
    fn into_config(self) -> AppResult<ConnectionConfig> {
        let engine: Engine = self
            .engine
            .parse()
            .map_err(|e: ValidationError| AppError::Internal(e.to_string()))?;
        Ok(ConnectionConfig {
            id: self.id,
            engine,
            host: self.host,
            port: self.port,
            username: self.username,
            password: String::new(),
            database: self.database_name,
            created_at: self.created_at,
        })
    }
}

/// Store backed by a MySQL metadata database.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connects the store and creates the `connections` table if needed.
    pub async fn new(pool: MySqlPool) -> AppResult<Self> {
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `connections` (
                `user_id`       VARCHAR(128)  NOT NULL,
                `id`            VARCHAR(64)   NOT NULL,
                `engine`        VARCHAR(32)   NOT NULL,
                `host`          VARCHAR(255)  NOT NULL DEFAULT '',
                `port`          SMALLINT UNSIGNED DEFAULT NULL,
                `username`      VARCHAR(128)  NOT NULL DEFAULT '',
                `database_name` VARCHAR(512)  NOT NULL DEFAULT '',
                `created_at`    VARCHAR(64)   NOT NULL,
                `updated_at`    DATETIME      NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (`user_id`),
                KEY `idx_engine` (`engine`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create connections table: {e}")))?;

        tracing::info!("元数据表 `connections` 已就绪");
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MySqlStore {
    async fn save(&self, user_id: &str, config: &ConnectionConfig) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `connections`
                (`user_id`, `id`, `engine`, `host`, `port`, `username`, `database_name`, `created_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                `id` = VALUES(`id`), `engine` = VALUES(`engine`), `host` = VALUES(`host`),
                `port` = VALUES(`port`), `username` = VALUES(`username`),
                `database_name` = VALUES(`database_name`), `created_at` = VALUES(`created_at`)",
        )
        .bind(user_id)
        .bind(&config.id)
        .bind(config.engine.as_str())
        .bind(&config.host)
        .bind(config.port)
        .bind(&config.username)
        .bind(&config.database)
        .bind(&config.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("failed to save connection: {e}")))?;
        Ok(())
    }

    async fn load(&self, user_id: &str) -> AppResult<Option<ConnectionConfig>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT `id`, `engine`, `host`, `port`, `username`, `database_name`, `created_at`
             FROM `connections` WHERE `user_id` = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("failed to load connection: {e}")))?;
        row.map(ConnectionRow::into_config).transpose()
    }

    async fn delete(&self, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM `connections` WHERE `user_id` = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete connection: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Validates, stores and retrieves per-user connection configs.
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
    /// Passwords by user id, for the session lifetime.
    secrets: RwLock<HashMap<String, String>>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self {
            store,
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Fills an empty port with the engine default.
    pub fn apply_defaults(request: ConnectionRequest) -> ConnectionRequest {
        request.apply_defaults()
    }

    /// Checks engine, required fields and port, in that order.
    pub fn validate(request: ConnectionRequest) -> Result<ConnectionConfig, ValidationError> {
        request.validate()
    }

    /// Validates and stores a submission. No network connection is opened.
    pub async fn register(
        &self,
        user_id: &str,
        request: ConnectionRequest,
    ) -> AppResult<ConnectionConfig> {
        let config = Self::validate(request)?;
        self.persist(user_id, &config).await?;
        tracing::info!(user_id = %user_id, id = %config.id, engine = %config.engine, "连接配置已登记");
        Ok(config)
    }

    /// Stores `config` for `user_id`, keeping its password in memory only.
    pub async fn persist(&self, user_id: &str, config: &ConnectionConfig) -> AppResult<()> {
        let mut stored = config.clone();
        let password = std::mem::take(&mut stored.password);
        self.store.save(user_id, &stored).await?;

        let mut secrets = self.secrets.write().await;
        if password.is_empty() {
            secrets.remove(user_id);
        } else {
            secrets.insert(user_id.to_string(), password);
        }
        Ok(())
    }

    /// The user's config with its in-memory password merged back.
    ///
    /// # Errors
    /// `ConnectionNotFound` when the user has no config.
    pub async fn retrieve(&self, user_id: &str) -> AppResult<ConnectionConfig> {
        let mut config = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::ConnectionNotFound(user_id.to_string()))?;
        if let Some(password) = self.secrets.read().await.get(user_id) {
            config.password = password.clone();
        }
        Ok(config)
    }

    /// Deletes the user's config and password. Returns whether one existed.
    pub async fn remove(&self, user_id: &str) -> AppResult<bool> {
        self.forget_secret(user_id).await;
        self.store.delete(user_id).await
    }

    /// Drops the in-memory password while keeping the stored config.
    pub async fn forget_secret(&self, user_id: &str) {
        self.secrets.write().await.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn registry() -> (Arc<InMemoryStore>, ConnectionRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let registry = ConnectionRegistry::new(store.clone());
        (store, registry)
    }

    #[test]
    fn test_apply_defaults_fills_port() {
        assert_eq!(ConnectionRegistry::apply_defaults(request()).port, "5432");
    }

    #[tokio::test]
    async fn test_register_keeps_password_out_of_store() {
        let (store, registry) = registry();
        let config = registry.register("u1", request()).await.unwrap();
        assert_eq!(config.port, Some(5432));

        let persisted = store.load("u1").await.unwrap().unwrap();
        assert!(persisted.password.is_empty());
        assert_eq!(persisted.id, config.id);

        let retrieved = registry.retrieve("u1").await.unwrap();
        assert_eq!(retrieved.password, "s3cret");
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_stored() {
        let (store, registry) = registry();
        let mut bad = request();
        bad.host = "  ".into();
        let err = registry.register("u1", bad).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::MissingField("host"))
        ));
        assert!(store.load("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let (_, registry) = registry();
        registry.register("u1", request()).await.unwrap();
        assert!(matches!(
            registry.retrieve("u2").await,
            Err(AppError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_forget_secret_keeps_config() {
        let (_, registry) = registry();
        registry.register("u1", request()).await.unwrap();
        registry.forget_secret("u1").await;

        let config = registry.retrieve("u1").await.unwrap();
        assert!(config.password.is_empty());
        assert_eq!(config.host, "db.internal");
    }

    #[tokio::test]
    async fn test_remove() {
        let (_, registry) = registry();
        registry.register("u1", request()).await.unwrap();
        assert!(registry.remove("u1").await.unwrap());
        assert!(!registry.remove("u1").await.unwrap());
        assert!(registry.retrieve("u1").await.is_err());
    }
}
