//! Service configuration.
//!
//! Every value comes from the environment (optionally seeded from a `.env`
//! file) and falls back to a default when absent or unparsable.

use std::str::FromStr;
use std::time::Duration;

/// Hard upper bound on retries for transient failures.
pub const MAX_RETRY_BUDGET: u32 = 1;

/// Runtime configuration shared by all services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name used in logs and response metadata.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Optional MySQL URL for persisting connection metadata.
    pub database_url: Option<String>,
    /// Timeout for establishing a driver connection pool.
    pub connect_timeout_secs: u64,
    /// Maximum pooled connections per target database.
    pub max_connections: u32,
    /// Timeout applied to each query execution.
    pub query_timeout_secs: u64,
    /// Timeout applied to each schema fetch.
    pub schema_fetch_timeout_secs: u64,
    /// Freshness window for cached schema catalogs.
    pub schema_cache_ttl_secs: u64,
    /// Retries for transient failures (capped at [`MAX_RETRY_BUDGET`]).
    pub max_retries: u32,
    /// Row limit used by the resolver's bounded default query.
    pub default_row_limit: u32,
    /// Minimum resolver confidence before falling back to the default query.
    pub min_confidence: f64,
    /// Header carrying the user id asserted by the upstream identity provider.
    pub user_id_header: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "query-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8082,
            database_url: None,
            connect_timeout_secs: 10,
            max_connections: 5,
            query_timeout_secs: 30,
            schema_fetch_timeout_secs: 15,
            schema_cache_ttl_secs: 300,
            max_retries: MAX_RETRY_BUDGET,
            default_row_limit: 100,
            min_confidence: 0.35,
            user_id_header: "x-user-id".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            service_name: service_name.to_string(),
            host: std::env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_or("SERVER_PORT", defaults.port),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            max_connections: env_or("MAX_CONNECTIONS", defaults.max_connections),
            query_timeout_secs: env_or("QUERY_TIMEOUT_SECS", defaults.query_timeout_secs),
            schema_fetch_timeout_secs: env_or(
                "SCHEMA_FETCH_TIMEOUT_SECS",
                defaults.schema_fetch_timeout_secs,
            ),
            schema_cache_ttl_secs: env_or("SCHEMA_CACHE_TTL_SECS", defaults.schema_cache_ttl_secs),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries).min(MAX_RETRY_BUDGET),
            default_row_limit: env_or("DEFAULT_ROW_LIMIT", defaults.default_row_limit).max(1),
            min_confidence: env_or("MIN_CONFIDENCE", defaults.min_confidence).clamp(0.0, 1.0),
            user_id_header: std::env::var("USER_ID_HEADER")
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or(defaults.user_id_header),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn schema_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_fetch_timeout_secs)
    }

    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }

    /// Bind address in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.schema_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.user_id_header, "x-user-id");
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("COMMON_CONFIG_TEST_PORT", "not-a-number");
        assert_eq!(env_or("COMMON_CONFIG_TEST_PORT", 42u16), 42);
        std::env::set_var("COMMON_CONFIG_TEST_PORT", " 9000 ");
        assert_eq!(env_or("COMMON_CONFIG_TEST_PORT", 42u16), 9000);
    }
}
