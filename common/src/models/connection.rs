//! Connection configuration models.
//!
//! A [`ConnectionRequest`] is what the user submits. It becomes a
//! [`ConnectionConfig`] only after engine defaults are applied and the
//! request passes validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ValidationError;
use crate::utils::IdGenerator;

/// Database engine enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgresql,
    Mysql,
    Mssql,
    Sqlite,
    Oracle,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::Postgresql,
        Engine::Mysql,
        Engine::Mssql,
        Engine::Sqlite,
        Engine::Oracle,
    ];

    /// Returns the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Engine::Postgresql => Some(5432),
            Engine::Mysql => Some(3306),
            Engine::Mssql => Some(1433),
            Engine::Oracle => Some(1521),
            Engine::Sqlite => None,
        }
    }

    /// Whether the engine is addressed over the network.
    pub fn is_networked(&self) -> bool {
        !matches!(self, Engine::Sqlite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgresql => "postgresql",
            Engine::Mysql => "mysql",
            Engine::Mssql => "mssql",
            Engine::Sqlite => "sqlite",
            Engine::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Engine::Postgresql),
            "mysql" => Ok(Engine::Mysql),
            "mssql" | "sqlserver" => Ok(Engine::Mssql),
            "sqlite" => Ok(Engine::Sqlite),
            "oracle" => Ok(Engine::Oracle),
            other => Err(ValidationError::UnknownEngine(other.to_string())),
        }
    }
}

/// Connection parameters as submitted by the user.
#[derive(Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ConnectionRequest {
    /// Engine name (postgresql, mysql, mssql, sqlite, oracle).
    #[serde(alias = "type")]
    pub engine: String,
    pub host: String,
    /// Port as entered; empty means the engine default.
    pub port: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Database name, or the file path for sqlite.
    pub database: String,
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl ConnectionRequest {
    /// Fills an empty port with the engine default.
    ///
    /// Requests with an unrecognised engine are returned unchanged; that is
    /// reported by [`ConnectionRequest::validate`].
    pub fn apply_defaults(mut self) -> Self {
        if self.port.trim().is_empty() {
            if let Some(port) = Engine::from_str(&self.engine)
                .ok()
                .and_then(|engine| engine.default_port())
            {
                self.port = port.to_string();
            }
        }
        self
    }

    /// Validates the request and converts it into a [`ConnectionConfig`].
    ///
    /// Checks run in order: engine recognised, then host, username and
    /// database present (network engines only), then port numeric or empty.
    pub fn validate(self) -> Result<ConnectionConfig, ValidationError> {
        let engine = Engine::from_str(&self.engine)?;
        let request = self.apply_defaults();

        if engine.is_networked() {
            for (field, value) in [
                ("host", &request.host),
                ("username", &request.username),
                ("database", &request.database),
            ] {
                if value.trim().is_empty() {
                    return Err(ValidationError::MissingField(field));
                }
            }
        }

        let port = match request.port.trim() {
            "" => None,
            raw => match raw.parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => return Err(ValidationError::InvalidPort(raw.to_string())),
            },
        };

        Ok(ConnectionConfig {
            id: IdGenerator::connection_id(),
            engine,
            host: request.host.trim().to_string(),
            port,
            username: request.username.trim().to_string(),
            password: request.password,
            database: request.database.trim().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Validated connection configuration.
#[derive(Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionConfig {
    /// Unique connection identifier, new for every accepted submission.
    pub id: String,
    pub engine: Engine,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    /// Held in memory only; never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
    pub created_at: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Connection item for API responses (excludes sensitive data).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    pub id: String,
    pub engine: Engine,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    pub database: String,
    pub created_at: String,
}

impl From<&ConnectionConfig> for ConnectionItem {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            id: config.id.clone(),
            engine: config.engine,
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            database: config.database.clone(),
            created_at: config.created_at.clone(),
        }
    }
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionTestResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(engine: &str, host: &str, username: &str, database: &str) -> ConnectionRequest {
        ConnectionRequest {
            engine: engine.into(),
            host: host.into(),
            port: String::new(),
            username: username.into(),
            password: "secret".into(),
            database: database.into(),
        }
    }

    #[test]
    fn test_default_port_for_every_network_engine() {
        for engine in Engine::ALL.into_iter().filter(Engine::is_networked) {
            let filled = request(engine.as_str(), "db", "a", "b").apply_defaults();
            let expected = engine.default_port().unwrap().to_string();
            assert_eq!(filled.port, expected, "{engine}");
        }
    }

    #[test]
    fn test_mysql_empty_port_defaults_to_3306() {
        let filled = ConnectionRequest {
            engine: "mysql".into(),
            ..Default::default()
        }
        .apply_defaults();
        assert_eq!(filled.port, "3306");
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let mut req = request("postgresql", "db", "a", "b");
        req.port = "6543".into();
        assert_eq!(req.apply_defaults().port, "6543");
    }

    #[test]
    fn test_sqlite_has_no_default_port() {
        let filled = request("sqlite", "", "", "/tmp/app.db").apply_defaults();
        assert_eq!(filled.port, "");
        let config = filled.validate().unwrap();
        assert_eq!(config.port, None);
    }

    #[test]
    fn test_missing_host_reported_first() {
        let err = request("postgresql", "", "a", "b").validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingField("host"));
    }

    #[test]
    fn test_missing_fields_named() {
        for (req, field) in [
            (request("mysql", "h", "", "b"), "username"),
            (request("mssql", "h", "a", "  "), "database"),
            (request("oracle", " ", "a", "b"), "host"),
        ] {
            assert_eq!(req.validate().unwrap_err(), ValidationError::MissingField(field));
        }
    }

    #[test]
    fn test_unknown_engine_checked_before_fields() {
        let err = request("db2", "", "", "").validate().unwrap_err();
        assert_eq!(err, ValidationError::UnknownEngine("db2".into()));
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let mut req = request("postgresql", "h", "a", "b");
        req.port = "54x2".into();
        assert_eq!(
            req.validate().unwrap_err(),
            ValidationError::InvalidPort("54x2".into())
        );
    }

    #[test]
    fn test_engine_aliases() {
        assert_eq!("Postgres".parse::<Engine>().unwrap(), Engine::Postgresql);
        assert_eq!("SQLSERVER".parse::<Engine>().unwrap(), Engine::Mssql);
    }

    #[test]
    fn test_password_never_serialized_or_debugged() {
        let config = request("postgresql", "h", "a", "b").validate().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(!format!("{config:?}").contains("secret"));
        assert!(!format!("{:?}", request("mysql", "h", "a", "b")).contains("secret"));
    }

    #[test]
    fn test_request_accepts_type_alias() {
        let req: ConnectionRequest =
            serde_json::from_str(r#"{"type":"mysql","host":"h"}"#).unwrap();
        assert_eq!(req.engine, "mysql");
        assert_eq!(req.port, "");
    }
}
