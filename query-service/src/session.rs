//! Per-user session state.
//!
//! Each session keeps only the most recent query and result. Work for a
//! session starts with [`SessionStore::begin`]; the returned [`Ticket`] must
//! still be the newest one when the result is stored, otherwise the result is
//! discarded. Tearing a session down cancels its ticket tokens.

use std::collections::HashMap;
use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::models::{ConnectionItem, QueryResult, ResolvedQuery, SessionSnapshot};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Tables remembered for recency tie-breaks.
const RECENT_TABLES: usize = 8;

/// Claim on the right to write a session's result.
#[derive(Debug, Clone)]
pub struct Ticket {
    seq: u64,
    token: CancellationToken,
}

impl Ticket {
    /// Cancelled when the session is disconnected or logged out.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Default)]
struct Session {
    seq: u64,
    token: CancellationToken,
    connection: Option<ConnectionItem>,
    schema_version: Option<u64>,
    last_query: Option<ResolvedQuery>,
    last_sql: Option<String>,
    last_result: Option<QueryResult>,
    /// Most recent first.
    recent_tables: Vec<String>,
}

impl Session {
    fn clear_results(&mut self) {
        self.schema_version = None;
        self.last_query = None;
        self.last_sql = None;
        self.last_result = None;
        self.recent_tables.clear();
    }

    /// Invalidates every ticket issued so far.
    fn restart(&mut self) {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.seq += 1;
    }

    fn touch_tables(&mut self, tables: &[String]) {
        // primary table ends up first
        for table in tables.iter().rev() {
            self.recent_tables.retain(|t| t != table);
            self.recent_tables.insert(0, table.clone());
        }
        self.recent_tables.truncate(RECENT_TABLES);
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self, user_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(user_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing(&self, user_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Starts a unit of work, superseding any earlier ticket.
    pub async fn begin(&self, user_id: &str) -> Ticket {
        let session = self.session(user_id).await;
        let mut session = session.lock().await;
        session.seq += 1;
        Ticket {
            seq: session.seq,
            token: session.token.clone(),
        }
    }

    /// Stores the outcome of the work started with `ticket`.
    ///
    /// # Errors
    /// - `Cancelled` when the session was torn down meanwhile
    /// - `Superseded` when a newer ticket was issued
    pub async fn put(
        &self,
        user_id: &str,
        ticket: &Ticket,
        resolved: Option<ResolvedQuery>,
        sql: &str,
        result: QueryResult,
    ) -> AppResult<()> {
        let session = self.existing(user_id).await.ok_or(AppError::Cancelled)?;
        let mut session = session.lock().await;
        if ticket.token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if ticket.seq != session.seq {
            tracing::debug!(user_id = %user_id, ticket = ticket.seq, latest = session.seq, "结果已被新请求取代");
            return Err(AppError::Superseded);
        }

        if let Some(resolved) = &resolved {
            session.touch_tables(&resolved.tables);
            session.schema_version = Some(resolved.source_schema_version);
        }
        session.last_query = resolved;
        session.last_sql = Some(sql.to_string());
        session.last_result = Some(result);
        Ok(())
    }

    /// Last state of the session, or an empty snapshot.
    pub async fn get(&self, user_id: &str) -> SessionSnapshot {
        let Some(session) = self.existing(user_id).await else {
            return SessionSnapshot {
                empty: true,
                ..Default::default()
            };
        };
        let session = session.lock().await;
        SessionSnapshot {
            empty: session.last_result.is_none(),
            connection: session.connection.clone(),
            schema_version: session.schema_version,
            last_query: session.last_query.clone(),
            last_sql: session.last_sql.clone(),
            last_result: session.last_result.clone(),
        }
    }

    /// Points the session at a new connection and forgets query state of the
    /// previous one. Work still running against the previous connection is
    /// cancelled and can no longer store its result.
    pub async fn set_connection(&self, user_id: &str, connection: ConnectionItem) {
        let session = self.session(user_id).await;
        let mut session = session.lock().await;
        session.restart();
        session.clear_results();
        session.connection = Some(connection);
    }

    pub async fn set_schema_version(&self, user_id: &str, version: u64) {
        let session = self.session(user_id).await;
        session.lock().await.schema_version = Some(version);
    }

    pub async fn recent_tables(&self, user_id: &str) -> Vec<String> {
        match self.existing(user_id).await {
            Some(session) => session.lock().await.recent_tables.clone(),
            None => Vec::new(),
        }
    }

    /// Clears the session after a disconnect. In-flight work is cancelled;
    /// the session itself stays for the logged-in user.
    pub async fn reset(&self, user_id: &str) {
        if let Some(session) = self.existing(user_id).await {
            let mut session = session.lock().await;
            session.restart();
            session.connection = None;
            session.clear_results();
        }
    }

    /// Tears the session down on logout, cancelling in-flight work.
    pub async fn end(&self, user_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id);
        match removed {
            Some(session) => {
                session.lock().await.token.cancel();
                tracing::info!(user_id = %user_id, "会话已结束");
                true
            }
            None => false,
        }
    }
}
