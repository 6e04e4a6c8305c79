//! 查询服务路由模块

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use common::middleware::{identity_middleware, request_id_middleware, UserIdHeader};

use crate::handlers;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "查询服务 API",
        version = "0.1.0",
        description = "自然语言查询解析与执行微服务"
    ),
    paths(
        handlers::put_connection,
        handlers::get_connection,
        handlers::delete_connection,
        handlers::test_connection,
        handlers::get_schema,
        handlers::preview_table,
        handlers::run_query,
        handlers::generate_sql,
        handlers::get_session,
        handlers::logout,
        handlers::health_check,
    ),
    components(schemas(
        common::models::ConnectionRequest,
        common::models::ConnectionItem,
        common::models::ConnectionTestResult,
        common::models::Engine,
        common::models::SchemaCatalog,
        common::models::TableInfo,
        common::models::ColumnInfo,
        common::models::ForeignKey,
        common::models::QueryRequest,
        common::models::GenerateRequest,
        common::models::QueryResponse,
        common::models::QueryResult,
        common::models::ResolvedQuery,
        common::models::QueryIntent,
        common::models::SessionSnapshot,
        handlers::HealthResponse,
    )),
    tags(
        (name = "connection", description = "连接管理端点"),
        (name = "schema", description = "表结构端点"),
        (name = "query", description = "查询端点"),
        (name = "session", description = "会话端点"),
        (name = "health", description = "健康检查端点")
    )
)]
pub struct ApiDoc;

/// 创建查询服务路由
///
/// 除健康检查外，`/api` 下的端点都要求上游身份头。
pub fn router(user_id_header: &str) -> Router<AppState> {
    let protected = Router::new()
        .route(
            "/api/connection",
            get(handlers::get_connection)
                .put(handlers::put_connection)
                .delete(handlers::delete_connection),
        )
        .route("/api/connection/test", post(handlers::test_connection))
        .route("/api/schema", get(handlers::get_schema))
        .route("/api/tables/{table}/preview", get(handlers::preview_table))
        .route("/api/query", post(handlers::run_query))
        .route("/api/query/generate", post(handlers::generate_sql))
        .route("/api/session", get(handlers::get_session))
        .route("/api/logout", post(handlers::logout))
        .route_layer(middleware::from_fn_with_state(
            UserIdHeader::new(user_id_header),
            identity_middleware,
        ));

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .merge(protected)
}

/// 组装完整应用：业务路由、OpenAPI 文档与公共中间件
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(router(&state.config.user_id_header))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::config::AppConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::registry::InMemoryStore;
    use crate::testing::FakeDriver;

    fn app() -> Router {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(FakeDriver::new()),
            Arc::new(InMemoryStore::new()),
        );
        create_router(state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn connection_body() -> Value {
        json!({
            "engine": "mysql",
            "host": "db.internal",
            "port": "",
            "username": "analyst",
            "password": "s3cret",
            "database": "shop"
        })
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/connection", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_connection_response_omits_password() {
        let app = app();
        let (status, body) =
            send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["port"], 3306);
        assert!(body["data"].get("password").is_none());
        assert_eq!(body["meta"]["service"], "query-service");
        assert!(body["meta"]["request_id"].is_string());

        let (status, body) = send(&app, "GET", "/api/connection", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["engine"], "mysql");
    }

    #[tokio::test]
    async fn test_invalid_connection_names_field() {
        let app = app();
        let mut request = connection_body();
        request["username"] = json!("");
        let (status, body) = send(&app, "PUT", "/api/connection", Some("u1"), Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "missing required field: username");
    }

    #[tokio::test]
    async fn test_question_before_connect() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some("u1"),
            Some(json!({ "natural_language_text": "how many orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "NO_SCHEMA_LOADED");
    }

    #[tokio::test]
    async fn test_query_flow() {
        let app = app();
        send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some("u1"),
            Some(json!({ "natural_language_text": "how many orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert!(data["generated_sql"]
            .as_str()
            .unwrap()
            .starts_with("SELECT COUNT(*)"));
        assert_eq!(data["columns"], json!(["customer_id", "name"]));
        assert_eq!(data["rows"][1][1], Value::Null);
        assert_eq!(data["row_count"], 2);

        let (status, body) = send(&app, "GET", "/api/session", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["empty"], false);
        assert_eq!(body["data"]["last_query"]["natural_language_text"], "how many orders");

        // other users see nothing
        let (_, body) = send(&app, "GET", "/api/session", Some("u2"), None).await;
        assert_eq!(body["data"]["empty"], true);
    }

    #[tokio::test]
    async fn test_generate_returns_sql_only() {
        let app = app();
        send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/query/generate",
            Some("u1"),
            Some(json!({ "natural_language_text": "how many orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["intent"], "aggregate");
        assert!(body["data"].get("rows").is_none());

        let (_, body) = send(&app, "GET", "/api/session", Some("u1"), None).await;
        assert_eq!(body["data"]["empty"], true);
    }

    #[tokio::test]
    async fn test_table_preview() {
        let app = app();
        send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;

        let (status, body) = send(
            &app,
            "GET",
            "/api/tables/orders/preview?limit=5",
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["generated_sql"], "SELECT * FROM orders LIMIT 5");
        assert_eq!(body["data"]["row_count"], 2);

        let (status, body) =
            send(&app, "GET", "/api/tables/invoices/preview", Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "TABLE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unsafe_sql_is_rejected() {
        let app = app();
        send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some("u1"),
            Some(json!({ "raw_sql": "drop table orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "UNSAFE_STATEMENT");
    }

    #[tokio::test]
    async fn test_query_needs_exactly_one_input() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some("u1"),
            Some(json!({ "natural_language_text": "orders", "raw_sql": "SELECT 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_disconnect_then_logout() {
        let app = app();
        send(&app, "PUT", "/api/connection", Some("u1"), Some(connection_body())).await;

        let (status, _) = send(&app, "DELETE", "/api/connection", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "GET", "/api/connection", Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");

        let (status, body) = send(&app, "POST", "/api/logout", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], true);
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api-docs/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"].get("/api/query").is_some());
    }
}
