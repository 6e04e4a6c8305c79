//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use common::errors::AppError;
use common::middleware::{AuthenticatedUser, RequestId};
use common::models::{
    ConnectionItem, ConnectionRequest, ConnectionTestResult, GenerateRequest, QueryRequest,
    QueryResponse, ResolvedQuery, SchemaCatalog, SessionSnapshot,
};
use common::response::ApiResponse;

use crate::state::AppState;

const SERVICE_NAME: &str = "query-service";

fn respond<T: Serialize>(data: T, request_id: &RequestId) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok_with_service(data, SERVICE_NAME).with_request_id(request_id.as_str()))
}

/// 保存当前用户的数据库连接
#[utoipa::path(
    put,
    path = "/api/connection",
    tag = "connection",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "连接已保存", body = ApiResponse<ConnectionItem>),
        (status = 400, description = "连接参数无效"),
        (status = 401, description = "未认证")
    )
)]
pub async fn put_connection(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.connect(user.id(), req).await?;
    Ok(respond(data, &request_id))
}

/// 获取当前用户的数据库连接
#[utoipa::path(
    get,
    path = "/api/connection",
    tag = "connection",
    responses(
        (status = 200, description = "连接详情", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "尚未配置连接")
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.connection(user.id()).await?;
    Ok(respond(data, &request_id))
}

/// 断开并删除当前用户的数据库连接
#[utoipa::path(
    delete,
    path = "/api/connection",
    tag = "connection",
    responses(
        (status = 200, description = "连接已断开", body = ApiResponse<bool>),
        (status = 404, description = "尚未配置连接")
    )
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.disconnect(user.id()).await?;
    Ok(respond(true, &request_id))
}

/// 测试数据库连接
#[utoipa::path(
    post,
    path = "/api/connection/test",
    tag = "connection",
    responses(
        (status = 200, description = "连接测试结果", body = ApiResponse<ConnectionTestResult>),
        (status = 404, description = "尚未配置连接")
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<ConnectionTestResult>>, AppError> {
    let data = state.service.test_connection(user.id()).await?;
    Ok(respond(data, &request_id))
}

/// 表结构查询参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SchemaParams {
    /// 忽略缓存重新加载
    #[serde(default)]
    pub refresh: bool,
}

/// 获取当前连接的表结构
#[utoipa::path(
    get,
    path = "/api/schema",
    tag = "schema",
    params(SchemaParams),
    responses(
        (status = 200, description = "表结构快照", body = ApiResponse<SchemaCatalog>),
        (status = 502, description = "表结构加载失败"),
        (status = 504, description = "表结构加载超时")
    )
)]
pub async fn get_schema(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
    Query(params): Query<SchemaParams>,
) -> Result<Json<ApiResponse<SchemaCatalog>>, AppError> {
    let catalog = state.service.schema(user.id(), params.refresh).await?;
    Ok(respond(catalog.as_ref().clone(), &request_id))
}

/// 表数据预览参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewParams {
    /// 返回行数上限，默认使用配置的行数
    pub limit: Option<u32>,
}

/// 预览一张表的前若干行
#[utoipa::path(
    get,
    path = "/api/tables/{table}/preview",
    tag = "schema",
    params(
        ("table" = String, Path, description = "表名"),
        PreviewParams
    ),
    responses(
        (status = 200, description = "表数据", body = ApiResponse<QueryResponse>),
        (status = 404, description = "尚未配置连接或表不存在"),
        (status = 502, description = "数据库执行失败")
    )
)]
pub async fn preview_table(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
    Path(table): Path<String>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<ApiResponse<QueryResponse>>, AppError> {
    let data = state.service.preview(user.id(), &table, params.limit).await?;
    Ok(respond(data, &request_id))
}

/// 执行自然语言问题或 SQL 语句
#[utoipa::path(
    post,
    path = "/api/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "查询结果", body = ApiResponse<QueryResponse>),
        (status = 400, description = "请求无效或语句不安全"),
        (status = 409, description = "尚未加载表结构或请求已被取代"),
        (status = 502, description = "数据库执行失败")
    )
)]
pub async fn run_query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ApiResponse<QueryResponse>>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let data = match (req.natural_language_text, req.raw_sql) {
        (Some(question), None) => state.service.ask(user.id(), &question).await?,
        (None, Some(sql)) => state.service.run_sql(user.id(), &sql).await?,
        _ => {
            return Err(AppError::BadRequest(
                "provide exactly one of natural_language_text or raw_sql".into(),
            ))
        }
    };
    Ok(respond(data, &request_id))
}

/// 只生成 SQL，不执行
#[utoipa::path(
    post,
    path = "/api/query/generate",
    tag = "query",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "生成的 SQL", body = ApiResponse<ResolvedQuery>),
        (status = 400, description = "问题为空"),
        (status = 409, description = "尚未加载表结构")
    )
)]
pub async fn generate_sql(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<ResolvedQuery>>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let data = state
        .service
        .generate(user.id(), &req.natural_language_text)
        .await?;
    Ok(respond(data, &request_id))
}

/// 获取会话的最近一次查询
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    responses(
        (status = 200, description = "最近一次查询，或 empty=true", body = ApiResponse<SessionSnapshot>)
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
) -> Json<ApiResponse<SessionSnapshot>> {
    respond(state.service.last(user.id()).await, &request_id)
}

/// 登出并清理会话
#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "session",
    responses(
        (status = 200, description = "会话已结束", body = ApiResponse<bool>)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.logout(user.id()).await?;
    Ok(respond(true, &request_id))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
}
