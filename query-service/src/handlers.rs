//! Handler模块
//!
//! 每个处理函数先校验请求体，再调用引擎；引擎返回的信封原样透传，
//! HTTP 状态码由信封中的错误码决定。

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::middleware::RequestId;
use common::models::{
    ConnectionRequest, ExecuteQueryRequest, GenerateQueryRequest, GeneratedQuery, QueryPayload,
    SchemaMap, SchemaRequest, TableItem,
};
use common::response::ApiResponse;
use query_engine::{ConnectionCheck, ModelProbe};

use crate::state::AppState;

type Reply<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

fn reply<T: Serialize>(state: &AppState, request_id: &RequestId, envelope: ApiResponse<T>) -> Reply<T> {
    let status = envelope.status();
    let envelope = envelope
        .with_service(state.service_name())
        .with_request_id(request_id.as_str());
    Ok((status, Json(envelope)))
}

/// 获取所选表/集合的结构
#[utoipa::path(
    post,
    path = "/api/schema",
    tag = "query",
    request_body = SchemaRequest,
    responses(
        (status = 200, description = "结构描述", body = ApiResponse<SchemaMap>),
        (status = 400, description = "请求校验失败"),
        (status = 502, description = "无法连接数据库")
    )
)]
pub async fn build_schema(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<SchemaRequest>,
) -> Reply<SchemaMap> {
    req.validate()?;
    let envelope = state
        .engine
        .build_schema(req.backend, &req.credentials, &req.tables)
        .await;
    reply(&state, &request_id, envelope)
}

/// 将自然语言转换为经过校验的查询（仅生成，不执行）
#[utoipa::path(
    post,
    path = "/api/query/generate",
    tag = "query",
    request_body = GenerateQueryRequest,
    responses(
        (status = 200, description = "生成的查询", body = ApiResponse<GeneratedQuery>),
        (status = 400, description = "请求校验失败"),
        (status = 422, description = "兜底查询也未通过语法校验")
    )
)]
pub async fn generate_query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<GenerateQueryRequest>,
) -> Reply<GeneratedQuery> {
    req.validate()?;
    let envelope = state
        .engine
        .generate_query(req.backend, &req.credentials, &req.natural_language, &req.tables)
        .await;
    reply(&state, &request_id, envelope)
}

/// 校验并执行查询文本（可为用户编辑后的生成结果）
#[utoipa::path(
    post,
    path = "/api/query/execute",
    tag = "query",
    request_body = ExecuteQueryRequest,
    responses(
        (status = 200, description = "执行结果", body = ApiResponse<QueryPayload>),
        (status = 400, description = "请求校验失败或数据库执行错误"),
        (status = 422, description = "查询不在允许的语法范围内"),
        (status = 502, description = "无法连接数据库")
    )
)]
pub async fn execute_query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<ExecuteQueryRequest>,
) -> Reply<QueryPayload> {
    req.validate()?;
    let envelope = state
        .engine
        .execute_query(req.backend, &req.credentials, &req.query)
        .await;
    reply(&state, &request_id, envelope)
}

/// 测试数据库连接
#[utoipa::path(
    post,
    path = "/api/connections/test",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "连接成功", body = ApiResponse<ConnectionCheck>),
        (status = 502, description = "连接失败")
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<ConnectionRequest>,
) -> Reply<ConnectionCheck> {
    req.validate()?;
    let envelope = state
        .engine
        .test_connection(req.backend, &req.credentials)
        .await;
    reply(&state, &request_id, envelope)
}

/// 列出数据库中的表或集合
#[utoipa::path(
    post,
    path = "/api/tables",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "表/集合列表", body = ApiResponse<Vec<TableItem>>),
        (status = 502, description = "连接失败")
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<ConnectionRequest>,
) -> Reply<Vec<TableItem>> {
    req.validate()?;
    let envelope = state.engine.list_tables(req.backend, &req.credentials).await;
    reply(&state, &request_id, envelope)
}

/// 大模型连通性测试
#[utoipa::path(
    get,
    path = "/api/llm/test",
    tag = "llm",
    responses(
        (status = 200, description = "模型响应；未配置密钥时 configured 为 false", body = ApiResponse<ModelProbe>),
        (status = 500, description = "模型调用失败")
    )
)]
pub async fn probe_model(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Reply<ModelProbe> {
    let envelope = state.engine.probe_model().await;
    reply(&state, &request_id, envelope)
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
        llm_configured: state.config.llm.is_configured(),
        timestamp: Utc::now(),
    })
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// 是否配置了大模型密钥
    pub llm_configured: bool,
    pub timestamp: DateTime<Utc>,
}
