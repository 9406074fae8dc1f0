//! 自然语言查询服务
//!
//! 提供自然语言到数据库查询的 HTTP 接口，包括：
//! - 获取所选表/集合的结构
//! - 生成经过校验的查询（大模型优先，关键字兜底）
//! - 执行查询并返回统一格式的结果
//! - 连接测试、表列表与大模型连通性测试

mod handlers;
mod routes;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::{AppConfig, LogFormat};
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "query-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "自然语言查询服务 API",
        version = "0.1.0",
        description = "自然语言到 MySQL / MongoDB 查询的生成与执行"
    ),
    paths(
        handlers::build_schema,
        handlers::generate_query,
        handlers::execute_query,
        handlers::test_connection,
        handlers::list_tables,
        handlers::probe_model,
        handlers::health_check,
    ),
    components(schemas(
        common::models::BackendKind,
        common::models::Credentials,
        common::models::SchemaRequest,
        common::models::GenerateQueryRequest,
        common::models::ExecuteQueryRequest,
        common::models::ConnectionRequest,
        common::models::GeneratedQuery,
        common::models::GenerationSource,
        common::models::QueryPayload,
        common::models::MutationSummary,
        common::models::ColumnDescriptor,
        common::models::TableItem,
        common::models::TableKind,
        common::errors::ErrorCode,
        query_engine::ConnectionCheck,
        query_engine::ModelProbe,
        handlers::HealthResponse,
    )),
    tags(
        (name = "query", description = "结构获取、查询生成与执行"),
        (name = "connections", description = "连接测试与表列表"),
        (name = "llm", description = "大模型连通性"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（.env + 环境变量）
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化日志追踪
    init_tracing(config.log_format);

    // 创建应用状态
    let state = AppState::new(config.clone());

    // 创建路由
    let app = create_router(state);

    // 启动服务
    let addr = config.bind_addr();
    info!(
        service = SERVICE_NAME,
        address = %addr,
        llm_configured = config.llm.is_configured(),
        "启动服务"
    );

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app).await.context("服务运行失败")?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router(&state))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
