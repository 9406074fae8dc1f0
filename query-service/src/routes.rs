//! 路由模块

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use common::middleware::require_user_id;

use crate::handlers;
use crate::state::AppState;

/// 业务路由；开启 `require_user_id` 时要求携带 `x-user-id`。
pub fn router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/api/schema", post(handlers::build_schema))
        .route("/api/query/generate", post(handlers::generate_query))
        .route("/api/query/execute", post(handlers::execute_query))
        .route("/api/connections/test", post(handlers::test_connection))
        .route("/api/tables", post(handlers::list_tables))
        .route("/api/llm/test", get(handlers::probe_model));

    let api = if state.config.require_user_id {
        api.layer(middleware::from_fn(require_user_id))
    } else {
        api
    };

    Router::new()
        .merge(api)
        .route("/api/health", get(handlers::health_check))
}
