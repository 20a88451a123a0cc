//! HTTP 服务：健康检查、任务查询与批量运行
//!
//! 路由：
//! - `GET  /health`
//! - `POST /get_tasks`   `{"domain": "mock"}`
//! - `POST /run_domain`  RunConfig（缺省字段取默认值），返回 Results

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::HarnessError;
use crate::data::{Results, Task};
use crate::runner::{RunConfig, Runner};

#[derive(Clone)]
pub struct AppState {
    pub runner: Runner,
}

#[derive(Debug, Deserialize)]
pub struct GetTasksRequest {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct GetTasksResponse {
    pub domain: String,
    pub tasks: Vec<Task>,
}

/// 错误到 HTTP 状态码：请求内容问题为 400，其余为 500
fn error_response(e: HarnessError) -> (StatusCode, String) {
    let status = match e {
        HarnessError::UnknownDomain(_)
        | HarnessError::UnknownTask(_)
        | HarnessError::InvalidTask(_)
        | HarnessError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/get_tasks", post(get_tasks))
        .route("/run_domain", post(run_domain))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_tasks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetTasksRequest>,
) -> Result<Json<GetTasksResponse>, (StatusCode, String)> {
    let tasks = state
        .runner
        .registry()
        .get_tasks(&req.domain, None)
        .map_err(error_response)?;
    Ok(Json(GetTasksResponse {
        domain: req.domain,
        tasks,
    }))
}

async fn run_domain(
    State(state): State<Arc<AppState>>,
    Json(mut config): Json<RunConfig>,
) -> Result<Json<Results>, (StatusCode, String)> {
    // 服务端不落盘
    config.save_to = None;
    config.resume = false;
    let results = state
        .runner
        .run_domain(&config)
        .await
        .map_err(error_response)?;
    Ok(Json(results))
}

/// 监听 addr 直到进程退出
pub async fn serve(runner: Runner, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(Arc::new(AppState { runner }));
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
