//! tau HTTP 服务
//!
//! 启动: cargo run --bin tau-server --features server
//! 默认监听 127.0.0.1:8090，可用 TAU_SERVER_ADDR 覆盖

#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tau_harness::config::load_config;
use tau_harness::observability;
use tau_harness::registry::Registry;
use tau_harness::runner::Runner;
use tau_harness::server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    let addr: SocketAddr = std::env::var("TAU_SERVER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8090".to_string())
        .parse()
        .context("Invalid TAU_SERVER_ADDR")?;

    let runner = Runner::new(
        Arc::new(Registry::with_builtin_domains()),
        Arc::new(cfg.client_factory()),
    );
    serve(runner, addr).await
}
