use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use warpcast_lib::backends::WarpBridgeBackend;
use warpcast_lib::config::expand_tilde;
use warpcast_lib::credential::TokenManager;
use warpcast_lib::providers::WarpAuthClient;
use warpcast_lib::resilience::TimeoutConfig;
use warpcast_lib::server::{build_router, AppState};
use warpcast_lib::{logger, ChatProcessor, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置路径：第一个命令行参数，其次 WARPCAST_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WARPCAST_CONFIG").ok())
        .map(|p| expand_tilde(&p));

    let config = Config::load(config_path.as_deref()).context("加载配置失败")?;
    logger::init_tracing(&config.logging).map_err(anyhow::Error::msg)?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
        .build()
        .context("创建 HTTP 客户端失败")?;

    let timeouts = TimeoutConfig::from_config(&config.upstream, &config.token);
    let issuer = Arc::new(WarpAuthClient::new(
        client.clone(),
        config.warp.clone(),
        config.token.default_token_lifetime_secs,
    ));
    let tokens = TokenManager::from_config(&config, issuer);
    let backend = Arc::new(WarpBridgeBackend::new(
        client,
        config.warp.clone(),
        timeouts.request_timeout(),
    ));
    let processor = ChatProcessor::new(&config, tokens, backend);

    let state = AppState::new(processor, config.server.api_key.clone());
    let app = build_router(state, config.server.body_limit_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    tracing::info!(
        "[SERVER] 已启动: http://{} (api_key={})",
        addr,
        if config.server.api_key.is_some() { "on" } else { "off" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("[SERVER] 收到退出信号，正在关闭");
        })
        .await
        .context("服务器异常退出")?;
    Ok(())
}
