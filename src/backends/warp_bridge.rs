//! Warp 多智能体桥接后端
//!
//! 把上游请求包 POST 到 `{bridge_url}/api/warp/send_stream_sse`，
//! 原样返回 SSE 字节流，解析交给 `stream::parsers::warp_sse`。

use super::traits::{Backend, BackendError, BackendErrorKind, BackendResult, ByteStream};
use crate::config::WarpConfig;
use crate::credential::ActiveToken;
use crate::logger::sanitize_log_message;
use crate::models::warp::{BridgeRequest, WarpPacket};
use crate::resilience::with_timeout;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

const SEND_STREAM_PATH: &str = "/api/warp/send_stream_sse";

/// Warp 桥接后端
#[derive(Debug, Clone)]
pub struct WarpBridgeBackend {
    client: Client,
    config: WarpConfig,
    /// 等待响应头的超时
    request_timeout: Option<Duration>,
}

impl WarpBridgeBackend {
    pub fn new(client: Client, config: WarpConfig, request_timeout: Option<Duration>) -> Self {
        Self {
            client,
            config,
            request_timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.bridge_url.trim_end_matches('/'),
            SEND_STREAM_PATH
        )
    }
}

#[async_trait]
impl Backend for WarpBridgeBackend {
    type Request = WarpPacket;

    async fn call_stream(
        &self,
        request: &WarpPacket,
        token: &ActiveToken,
    ) -> BackendResult<ByteStream> {
        let body = BridgeRequest::new(request);
        let url = self.endpoint();
        tracing::debug!("[BRIDGE] POST {} (origin={})", url, token.origin);

        let send = self
            .client
            .post(&url)
            .bearer_auth(&token.token)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("x-warp-client-version", &self.config.client_version)
            .header("x-warp-os-category", &self.config.os_category)
            .header("x-warp-os-name", &self.config.os_name)
            .header("x-warp-os-version", &self.config.os_version)
            .json(&body)
            .send();

        let resp = with_timeout("上游请求", self.request_timeout, send)
            .await
            .map_err(|e| BackendError::new(BackendErrorKind::Timeout, e.to_string()))?
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    BackendErrorKind::Timeout
                } else {
                    BackendErrorKind::NetworkError
                };
                BackendError::new(kind, e.to_string())
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text = sanitize_log_message(&text);
            tracing::warn!("[BRIDGE] 上游返回 {}: {}", status, text);
            return Err(BackendError::from_status(status, text));
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BackendError::new(BackendErrorKind::NetworkError, e.to_string())));
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "warp-bridge"
    }
}
