//! HTTP 服务层
//!
//! 对外暴露 OpenAI Chat Completions 与 Anthropic Messages 两种方言的端点，
//! 所有请求都经由 `ChatProcessor` 转发到 Warp 上游。

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::backends::{Backend, WarpBridgeBackend};
use crate::models::warp::WarpPacket;
use crate::processor::ChatProcessor;

/// 处理器共享状态
pub struct AppState<B = WarpBridgeBackend> {
    pub processor: ChatProcessor<B>,
    /// 客户端 API 密钥，`None` 表示不校验
    pub api_key: Option<Arc<str>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

impl<B> AppState<B> {
    pub fn new(processor: ChatProcessor<B>, api_key: Option<String>) -> Self {
        Self {
            processor,
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }
}

/// 构建路由
pub fn build_router<B>(state: AppState<B>, body_limit: usize) -> Router
where
    B: Backend<Request = WarpPacket> + 'static,
{
    let api = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions::<B>))
        .route("/v1/messages", post(handlers::messages::<B>))
        .route("/v1/models", get(handlers::list_models))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key::<B>,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz::<B>))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backends::{BackendError, BackendErrorKind, BackendResult, ByteStream};
    use crate::config::{Config, QuotaRetryConfig, RateLimitConfig};
    use crate::credential::{
        ActiveToken, Credential, CredentialOrigin, IssuedToken, TokenIssuer, TokenManager,
    };
    use crate::error::BridgeError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// 按脚本返回 SSE 字节块的后端
    #[derive(Default)]
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Result<Vec<Bytes>, BackendError>>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Result<Vec<Bytes>, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        type Request = WarpPacket;

        async fn call_stream(&self, _request: &WarpPacket, _token: &ActiveToken) -> BackendResult<ByteStream> {
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::new(BackendErrorKind::Other, "script exhausted")));
            next.map(|chunks| -> ByteStream {
                Box::pin(futures::stream::iter(
                    chunks.into_iter().map(Ok::<Bytes, BackendError>),
                ))
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FixedIssuer;

    #[async_trait]
    impl TokenIssuer for FixedIssuer {
        async fn refresh_personal(&self, _secret: &str) -> Result<IssuedToken, BridgeError> {
            Err(BridgeError::Acquisition("no personal secret".to_string()))
        }

        async fn acquire_anonymous(&self) -> Result<IssuedToken, BridgeError> {
            Ok(IssuedToken {
                access_token: "anon".to_string(),
                refresh_token: None,
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    pub fn text_reply(text: &str) -> Vec<Bytes> {
        let frame = |json: serde_json::Value| Bytes::from(format!("data: {}\n\n", json));
        vec![
            frame(serde_json::json!({"parsed_data": {"client_actions": {"actions": [
                {"append_to_message_content": {"message": {"agent_output": {"text": text}}}}
            ]}}})),
            frame(serde_json::json!({"parsed_data": {"finished": {
                "reason": {"done": {}},
                "token_usage": [{"total_input": 12, "output": 4}]
            }}})),
            Bytes::from_static(b"data: [DONE]\n\n"),
        ]
    }

    pub fn router(script: Vec<Result<Vec<Bytes>, BackendError>>, api_key: Option<&str>) -> Router {
        let config = Config {
            retry: QuotaRetryConfig {
                base_delay_ms: 1,
                increment_ms: 1,
                buffered_max_attempts: 3,
                streaming_max_attempts: 2,
            },
            rate_limit: RateLimitConfig {
                min_interval_secs: 0,
                ..RateLimitConfig::default()
            },
            ..Config::default()
        };
        let tokens = TokenManager::from_config(&config, Arc::new(FixedIssuer));
        tokens.install(Credential::new(
            "personal-jwt",
            Utc::now() + chrono::Duration::hours(1),
            CredentialOrigin::Personal,
        ));
        let processor = ChatProcessor::new(&config, tokens, Arc::new(ScriptedBackend::new(script)));
        build_router(
            AppState::new(processor, api_key.map(str::to_string)),
            config.server.body_limit_bytes,
        )
    }
}
