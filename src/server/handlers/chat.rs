//! 对话端点处理器
//!
//! 两个方言端点共用同一流程：解析请求体、转换为规范化请求，
//! 再按 `stream` 字段选择 SSE 或完整 JSON 响应。

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    Json,
};

use crate::backends::Backend;
use crate::error::BridgeError;
use crate::models::warp::WarpPacket;
use crate::server::AppState;
use crate::server_utils::{build_sse_response, error_response};
use crate::translator::Dialect;

/// POST /v1/chat/completions
pub async fn chat_completions<B>(State(state): State<AppState<B>>, body: Bytes) -> Response
where
    B: Backend<Request = WarpPacket> + 'static,
{
    handle_chat(state, Dialect::OpenAi, body).await
}

/// POST /v1/messages
pub async fn messages<B>(State(state): State<AppState<B>>, body: Bytes) -> Response
where
    B: Backend<Request = WarpPacket> + 'static,
{
    handle_chat(state, Dialect::Anthropic, body).await
}

async fn handle_chat<B>(state: AppState<B>, dialect: Dialect, body: Bytes) -> Response
where
    B: Backend<Request = WarpPacket> + 'static,
{
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let error = BridgeError::Validation(format!("请求体不是合法 JSON: {}", e));
            return error_response(dialect, &error);
        }
    };

    let request = match state.processor.translate(dialect, value) {
        Ok(r) => r,
        Err(e) => return error_response(dialect, &e),
    };

    tracing::info!(
        "[SERVER] {} 请求: model={}, turns={}, stream={}",
        dialect,
        request.model,
        request.turns.len(),
        request.stream
    );

    if request.stream {
        match state.processor.stream(dialect, &request).await {
            Ok(stream) => build_sse_response(stream),
            Err(e) => {
                tracing::error!("[SERVER] 打开流式响应失败: {}", e);
                error_response(dialect, &e)
            }
        }
    } else {
        match state.processor.complete(dialect, &request).await {
            Ok(body) => Json(body).into_response(),
            Err(e) => {
                tracing::error!("[SERVER] 请求失败: {}", e);
                error_response(dialect, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::BackendError;
    use crate::server::test_support::{router, text_reply};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn post(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_openai_buffered_completion() {
        let app = router(vec![Ok(text_reply("Hello!"))], None);
        let response = app
            .oneshot(post(
                "/v1/chat/completions",
                json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello!");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["prompt_tokens"], 12);
    }

    #[tokio::test]
    async fn test_anthropic_streaming_response() {
        let app = router(vec![Ok(text_reply("Hi"))], None);
        let response = app
            .oneshot(post(
                "/v1/messages",
                json!({
                    "model": "claude-4-sonnet",
                    "max_tokens": 64,
                    "stream": true,
                    "messages": [{"role": "user", "content": "hi"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: message_start"));
        assert!(text.contains("\"text\":\"Hi\""));
        assert!(text.trim_end().ends_with("{\"type\":\"message_stop\"}"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_400_in_dialect_format() {
        let app = router(vec![], None);
        let response = app
            .oneshot(
                Request::post("/v1/messages")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_upstream_bad_request_is_forwarded() {
        let app = router(vec![Err(BackendError::from_status(400, "bad packet"))], None);
        let response = app
            .oneshot(post(
                "/v1/chat/completions",
                json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert!(value["error"]["message"].as_str().unwrap().contains("bad packet"));
    }
}
