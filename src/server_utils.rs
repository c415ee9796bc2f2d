//! 服务器工具函数
//!
//! 处理器共用的响应构建与字符串辅助函数。

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use std::convert::Infallible;

use crate::error::BridgeError;
use crate::translator::Dialect;

/// 安全截断字符串，按字符而非字节计数
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// 构建 SSE 流式响应
pub fn build_sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<String, Infallible>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            tracing::error!("[SERVER] 构建 SSE 响应失败: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// 按方言渲染错误响应
pub fn error_response(dialect: Dialect, error: &BridgeError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match dialect {
        Dialect::OpenAi => error.to_openai_json(),
        Dialect::Anthropic => error.to_anthropic_json(),
    };
    let mut response = (status, Json(body)).into_response();
    if let BridgeError::AcquisitionRateLimited {
        retry_after_secs: Some(secs),
        ..
    } = error
    {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// 从请求头提取客户端 API 密钥
///
/// 支持 `Authorization: Bearer <key>` 与 `x-api-key: <key>` 两种形式。
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(key) = value.strip_prefix("Bearer ") {
            return Some(key.trim());
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate() {
        assert_eq!(safe_truncate("hello", 10), "hello");
        assert_eq!(safe_truncate("hello world", 5), "hello");
        assert_eq!(safe_truncate("你好世界", 2), "你好");
    }

    #[test]
    fn test_extract_api_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);

        headers.insert("x-api-key", "k1".parse().unwrap());
        assert_eq!(extract_api_key(&headers), Some("k1"));

        headers.insert(header::AUTHORIZATION, "Bearer k2".parse().unwrap());
        assert_eq!(extract_api_key(&headers), Some("k2"));
    }

    #[test]
    fn test_error_response_uses_dialect_shape() {
        let error = BridgeError::Validation("bad".to_string());
        let response = error_response(Dialect::Anthropic, &error);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let limited = BridgeError::AcquisitionRateLimited {
            reason: "slow down".to_string(),
            retry_after_secs: Some(30),
        };
        let response = error_response(Dialect::OpenAi, &limited);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
