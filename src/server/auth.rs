//! 客户端 API 密钥校验中间件

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use super::AppState;
use crate::backends::Backend;
use crate::error::BridgeError;
use crate::models::warp::WarpPacket;
use crate::server_utils::{error_response, extract_api_key};
use crate::translator::Dialect;

/// 校验 `Authorization: Bearer` 或 `x-api-key`
///
/// 未配置密钥时直接放行。错误响应按请求路径选择方言格式。
pub async fn require_api_key<B>(
    State(state): State<AppState<B>>,
    request: Request,
    next: Next,
) -> Response
where
    B: Backend<Request = WarpPacket> + 'static,
{
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let authorized = extract_api_key(request.headers())
        .map(|key| bool::from(key.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    let dialect = if request.uri().path().starts_with("/v1/messages") {
        Dialect::Anthropic
    } else {
        Dialect::OpenAi
    };
    tracing::warn!("[SERVER] API 密钥校验失败: path={}", request.uri().path());
    error_response(
        dialect,
        &BridgeError::Authentication("缺少或无效的 API 密钥".to_string()),
    )
}
