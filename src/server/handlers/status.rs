//! 模型列表与健康检查

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::backends::Backend;
use crate::converter::get_supported_models;
use crate::models::warp::WarpPacket;
use crate::server::AppState;

/// GET /v1/models
pub async fn list_models() -> Json<Value> {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = get_supported_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "warp"
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

/// GET /healthz
pub async fn healthz<B>(State(state): State<AppState<B>>) -> Json<Value>
where
    B: Backend<Request = WarpPacket> + 'static,
{
    Json(json!({
        "status": "ok",
        "token": state.processor.tokens().status(),
        "upstream": {"consecutive_failures": state.processor.upstream_failures()}
    }))
}
