//! 协议转换层
//!
//! 处理两种公开方言（OpenAI Chat Completions、Anthropic Messages）与
//! 规范化表示之间的请求和响应格式转换。
//!
//! # 架构设计
//!
//! ```text
//! translator/
//! ├── traits.rs              # 转换器 trait 定义
//! ├── content.rs             # 图片、工具参数等共用内容处理
//! ├── validate.rs            # 规范化请求不变量校验
//! ├── usage.rs               # 用量估算
//! ├── openai/                # OpenAI 方言
//! │   ├── request.rs         # OpenAI ⇄ 规范化请求
//! │   └── response.rs        # 规范化响应 / 事件 → OpenAI
//! └── anthropic/             # Anthropic 方言
//!     ├── request.rs         # Anthropic ⇄ 规范化请求
//!     └── response.rs        # 规范化响应 / 事件 → Anthropic
//! ```
//!
//! # 使用示例
//!
//! ```ignore
//! use warpcast_lib::translator::{self, Dialect};
//!
//! let canonical = translator::translate(Dialect::Anthropic, body)?;
//! let rendered = translator::render(Dialect::Anthropic, &response);
//! ```

pub mod anthropic;
pub mod content;
pub mod openai;
pub mod traits;
pub mod usage;
pub mod validate;

// 重新导出核心类型
pub use anthropic::{AnthropicRequestTranslator, AnthropicResponseTranslator};
pub use openai::{OpenAiRequestTranslator, OpenAiResponseTranslator};
pub use traits::{
    RequestTranslator, ResponseTranslator, SseResponseTranslator, TranslateError,
    TranslateErrorKind,
};

use crate::error::BridgeError;
use crate::models::canonical::{CanonicalRequest, CanonicalResponse};
use crate::stream::CanonicalEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 公开方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// OpenAI Chat Completions
    OpenAi,
    /// Anthropic Messages
    Anthropic,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::OpenAi => write!(f, "openai"),
            Dialect::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// 方言请求体 → 规范化请求
pub fn translate(dialect: Dialect, body: serde_json::Value) -> Result<CanonicalRequest, BridgeError> {
    let result = match dialect {
        Dialect::OpenAi => translate_with(OpenAiRequestTranslator::new(), body),
        Dialect::Anthropic => translate_with(AnthropicRequestTranslator::new(), body),
    };
    if let Err(e) = &result {
        tracing::warn!("[TRANSLATE] {} 请求转换失败: {}", dialect, e);
    }
    result
}

fn translate_with<T>(translator: T, body: serde_json::Value) -> Result<CanonicalRequest, BridgeError>
where
    T: RequestTranslator,
    T::Request: DeserializeOwned,
{
    let request: T::Request = serde_json::from_value(body)
        .map_err(|e| BridgeError::Validation(format!("请求体格式错误: {}", e)))?;
    Ok(translator.translate_request(request)?)
}

/// 规范化请求 → 方言请求体
pub fn render_request(dialect: Dialect, request: &CanonicalRequest) -> Result<serde_json::Value, BridgeError> {
    match dialect {
        Dialect::OpenAi => render_request_with(OpenAiRequestTranslator::new(), request),
        Dialect::Anthropic => render_request_with(AnthropicRequestTranslator::new(), request),
    }
}

fn render_request_with<T>(translator: T, request: &CanonicalRequest) -> Result<serde_json::Value, BridgeError>
where
    T: RequestTranslator,
    T::Request: Serialize,
{
    let rendered = translator.render_request(request)?;
    to_json(&rendered)
}

/// 规范化响应 → 方言响应体
pub fn render(dialect: Dialect, response: &CanonicalResponse) -> Result<serde_json::Value, BridgeError> {
    match dialect {
        Dialect::OpenAi => to_json(&OpenAiResponseTranslator::default().render_response(response)),
        Dialect::Anthropic => {
            to_json(&AnthropicResponseTranslator::default().render_response(response))
        }
    }
}

/// 规范化事件序列 → 方言 SSE 字符串（总是以终止事件结尾）
pub fn render_events(dialect: Dialect, model: &str, events: &[CanonicalEvent]) -> Vec<String> {
    let mut translator = DialectSseTranslator::new(dialect, model.to_string());
    let mut out: Vec<String> = events
        .iter()
        .flat_map(|event| translator.translate_to_sse(event))
        .collect();
    out.extend(translator.finalize_sse());
    out
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, BridgeError> {
    serde_json::to_value(value).map_err(|e| BridgeError::Translation(format!("序列化失败: {}", e)))
}

/// 按方言分派的 SSE 转换器
#[derive(Debug)]
pub enum DialectSseTranslator {
    OpenAi(OpenAiResponseTranslator),
    Anthropic(AnthropicResponseTranslator),
}

impl DialectSseTranslator {
    pub fn new(dialect: Dialect, model: String) -> Self {
        match dialect {
            Dialect::OpenAi => Self::OpenAi(OpenAiResponseTranslator::new(model)),
            Dialect::Anthropic => Self::Anthropic(AnthropicResponseTranslator::new(model)),
        }
    }
}

impl SseResponseTranslator for DialectSseTranslator {
    fn translate_to_sse(&mut self, event: &CanonicalEvent) -> Vec<String> {
        match self {
            Self::OpenAi(t) => t.translate_to_sse(event),
            Self::Anthropic(t) => t.translate_to_sse(event),
        }
    }

    fn finalize_sse(&mut self) -> Vec<String> {
        match self {
            Self::OpenAi(t) => t.finalize_sse(),
            Self::Anthropic(t) => t.finalize_sse(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::OpenAi(t) => t.reset(),
            Self::Anthropic(t) => t.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::canonical::{ContentSegment, Role, StopReason, Usage};
    use crate::stream::{BlockKind, DeltaPayload};
    use serde_json::json;

    #[test]
    fn test_hi_round_trips_in_both_dialects() {
        let openai = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10
        });
        let anthropic = json!({
            "model": "claude-4-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10
        });

        for (dialect, body) in [(Dialect::OpenAi, openai), (Dialect::Anthropic, anthropic)] {
            let canonical = translate(dialect, body).unwrap();
            assert_eq!(canonical.turns.len(), 1);
            assert_eq!(canonical.turns[0].role, Role::User);
            assert_eq!(
                canonical.turns[0].segments,
                vec![ContentSegment::Text("hi".to_string())]
            );
            assert_eq!(canonical.params.max_tokens, Some(10));

            let rendered = render_request(dialect, &canonical).unwrap();
            let again = translate(dialect, rendered).unwrap();
            assert_eq!(again, canonical);
        }
    }

    #[test]
    fn test_equivalent_dialects_translate_to_same_turns() {
        let openai = translate(
            Dialect::OpenAi,
            json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "weather?"},
                    {"role": "assistant", "content": null, "tool_calls": [{
                        "id": "toolu_1", "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"SF\"}"}
                    }]},
                    {"role": "tool", "tool_call_id": "toolu_1", "content": "sunny"}
                ]
            }),
        )
        .unwrap();
        let anthropic = translate(
            Dialect::Anthropic,
            json!({
                "model": "m",
                "max_tokens": 1024,
                "system": "be brief",
                "messages": [
                    {"role": "user", "content": "weather?"},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "SF"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"}
                    ]}
                ]
            }),
        )
        .unwrap();
        assert_eq!(openai.system, anthropic.system);
        assert_eq!(openai.turns, anthropic.turns);
    }

    #[test]
    fn test_malformed_body_is_validation_error() {
        let err = translate(Dialect::OpenAi, json!({"messages": "nope"})).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_dangling_tool_result_rejected() {
        let err = translate(
            Dialect::Anthropic,
            json!({
                "model": "m",
                "max_tokens": 10,
                "messages": [{"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_missing", "content": "x"}
                ]}]
            }),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_render_response_per_dialect() {
        let response = CanonicalResponse {
            id: "r1".to_string(),
            model: "claude-4-sonnet".to_string(),
            segments: vec![ContentSegment::Text("done".to_string())],
            stop_reason: StopReason::MaxTokens,
            usage: Usage::new(3, 2),
            usage_estimated: false,
        };
        let openai = render(Dialect::OpenAi, &response).unwrap();
        assert_eq!(openai["choices"][0]["finish_reason"], "length");
        assert_eq!(openai["usage"]["total_tokens"], 5);

        let anthropic = render(Dialect::Anthropic, &response).unwrap();
        assert_eq!(anthropic["stop_reason"], "max_tokens");
        assert_eq!(anthropic["content"][0]["text"], "done");
    }

    #[test]
    fn test_render_events_terminates_each_dialect() {
        let events = vec![
            CanonicalEvent::TurnStart {
                id: "r1".to_string(),
                model: "m".to_string(),
                input_tokens: None,
            },
            CanonicalEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
            },
            CanonicalEvent::BlockDelta {
                index: 0,
                payload: DeltaPayload::Text("par".to_string()),
            },
        ];
        let openai = render_events(Dialect::OpenAi, "m", &events);
        assert_eq!(openai.last().map(String::as_str), Some("data: [DONE]\n\n"));

        let anthropic = render_events(Dialect::Anthropic, "m", &events);
        assert!(anthropic.iter().any(|s| s.starts_with("event: content_block_stop")));
        assert!(anthropic.last().unwrap().starts_with("event: message_stop"));
    }
}
