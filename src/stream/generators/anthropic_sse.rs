//! Anthropic SSE 生成器
//!
//! 将 `CanonicalEvent` 转换为 Anthropic Messages API SSE 格式。
//!
//! # 格式说明
//!
//! Anthropic SSE 格式：
//! ```text
//! event: message_start
//! data: {"type":"message_start","message":{...}}
//!
//! event: content_block_start
//! data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}
//!
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//!
//! event: message_delta
//! data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{...}}
//!
//! event: message_stop
//! data: {"type":"message_stop"}
//! ```

use super::BlockTracker;
use crate::error::BridgeError;
use crate::models::canonical::{StopReason, Usage};
use crate::stream::events::{BlockKind, CanonicalEvent, DeltaPayload};
use uuid::Uuid;

/// Anthropic SSE 生成器
#[derive(Debug)]
pub struct AnthropicSseGenerator {
    /// 消息 ID（带 `msg_` 前缀）
    message_id: String,
    /// 模型名称
    model: String,
    /// 是否已发送 message_start 事件
    message_started: bool,
    /// 是否已发送 message_stop 事件
    message_stopped: bool,
    /// 块生命周期跟踪
    blocks: BlockTracker,
    /// 输入 token 数量
    input_tokens: u32,
}

impl Default for AnthropicSseGenerator {
    fn default() -> Self {
        Self::new("unknown".to_string())
    }
}

impl AnthropicSseGenerator {
    /// 创建新的生成器
    pub fn new(model: String) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), model)
    }

    /// 使用指定的消息 ID 创建生成器
    pub fn with_id(id: String, model: String) -> Self {
        Self {
            message_id: message_id(&id),
            model,
            message_started: false,
            message_stopped: false,
            blocks: BlockTracker::default(),
            input_tokens: 0,
        }
    }

    /// 将 CanonicalEvent 转换为 Anthropic SSE 字符串列表
    ///
    /// # 返回
    ///
    /// SSE 事件字符串列表，每个字符串都是完整的 SSE 事件（包含 `event:` 和 `data:` 行）
    pub fn generate(&mut self, event: &CanonicalEvent) -> Vec<String> {
        let mut sse_events = Vec::new();
        if self.message_stopped {
            return sse_events;
        }

        // 确保发送 message_start
        if !self.message_started {
            if let CanonicalEvent::TurnStart {
                id,
                model,
                input_tokens,
            } = event
            {
                self.message_id = message_id(id);
                self.model = model.clone();
                self.input_tokens = input_tokens.unwrap_or(0);
            }
            sse_events.push(self.create_message_start());
            sse_events.push(self.create_ping());
            self.message_started = true;
        }

        match event {
            CanonicalEvent::TurnStart { .. } => {
                // 已经在上面处理了
            }

            CanonicalEvent::BlockStart { index, kind } => {
                if self.blocks.start(*index) {
                    sse_events.push(match kind {
                        BlockKind::Text => self.create_content_block_start_text(*index),
                        BlockKind::ToolUse { id, name } => {
                            self.create_content_block_start_tool(*index, id, name)
                        }
                    });
                }
            }

            CanonicalEvent::BlockDelta { index, payload } => {
                if self.blocks.is_open(*index) {
                    sse_events.push(match payload {
                        DeltaPayload::Text(text) => self.create_text_delta(*index, text),
                        DeltaPayload::ToolInput(json) => self.create_input_json_delta(*index, json),
                    });
                }
            }

            CanonicalEvent::BlockStop { index } => {
                if self.blocks.stop(*index) {
                    sse_events.push(self.create_content_block_stop(*index));
                }
            }

            CanonicalEvent::TurnDelta { stop_reason, usage } => {
                sse_events.extend(self.close_open_blocks());
                sse_events.push(self.create_message_delta(stop_reason, usage));
            }

            CanonicalEvent::TurnStop => {
                sse_events.extend(self.close_open_blocks());
                sse_events.push(self.create_message_stop());
                self.message_stopped = true;
            }

            CanonicalEvent::Error(error) => {
                sse_events.extend(self.close_open_blocks());
                sse_events.push(self.create_error(error));
            }
        }

        sse_events
    }

    /// 流结束时补齐终止事件
    pub fn finish(&mut self) -> Vec<String> {
        if self.message_stopped {
            return Vec::new();
        }
        tracing::warn!("[STREAM] 事件序列缺少 TurnStop，补发 message_stop");
        self.generate(&CanonicalEvent::TurnStop)
    }

    /// 获取消息 ID
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// 获取模型名称
    pub fn model(&self) -> &str {
        &self.model
    }

    fn close_open_blocks(&mut self) -> Vec<String> {
        self.blocks
            .drain_open()
            .into_iter()
            .map(|index| self.create_content_block_stop(index))
            .collect()
    }

    // ========================================================================
    // SSE 事件创建方法
    // ========================================================================

    fn create_message_start(&self) -> String {
        let event = serde_json::json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": serde_json::Value::Null,
                "stop_sequence": serde_json::Value::Null,
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": 0
                }
            }
        });
        format!("event: message_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_text(&self, index: u32) -> String {
        let event = serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "text",
                "text": ""
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_tool(&self, index: u32, id: &str, name: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "tool_use",
                "id": tool_use_id(id),
                "name": name,
                "input": {}
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_text_delta(&self, index: u32, text: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "text_delta",
                "text": text
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_input_json_delta(&self, index: u32, partial_json: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "input_json_delta",
                "partial_json": partial_json
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_content_block_stop(&self, index: u32) -> String {
        let event = serde_json::json!({
            "type": "content_block_stop",
            "index": index
        });
        format!("event: content_block_stop\ndata: {}\n\n", event)
    }

    fn create_message_delta(&self, stop_reason: &StopReason, usage: &Usage) -> String {
        let event = serde_json::json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason.to_anthropic_str(),
                "stop_sequence": serde_json::Value::Null
            },
            "usage": {
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens
            }
        });
        format!("event: message_delta\ndata: {}\n\n", event)
    }

    fn create_message_stop(&self) -> String {
        let event = serde_json::json!({
            "type": "message_stop"
        });
        format!("event: message_stop\ndata: {}\n\n", event)
    }

    fn create_ping(&self) -> String {
        let event = serde_json::json!({
            "type": "ping"
        });
        format!("event: ping\ndata: {}\n\n", event)
    }

    fn create_error(&self, error: &BridgeError) -> String {
        format!("event: error\ndata: {}\n\n", error.to_anthropic_json())
    }
}

/// 规范化 ID → Anthropic 消息 ID
pub fn message_id(id: &str) -> String {
    if id.starts_with("msg_") {
        id.to_string()
    } else {
        format!("msg_{}", id)
    }
}

/// 工具调用 ID；空 ID 生成新的 `toolu_` ID
pub fn tool_use_id(id: &str) -> String {
    if id.is_empty() {
        let hex = Uuid::new_v4().simple().to_string();
        format!("toolu_{}", &hex[..16])
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> CanonicalEvent {
        CanonicalEvent::TurnStart {
            id: "123".to_string(),
            model: "claude-4-sonnet".to_string(),
            input_tokens: Some(7),
        }
    }

    #[test]
    fn test_generate_message_start() {
        let mut generator = AnthropicSseGenerator::default();
        let sse = generator.generate(&start());
        assert_eq!(sse.len(), 2);
        assert!(sse[0].starts_with("event: message_start\ndata: "));
        assert!(sse[0].contains("\"id\":\"msg_123\""));
        assert!(sse[0].contains("\"input_tokens\":7"));
        assert!(sse[1].starts_with("event: ping"));
    }

    #[test]
    fn test_generate_text_content() {
        let mut generator = AnthropicSseGenerator::default();
        let _ = generator.generate(&start());

        let sse = generator.generate(&CanonicalEvent::BlockStart {
            index: 0,
            kind: BlockKind::Text,
        });
        assert!(sse[0].contains("content_block_start"));
        assert!(sse[0].contains("\"type\":\"text\""));

        let sse = generator.generate(&CanonicalEvent::BlockDelta {
            index: 0,
            payload: DeltaPayload::Text("Hello".to_string()),
        });
        assert!(sse[0].contains("text_delta"));
        assert!(sse[0].contains("Hello"));
    }

    #[test]
    fn test_generate_tool_use() {
        let mut generator = AnthropicSseGenerator::default();
        let _ = generator.generate(&start());

        let sse = generator.generate(&CanonicalEvent::BlockStart {
            index: 1,
            kind: BlockKind::ToolUse {
                id: "toolu_abc".to_string(),
                name: "read_file".to_string(),
            },
        });
        assert!(sse[0].contains("\"type\":\"tool_use\""));
        assert!(sse[0].contains("\"id\":\"toolu_abc\""));
        assert!(sse[0].contains("\"name\":\"read_file\""));

        let sse = generator.generate(&CanonicalEvent::BlockDelta {
            index: 1,
            payload: DeltaPayload::ToolInput("{\"path\":".to_string()),
        });
        assert!(sse[0].contains("input_json_delta"));
    }

    #[test]
    fn test_generate_turn_end() {
        let mut generator = AnthropicSseGenerator::default();
        let _ = generator.generate(&start());

        let sse = generator.generate(&CanonicalEvent::TurnDelta {
            stop_reason: StopReason::MaxTokens,
            usage: Usage::new(3, 9),
        });
        assert_eq!(sse.len(), 1);
        assert!(sse[0].contains("message_delta"));
        assert!(sse[0].contains("max_tokens"));
        assert!(sse[0].contains("\"output_tokens\":9"));

        let sse = generator.generate(&CanonicalEvent::TurnStop);
        assert_eq!(sse, vec!["event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string()]);
        assert!(generator.generate(&CanonicalEvent::TurnStop).is_empty());
        assert!(generator.finish().is_empty());
    }

    #[test]
    fn test_orphan_delta_is_dropped() {
        let mut generator = AnthropicSseGenerator::default();
        let _ = generator.generate(&start());
        let sse = generator.generate(&CanonicalEvent::BlockDelta {
            index: 4,
            payload: DeltaPayload::Text("x".to_string()),
        });
        assert!(sse.is_empty());
        assert!(generator.generate(&CanonicalEvent::BlockStop { index: 4 }).is_empty());
    }

    #[test]
    fn test_error_closes_open_block() {
        let mut generator = AnthropicSseGenerator::default();
        let _ = generator.generate(&start());
        let _ = generator.generate(&CanonicalEvent::BlockStart {
            index: 0,
            kind: BlockKind::Text,
        });
        let sse = generator.generate(&CanonicalEvent::Error(BridgeError::transient("reset")));
        assert_eq!(sse.len(), 2);
        assert!(sse[0].contains("content_block_stop"));
        assert!(sse[1].starts_with("event: error\n"));
        assert!(sse[1].contains("overloaded_error"));

        let sse = generator.finish();
        assert_eq!(sse.len(), 1);
        assert!(sse[0].contains("message_stop"));
    }
}
