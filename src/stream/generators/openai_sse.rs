//! OpenAI SSE 生成器
//!
//! 将 `CanonicalEvent` 转换为 OpenAI Chat Completions SSE 格式。
//!
//! # 格式说明
//!
//! OpenAI SSE 格式：
//! ```text
//! data: {"id":"chatcmpl-xxx","object":"chat.completion.chunk","created":1234567890,"model":"gpt-4","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}
//!
//! data: [DONE]
//! ```
//!
//! OpenAI 没有块的概念：文本块只产生 `content` 增量，工具块按出现顺序
//! 映射到 `tool_calls[index]`。

use super::BlockTracker;
use crate::error::BridgeError;
use crate::models::canonical::{StopReason, Usage};
use crate::stream::events::{BlockKind, CanonicalEvent, DeltaPayload};
use serde::Serialize;
use std::collections::HashMap;

/// OpenAI SSE 生成器
#[derive(Debug)]
pub struct OpenAiSseGenerator {
    /// 响应 ID（带 `chatcmpl-` 前缀）
    response_id: String,
    /// 模型名称
    model: String,
    /// 创建时间戳
    created: i64,
    /// 是否已发送 role 块
    role_sent: bool,
    /// 是否已发送 [DONE]
    done: bool,
    /// 块生命周期跟踪
    blocks: BlockTracker,
    /// 工具块索引 → tool_calls 数组索引
    tool_indices: HashMap<u32, usize>,
    /// 下一个工具调用索引
    next_tool_index: usize,
}

impl Default for OpenAiSseGenerator {
    fn default() -> Self {
        Self::new("unknown".to_string())
    }
}

impl OpenAiSseGenerator {
    /// 创建新的生成器
    pub fn new(model: String) -> Self {
        Self::with_id(uuid::Uuid::new_v4().simple().to_string(), model)
    }

    /// 使用指定的响应 ID 创建生成器
    pub fn with_id(id: String, model: String) -> Self {
        Self {
            response_id: completion_id(&id),
            model,
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
            done: false,
            blocks: BlockTracker::default(),
            tool_indices: HashMap::new(),
            next_tool_index: 0,
        }
    }

    /// 将 CanonicalEvent 转换为 OpenAI SSE 字符串列表
    pub fn generate(&mut self, event: &CanonicalEvent) -> Vec<String> {
        let mut sse_events = Vec::new();
        if self.done {
            return sse_events;
        }

        if let CanonicalEvent::TurnStart { id, model, .. } = event {
            if !self.role_sent {
                self.response_id = completion_id(id);
                self.model = model.clone();
            }
        }
        if !self.role_sent {
            self.role_sent = true;
            sse_events.push(self.chunk(
                OpenAiDelta {
                    role: Some("assistant"),
                    content: Some(""),
                    tool_calls: None,
                },
                None,
                None,
            ));
        }

        match event {
            CanonicalEvent::TurnStart { .. } => {}

            CanonicalEvent::BlockStart { index, kind } => {
                if !self.blocks.start(*index) {
                    return sse_events;
                }
                // 文本块不需要单独的开始事件
                if let BlockKind::ToolUse { id, name } = kind {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indices.insert(*index, tool_index);
                    let id = tool_call_id(id);
                    sse_events.push(self.chunk(
                        OpenAiDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![OpenAiToolCallDelta {
                                index: tool_index,
                                id: Some(id.as_str()),
                                r#type: Some("function"),
                                function: OpenAiFunctionDelta {
                                    name: Some(name.as_str()),
                                    arguments: "",
                                },
                            }]),
                        },
                        None,
                        None,
                    ));
                }
            }

            CanonicalEvent::BlockDelta { index, payload } => {
                if !self.blocks.is_open(*index) {
                    return sse_events;
                }
                let delta = match payload {
                    DeltaPayload::Text(text) => Some(OpenAiDelta {
                        role: None,
                        content: Some(text.as_str()),
                        tool_calls: None,
                    }),
                    DeltaPayload::ToolInput(json) => {
                        self.tool_indices.get(index).map(|tool_index| OpenAiDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![OpenAiToolCallDelta {
                                index: *tool_index,
                                id: None,
                                r#type: None,
                                function: OpenAiFunctionDelta {
                                    name: None,
                                    arguments: json.as_str(),
                                },
                            }]),
                        })
                    }
                };
                if let Some(delta) = delta {
                    sse_events.push(self.chunk(delta, None, None));
                }
            }

            CanonicalEvent::BlockStop { index } => {
                // OpenAI 格式不需要单独的块结束事件
                self.blocks.stop(*index);
            }

            CanonicalEvent::TurnDelta { stop_reason, usage } => {
                self.blocks.drain_open();
                sse_events.push(self.chunk(
                    OpenAiDelta::default(),
                    Some(stop_reason),
                    Some(usage),
                ));
            }

            CanonicalEvent::TurnStop => {
                self.blocks.drain_open();
                sse_events.push(self.generate_done());
                self.done = true;
            }

            CanonicalEvent::Error(error) => {
                self.blocks.drain_open();
                sse_events.push(self.create_error(error));
            }
        }

        sse_events
    }

    /// 流结束时补齐 [DONE]
    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        tracing::warn!("[STREAM] 事件序列缺少 TurnStop，补发 [DONE]");
        self.done = true;
        vec![self.generate_done()]
    }

    /// 生成 [DONE] 事件
    pub fn generate_done(&self) -> String {
        "data: [DONE]\n\n".to_string()
    }

    /// 获取响应 ID
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// 获取模型名称
    pub fn model(&self) -> &str {
        &self.model
    }

    fn chunk(&self, delta: OpenAiDelta<'_>, stop_reason: Option<&StopReason>, usage: Option<&Usage>) -> String {
        let chunk = OpenAiStreamChunk {
            id: &self.response_id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: vec![OpenAiChoice {
                index: 0,
                delta,
                finish_reason: stop_reason.map(StopReason::to_openai_str),
            }],
            usage: usage.map(|u| OpenAiUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.total(),
            }),
        };
        match serde_json::to_string(&chunk) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                tracing::error!("[STREAM] 序列化 OpenAI chunk 失败: {}", e);
                String::new()
            }
        }
    }

    fn create_error(&self, error: &BridgeError) -> String {
        format!("data: {}\n\n", error.to_openai_json())
    }
}

/// 规范化 ID → OpenAI 响应 ID
pub fn completion_id(id: &str) -> String {
    if id.starts_with("chatcmpl-") {
        id.to_string()
    } else {
        format!("chatcmpl-{}", id)
    }
}

/// 工具调用 ID；空 ID 生成新的 `call_` ID
pub fn tool_call_id(id: &str) -> String {
    if id.is_empty() {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("call_{}", &hex[..24])
    } else {
        id.to_string()
    }
}

// ============================================================================
// OpenAI SSE 数据结构
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiStreamChunk<'a> {
    id: &'a str,
    object: &'a str,
    created: i64,
    model: &'a str,
    choices: Vec<OpenAiChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Serialize)]
struct OpenAiChoice<'a> {
    index: usize,
    delta: OpenAiDelta<'a>,
    finish_reason: Option<&'a str>,
}

#[derive(Debug, Default, Serialize)]
struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallDelta<'a>>>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallDelta<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<&'a str>,
    function: OpenAiFunctionDelta<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
