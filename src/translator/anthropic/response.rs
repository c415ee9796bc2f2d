//! 规范化响应 → Anthropic Messages 响应
//!
//! 非流式响应直接由 `CanonicalResponse` 渲染；流式响应委托给 `AnthropicSseGenerator`。

use crate::models::anthropic::{AnthropicMessagesResponse, AnthropicUsage, ContentBlock};
use crate::models::canonical::{CanonicalResponse, ContentSegment};
use crate::stream::generators::anthropic_sse::{message_id, tool_use_id};
use crate::stream::{AnthropicSseGenerator, CanonicalEvent};
use crate::translator::traits::{ResponseTranslator, SseResponseTranslator};

/// Anthropic 响应转换器
#[derive(Debug)]
pub struct AnthropicResponseTranslator {
    /// SSE 生成器
    generator: AnthropicSseGenerator,
}

impl Default for AnthropicResponseTranslator {
    fn default() -> Self {
        Self::new("unknown".to_string())
    }
}

impl AnthropicResponseTranslator {
    /// 创建新的转换器
    pub fn new(model: String) -> Self {
        Self {
            generator: AnthropicSseGenerator::new(model),
        }
    }

    /// 使用指定的消息 ID 创建转换器
    pub fn with_id(id: String, model: String) -> Self {
        Self {
            generator: AnthropicSseGenerator::with_id(id, model),
        }
    }

    pub fn from_generator(generator: AnthropicSseGenerator) -> Self {
        Self { generator }
    }

    /// 获取消息 ID
    pub fn message_id(&self) -> &str {
        self.generator.message_id()
    }

    /// 获取模型名称
    pub fn model(&self) -> &str {
        self.generator.model()
    }
}

impl ResponseTranslator for AnthropicResponseTranslator {
    type Response = AnthropicMessagesResponse;

    fn render_response(&self, response: &CanonicalResponse) -> AnthropicMessagesResponse {
        let content = response
            .segments
            .iter()
            .filter_map(|segment| match segment {
                ContentSegment::Text(text) => Some(ContentBlock::Text { text: text.clone() }),
                ContentSegment::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    id: tool_use_id(id),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect();

        AnthropicMessagesResponse {
            id: message_id(&response.id),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: response.model.clone(),
            stop_reason: response.stop_reason.to_anthropic_str().to_string(),
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        }
    }
}

impl SseResponseTranslator for AnthropicResponseTranslator {
    fn translate_to_sse(&mut self, event: &CanonicalEvent) -> Vec<String> {
        self.generator.generate(event)
    }

    fn finalize_sse(&mut self) -> Vec<String> {
        self.generator.finish()
    }

    fn reset(&mut self) {
        self.generator = AnthropicSseGenerator::new(self.generator.model().to_string());
    }
}
