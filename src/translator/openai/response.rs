//! 规范化响应 → OpenAI Chat Completions 响应
//!
//! 非流式响应直接由 `CanonicalResponse` 渲染；流式响应委托给 `OpenAiSseGenerator`。

use crate::models::canonical::CanonicalResponse;
use crate::models::openai::{
    ChatChoice, ChatCompletionResponse, CompletionUsage, FunctionCall, ResponseMessage, ToolCall,
};
use crate::stream::generators::openai_sse::{completion_id, tool_call_id};
use crate::stream::{CanonicalEvent, OpenAiSseGenerator};
use crate::translator::traits::{ResponseTranslator, SseResponseTranslator};

/// OpenAI 响应转换器
#[derive(Debug)]
pub struct OpenAiResponseTranslator {
    /// SSE 生成器
    generator: OpenAiSseGenerator,
}

impl Default for OpenAiResponseTranslator {
    fn default() -> Self {
        Self::new("unknown".to_string())
    }
}

impl OpenAiResponseTranslator {
    /// 创建新的转换器
    pub fn new(model: String) -> Self {
        Self {
            generator: OpenAiSseGenerator::new(model),
        }
    }

    /// 使用指定的响应 ID 创建转换器
    pub fn with_id(id: String, model: String) -> Self {
        Self {
            generator: OpenAiSseGenerator::with_id(id, model),
        }
    }

    pub fn from_generator(generator: OpenAiSseGenerator) -> Self {
        Self { generator }
    }

    /// 获取响应 ID
    pub fn response_id(&self) -> &str {
        self.generator.response_id()
    }

    /// 获取模型名称
    pub fn model(&self) -> &str {
        self.generator.model()
    }
}

impl ResponseTranslator for OpenAiResponseTranslator {
    type Response = ChatCompletionResponse;

    fn render_response(&self, response: &CanonicalResponse) -> ChatCompletionResponse {
        let text = response.text();
        let tool_calls: Vec<ToolCall> = response
            .tool_uses()
            .map(|(id, name, input)| ToolCall {
                id: tool_call_id(id),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: input.to_string(),
                },
            })
            .collect();

        ChatCompletionResponse {
            id: completion_id(&response.id),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason: response.stop_reason.to_openai_str().to_string(),
            }],
            usage: CompletionUsage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.total(),
            },
        }
    }
}

impl SseResponseTranslator for OpenAiResponseTranslator {
    fn translate_to_sse(&mut self, event: &CanonicalEvent) -> Vec<String> {
        self.generator.generate(event)
    }

    fn finalize_sse(&mut self) -> Vec<String> {
        self.generator.finish()
    }

    fn reset(&mut self) {
        self.generator = OpenAiSseGenerator::new(self.generator.model().to_string());
    }
}
