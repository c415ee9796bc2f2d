//! Anthropic Messages 请求 ⇄ 规范化请求
//!
//! Anthropic 的内容块与规范化片段几乎一一对应，主要差异：
//! - `tool_result.content` 可以是块数组，这里拍平为文本
//! - 图片来源分 `base64` 与 `url` 两种

use crate::models::anthropic::*;
use crate::models::canonical::{
    CanonicalRequest, ContentSegment, ImageData, Role, SamplingParams, ToolChoice,
    ToolDeclaration, Turn,
};
use crate::translator::content::{
    decode_image, default_input_schema, encode_image, normalize_tool_input,
};
use crate::translator::traits::{RequestTranslator, TranslateError};
use crate::translator::validate::validate_request;

/// 未指定 max_tokens 时渲染使用的默认值
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic 请求转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicRequestTranslator;

impl AnthropicRequestTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl RequestTranslator for AnthropicRequestTranslator {
    type Request = AnthropicMessagesRequest;

    fn translate_request(
        &self,
        request: AnthropicMessagesRequest,
    ) -> Result<CanonicalRequest, TranslateError> {
        let canonical = convert_anthropic_to_canonical(request)?;
        validate_request(&canonical)?;
        Ok(canonical)
    }

    fn render_request(
        &self,
        request: &CanonicalRequest,
    ) -> Result<AnthropicMessagesRequest, TranslateError> {
        Ok(convert_canonical_to_anthropic(request))
    }
}

// ============================================================================
// Anthropic → 规范化
// ============================================================================

fn convert_anthropic_to_canonical(
    request: AnthropicMessagesRequest,
) -> Result<CanonicalRequest, TranslateError> {
    if request.model.trim().is_empty() {
        return Err(TranslateError::missing_field("model"));
    }

    let system = request
        .system
        .as_ref()
        .map(SystemPrompt::to_text)
        .filter(|s| !s.is_empty());

    let turns = request
        .messages
        .into_iter()
        .enumerate()
        .map(|(idx, message)| convert_message(idx, message))
        .collect::<Result<Vec<_>, _>>()?;

    let tools = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| ToolDeclaration {
            name: t.name,
            description: t.description.unwrap_or_default(),
            input_schema: if t.input_schema.is_null() {
                default_input_schema()
            } else {
                t.input_schema
            },
        })
        .collect();

    let tool_choice = match request.tool_choice {
        Some(value) => parse_tool_choice(&value)?,
        None => ToolChoice::Auto,
    };

    Ok(CanonicalRequest {
        model: request.model,
        turns,
        system,
        params: SamplingParams {
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: request.stop_sequences.unwrap_or_default(),
        },
        stream: request.stream,
        tools,
        tool_choice,
    })
}

fn convert_message(idx: usize, message: AnthropicMessage) -> Result<Turn, TranslateError> {
    let role = match message.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            return Err(TranslateError::invalid_request(format!(
                "messages[{}]: 不支持的 role {}",
                idx, other
            )))
        }
    };

    let segments = match message.content {
        AnthropicContent::Text(text) => vec![ContentSegment::Text(text)],
        AnthropicContent::Blocks(blocks) => blocks
            .into_iter()
            .map(convert_block)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TranslateError::new(e.kind, format!("messages[{}]: {}", idx, e.message)))?,
    };

    Ok(Turn::new(role, segments))
}

fn convert_block(block: ContentBlock) -> Result<ContentSegment, TranslateError> {
    match block {
        ContentBlock::Text { text } => Ok(ContentSegment::Text(text)),
        ContentBlock::Image { source } => convert_image_source(source).map(ContentSegment::Image),
        ContentBlock::ToolUse { id, name, input } => Ok(ContentSegment::ToolUse {
            id,
            name,
            input: normalize_tool_input(input),
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Ok(ContentSegment::ToolResult {
            tool_use_id,
            content: flatten_tool_result(content),
            is_error,
        }),
    }
}

fn convert_image_source(source: ImageSource) -> Result<ImageData, TranslateError> {
    match source {
        ImageSource::Base64 { media_type, data } => decode_image(&media_type, &data),
        ImageSource::Url { url } => Ok(ImageData::Remote { url }),
    }
}

/// tool_result 内容拍平为文本，嵌套图片以占位符表示
fn flatten_tool_result(content: Option<ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text,
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::Image { .. } => Some("[image]".to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn parse_tool_choice(value: &serde_json::Value) -> Result<ToolChoice, TranslateError> {
    let choice_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| TranslateError::invalid_request("tool_choice 缺少 type"))?;
    match choice_type {
        "auto" => Ok(ToolChoice::Auto),
        "any" => Ok(ToolChoice::Any),
        "none" => Ok(ToolChoice::None),
        "tool" => value
            .get("name")
            .and_then(|n| n.as_str())
            .map(|name| ToolChoice::Tool(name.to_string()))
            .ok_or_else(|| TranslateError::missing_field("tool_choice.name")),
        other => Err(TranslateError::invalid_request(format!(
            "无效的 tool_choice: {}",
            other
        ))),
    }
}

// ============================================================================
// 规范化 → Anthropic
// ============================================================================

fn convert_canonical_to_anthropic(request: &CanonicalRequest) -> AnthropicMessagesRequest {
    let messages = request
        .turns
        .iter()
        .map(|turn| AnthropicMessage {
            role: match turn.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: match turn.segments.as_slice() {
                [ContentSegment::Text(text)] => AnthropicContent::Text(text.clone()),
                segments => AnthropicContent::Blocks(segments.iter().map(render_block).collect()),
            },
        })
        .collect();

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: (!t.description.is_empty()).then(|| t.description.clone()),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    });

    let tool_choice = match &request.tool_choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(serde_json::json!({"type": "none"})),
        ToolChoice::Any => Some(serde_json::json!({"type": "any"})),
        ToolChoice::Tool(name) => Some(serde_json::json!({"type": "tool", "name": name})),
    };

    AnthropicMessagesRequest {
        model: request.model.clone(),
        messages,
        system: request.system.clone().map(SystemPrompt::Text),
        max_tokens: request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream: request.stream,
        temperature: request.params.temperature,
        top_p: request.params.top_p,
        top_k: request.params.top_k,
        stop_sequences: (!request.params.stop_sequences.is_empty())
            .then(|| request.params.stop_sequences.clone()),
        tools,
        tool_choice,
    }
}

fn render_block(segment: &ContentSegment) -> ContentBlock {
    match segment {
        ContentSegment::Text(text) => ContentBlock::Text { text: text.clone() },
        ContentSegment::Image(ImageData::Inline { mime_type, data }) => ContentBlock::Image {
            source: ImageSource::Base64 {
                media_type: mime_type.clone(),
                data: encode_image(data),
            },
        },
        ContentSegment::Image(ImageData::Remote { url }) => ContentBlock::Image {
            source: ImageSource::Url { url: url.clone() },
        },
        ContentSegment::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentSegment::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: Some(ToolResultContent::Text(content.clone())),
            is_error: *is_error,
        },
    }
}
