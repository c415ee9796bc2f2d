//! OpenAI Chat Completions 请求 ⇄ 规范化请求
//!
//! - `system` / `developer` 消息合并为规范化的系统指令
//! - `assistant.tool_calls` 变为 `tool_use` 片段，参数字符串解析为 object
//! - 每条 `tool` 消息变为一个只含 `tool_result` 的 user 轮次

use crate::models::canonical::{
    CanonicalRequest, ContentSegment, ImageData, Role, SamplingParams, ToolChoice,
    ToolDeclaration, Turn,
};
use crate::models::openai::*;
use crate::translator::content::{
    default_input_schema, parse_image_url, parse_tool_arguments, to_data_url,
};
use crate::translator::traits::{RequestTranslator, TranslateError};
use crate::translator::validate::validate_request;

/// OpenAI 请求转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiRequestTranslator;

impl OpenAiRequestTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl RequestTranslator for OpenAiRequestTranslator {
    type Request = ChatCompletionRequest;

    fn translate_request(&self, request: ChatCompletionRequest) -> Result<CanonicalRequest, TranslateError> {
        let canonical = convert_openai_to_canonical(request)?;
        validate_request(&canonical)?;
        Ok(canonical)
    }

    fn render_request(&self, request: &CanonicalRequest) -> Result<ChatCompletionRequest, TranslateError> {
        Ok(convert_canonical_to_openai(request))
    }
}

// ============================================================================
// OpenAI → 规范化
// ============================================================================

fn convert_openai_to_canonical(request: ChatCompletionRequest) -> Result<CanonicalRequest, TranslateError> {
    if request.model.trim().is_empty() {
        return Err(TranslateError::missing_field("model"));
    }

    let mut system_parts: Vec<String> = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();

    for (idx, message) in request.messages.into_iter().enumerate() {
        match message.role.as_str() {
            "system" | "developer" => {
                let text = content_to_text(message.content.as_ref(), idx)?;
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            "user" => {
                let segments = content_to_segments(message.content, idx)?;
                turns.push(Turn::new(Role::User, segments));
            }
            "assistant" => {
                let mut segments = content_to_segments(message.content, idx)?;
                for call in message.tool_calls.unwrap_or_default() {
                    if call.call_type != "function" {
                        return Err(TranslateError::invalid_request(format!(
                            "messages[{}]: 不支持的 tool_call 类型 {}",
                            idx, call.call_type
                        )));
                    }
                    segments.push(ContentSegment::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_tool_arguments(&call.function.arguments)?,
                    });
                }
                turns.push(Turn::new(Role::Assistant, segments));
            }
            "tool" => {
                let tool_use_id = message
                    .tool_call_id
                    .clone()
                    .ok_or_else(|| TranslateError::missing_field("tool_call_id"))?;
                let content = content_to_text(message.content.as_ref(), idx)?;
                turns.push(Turn::new(
                    Role::User,
                    vec![ContentSegment::ToolResult {
                        tool_use_id,
                        content,
                        is_error: false,
                    }],
                ));
            }
            other => {
                return Err(TranslateError::invalid_request(format!(
                    "messages[{}]: 不支持的 role {}",
                    idx, other
                )));
            }
        }
    }

    let tools = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(convert_tool)
        .collect::<Result<Vec<_>, _>>()?;

    let tool_choice = match request.tool_choice {
        Some(value) => parse_tool_choice(&value)?,
        None => ToolChoice::Auto,
    };

    Ok(CanonicalRequest {
        model: request.model,
        turns,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        params: SamplingParams {
            max_tokens: request.max_completion_tokens.or(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: None,
            stop_sequences: request.stop.map(StopSequences::into_vec).unwrap_or_default(),
        },
        stream: request.stream,
        tools,
        tool_choice,
    })
}

fn content_to_segments(
    content: Option<MessageContent>,
    idx: usize,
) -> Result<Vec<ContentSegment>, TranslateError> {
    match content {
        None => Ok(Vec::new()),
        Some(MessageContent::Text(text)) => Ok(vec![ContentSegment::Text(text)]),
        Some(MessageContent::Parts(parts)) => parts
            .into_iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(ContentSegment::Text(text)),
                ContentPart::ImageUrl { image_url } => parse_image_url(&image_url.url)
                    .map(ContentSegment::Image)
                    .map_err(|e| {
                        TranslateError::new(e.kind, format!("messages[{}]: {}", idx, e.message))
                    }),
            })
            .collect(),
    }
}

/// system / tool 消息只接受文本
fn content_to_text(content: Option<&MessageContent>, idx: usize) -> Result<String, TranslateError> {
    match content {
        None => Ok(String::new()),
        Some(MessageContent::Text(text)) => Ok(text.clone()),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(text.as_str()),
                ContentPart::ImageUrl { .. } => Err(TranslateError::unsupported(format!(
                    "messages[{}]: 该消息不支持图片",
                    idx
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|texts| texts.join("\n")),
    }
}

fn convert_tool(tool: Tool) -> Result<ToolDeclaration, TranslateError> {
    if tool.tool_type != "function" {
        return Err(TranslateError::invalid_request(format!(
            "不支持的工具类型: {}",
            tool.tool_type
        )));
    }
    Ok(ToolDeclaration {
        name: tool.function.name,
        description: tool.function.description.unwrap_or_default(),
        input_schema: tool.function.parameters.unwrap_or_else(default_input_schema),
    })
}

fn parse_tool_choice(value: &serde_json::Value) -> Result<ToolChoice, TranslateError> {
    if let Some(s) = value.as_str() {
        return match s {
            "auto" => Ok(ToolChoice::Auto),
            "none" => Ok(ToolChoice::None),
            "required" => Ok(ToolChoice::Any),
            other => Err(TranslateError::invalid_request(format!(
                "无效的 tool_choice: {}",
                other
            ))),
        };
    }
    value
        .get("function")
        .and_then(|f| f.get("name"))
        .and_then(|n| n.as_str())
        .map(|name| ToolChoice::Tool(name.to_string()))
        .ok_or_else(|| TranslateError::invalid_request("无效的 tool_choice"))
}

// ============================================================================
// 规范化 → OpenAI
// ============================================================================

fn convert_canonical_to_openai(request: &CanonicalRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(ChatMessage::text("system", system.clone()));
    }

    for turn in &request.turns {
        match turn.role {
            Role::User => render_user_turn(turn, &mut messages),
            Role::Assistant => messages.push(render_assistant_turn(turn)),
        }
    }

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| Tool {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: t.name.clone(),
                    description: (!t.description.is_empty()).then(|| t.description.clone()),
                    parameters: Some(t.input_schema.clone()),
                },
            })
            .collect()
    });

    let tool_choice = match &request.tool_choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(serde_json::json!("none")),
        ToolChoice::Any => Some(serde_json::json!("required")),
        ToolChoice::Tool(name) => Some(serde_json::json!({
            "type": "function",
            "function": {"name": name}
        })),
    };

    let stop = match request.params.stop_sequences.len() {
        0 => None,
        1 => Some(StopSequences::Single(request.params.stop_sequences[0].clone())),
        _ => Some(StopSequences::Multiple(request.params.stop_sequences.clone())),
    };

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        temperature: request.params.temperature,
        top_p: request.params.top_p,
        max_tokens: request.params.max_tokens,
        max_completion_tokens: None,
        stop,
        stream: request.stream,
        tools,
        tool_choice,
    }
}

/// user 轮次：连续的普通片段合并为一条 user 消息，每个 tool_result 单独成为 tool 消息
fn render_user_turn(turn: &Turn, messages: &mut Vec<ChatMessage>) {
    let mut pending: Vec<&ContentSegment> = Vec::new();

    for segment in &turn.segments {
        if let ContentSegment::ToolResult {
            tool_use_id,
            content,
            ..
        } = segment
        {
            if !pending.is_empty() {
                messages.push(user_message(&pending));
                pending.clear();
            }
            messages.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(MessageContent::Text(content.clone())),
                name: None,
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            });
        } else {
            pending.push(segment);
        }
    }

    if !pending.is_empty() || turn.segments.is_empty() {
        messages.push(user_message(&pending));
    }
}

fn user_message(segments: &[&ContentSegment]) -> ChatMessage {
    let content = match segments {
        [ContentSegment::Text(text)] => MessageContent::Text(text.clone()),
        _ => MessageContent::Parts(segments.iter().filter_map(|s| content_part(s)).collect()),
    };
    ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    }
}

fn content_part(segment: &ContentSegment) -> Option<ContentPart> {
    match segment {
        ContentSegment::Text(text) => Some(ContentPart::Text { text: text.clone() }),
        ContentSegment::Image(ImageData::Inline { mime_type, data }) => Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: to_data_url(mime_type, data),
                detail: None,
            },
        }),
        ContentSegment::Image(ImageData::Remote { url }) => Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.clone(),
                detail: None,
            },
        }),
        ContentSegment::ToolUse { .. } | ContentSegment::ToolResult { .. } => None,
    }
}

fn render_assistant_turn(turn: &Turn) -> ChatMessage {
    let parts: Vec<&ContentSegment> = turn
        .segments
        .iter()
        .filter(|s| !matches!(s, ContentSegment::ToolUse { .. }))
        .collect();

    let content = match parts.as_slice() {
        [] => None,
        [ContentSegment::Text(text)] => Some(MessageContent::Text(text.clone())),
        _ => Some(MessageContent::Parts(
            parts.iter().filter_map(|s| content_part(s)).collect(),
        )),
    };

    let tool_calls: Vec<ToolCall> = turn
        .segments
        .iter()
        .filter_map(|s| match s {
            ContentSegment::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            _ => None,
        })
        .collect();

    ChatMessage {
        role: "assistant".to_string(),
        content,
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}
