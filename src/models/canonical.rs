//! 规范化（方言无关）数据模型
//!
//! 两种公开方言的请求/响应都先转换为这里的结构，再转换为上游格式。
//! 轮次顺序与轮次内内容片段的顺序在转换中始终保持不变。

use serde::{Deserialize, Serialize};

/// 规范化请求
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalRequest {
    /// 客户端请求的模型名
    pub model: String,
    /// 有序的对话轮次
    pub turns: Vec<Turn>,
    /// 独立的系统指令（从不并入轮次列表）
    pub system: Option<String>,
    /// 采样参数
    pub params: SamplingParams,
    /// 是否流式
    pub stream: bool,
    /// 工具声明
    pub tools: Vec<ToolDeclaration>,
    /// 工具选择指令
    pub tool_choice: ToolChoice,
}

impl CanonicalRequest {
    /// 请求中所有文本的字符数，用于用量估算
    pub fn content_chars(&self) -> usize {
        let system = self.system.as_ref().map_or(0, |s| s.chars().count());
        system
            + self
                .turns
                .iter()
                .flat_map(|t| t.segments.iter())
                .map(ContentSegment::char_len)
                .sum::<usize>()
    }

    /// 请求是否包含图片
    pub fn has_images(&self) -> bool {
        self.turns
            .iter()
            .flat_map(|t| t.segments.iter())
            .any(|s| matches!(s, ContentSegment::Image(_)))
    }
}

/// 采样参数
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 一个对话轮次
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub segments: Vec<ContentSegment>,
}

impl Turn {
    pub fn new(role: Role, segments: Vec<ContentSegment>) -> Self {
        Self { role, segments }
    }

    /// 单个文本片段的轮次
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentSegment::Text(text.into())])
    }

    /// 拼接本轮所有文本片段
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                ContentSegment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 内容片段
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSegment {
    Text(String),
    Image(ImageData),
    ToolUse {
        id: String,
        name: String,
        /// 必须是 JSON object
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentSegment {
    /// 片段的近似字符长度
    pub fn char_len(&self) -> usize {
        match self {
            ContentSegment::Text(t) => t.chars().count(),
            ContentSegment::Image(_) => 0,
            ContentSegment::ToolUse { name, input, .. } => {
                name.chars().count() + input.to_string().chars().count()
            }
            ContentSegment::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// 图片数据
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// 内联图片（已解码的字节）
    Inline { mime_type: String, data: Vec<u8> },
    /// 远程图片，仅保留 URL
    Remote { url: String },
}

/// 工具声明
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// 工具选择
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    /// 必须调用任意工具
    Any,
    /// 必须调用指定工具
    Tool(String),
}

/// 停止原因
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    /// 正常结束
    #[default]
    EndTurn,
    /// 达到 token 上限
    MaxTokens,
    /// 需要工具调用
    ToolUse,
    /// 命中停止序列
    StopSequence,
    /// 无法识别的上游原因
    Other(String),
}

impl StopReason {
    /// 从方言字符串解析
    pub fn from_dialect_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => Self::EndTurn,
            "max_tokens" | "length" => Self::MaxTokens,
            "tool_use" | "tool_calls" => Self::ToolUse,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other(s.to_string()),
        }
    }

    /// 转换为 OpenAI 的 finish_reason
    ///
    /// OpenAI 没有通用的 "other"，未知原因统一按正常完成处理。
    pub fn to_openai_str(&self) -> &'static str {
        match self {
            Self::EndTurn | Self::StopSequence | Self::Other(_) => "stop",
            Self::MaxTokens => "length",
            Self::ToolUse => "tool_calls",
        }
    }

    /// 转换为 Anthropic 的 stop_reason
    pub fn to_anthropic_str(&self) -> &'static str {
        match self {
            Self::EndTurn | Self::Other(_) => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::ToolUse => "tool_use",
            Self::StopSequence => "stop_sequence",
        }
    }
}

/// Token 用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// 上游是否给出了有效用量（任一为 0 视为缺失）
    pub fn is_reported(&self) -> bool {
        self.input_tokens > 0 && self.output_tokens > 0
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// 规范化响应
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    /// 仅包含 Text 与 ToolUse 片段
    pub segments: Vec<ContentSegment>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// 用量是否为估算值
    pub usage_estimated: bool,
}

impl CanonicalResponse {
    /// 拼接全部文本输出
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                ContentSegment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// 响应中的工具调用
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.segments.iter().filter_map(|s| match s {
            ContentSegment::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_dialect_str() {
        assert_eq!(StopReason::from_dialect_str("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_dialect_str("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::from_dialect_str("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_dialect_str("tool_calls"), StopReason::ToolUse);
        assert_eq!(
            StopReason::from_dialect_str("refusal"),
            StopReason::Other("refusal".to_string())
        );
    }

    #[test]
    fn test_stop_reason_rendering() {
        assert_eq!(StopReason::MaxTokens.to_openai_str(), "length");
        assert_eq!(StopReason::ToolUse.to_openai_str(), "tool_calls");
        assert_eq!(StopReason::Other("x".into()).to_openai_str(), "stop");
        assert_eq!(StopReason::MaxTokens.to_anthropic_str(), "max_tokens");
        assert_eq!(StopReason::Other("x".into()).to_anthropic_str(), "end_turn");
    }

    #[test]
    fn test_usage_is_reported() {
        assert!(Usage::new(10, 5).is_reported());
        assert!(!Usage::new(0, 5).is_reported());
        assert!(!Usage::default().is_reported());
    }

    #[test]
    fn test_content_chars() {
        let request = CanonicalRequest {
            system: Some("abc".to_string()),
            turns: vec![
                Turn::text(Role::User, "hello"),
                Turn::new(
                    Role::User,
                    vec![ContentSegment::ToolResult {
                        tool_use_id: "t1".to_string(),
                        content: "ok".to_string(),
                        is_error: false,
                    }],
                ),
            ],
            ..Default::default()
        };
        assert_eq!(request.content_chars(), 3 + 5 + 2);
        assert!(!request.has_images());
    }
}
