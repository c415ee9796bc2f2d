//! 规范化请求转换为 Warp multi-agent 请求包
//!
//! 最后一个 user 轮次作为本次输入放入 `input.user_inputs`，之前的轮次
//! 按顺序展开为 `task_context.tasks[0].messages` 历史。

use crate::config::UpstreamConfig;
use crate::error::BridgeError;
use crate::models::canonical::{CanonicalRequest, ContentSegment, ImageData, Role, Turn};
use crate::models::warp::*;
use crate::translator::content::encode_image;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// 内置模型映射表
///
/// 旧版模型名映射到上游当前提供的模型。配置中的别名优先。
pub fn get_model_map() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("claude-3-sonnet", "claude-4-sonnet");
    map.insert("claude-3-opus", "claude-4-opus");
    map.insert("claude-3-haiku", "claude-4-sonnet");
    map.insert("gpt-4", "gpt-4o");
    map.insert("gpt-3.5-turbo", "claude-4-sonnet");
    map
}

/// 上游提供的模型列表，用于 `/v1/models`
pub fn get_supported_models() -> Vec<&'static str> {
    vec![
        "claude-4-sonnet",
        "claude-4-opus",
        "claude-4.1-opus",
        "gpt-5",
        "gpt-4o",
        "gpt-4.1",
        "o3",
        "o4-mini",
        "gemini-2.5-pro",
    ]
}

/// 可以处理图片的模型
const VISION_MODELS: &[&str] = &["claude-4.1-opus", "claude-4-opus", "gpt-4o", "gpt-4.1"];

/// 请求含图片且所选模型不支持时使用的模型
pub const DEFAULT_VISION_MODEL: &str = "claude-4.1-opus";

const PLANNING_MODEL: &str = "gpt-5 (high reasoning)";
const CODING_MODEL: &str = "auto";

/// 系统指令附件的键名
const SYSTEM_PROMPT_ATTACHMENT: &str = "SYSTEM_PROMPT";

/// 请求包构建器
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    default_model: String,
    aliases: HashMap<String, String>,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::from_config(&UpstreamConfig::default())
    }
}

impl PacketBuilder {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let mut aliases: HashMap<String, String> = get_model_map()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        aliases.extend(config.model_aliases.clone());
        Self {
            default_model: config.default_model.clone(),
            aliases,
        }
    }

    /// 解析上游模型名
    pub fn resolve_model(&self, requested: &str, has_images: bool) -> String {
        let requested = requested.trim();
        let model = if requested.is_empty() {
            self.default_model.clone()
        } else {
            self.aliases
                .get(requested)
                .cloned()
                .unwrap_or_else(|| requested.to_string())
        };

        if has_images && !VISION_MODELS.contains(&model.as_str()) {
            tracing::debug!(
                "[BRIDGE] 请求包含图片，模型 {} 切换为 {}",
                model,
                DEFAULT_VISION_MODEL
            );
            return DEFAULT_VISION_MODEL.to_string();
        }
        model
    }

    /// 构建请求包
    pub fn build(&self, request: &CanonicalRequest) -> Result<WarpPacket, BridgeError> {
        let input_index = request
            .turns
            .iter()
            .rposition(|t| t.role == Role::User)
            .ok_or_else(|| BridgeError::Validation("请求中没有 user 消息".to_string()))?;

        let task_id = Uuid::new_v4().to_string();
        let mut messages = Vec::new();
        for (idx, turn) in request.turns.iter().enumerate() {
            if idx != input_index {
                append_history(&mut messages, turn, &task_id);
            }
        }

        let (input, placed_system) =
            build_input(&request.turns[input_index], request.system.as_deref());
        if !placed_system {
            if let Some(system) = request.system.as_deref() {
                attach_system_to_history(&mut messages, system);
            }
        }

        let mcp_context = if request.tools.is_empty() {
            None
        } else {
            Some(McpContext {
                tools: request
                    .tools
                    .iter()
                    .map(|tool| McpTool {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                    })
                    .collect(),
            })
        };

        let base = self.resolve_model(&request.model, request.has_images());
        tracing::debug!(
            "[BRIDGE] 构建请求包: model={}, history={}, inputs={}, tools={}",
            base,
            messages.len(),
            input.user_inputs.inputs.len(),
            request.tools.len()
        );

        Ok(WarpPacket {
            task_context: TaskContext {
                tasks: vec![WarpTask {
                    id: task_id.clone(),
                    description: String::new(),
                    status: serde_json::json!({"in_progress": {}}),
                    messages,
                }],
                active_task_id: task_id,
            },
            input,
            settings: WarpSettings::with_model(ModelConfig {
                base,
                planning: PLANNING_MODEL.to_string(),
                coding: CODING_MODEL.to_string(),
            }),
            mcp_context,
            metadata: WarpMetadata::default(),
        })
    }
}

/// 用户轮次中的文本与图片
struct UserContent {
    text: String,
    inline_images: Vec<WarpImage>,
    image_count: usize,
}

fn collect_user_content(turn: &Turn) -> UserContent {
    let mut parts: Vec<String> = Vec::new();
    let mut inline_images = Vec::new();
    let mut image_count = 0;
    for segment in &turn.segments {
        match segment {
            ContentSegment::Text(text) => parts.push(text.clone()),
            ContentSegment::Image(ImageData::Inline { mime_type, data }) => {
                image_count += 1;
                inline_images.push(WarpImage {
                    data: format!("base64:{}", encode_image(data)),
                    mime_type: mime_type.clone(),
                });
            }
            // 上游无法拉取远程图片
            ContentSegment::Image(ImageData::Remote { url }) => {
                parts.push(format!("[image: {}]", url));
            }
            ContentSegment::ToolUse { .. } | ContentSegment::ToolResult { .. } => {}
        }
    }
    UserContent {
        text: parts.join("\n"),
        inline_images,
        image_count,
    }
}

fn tool_results(turn: &Turn) -> impl Iterator<Item = WarpToolCallResult> + '_ {
    turn.segments.iter().filter_map(|segment| match segment {
        ContentSegment::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(tool_call_result(tool_use_id, content, *is_error)),
        _ => None,
    })
}

fn tool_call_result(tool_use_id: &str, content: &str, is_error: bool) -> WarpToolCallResult {
    let text = if is_error {
        format!("Error: {}", content)
    } else {
        content.to_string()
    };
    WarpToolCallResult {
        tool_call_id: tool_use_id.to_string(),
        call_mcp_tool: McpToolResult {
            success: McpToolSuccess {
                results: vec![McpResultItem { text }],
            },
        },
    }
}

fn history_message(task_id: &str, body: WarpMessageBody) -> WarpMessage {
    WarpMessage {
        id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        body,
    }
}

fn append_history(messages: &mut Vec<WarpMessage>, turn: &Turn, task_id: &str) {
    match turn.role {
        Role::User => {
            for result in tool_results(turn) {
                messages.push(history_message(task_id, WarpMessageBody::ToolCallResult(result)));
            }
            let content = collect_user_content(turn);
            if content.text.is_empty() && content.image_count == 0 {
                return;
            }
            let mut query = content.text;
            if content.image_count > 0 {
                query.push_str(&format!(
                    "\n[Note: {} image(s) were attached to this message]",
                    content.image_count
                ));
            }
            messages.push(history_message(
                task_id,
                WarpMessageBody::UserQuery(UserQuery {
                    query,
                    ..Default::default()
                }),
            ));
        }
        Role::Assistant => {
            let text = turn.joined_text();
            if !text.is_empty() {
                messages.push(history_message(
                    task_id,
                    WarpMessageBody::AgentOutput(AgentOutput { text }),
                ));
            }
            for segment in &turn.segments {
                if let ContentSegment::ToolUse { id, name, input } = segment {
                    messages.push(history_message(
                        task_id,
                        WarpMessageBody::ToolCall(WarpToolCall {
                            tool_call_id: id.clone(),
                            call_mcp_tool: CallMcpTool {
                                name: name.clone(),
                                args: input.clone(),
                            },
                        }),
                    ));
                }
            }
        }
    }
}

/// 构建本次输入，返回 `(input, 系统指令是否已附加)`
fn build_input(turn: &Turn, system: Option<&str>) -> (WarpInput, bool) {
    let mut inputs: Vec<UserInput> = tool_results(turn).map(UserInput::ToolCallResult).collect();
    let content = collect_user_content(turn);

    let has_query = !content.text.is_empty() || content.image_count > 0 || inputs.is_empty();
    let mut placed_system = false;
    if has_query {
        let mut query = content.text;
        if content.image_count > 0 {
            query.push_str(&format!(
                "\n\n[Note: {} image(s) attached for analysis.]",
                content.image_count
            ));
        }
        let mut referenced_attachments = BTreeMap::new();
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            referenced_attachments.insert(
                SYSTEM_PROMPT_ATTACHMENT.to_string(),
                Attachment {
                    plain_text: system.to_string(),
                },
            );
            placed_system = true;
        }
        inputs.push(UserInput::UserQuery(UserQuery {
            query,
            referenced_attachments,
        }));
    }

    (
        WarpInput {
            context: InputContext {
                images: content.inline_images,
            },
            user_inputs: UserInputs { inputs },
        },
        placed_system,
    )
}

/// 本次输入只有工具结果时，系统指令附加到最近一条历史用户消息
fn attach_system_to_history(messages: &mut [WarpMessage], system: &str) {
    if system.is_empty() {
        return;
    }
    let target = messages.iter_mut().rev().find_map(|m| match &mut m.body {
        WarpMessageBody::UserQuery(query) => Some(query),
        _ => None,
    });
    match target {
        Some(query) => {
            query.referenced_attachments.insert(
                SYSTEM_PROMPT_ATTACHMENT.to_string(),
                Attachment {
                    plain_text: system.to_string(),
                },
            );
        }
        None => tracing::debug!("[BRIDGE] 没有可附加系统指令的用户消息，已忽略"),
    }
}
