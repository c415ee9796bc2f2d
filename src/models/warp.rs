//! Warp multi-agent 上游数据模型
//!
//! 请求包以 JSON 形式发送给 protobuf 桥接服务，由桥接服务编码为
//! `warp.multi_agent.v1.Request`。响应事件同样以 JSON 形式返回，
//! 字段名可能是 snake_case 或 camelCase，两者都接受。

use serde::{Deserialize, Serialize};

/// 桥接服务请求的消息类型
pub const WARP_REQUEST_MESSAGE_TYPE: &str = "warp.multi_agent.v1.Request";

/// 默认启用的工具：RunShellCommand, SearchCodebase, ReadFiles, ApplyFileDiffs,
/// Grep, ReadMCPResource, CallMCPTool, WriteToLongRunningShellCommand, FileGlobV2
pub const SUPPORTED_TOOLS: [u32; 9] = [2, 3, 5, 6, 9, 11, 12, 13, 15];

/// 发送到桥接服务的请求体
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest<'a> {
    pub json_data: &'a WarpPacket,
    pub message_type: &'static str,
}

impl<'a> BridgeRequest<'a> {
    pub fn new(packet: &'a WarpPacket) -> Self {
        Self {
            json_data: packet,
            message_type: WARP_REQUEST_MESSAGE_TYPE,
        }
    }
}

/// 上游请求包
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpPacket {
    pub task_context: TaskContext,
    pub input: WarpInput,
    pub settings: WarpSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_context: Option<McpContext>,
    pub metadata: WarpMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskContext {
    pub tasks: Vec<WarpTask>,
    pub active_task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpTask {
    pub id: String,
    pub description: String,
    pub status: serde_json::Value,
    pub messages: Vec<WarpMessage>,
}

/// 历史消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpMessage {
    pub id: String,
    pub task_id: String,
    #[serde(flatten)]
    pub body: WarpMessageBody,
}

/// 历史消息体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WarpMessageBody {
    UserQuery(UserQuery),
    AgentOutput(AgentOutput),
    ToolCall(WarpToolCall),
    ToolCallResult(WarpToolCallResult),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub referenced_attachments: std::collections::BTreeMap<String, Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub plain_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentOutput {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpToolCall {
    pub tool_call_id: String,
    pub call_mcp_tool: CallMcpTool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallMcpTool {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpToolCallResult {
    pub tool_call_id: String,
    pub call_mcp_tool: McpToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpToolResult {
    pub success: McpToolSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpToolSuccess {
    pub results: Vec<McpResultItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpResultItem {
    pub text: String,
}

/// 当前输入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WarpInput {
    pub context: InputContext,
    pub user_inputs: UserInputs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InputContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<WarpImage>,
}

/// 输入图片，`data` 形如 `base64:<payload>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserInputs {
    pub inputs: Vec<UserInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UserInput {
    UserQuery(UserQuery),
    ToolCallResult(WarpToolCallResult),
}

/// 模型与功能开关
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpSettings {
    pub model_config: ModelConfig,
    pub rules_enabled: bool,
    pub web_context_retrieval_enabled: bool,
    pub supports_parallel_tool_calls: bool,
    pub planning_enabled: bool,
    pub warp_drive_context_enabled: bool,
    pub supports_create_files: bool,
    pub use_anthropic_text_editor_tools: bool,
    pub supports_long_running_commands: bool,
    pub should_preserve_file_content_in_history: bool,
    pub supports_todos_ui: bool,
    pub supports_linked_code_blocks: bool,
    pub supported_tools: Vec<u32>,
}

impl WarpSettings {
    pub fn with_model(model_config: ModelConfig) -> Self {
        Self {
            model_config,
            rules_enabled: false,
            web_context_retrieval_enabled: false,
            supports_parallel_tool_calls: true,
            planning_enabled: false,
            warp_drive_context_enabled: false,
            supports_create_files: true,
            use_anthropic_text_editor_tools: true,
            supports_long_running_commands: true,
            should_preserve_file_content_in_history: true,
            supports_todos_ui: true,
            supports_linked_code_blocks: true,
            supported_tools: SUPPORTED_TOOLS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub base: String,
    pub planning: String,
    pub coding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct McpContext {
    pub tools: Vec<McpTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarpMetadata {
    pub logging: serde_json::Value,
}

impl Default for WarpMetadata {
    fn default() -> Self {
        Self {
            logging: serde_json::json!({
                "is_autodetected_user_query": true,
                "entrypoint": "USER_INITIATED"
            }),
        }
    }
}

// ============================================================================
// 响应事件
// ============================================================================

/// 桥接服务 SSE 事件外层
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeEnvelope {
    #[serde(default, alias = "parsedData")]
    pub parsed_data: Option<ResponseEvent>,
    /// 桥接服务自身报告的错误
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// 上游响应事件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseEvent {
    #[serde(default)]
    pub init: Option<InitEvent>,
    #[serde(default, alias = "clientActions")]
    pub client_actions: Option<ClientActions>,
    #[serde(default)]
    pub finished: Option<FinishedEvent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InitEvent {
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientActions {
    #[serde(default, alias = "Actions")]
    pub actions: Vec<ClientAction>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientAction {
    #[serde(default, alias = "appendToMessageContent")]
    pub append_to_message_content: Option<AppendToMessageContent>,
    #[serde(default, alias = "addMessagesToTask")]
    pub add_messages_to_task: Option<AddMessagesToTask>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppendToMessageContent {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AddMessagesToTask {
    #[serde(default)]
    pub messages: Vec<ResponseMessage>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseMessage {
    #[serde(default, alias = "agentOutput")]
    pub agent_output: Option<AgentOutput>,
    #[serde(default, alias = "toolCall")]
    pub tool_call: Option<ResponseToolCall>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseToolCall {
    #[serde(default, alias = "toolCallId")]
    pub tool_call_id: Option<String>,
    #[serde(default, alias = "callMcpTool")]
    pub call_mcp_tool: Option<ResponseMcpTool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseMcpTool {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FinishedEvent {
    /// 形如 `{"done": {}}` / `{"max_token_limit": {}}`
    #[serde(default)]
    pub reason: Option<serde_json::Value>,
    #[serde(default, alias = "tokenUsage")]
    pub token_usage: Vec<TokenUsageEntry>,
}

impl FinishedEvent {
    /// 结束原因的名称（reason 对象的第一个键，或字符串本身）
    pub fn reason_name(&self) -> Option<String> {
        match self.reason.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map.keys().next().cloned(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenUsageEntry {
    #[serde(default, alias = "totalInput")]
    pub total_input: u32,
    #[serde(default)]
    pub output: u32,
}
