//! Warp 桥接服务 SSE 解析器
//!
//! 桥接服务把 `warp.multi_agent.v1.ResponseEvent` 解码为 JSON 后以 SSE 返回：
//!
//! ```text
//! data: {"parsed_data": {"client_actions": {"actions": [...]}}}
//!
//! data: {"parsed_data": {"finished": {"reason": {"done": {}}}}}
//!
//! data: [DONE]
//! ```
//!
//! 同一事件的多个 `data:` 行直接拼接，空行结束一个事件。

use crate::models::canonical::{StopReason, Usage};
use crate::models::warp::{BridgeEnvelope, FinishedEvent, ResponseEvent, ResponseMessage};
use crate::server_utils::safe_truncate;
use crate::stream::events::UpstreamDelta;

/// 解析器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// 正在接收事件
    Streaming,
    /// 已收到 `[DONE]`
    Done,
}

/// Warp SSE 解析器
#[derive(Debug)]
pub struct WarpSseParser {
    /// 尚未遇到换行的字节
    line_buffer: Vec<u8>,
    /// 当前事件已累积的 data 内容
    pending_data: String,
    state: ParserState,
    /// 已解析的事件数
    event_count: usize,
}

impl Default for WarpSseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WarpSseParser {
    pub fn new() -> Self {
        Self {
            line_buffer: Vec::new(),
            pending_data: String::new(),
            state: ParserState::Streaming,
            event_count: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// 处理一个字节块，返回其中完整事件产生的增量
    pub fn process(&mut self, bytes: &[u8]) -> Vec<UpstreamDelta> {
        let mut deltas = Vec::new();
        if self.is_done() {
            return deltas;
        }

        self.line_buffer.extend_from_slice(bytes);
        while let Some(pos) = self.line_buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.process_line(line, &mut deltas);
            if self.is_done() {
                self.line_buffer.clear();
                break;
            }
        }
        deltas
    }

    /// 流结束：处理缓冲区中剩余的最后一个事件
    pub fn finish(&mut self) -> Vec<UpstreamDelta> {
        let mut deltas = Vec::new();
        if self.is_done() {
            return deltas;
        }
        if !self.line_buffer.is_empty() {
            let rest = std::mem::take(&mut self.line_buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            self.process_line(&line, &mut deltas);
        }
        self.dispatch(&mut deltas);
        deltas
    }

    /// 重置状态
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn process_line(&mut self, line: &str, deltas: &mut Vec<UpstreamDelta>) {
        if line.is_empty() {
            self.dispatch(deltas);
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data == "[DONE]" {
                self.dispatch(deltas);
                self.state = ParserState::Done;
                return;
            }
            self.pending_data.push_str(data);
        }
        // event: / id: / 注释行不携带内容
    }

    fn dispatch(&mut self, deltas: &mut Vec<UpstreamDelta>) {
        if self.pending_data.is_empty() {
            return;
        }
        let payload = std::mem::take(&mut self.pending_data);
        match serde_json::from_str::<BridgeEnvelope>(&payload) {
            Ok(envelope) => {
                self.event_count += 1;
                map_envelope(envelope, deltas);
            }
            Err(e) => {
                tracing::warn!(
                    "[STREAM] 无法解析上游事件: {} - {}",
                    e,
                    safe_truncate(&payload, 200)
                );
            }
        }
    }
}

fn map_envelope(envelope: BridgeEnvelope, deltas: &mut Vec<UpstreamDelta>) {
    if let Some(error) = envelope.error {
        let message = match error {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        deltas.push(UpstreamDelta::Error { message });
        return;
    }

    if let Some(event) = envelope.parsed_data {
        map_response_event(event, deltas);
    }
}

fn map_response_event(event: ResponseEvent, deltas: &mut Vec<UpstreamDelta>) {
    if let Some(init) = event.init {
        tracing::debug!(
            "[STREAM] 上游会话建立: conversation_id={:?}",
            init.conversation_id
        );
        deltas.push(UpstreamDelta::Started {
            conversation_id: init.conversation_id,
        });
    }

    if let Some(client_actions) = event.client_actions {
        for action in client_actions.actions {
            if let Some(text) = action
                .append_to_message_content
                .and_then(|a| a.message)
                .and_then(|m| m.agent_output)
                .map(|o| o.text)
                .filter(|t| !t.is_empty())
            {
                deltas.push(UpstreamDelta::Text(text));
            }

            if let Some(added) = action.add_messages_to_task {
                for message in added.messages {
                    map_added_message(message, deltas);
                }
            }
        }
    }

    if let Some(finished) = event.finished {
        deltas.push(map_finished(&finished));
    }
}

/// 新增消息：工具调用一次性给出完整参数，拆成开始 / 单个参数片段 / 结束
fn map_added_message(message: ResponseMessage, deltas: &mut Vec<UpstreamDelta>) {
    let tool = message.tool_call.and_then(|call| {
        let mcp = call.call_mcp_tool?;
        let name = mcp.name.filter(|n| !n.is_empty())?;
        Some((call.tool_call_id, name, mcp.args))
    });

    if let Some((id, name, args)) = tool {
        // 缺失的 ID 留空，由各方言生成器补全带前缀的 ID
        let id = id.unwrap_or_default();
        let fragment = match args {
            Some(serde_json::Value::Null) | None => "{}".to_string(),
            Some(value) => value.to_string(),
        };
        deltas.push(UpstreamDelta::ToolCallStart {
            id: id.clone(),
            name,
        });
        deltas.push(UpstreamDelta::ToolCallArgs {
            id: id.clone(),
            fragment,
        });
        deltas.push(UpstreamDelta::ToolCallEnd { id });
        return;
    }

    if let Some(text) = message.agent_output.map(|o| o.text).filter(|t| !t.is_empty()) {
        deltas.push(UpstreamDelta::Text(text));
    }
}

fn map_finished(finished: &FinishedEvent) -> UpstreamDelta {
    let stop_reason = match finished.reason_name().as_deref() {
        None | Some("done") => StopReason::EndTurn,
        Some("max_token_limit") | Some("context_window_exceeded") => StopReason::MaxTokens,
        Some(other) => StopReason::Other(other.to_string()),
    };
    let usage = finished
        .token_usage
        .iter()
        .fold(Usage::default(), |acc, entry| {
            Usage::new(
                acc.input_tokens.saturating_add(entry.total_input),
                acc.output_tokens.saturating_add(entry.output),
            )
        });
    UpstreamDelta::Finished { stop_reason, usage }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(json: serde_json::Value) -> String {
        format!("data: {}\n\n", json)
    }

    #[test]
    fn test_text_append() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(
            sse(serde_json::json!({"parsed_data": {"client_actions": {"actions": [
                {"append_to_message_content": {"message": {"agent_output": {"text": "Hello"}}}}
            ]}}}))
            .as_bytes(),
        );
        assert_eq!(deltas, vec![UpstreamDelta::Text("Hello".to_string())]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = WarpSseParser::new();
        let event = sse(serde_json::json!({"parsedData": {"clientActions": {"actions": [
            {"appendToMessageContent": {"message": {"agentOutput": {"text": "你好"}}}}
        ]}}}));
        let bytes = event.as_bytes();
        // 在多字节字符内部切开
        let split = event.find("你").unwrap() + 1;
        assert!(parser.process(&bytes[..split]).is_empty());
        let deltas = parser.process(&bytes[split..]);
        assert_eq!(deltas, vec![UpstreamDelta::Text("你好".to_string())]);
    }

    #[test]
    fn test_tool_call_message() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(
            sse(serde_json::json!({"parsed_data": {"client_actions": {"actions": [
                {"add_messages_to_task": {"messages": [{"tool_call": {
                    "tool_call_id": "call_1",
                    "call_mcp_tool": {"name": "get_weather", "args": {"location": "SF"}}
                }}]}}
            ]}}}))
            .as_bytes(),
        );
        assert_eq!(
            deltas,
            vec![
                UpstreamDelta::ToolCallStart {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string()
                },
                UpstreamDelta::ToolCallArgs {
                    id: "call_1".to_string(),
                    fragment: r#"{"location":"SF"}"#.to_string()
                },
                UpstreamDelta::ToolCallEnd {
                    id: "call_1".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_tool_call_without_id_keeps_id_empty() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(
            sse(serde_json::json!({"parsed_data": {"client_actions": {"actions": [
                {"add_messages_to_task": {"messages": [{"tool_call": {
                    "call_mcp_tool": {"name": "f", "args": {}}
                }}]}}
            ]}}}))
            .as_bytes(),
        );
        assert_eq!(
            deltas[0],
            UpstreamDelta::ToolCallStart {
                id: String::new(),
                name: "f".to_string()
            }
        );
    }

    #[test]
    fn test_finished_reason_and_usage() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(
            sse(serde_json::json!({"parsed_data": {"finished": {
                "reason": {"max_token_limit": {}},
                "token_usage": [{"total_input": 10, "output": 4}, {"totalInput": 5, "output": 1}]
            }}}))
            .as_bytes(),
        );
        assert_eq!(
            deltas,
            vec![UpstreamDelta::Finished {
                stop_reason: StopReason::MaxTokens,
                usage: Usage::new(15, 5)
            }]
        );
    }

    #[test]
    fn test_done_and_error() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(b"data: {\"error\": \"No remaining quota\"}\n\ndata: [DONE]\n\ndata: {}\n\n");
        assert_eq!(
            deltas,
            vec![UpstreamDelta::Error {
                message: "No remaining quota".to_string()
            }]
        );
        assert!(parser.is_done());
        assert!(parser.process(b"data: {}\n\n").is_empty());
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let mut parser = WarpSseParser::new();
        let deltas = parser.process(b"data: {not json\n\n: keepalive\n\n");
        assert!(deltas.is_empty());
        assert_eq!(parser.event_count(), 0);
    }

    #[test]
    fn test_finish_flushes_trailing_event() {
        let mut parser = WarpSseParser::new();
        assert!(parser
            .process(b"data: {\"parsed_data\": {\"finished\": {\"reason\": \"done\"}}}")
            .is_empty());
        let deltas = parser.finish();
        assert!(matches!(
            deltas.as_slice(),
            [UpstreamDelta::Finished {
                stop_reason: StopReason::EndTurn,
                ..
            }]
        ));
    }
}
