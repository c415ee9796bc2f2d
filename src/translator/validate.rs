//! 规范化请求的不变量校验

use super::traits::TranslateError;
use crate::models::canonical::{CanonicalRequest, ContentSegment, Role};
use std::collections::HashSet;

/// 校验规范化请求
///
/// - 至少一个轮次
/// - `tool_use` 只出现在 assistant 轮次，`tool_result` 只出现在 user 轮次
/// - `tool_use.input` 必须是 JSON object，id 不得重复
/// - 每个 `tool_result` 引用的 id 必须在之前（同一轮次更早的片段或更早的轮次）出现过
pub fn validate_request(request: &CanonicalRequest) -> Result<(), TranslateError> {
    if request.turns.is_empty() {
        return Err(TranslateError::validation("messages 不能为空"));
    }

    let mut seen_tool_uses: HashSet<&str> = HashSet::new();

    for (turn_idx, turn) in request.turns.iter().enumerate() {
        for segment in &turn.segments {
            match segment {
                ContentSegment::ToolUse { id, input, .. } => {
                    if turn.role != Role::Assistant {
                        return Err(TranslateError::validation(format!(
                            "messages[{}]: tool_use 只能出现在 assistant 消息中",
                            turn_idx
                        )));
                    }
                    if !input.is_object() {
                        return Err(TranslateError::validation(format!(
                            "messages[{}]: tool_use {} 的 input 必须是 object",
                            turn_idx, id
                        )));
                    }
                    if !seen_tool_uses.insert(id.as_str()) {
                        return Err(TranslateError::validation(format!(
                            "messages[{}]: 重复的 tool_use id {}",
                            turn_idx, id
                        )));
                    }
                }
                ContentSegment::ToolResult { tool_use_id, .. } => {
                    if turn.role != Role::User {
                        return Err(TranslateError::validation(format!(
                            "messages[{}]: tool_result 只能出现在 user 消息中",
                            turn_idx
                        )));
                    }
                    if !seen_tool_uses.contains(tool_use_id.as_str()) {
                        return Err(TranslateError::validation(format!(
                            "messages[{}]: tool_result 引用了不存在的 tool_use id {}",
                            turn_idx, tool_use_id
                        )));
                    }
                }
                ContentSegment::Text(_) | ContentSegment::Image(_) => {}
            }
        }
    }

    Ok(())
}
