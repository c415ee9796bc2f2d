//! 上游增量 → 规范化事件 状态机
//!
//! 规则：
//! 1. 第一个上游内容到达时发出一次 `TurnStart`
//! 2. 内容类型切换（文本 / 工具调用）时先关闭旧块再打开新块；同类型连续内容不重新开块
//! 3. 工具参数片段累积在缓冲区中，只在块结束时解析校验；到结束仍不完整视为转换错误
//! 4. `TurnStop` 恰好一次，在关闭所有未关闭的块之后，携带停止原因与用量
//! 5. 异常结束（断流、上游中途报错）关闭未关闭的块，发出错误事件，仍然发出 `TurnStop`

use crate::error::BridgeError;
use crate::models::canonical::{StopReason, Usage};
use crate::resilience::is_quota_context;
use crate::stream::events::{BlockKind, CanonicalEvent, DeltaPayload, UpstreamDelta};
use crate::translator::content::parse_tool_arguments;
use crate::translator::usage::{estimate_tokens, resolve_usage};
use std::collections::HashMap;
use uuid::Uuid;

/// 当前打开的块
#[derive(Debug)]
enum OpenBlock {
    Text {
        index: u32,
    },
    Tool {
        index: u32,
        id: String,
        name: String,
        /// 累积的参数 JSON
        input: String,
    },
}

impl OpenBlock {
    fn index(&self) -> u32 {
        match self {
            OpenBlock::Text { index } | OpenBlock::Tool { index, .. } => *index,
        }
    }
}

/// 单个流的状态机
///
/// 状态只属于一个请求，不跨请求共享。
#[derive(Debug)]
pub struct StreamTransformer {
    response_id: String,
    model: String,
    /// 请求内容字符数，用于用量估算
    request_chars: Option<usize>,
    turn_started: bool,
    turn_stopped: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    /// 在工具调用开始之前到达的参数片段
    pending_args: HashMap<String, String>,
    output_chars: usize,
    tool_calls: usize,
    usage_estimated: bool,
    failure: Option<BridgeError>,
}

impl StreamTransformer {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), model)
    }

    /// 使用指定的响应 ID 创建
    pub fn with_id(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            response_id: id.into(),
            model: model.into(),
            request_chars: None,
            turn_started: false,
            turn_stopped: false,
            next_index: 0,
            open: None,
            pending_args: HashMap::new(),
            output_chars: 0,
            tool_calls: 0,
            usage_estimated: false,
            failure: None,
        }
    }

    /// 设置请求内容字符数
    pub fn with_request_chars(mut self, chars: usize) -> Self {
        self.request_chars = Some(chars);
        self
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 是否已发出 `TurnStop`
    pub fn is_finished(&self) -> bool {
        self.turn_stopped
    }

    /// 最终用量是否包含估算值
    pub fn usage_estimated(&self) -> bool {
        self.usage_estimated
    }

    /// 导致本轮异常结束的错误
    pub fn failure(&self) -> Option<&BridgeError> {
        self.failure.as_ref()
    }

    /// 处理一个上游增量
    pub fn push(&mut self, delta: UpstreamDelta) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if self.turn_stopped {
            tracing::debug!("[STREAM] 本轮已结束，忽略上游增量: {:?}", delta);
            return events;
        }

        match delta {
            UpstreamDelta::Started { .. } => self.ensure_turn_started(&mut events),
            UpstreamDelta::Text(text) => self.push_text(text, &mut events),
            UpstreamDelta::ToolCallStart { id, name } => self.start_tool(id, name, &mut events),
            UpstreamDelta::ToolCallArgs { id, fragment } => {
                self.push_tool_args(id, fragment, &mut events)
            }
            UpstreamDelta::ToolCallEnd { id } => {
                if matches!(&self.open, Some(OpenBlock::Tool { id: open_id, .. }) if *open_id == id)
                {
                    self.close_open(&mut events);
                }
            }
            UpstreamDelta::Finished { stop_reason, usage } => {
                self.finish_turn(stop_reason, usage, &mut events)
            }
            UpstreamDelta::Error { message } => {
                let error = if is_quota_context(&message) {
                    BridgeError::QuotaExhausted {
                        attempts: 1,
                        message,
                    }
                } else {
                    BridgeError::transient(message)
                };
                self.fail(error, &mut events);
            }
        }

        events
    }

    /// 上游流正常结束但没有结束事件
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if !self.turn_stopped {
            self.finish_turn(StopReason::EndTurn, Usage::default(), &mut events);
        }
        events
    }

    /// 异常结束：断流、超时或上游错误
    pub fn abort(&mut self, error: BridgeError) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if !self.turn_stopped {
            self.fail(error, &mut events);
        }
        events
    }

    fn ensure_turn_started(&mut self, events: &mut Vec<CanonicalEvent>) {
        if self.turn_started {
            return;
        }
        self.turn_started = true;
        events.push(CanonicalEvent::TurnStart {
            id: self.response_id.clone(),
            model: self.model.clone(),
            input_tokens: self.request_chars.map(estimate_tokens),
        });
    }

    fn push_text(&mut self, text: String, events: &mut Vec<CanonicalEvent>) {
        if text.is_empty() {
            return;
        }
        self.ensure_turn_started(events);

        let index = if let Some(OpenBlock::Text { index }) = self.open {
            index
        } else {
            if !self.close_open(events) {
                return;
            }
            let index = self.open_block(BlockKind::Text, events);
            self.open = Some(OpenBlock::Text { index });
            index
        };

        self.output_chars += text.chars().count();
        events.push(CanonicalEvent::BlockDelta {
            index,
            payload: DeltaPayload::Text(text),
        });
    }

    fn start_tool(&mut self, id: String, name: String, events: &mut Vec<CanonicalEvent>) {
        self.ensure_turn_started(events);
        if !self.close_open(events) {
            return;
        }

        let index = self.open_block(
            BlockKind::ToolUse {
                id: id.clone(),
                name: name.clone(),
            },
            events,
        );
        self.tool_calls += 1;
        self.open = Some(OpenBlock::Tool {
            index,
            id: id.clone(),
            name,
            input: String::new(),
        });

        if let Some(early) = self.pending_args.remove(&id) {
            self.append_tool_input(early, events);
        }
    }

    fn push_tool_args(&mut self, id: String, fragment: String, events: &mut Vec<CanonicalEvent>) {
        if fragment.is_empty() {
            return;
        }
        let is_open = matches!(&self.open, Some(OpenBlock::Tool { id: open_id, .. }) if *open_id == id);
        if is_open {
            self.append_tool_input(fragment, events);
        } else {
            // 调用尚未确认，先缓存
            self.pending_args.entry(id).or_default().push_str(&fragment);
        }
    }

    fn append_tool_input(&mut self, fragment: String, events: &mut Vec<CanonicalEvent>) {
        if let Some(OpenBlock::Tool { index, input, .. }) = &mut self.open {
            input.push_str(&fragment);
            self.output_chars += fragment.chars().count();
            events.push(CanonicalEvent::BlockDelta {
                index: *index,
                payload: DeltaPayload::ToolInput(fragment),
            });
        }
    }

    fn open_block(&mut self, kind: BlockKind, events: &mut Vec<CanonicalEvent>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        events.push(CanonicalEvent::BlockStart { index, kind });
        index
    }

    /// 关闭当前块；工具参数不完整时本轮以错误结束，返回 false
    fn close_open(&mut self, events: &mut Vec<CanonicalEvent>) -> bool {
        let Some(block) = self.open.take() else {
            return true;
        };
        events.push(CanonicalEvent::BlockStop {
            index: block.index(),
        });

        if let OpenBlock::Tool { id, name, input, .. } = block {
            if let Err(e) = parse_tool_arguments(&input) {
                tracing::warn!(
                    "[STREAM] 工具调用 {} ({}) 的参数不完整: {}",
                    name,
                    id,
                    e.message
                );
                self.fail(
                    BridgeError::Translation(format!(
                        "工具调用 {} 的参数不完整: {}",
                        name, e.message
                    )),
                    events,
                );
                return false;
            }
        }
        true
    }

    fn finish_turn(&mut self, stop_reason: StopReason, reported: Usage, events: &mut Vec<CanonicalEvent>) {
        self.ensure_turn_started(events);
        if !self.close_open(events) {
            return;
        }

        if !self.pending_args.is_empty() {
            let ids: Vec<&str> = self.pending_args.keys().map(String::as_str).collect();
            let message = format!("工具调用参数从未确认: {}", ids.join(", "));
            self.fail(BridgeError::Translation(message), events);
            return;
        }

        let stop_reason = match stop_reason {
            StopReason::EndTurn if self.tool_calls > 0 => StopReason::ToolUse,
            other => other,
        };
        let (usage, estimated) = resolve_usage(reported, self.request_chars, self.output_chars);
        self.usage_estimated = estimated;

        tracing::debug!(
            "[STREAM] 本轮结束: stop_reason={:?}, blocks={}, usage={}/{}, estimated={}",
            stop_reason,
            self.next_index,
            usage.input_tokens,
            usage.output_tokens,
            estimated
        );

        events.push(CanonicalEvent::TurnDelta { stop_reason, usage });
        events.push(CanonicalEvent::TurnStop);
        self.turn_stopped = true;
    }

    fn fail(&mut self, error: BridgeError, events: &mut Vec<CanonicalEvent>) {
        self.ensure_turn_started(events);
        if let Some(block) = self.open.take() {
            events.push(CanonicalEvent::BlockStop {
                index: block.index(),
            });
        }
        tracing::warn!("[STREAM] 流异常结束: {}", error);
        events.push(CanonicalEvent::Error(error.clone()));
        events.push(CanonicalEvent::TurnStop);
        self.failure = Some(error);
        self.turn_stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_support::lifecycle_violation;

    fn run(transformer: &mut StreamTransformer, deltas: Vec<UpstreamDelta>) -> Vec<CanonicalEvent> {
        let mut events: Vec<CanonicalEvent> = deltas
            .into_iter()
            .flat_map(|d| transformer.push(d))
            .collect();
        events.extend(transformer.finish());
        events
    }

    fn text(s: &str) -> UpstreamDelta {
        UpstreamDelta::Text(s.to_string())
    }

    #[test]
    fn test_contiguous_text_uses_one_block() {
        let mut t = StreamTransformer::with_id("r1", "claude-4-sonnet");
        let events = run(&mut t, vec![text("Hel"), text("lo")]);
        assert_eq!(
            events[..4],
            [
                CanonicalEvent::TurnStart {
                    id: "r1".to_string(),
                    model: "claude-4-sonnet".to_string(),
                    input_tokens: None
                },
                CanonicalEvent::BlockStart {
                    index: 0,
                    kind: BlockKind::Text
                },
                CanonicalEvent::BlockDelta {
                    index: 0,
                    payload: DeltaPayload::Text("Hel".to_string())
                },
                CanonicalEvent::BlockDelta {
                    index: 0,
                    payload: DeltaPayload::Text("lo".to_string())
                },
            ]
        );
        assert_eq!(events[4], CanonicalEvent::BlockStop { index: 0 });
        assert!(matches!(
            events[5],
            CanonicalEvent::TurnDelta {
                stop_reason: StopReason::EndTurn,
                ..
            }
        ));
        assert_eq!(events[6], CanonicalEvent::TurnStop);
        assert!(lifecycle_violation(&events).is_none());
    }

    #[test]
    fn test_split_tool_arguments_form_one_block() {
        let mut t = StreamTransformer::new("claude-4-sonnet");
        let events = run(
            &mut t,
            vec![
                UpstreamDelta::ToolCallStart {
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                },
                UpstreamDelta::ToolCallArgs {
                    id: "toolu_1".to_string(),
                    fragment: "{\"loc".to_string(),
                },
                UpstreamDelta::ToolCallArgs {
                    id: "toolu_1".to_string(),
                    fragment: "ation\":\"SF\"}".to_string(),
                },
                UpstreamDelta::Finished {
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::new(20, 8),
                },
            ],
        );

        let starts = events
            .iter()
            .filter(|e| matches!(e, CanonicalEvent::BlockStart { .. }))
            .count();
        assert_eq!(starts, 1);
        assert!(events.contains(&CanonicalEvent::TurnDelta {
            stop_reason: StopReason::ToolUse,
            usage: Usage::new(20, 8)
        }));
        assert!(t.failure().is_none());
    }

    #[test]
    fn test_kind_switch_closes_previous_block() {
        let mut t = StreamTransformer::new("m");
        let events = run(
            &mut t,
            vec![
                text("let me check"),
                UpstreamDelta::ToolCallStart {
                    id: "t1".to_string(),
                    name: "ls".to_string(),
                },
                UpstreamDelta::ToolCallArgs {
                    id: "t1".to_string(),
                    fragment: "{}".to_string(),
                },
                UpstreamDelta::ToolCallEnd {
                    id: "t1".to_string(),
                },
                text("done"),
            ],
        );
        let indices: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::BlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let stop_pos = events
            .iter()
            .position(|e| *e == CanonicalEvent::BlockStop { index: 0 })
            .unwrap();
        let start_pos = events
            .iter()
            .position(|e| matches!(e, CanonicalEvent::BlockStart { index: 1, .. }))
            .unwrap();
        assert!(stop_pos < start_pos);
        assert!(lifecycle_violation(&events).is_none());
    }

    #[test]
    fn test_incomplete_tool_arguments_is_translation_error() {
        let mut t = StreamTransformer::new("m");
        let events = run(
            &mut t,
            vec![
                UpstreamDelta::ToolCallStart {
                    id: "t1".to_string(),
                    name: "get_weather".to_string(),
                },
                UpstreamDelta::ToolCallArgs {
                    id: "t1".to_string(),
                    fragment: "{\"loc".to_string(),
                },
            ],
        );
        assert!(matches!(t.failure(), Some(BridgeError::Translation(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::Error(BridgeError::Translation(_)))));
        assert_eq!(events.last(), Some(&CanonicalEvent::TurnStop));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::TurnDelta { .. })));
        assert!(lifecycle_violation(&events).is_none());
    }

    #[test]
    fn test_early_arguments_are_buffered() {
        let mut t = StreamTransformer::new("m");
        let events = run(
            &mut t,
            vec![
                UpstreamDelta::ToolCallArgs {
                    id: "t1".to_string(),
                    fragment: "{\"a\":1}".to_string(),
                },
                UpstreamDelta::ToolCallStart {
                    id: "t1".to_string(),
                    name: "f".to_string(),
                },
            ],
        );
        assert!(events.contains(&CanonicalEvent::BlockDelta {
            index: 0,
            payload: DeltaPayload::ToolInput("{\"a\":1}".to_string())
        }));
        assert!(t.failure().is_none());
    }

    #[test]
    fn test_never_confirmed_arguments_fail() {
        let mut t = StreamTransformer::new("m");
        run(
            &mut t,
            vec![UpstreamDelta::ToolCallArgs {
                id: "ghost".to_string(),
                fragment: "{}".to_string(),
            }],
        );
        assert!(matches!(t.failure(), Some(BridgeError::Translation(m)) if m.contains("ghost")));
    }

    #[test]
    fn test_abort_after_block_start_still_terminates() {
        let mut t = StreamTransformer::new("m");
        let mut events = t.push(text("partial"));
        events.extend(t.abort(BridgeError::transient("connection reset")));
        assert_eq!(
            events[events.len() - 3..],
            [
                CanonicalEvent::BlockStop { index: 0 },
                CanonicalEvent::Error(BridgeError::transient("connection reset")),
                CanonicalEvent::TurnStop,
            ]
        );
        assert!(t.is_finished());
        assert!(t.finish().is_empty());
        assert!(t.push(text("late")).is_empty());
    }

    #[test]
    fn test_upstream_error_classification() {
        let mut t = StreamTransformer::new("m");
        t.push(UpstreamDelta::Error {
            message: "No remaining quota".to_string(),
        });
        assert!(matches!(t.failure(), Some(BridgeError::QuotaExhausted { .. })));

        let mut t = StreamTransformer::new("m");
        t.push(UpstreamDelta::Error {
            message: "internal".to_string(),
        });
        assert!(matches!(t.failure(), Some(BridgeError::UpstreamTransient { .. })));
    }

    #[test]
    fn test_zero_usage_is_estimated() {
        let mut t = StreamTransformer::new("m").with_request_chars(40);
        let events = run(
            &mut t,
            vec![
                text(&"a".repeat(500)),
                UpstreamDelta::Finished {
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::default(),
                },
            ],
        );
        let usage = events
            .iter()
            .find_map(|e| match e {
                CanonicalEvent::TurnDelta { usage, .. } => Some(*usage),
                _ => None,
            })
            .unwrap();
        assert_eq!(usage, Usage::new(10, 125));
    }

    #[test]
    fn test_empty_stream_is_well_formed() {
        let mut t = StreamTransformer::new("m");
        let events = t.finish();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], CanonicalEvent::TurnStart { .. }));
        assert_eq!(events[2], CanonicalEvent::TurnStop);
    }
}
