//! 规范化事件 → 非流式响应
//!
//! 非流式请求同样走上游流式接口，由聚合器把事件序列收拢为 `CanonicalResponse`。

use crate::error::BridgeError;
use crate::models::canonical::{CanonicalResponse, ContentSegment, StopReason, Usage};
use crate::stream::events::{BlockKind, CanonicalEvent, DeltaPayload};
use crate::translator::content::parse_tool_arguments;

/// 正在构建的块
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Tool {
        id: String,
        name: String,
        input: String,
    },
}

/// 响应聚合器
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    id: String,
    model: String,
    segments: Vec<ContentSegment>,
    current: Option<(u32, PartialBlock)>,
    stop_reason: StopReason,
    usage: Usage,
    error: Option<BridgeError>,
    finished: bool,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 消费一个事件
    pub fn push(&mut self, event: &CanonicalEvent) {
        match event {
            CanonicalEvent::TurnStart { id, model, .. } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            CanonicalEvent::BlockStart { index, kind } => {
                let block = match kind {
                    BlockKind::Text => PartialBlock::Text(String::new()),
                    BlockKind::ToolUse { id, name } => PartialBlock::Tool {
                        id: id.clone(),
                        name: name.clone(),
                        input: String::new(),
                    },
                };
                self.current = Some((*index, block));
            }
            CanonicalEvent::BlockDelta { index, payload } => match (&mut self.current, payload) {
                (Some((open, PartialBlock::Text(text))), DeltaPayload::Text(delta)) if *open == *index => {
                    text.push_str(delta)
                }
                (Some((open, PartialBlock::Tool { input, .. })), DeltaPayload::ToolInput(delta))
                    if *open == *index =>
                {
                    input.push_str(delta)
                }
                _ => tracing::warn!("[STREAM] 聚合时丢弃不匹配的 block_delta: index={}", index),
            },
            CanonicalEvent::BlockStop { index } => {
                match self.current.take() {
                    Some((open, block)) if open == *index => self.complete_block(block),
                    other => {
                        self.current = other;
                        tracing::warn!("[STREAM] 聚合时丢弃不匹配的 block_stop: index={}", index);
                    }
                }
            }
            CanonicalEvent::TurnDelta { stop_reason, usage } => {
                self.stop_reason = stop_reason.clone();
                self.usage = *usage;
            }
            CanonicalEvent::TurnStop => self.finished = true,
            CanonicalEvent::Error(error) => {
                if self.error.is_none() {
                    self.error = Some(error.clone());
                }
            }
        }
    }

    fn complete_block(&mut self, block: PartialBlock) {
        match block {
            PartialBlock::Text(text) => {
                if !text.is_empty() {
                    self.segments.push(ContentSegment::Text(text));
                }
            }
            PartialBlock::Tool { id, name, input } => match parse_tool_arguments(&input) {
                Ok(input) => self.segments.push(ContentSegment::ToolUse { id, name, input }),
                Err(e) => {
                    if self.error.is_none() {
                        self.error = Some(BridgeError::Translation(format!(
                            "工具调用 {} 的参数不完整: {}",
                            name, e.message
                        )));
                    }
                }
            },
        }
    }

    /// 生成最终响应；流中出现错误或没有正常结束时返回错误
    pub fn finish(self) -> Result<CanonicalResponse, BridgeError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !self.finished {
            return Err(BridgeError::transient("上游流在本轮结束前中断"));
        }
        Ok(CanonicalResponse {
            id: self.id,
            model: self.model,
            segments: self.segments,
            stop_reason: self.stop_reason,
            usage: self.usage,
            usage_estimated: false,
        })
    }
}
