//! 流式处理层
//!
//! 提供统一的流式数据处理能力，包括：
//! - 事件类型定义 (events)
//! - 上游流格式解析 (parsers)
//! - 块生命周期状态机 (transformer)
//! - 前端流格式生成 (generators)
//! - 非流式响应聚合 (aggregator)
//!
//! # 架构设计
//!
//! ```text
//! 上游字节流 ──> [WarpSseParser] ──> UpstreamDelta ──> [StreamTransformer] ──> CanonicalEvent
//!
//! CanonicalEvent ──> [AnthropicSseGenerator] ──> Anthropic SSE
//! CanonicalEvent ──> [OpenAiSseGenerator]    ──> OpenAI SSE
//! CanonicalEvent ──> [ResponseAggregator]    ──> CanonicalResponse
//! ```

pub mod aggregator;
pub mod events;
pub mod generators;
pub mod parsers;
pub mod pipeline;
pub mod transformer;

// 重新导出核心类型
pub use aggregator::ResponseAggregator;
pub use events::{BlockKind, CanonicalEvent, DeltaPayload, UpstreamDelta};
pub use generators::{AnthropicSseGenerator, OpenAiSseGenerator};
pub use parsers::{ParserState, WarpSseParser};
pub use pipeline::{collect_response, create_sse_stream, StreamPipeline};
pub use transformer::StreamTransformer;

#[cfg(test)]
pub(crate) mod test_support {
    use super::events::{BlockKind, CanonicalEvent, DeltaPayload};
    use crate::error::BridgeError;
    use crate::models::canonical::{StopReason, Usage};
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// 检查事件序列的块生命周期，返回第一处违规
    pub(crate) fn lifecycle_violation(events: &[CanonicalEvent]) -> Option<String> {
        if !matches!(events.first(), Some(CanonicalEvent::TurnStart { .. })) {
            return Some("第一个事件不是 TurnStart".to_string());
        }
        let mut open = HashSet::new();
        let mut highest: Option<u32> = None;
        let mut stops = 0;
        for (pos, event) in events.iter().enumerate() {
            match event {
                CanonicalEvent::BlockStart { index, .. } => {
                    if highest.is_some_and(|h| *index <= h) {
                        return Some(format!("{}: 索引 {} 倒序", pos, index));
                    }
                    highest = Some(*index);
                    open.insert(*index);
                }
                CanonicalEvent::BlockDelta { index, .. } if !open.contains(index) => {
                    return Some(format!("{}: 块 {} 未打开就有增量", pos, index));
                }
                CanonicalEvent::BlockStop { index } if !open.remove(index) => {
                    return Some(format!("{}: 块 {} 未打开就结束", pos, index));
                }
                CanonicalEvent::TurnStop => {
                    stops += 1;
                    if !open.is_empty() {
                        return Some(format!("{}: TurnStop 时仍有未关闭的块", pos));
                    }
                }
                _ => {}
            }
        }
        if stops != 1 || events.last() != Some(&CanonicalEvent::TurnStop) {
            return Some(format!("TurnStop 出现 {} 次或不在末尾", stops));
        }
        None
    }

    /// 任意事件序列：正常结束、错误结束，或缺少 TurnStop（最后一个块也未关闭）
    pub(crate) fn arb_event_sequence() -> impl Strategy<Value = Vec<CanonicalEvent>> {
        let blocks = prop::collection::vec(
            (
                any::<bool>(),
                prop::collection::vec("[a-z{}:\" ]{0,6}", 0..4),
            ),
            0..5,
        );
        (blocks, 0u8..3).prop_map(|(blocks, ending)| {
            let mut events = vec![CanonicalEvent::TurnStart {
                id: "t".to_string(),
                model: "m".to_string(),
                input_tokens: None,
            }];
            let count = blocks.len();
            for (i, (is_text, deltas)) in blocks.into_iter().enumerate() {
                let index = i as u32;
                let kind = if is_text {
                    BlockKind::Text
                } else {
                    BlockKind::ToolUse {
                        id: format!("toolu_{}", i),
                        name: "f".to_string(),
                    }
                };
                events.push(CanonicalEvent::BlockStart { index, kind });
                for delta in deltas {
                    let payload = if is_text {
                        DeltaPayload::Text(delta)
                    } else {
                        DeltaPayload::ToolInput(delta)
                    };
                    events.push(CanonicalEvent::BlockDelta { index, payload });
                }
                if i + 1 < count || ending == 0 {
                    events.push(CanonicalEvent::BlockStop { index });
                }
            }
            match ending {
                0 => {
                    events.push(CanonicalEvent::TurnDelta {
                        stop_reason: StopReason::EndTurn,
                        usage: Usage::new(1, 1),
                    });
                    events.push(CanonicalEvent::TurnStop);
                }
                1 => {
                    events.push(CanonicalEvent::Error(BridgeError::transient("reset")));
                    events.push(CanonicalEvent::TurnStop);
                }
                _ => {}
            }
            events
        })
    }
}
