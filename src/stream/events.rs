//! 统一流事件类型
//!
//! 定义流式传输的中间表示，用于解耦上游解析与方言渲染。
//!
//! # 设计原则
//!
//! - 上游解析器输出 `UpstreamDelta`（顺序不一定与最终块边界对齐）
//! - `StreamTransformer` 将其整理为块生命周期良好的 `CanonicalEvent`
//! - 各方言的生成器只消费 `CanonicalEvent`

use crate::error::BridgeError;
use crate::models::canonical::{StopReason, Usage};

/// 上游增量
///
/// 由上游解析器产生，尚未整理成块。
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamDelta {
    /// 上游会话已建立
    Started {
        conversation_id: Option<String>,
    },
    /// 文本增量
    Text(String),
    /// 工具调用开始
    ToolCallStart { id: String, name: String },
    /// 工具调用参数片段（部分 JSON）
    ToolCallArgs { id: String, fragment: String },
    /// 工具调用参数传输完成
    ToolCallEnd { id: String },
    /// 本轮结束
    Finished {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// 上游在流中报告的错误
    Error { message: String },
}

/// 规范化流事件
///
/// 不变量：
/// - 同一 index 的 `BlockStart` 先于它的 `BlockDelta` / `BlockStop`
/// - 一轮之内 index 单调不减
/// - 恰好一个 `TurnStop` 结束一个完整的流
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    /// 本轮开始
    TurnStart {
        /// 规范化响应 ID（不带方言前缀）
        id: String,
        /// 模型名称
        model: String,
        /// 已知的输入 token 数
        input_tokens: Option<u32>,
    },

    /// 内容块开始
    BlockStart { index: u32, kind: BlockKind },

    /// 内容块增量
    BlockDelta { index: u32, payload: DeltaPayload },

    /// 内容块结束
    BlockStop { index: u32 },

    /// 停止原因与最终用量
    TurnDelta {
        stop_reason: StopReason,
        usage: Usage,
    },

    /// 本轮结束
    TurnStop,

    /// 流中错误
    Error(BridgeError),
}

impl CanonicalEvent {
    /// 事件关联的块索引
    pub fn block_index(&self) -> Option<u32> {
        match self {
            CanonicalEvent::BlockStart { index, .. }
            | CanonicalEvent::BlockDelta { index, .. }
            | CanonicalEvent::BlockStop { index } => Some(*index),
            _ => None,
        }
    }
}

/// 内容块类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// 文本内容
    Text,
    /// 工具调用
    ToolUse {
        /// 工具调用 ID
        id: String,
        /// 工具名称
        name: String,
    },
}

impl BlockKind {
    pub fn is_text(&self) -> bool {
        matches!(self, BlockKind::Text)
    }
}

/// 块增量内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaPayload {
    /// 文本片段
    Text(String),
    /// 工具参数的部分 JSON
    ToolInput(String),
}

impl DeltaPayload {
    pub fn as_str(&self) -> &str {
        match self {
            DeltaPayload::Text(s) | DeltaPayload::ToolInput(s) => s,
        }
    }
}
