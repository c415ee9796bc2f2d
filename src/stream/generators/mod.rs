//! SSE 流生成器
//!
//! 将 `CanonicalEvent` 转换为不同前端协议的 SSE 格式。
//!
//! # 支持的格式
//!
//! - OpenAI SSE (data: {...})
//! - Anthropic SSE (event: xxx\ndata: {...})
//!
//! 两个生成器共用 `BlockTracker`：没有对应 `BlockStart` 的增量或结束事件
//! 会被丢弃并记录警告，保证输出的块生命周期始终合法。

pub mod anthropic_sse;
pub mod openai_sse;

pub use anthropic_sse::AnthropicSseGenerator;
pub use openai_sse::OpenAiSseGenerator;

use std::collections::BTreeSet;

/// 块生命周期跟踪
#[derive(Debug, Default)]
pub(crate) struct BlockTracker {
    open: BTreeSet<u32>,
    highest: Option<u32>,
}

impl BlockTracker {
    /// 打开一个块；索引必须大于之前出现过的所有索引
    pub(crate) fn start(&mut self, index: u32) -> bool {
        if self.highest.is_some_and(|h| index <= h) {
            tracing::warn!("[STREAM] 丢弃重复或倒序的 block_start: index={}", index);
            return false;
        }
        self.highest = Some(index);
        self.open.insert(index);
        true
    }

    pub(crate) fn is_open(&self, index: u32) -> bool {
        let open = self.open.contains(&index);
        if !open {
            tracing::warn!("[STREAM] 丢弃未打开块的 block_delta: index={}", index);
        }
        open
    }

    pub(crate) fn stop(&mut self, index: u32) -> bool {
        let removed = self.open.remove(&index);
        if !removed {
            tracing::warn!("[STREAM] 丢弃未打开块的 block_stop: index={}", index);
        }
        removed
    }

    /// 取出所有仍未关闭的块
    pub(crate) fn drain_open(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.open).into_iter().collect()
    }
}
