//! 数据模型
//!
//! - `openai` / `anthropic`: 两种公开方言的请求与响应
//! - `canonical`: 方言无关的内部表示
//! - `warp`: 上游请求包与响应事件

pub mod anthropic;
pub mod canonical;
pub mod openai;
pub mod warp;
