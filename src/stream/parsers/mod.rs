//! 上游流解析器
//!
//! 解析上游的流式响应格式，输出 `UpstreamDelta`。
//!
//! # 支持的格式
//!
//! - Warp 桥接服务 SSE (`data: {"parsed_data": ...}`)

pub mod warp_sse;

pub use warp_sse::{ParserState, WarpSseParser};
