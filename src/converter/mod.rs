//! 上游请求包转换
//!
//! 将规范化请求转换为 Warp multi-agent 请求包。

pub mod canonical_to_warp;

pub use canonical_to_warp::{get_supported_models, PacketBuilder};
