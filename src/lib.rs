//! Warp 协议桥接
//!
//! 将 OpenAI Chat Completions 与 Anthropic Messages 请求转换为 Warp
//! 多智能体请求包，并把上游 SSE 事件流还原为客户端方言的响应。

pub mod backends;
pub mod config;
pub mod converter;
pub mod credential;
pub mod error;
pub mod logger;
pub mod models;
pub mod processor;
pub mod providers;
pub mod resilience;
pub mod server;
pub mod server_utils;
pub mod stream;
pub mod translator;

pub use config::Config;
pub use error::BridgeError;
pub use processor::ChatProcessor;
