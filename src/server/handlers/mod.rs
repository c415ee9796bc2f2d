//! 请求处理器

mod chat;
mod status;

pub use chat::{chat_completions, messages};
pub use status::{healthz, list_models};
