//! Anthropic Messages 方言

mod request;
mod response;

pub use request::AnthropicRequestTranslator;
pub use response::AnthropicResponseTranslator;
