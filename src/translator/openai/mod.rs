//! OpenAI Chat Completions 方言

mod request;
mod response;

pub use request::OpenAiRequestTranslator;
pub use response::OpenAiResponseTranslator;
