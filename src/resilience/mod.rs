//! 容错机制模块
//!
//! 提供配额识别、配额重试和超时控制功能

mod quota;
mod retry;
mod timeout;

pub use quota::{is_quota_context, FailureType, QUOTA_EXHAUSTED_KEYWORDS, QUOTA_STATUS_CODES};
pub use retry::{AttemptError, QuotaRetryPolicy, ResponseMode};
pub use timeout::{next_with_idle_timeout, with_timeout, TimeoutConfig, TimeoutError};
