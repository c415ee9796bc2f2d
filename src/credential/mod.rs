//! 上游凭证生命周期管理模块
//!
//! 提供凭证缓存、分级降级（个人 → 匿名）、签发限流、single-flight 去重，
//! 以及可选的配额耗尽预测。

mod cache;
mod manager;
mod predictor;
mod rate_limiter;
mod types;

pub use cache::{CacheKey, CredentialCache};
pub use manager::{context_fingerprint, CredentialState, TokenManager, TokenStatus};
pub use predictor::{CallOutcome, QuotaLevel, QuotaPrediction, QuotaPredictor};
pub use rate_limiter::{cooldown_duration, AcquisitionRateLimiter, RateLimitDecision};
pub use types::{
    jwt_expiry, ActiveToken, Credential, CredentialOrigin, CredentialPhase, IssuedToken,
    TokenIssuer,
};
