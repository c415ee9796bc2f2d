//! 配额信号识别
//!
//! 区分“配额耗尽”和“普通限流”：不带配额措辞的 429 只说明接口被限流，
//! 不能作为换取新凭证的理由。

use once_cell::sync::Lazy;
use regex::Regex;

/// 配额耗尽相关的 HTTP 状态码
pub const QUOTA_STATUS_CODES: &[u16] = &[429];

/// 配额耗尽相关的错误消息关键词
pub const QUOTA_EXHAUSTED_KEYWORDS: &[&str] = &[
    "quota",
    "no remaining quota",
    "no ai requests remaining",
    "insufficient_quota",
    "配额",
];

static QUOTA_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    let alternation = QUOTA_EXHAUSTED_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{})", alternation)).ok()
});

/// 文本是否表明配额耗尽
pub fn is_quota_context(text: &str) -> bool {
    match QUOTA_PATTERN.as_ref() {
        Some(re) => re.is_match(text),
        None => {
            let lower = text.to_lowercase();
            QUOTA_EXHAUSTED_KEYWORDS.iter().any(|k| lower.contains(k))
        }
    }
}

/// 故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// 配额耗尽（需要配额措辞）
    QuotaExhausted,
    /// 不带配额措辞的限流
    RateLimited,
    /// 认证失败
    AuthenticationFailed,
    /// 服务不可用
    ServiceUnavailable,
    /// 其他错误
    Other,
}

impl FailureType {
    /// 从状态码和错误消息检测故障类型
    pub fn detect(status_code: Option<u16>, error_message: &str) -> Self {
        if is_quota_context(error_message) {
            return FailureType::QuotaExhausted;
        }

        match status_code {
            Some(code) if QUOTA_STATUS_CODES.contains(&code) => FailureType::RateLimited,
            Some(401) | Some(403) => FailureType::AuthenticationFailed,
            Some(code) if (500..=599).contains(&code) || code == 408 => {
                FailureType::ServiceUnavailable
            }
            _ => FailureType::Other,
        }
    }

    /// 是否为配额耗尽
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, FailureType::QuotaExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_quota_context() {
        assert!(is_quota_context("HTTP 429: No remaining quota"));
        assert!(is_quota_context("No AI requests remaining for this period"));
        assert!(is_quota_context("配额已用完"));
        assert!(is_quota_context("QUOTA EXCEEDED"));
        assert!(!is_quota_context("HTTP 429 Too Many Requests"));
        assert!(!is_quota_context("rate limit exceeded"));
    }

    #[test]
    fn test_bare_429_is_rate_limited() {
        assert_eq!(
            FailureType::detect(Some(429), "Too Many Requests"),
            FailureType::RateLimited
        );
    }

    #[test]
    fn test_quota_wording_wins() {
        assert_eq!(
            FailureType::detect(Some(429), "No remaining quota"),
            FailureType::QuotaExhausted
        );
        assert_eq!(
            FailureType::detect(None, "quota exhausted"),
            FailureType::QuotaExhausted
        );
        assert!(FailureType::detect(Some(429), "No remaining quota").is_quota_exhausted());
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(
            FailureType::detect(Some(401), "unauthorized"),
            FailureType::AuthenticationFailed
        );
        assert_eq!(
            FailureType::detect(Some(503), "unavailable"),
            FailureType::ServiceUnavailable
        );
        assert_eq!(FailureType::detect(Some(400), "bad"), FailureType::Other);
    }
}
