//! Token 用量确定
//!
//! 上游有时返回 0 用量。0 对计费敏感的客户端意味着“无成本”，
//! 因此缺失的值按内容长度估算：约 4 个字符一个 token，且至少为 1。

use crate::models::canonical::Usage;

/// 每个 token 的近似字符数
pub const CHARS_PER_TOKEN: usize = 4;

/// 按字符数估算 token 数（至少为 1）
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars / CHARS_PER_TOKEN).unwrap_or(u32::MAX).max(1)
}

/// 确定最终用量，返回 `(usage, 是否包含估算值)`
///
/// 上游两项都非零时原样使用；否则只替换为 0 的那一项：
/// - output = max(1, 输出字符数 / 4)
/// - input = max(1, 请求字符数 / 4)，请求长度未知时为 max(1, output / 2)
pub fn resolve_usage(reported: Usage, request_chars: Option<usize>, output_chars: usize) -> (Usage, bool) {
    if reported.is_reported() {
        return (reported, false);
    }

    let output_tokens = if reported.output_tokens > 0 {
        reported.output_tokens
    } else {
        estimate_tokens(output_chars)
    };
    let input_tokens = if reported.input_tokens > 0 {
        reported.input_tokens
    } else {
        match request_chars {
            Some(chars) => estimate_tokens(chars),
            None => (output_tokens / 2).max(1),
        }
    };

    tracing::debug!(
        "[TRANSLATE] 上游未提供完整用量 ({}/{}), 估算为 {}/{}",
        reported.input_tokens,
        reported.output_tokens,
        input_tokens,
        output_tokens
    );
    (Usage::new(input_tokens, output_tokens), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_usage_passes_through() {
        let (usage, estimated) = resolve_usage(Usage::new(12, 34), Some(4000), 500);
        assert_eq!(usage, Usage::new(12, 34));
        assert!(!estimated);
    }

    #[test]
    fn test_zero_usage_is_estimated() {
        let (usage, estimated) = resolve_usage(Usage::default(), Some(200), 500);
        assert_eq!(usage, Usage::new(50, 125));
        assert!(estimated);
        assert!(usage.total() > 0);
    }

    #[test]
    fn test_unknown_request_size() {
        let (usage, _) = resolve_usage(Usage::default(), None, 500);
        assert_eq!(usage, Usage::new(62, 125));
    }

    #[test]
    fn test_partial_usage_keeps_reported_side() {
        let (usage, estimated) = resolve_usage(Usage::new(80, 0), Some(4), 40);
        assert_eq!(usage, Usage::new(80, 10));
        assert!(estimated);
    }

    #[test]
    fn test_minimum_is_one() {
        assert_eq!(estimate_tokens(0), 1);
        assert_eq!(estimate_tokens(3), 1);
        let (usage, _) = resolve_usage(Usage::default(), Some(0), 0);
        assert_eq!(usage, Usage::new(1, 1));
    }
}
