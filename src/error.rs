//! 桥接错误类型
//!
//! 定义请求转换、凭证获取、上游调用过程中可能发生的错误。
//! 所有错误均可 `Clone`，以便 single-flight 的多个等待者共享同一个结果。

use thiserror::Error;

/// 桥接错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// 请求格式错误或违反不变量（如悬空的 tool_result 引用）
    #[error("请求校验失败: {0}")]
    Validation(String),

    /// 渲染阶段遇到不支持或不完整的内容（如从未完成的工具调用）
    #[error("协议转换失败: {0}")]
    Translation(String),

    /// 网络错误、超时或上游 5xx
    #[error("上游暂时不可用: {message}")]
    UpstreamTransient {
        message: String,
        status: Option<u16>,
    },

    /// 重试预算耗尽后的配额耗尽
    #[error("配额耗尽: 尝试 {attempts} 次后仍失败 - {message}")]
    QuotaExhausted { attempts: u32, message: String },

    /// 凭证签发接口本身被限流
    #[error("凭证获取被限流: {reason}")]
    AcquisitionRateLimited {
        reason: String,
        retry_after_secs: Option<u64>,
    },

    /// 客户端 API Key 校验失败
    #[error("认证失败: {0}")]
    Authentication(String),

    /// 凭证签发响应异常（仅对本次尝试致命）
    #[error("凭证获取失败: {0}")]
    Acquisition(String),

    /// 不可重试的上游 HTTP 错误
    #[error("上游返回错误 ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl BridgeError {
    /// 创建暂时性上游错误
    pub fn transient(message: impl Into<String>) -> Self {
        Self::UpstreamTransient {
            message: message.into(),
            status: None,
        }
    }

    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::Validation(_) => 400,
            BridgeError::Translation(_) => 422,
            BridgeError::UpstreamTransient { .. } => 502,
            BridgeError::QuotaExhausted { .. } => 429,
            BridgeError::AcquisitionRateLimited { .. } => 429,
            BridgeError::Authentication(_) => 401,
            BridgeError::Acquisition(_) => 502,
            BridgeError::Upstream { status, .. } => *status,
        }
    }

    /// 检查是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::UpstreamTransient { .. })
    }

    /// 获取错误类型字符串（OpenAI 风格）
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "invalid_request_error",
            BridgeError::Translation(_) => "translation_error",
            BridgeError::UpstreamTransient { .. } => "upstream_error",
            BridgeError::QuotaExhausted { .. } => "insufficient_quota",
            BridgeError::AcquisitionRateLimited { .. } => "rate_limit_error",
            BridgeError::Authentication(_) => "authentication_error",
            BridgeError::Acquisition(_) => "acquisition_error",
            BridgeError::Upstream { .. } => "upstream_error",
        }
    }

    /// Anthropic 错误 schema 中的 `error.type`
    pub fn anthropic_error_type(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) | BridgeError::Translation(_) => "invalid_request_error",
            BridgeError::QuotaExhausted { .. } | BridgeError::AcquisitionRateLimited { .. } => {
                "rate_limit_error"
            }
            BridgeError::Authentication(_) => "authentication_error",
            BridgeError::UpstreamTransient { .. } => "overloaded_error",
            BridgeError::Acquisition(_) | BridgeError::Upstream { .. } => "api_error",
        }
    }

    /// 转换为 OpenAI 错误响应
    pub fn to_openai_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code()
            }
        })
    }

    /// 转换为 Anthropic 错误响应
    pub fn to_anthropic_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "error": {
                "type": self.anthropic_error_type(),
                "message": self.to_string()
            }
        })
    }
}
