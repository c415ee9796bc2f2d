//! 配置类型定义
//!
//! 所有字段都有默认值，YAML 中缺失的部分使用默认配置补齐。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 根配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// HTTP 服务配置
    pub server: ServerConfig,
    /// Warp 上游配置
    pub warp: WarpConfig,
    /// Token 生命周期配置
    pub token: TokenConfig,
    /// 凭证签发限流配置
    pub rate_limit: RateLimitConfig,
    /// 配额重试配置
    pub retry: QuotaRetryConfig,
    /// 上游调用配置
    pub upstream: UpstreamConfig,
    /// 配额预测配置
    pub predictor: PredictorConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 客户端 API Key，未设置时不做校验
    pub api_key: Option<String>,
    /// 请求体大小上限
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 28889,
            api_key: None,
            body_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Warp 上游配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarpConfig {
    /// 凭证签发服务地址
    pub base_url: String,
    /// protobuf 桥接服务地址
    pub bridge_url: String,
    pub client_version: String,
    pub os_category: String,
    pub os_name: String,
    pub os_version: String,
    /// 个人账号的长期 refresh token
    pub refresh_token: Option<String>,
    /// 预置的 JWT（视为个人凭证）
    pub jwt: Option<String>,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.warp.dev".to_string(),
            bridge_url: "http://127.0.0.1:28888".to_string(),
            client_version: "1.0.0".to_string(),
            os_category: "linux".to_string(),
            os_name: "linux".to_string(),
            os_version: "6.12.8+".to_string(),
            refresh_token: None,
            jwt: None,
        }
    }
}

/// Token 生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenConfig {
    /// 剩余有效期低于该值的 token 视为无效
    pub safety_margin_secs: u64,
    /// 相同错误上下文的去重窗口
    pub dedup_window_secs: u64,
    /// 凭证缓存 TTL（不超过凭证本身的有效期）
    pub cache_ttl_secs: u64,
    /// 匿名 token 被替换前的最短存活时间
    pub min_anonymous_lifetime_secs: u64,
    /// 单次签发请求超时
    pub acquisition_timeout_secs: u64,
    /// 签发响应未给出有效期时的默认值
    pub default_token_lifetime_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 300,
            dedup_window_secs: 300,
            cache_ttl_secs: 3600,
            min_anonymous_lifetime_secs: 1800,
            acquisition_timeout_secs: 30,
            default_token_lifetime_secs: 3600,
        }
    }
}

/// 凭证签发限流配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    /// 两次签发之间的最小间隔
    pub min_interval_secs: u64,
    /// 连续失败达到该次数后进入冷却
    pub failure_threshold: u32,
    pub base_cooldown_secs: u64,
    pub max_backoff_exponent: u32,
    pub max_cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_hour: 10,
            max_per_day: 50,
            min_interval_secs: 60,
            failure_threshold: 5,
            base_cooldown_secs: 300,
            max_backoff_exponent: 4,
            max_cooldown_secs: 3600,
        }
    }
}

/// 配额重试配置
///
/// 第 n 次重试的等待时间为 `base_delay_ms + n * increment_ms`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaRetryConfig {
    pub base_delay_ms: u64,
    pub increment_ms: u64,
    /// 非流式请求最大尝试次数
    pub buffered_max_attempts: u32,
    /// 流式请求最大尝试次数
    pub streaming_max_attempts: u32,
}

impl Default for QuotaRetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            increment_ms: 2000,
            buffered_max_attempts: 5,
            streaming_max_attempts: 2,
        }
    }
}

/// 上游调用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// 流式响应两个 chunk 之间的最大空闲时间
    pub stream_idle_timeout_secs: u64,
    pub default_model: String,
    /// 额外的模型别名，优先于内置映射
    pub model_aliases: HashMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 180,
            connect_timeout_secs: 5,
            stream_idle_timeout_secs: 120,
            default_model: "claude-4-sonnet".to_string(),
            model_aliases: HashMap::new(),
        }
    }
}

/// 配额预测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictorConfig {
    pub enabled: bool,
    pub window_secs: u64,
    pub min_confidence: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: 300,
            min_confidence: 0.7,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认日志级别（RUST_LOG 优先）
    pub level: String,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
