//! 凭证相关类型定义

use crate::error::BridgeError;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 凭证来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialOrigin {
    /// 由长期 refresh secret 刷新得到
    Personal,
    /// 匿名签发
    Anonymous,
}

impl CredentialOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialOrigin::Personal => "personal",
            CredentialOrigin::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个可用于上游的 bearer 凭证
///
/// 刷新时整体替换，不做原地修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub origin: CredentialOrigin,
    pub acquired_at: DateTime<Utc>,
}

impl Credential {
    /// 创建凭证，获取时间为当前时间
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, origin: CredentialOrigin) -> Self {
        Self {
            token: token.into(),
            expires_at,
            origin,
            acquired_at: Utc::now(),
        }
    }

    /// 剩余有效时间
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// 已存在时长
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.acquired_at
    }

    /// 剩余时间是否超过安全边界
    pub fn is_valid_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        self.remaining(now) > safety_margin
    }

    /// 是否已过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 返回给调用方的有效凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveToken {
    pub token: String,
    pub origin: CredentialOrigin,
}

impl ActiveToken {
    /// Authorization 头的值
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl From<&Credential> for ActiveToken {
    fn from(credential: &Credential) -> Self {
        Self {
            token: credential.token.clone(),
            origin: credential.origin,
        }
    }
}

/// 凭证槽位的对外可见阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPhase {
    Empty,
    Acquiring,
    Valid,
    ExpiringSoon,
    Expired,
    RateLimited,
}

/// 签发接口返回的凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    /// 轮换后的 refresh secret（仅个人凭证）
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// 凭证签发接口
///
/// 网络错误返回 `UpstreamTransient`，响应格式错误返回 `Acquisition`，
/// 签发接口自身限流返回 `AcquisitionRateLimited`。
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// 使用长期 refresh secret 刷新个人凭证
    async fn refresh_personal(&self, refresh_secret: &str) -> Result<IssuedToken, BridgeError>;

    /// 申请匿名凭证
    async fn acquire_anonymous(&self) -> Result<IssuedToken, BridgeError>;
}

/// 读取 JWT 的 `exp` 声明（不校验签名）
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}
